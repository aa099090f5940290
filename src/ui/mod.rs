//! Discord rendering of command replies.

pub mod embeds;

pub use embeds::{format_duration, reply_embed};
