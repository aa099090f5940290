//! # Audio Module
//!
//! Per-guild music queues and the machinery that plays them.
//!
//! ## Architecture
//!
//! ### [`player`] - Command Surface
//! - Validates chat commands and mutates the guild queue
//! - Signals the streaming entry (skip, remake, pause)
//!
//! ### [`scheduler`] - Popper
//! - Periodic sweep that promotes the queue head and pops finished entries
//! - Idle handling: ambient filler, farewell clip, disconnect
//!
//! ### [`streamer`] - Streamer
//! - One task per streaming entry, pumping Ogg/Opus packets from the
//!   transcoder to the voice transport
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz
//! - **Channels**: Stereo
//! - **Encoding**: Opus in Ogg, bitrate from configuration

pub mod entry;
pub mod ogg;
pub mod permissions;
pub mod player;
pub mod queue;
pub mod registry;
pub mod reply;
pub mod scheduler;
pub mod signal;
pub mod streamer;
pub mod transcoder;

#[cfg(test)]
pub mod testing;
