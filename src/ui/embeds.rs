use serenity::{
    all::{Colour, Timestamp},
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::reply::{QueueListing, Reply, SummaryKind, TrackSummary};

const STANDARD_FOOTER: &str = "🎵 Jukebox";

/// Upcoming entries shown before the listing is cut short.
const LISTING_LIMIT: usize = 15;

/// Renders any reply as a single embed.
pub fn reply_embed(reply: &Reply) -> CreateEmbed {
    match reply {
        Reply::Ack(text) => create_ack_embed(text),
        Reply::Error(text) => create_error_embed(text),
        Reply::Track(summary) => create_track_embed(summary),
        Reply::Listing(listing) => create_queue_embed(listing),
    }
}

pub fn create_ack_embed(text: &str) -> CreateEmbed {
    CreateEmbed::default()
        .description(text)
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_error_embed(text: &str) -> CreateEmbed {
    CreateEmbed::default()
        .description(text)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Now playing, queued and up-next cards share one layout.
pub fn create_track_embed(summary: &TrackSummary) -> CreateEmbed {
    let (heading, color) = match summary.kind {
        SummaryKind::NowPlaying => ("🎵 Now Playing".to_string(), colors::MUSIC_PURPLE),
        SummaryKind::Queued { position } => (format!("📥 Queued at #{}", position), colors::SUCCESS_GREEN),
        SummaryKind::UpNext => ("⏭️ Up Next".to_string(), colors::ACCENT_CYAN),
    };

    let mut embed = CreateEmbed::default()
        .title(heading)
        .description(format!("**{}**", summary.title))
        .color(color);

    embed = embed.field("⏱️ Duration", progress_line(summary), true);
    if let Some(remaining) = summary.remaining().filter(|_| summary.elapsed.is_some()) {
        embed = embed.field("⌛ Remaining", format_duration(remaining), true);
    }

    embed = embed.field("🔊 Volume", format!("{}%", summary.volume), true);

    let submitter = match summary.submitter {
        Some(user) => format!("<@{}>", user),
        None => "🤖 Jukebox".to_string(),
    };
    embed = embed.field("👤 Requested by", submitter, true);

    let mut flags = Vec::new();
    if summary.paused {
        flags.push("⏸️ Paused");
    }
    if summary.looping {
        flags.push("🔂 Looping");
    }
    if !flags.is_empty() {
        embed = embed.field("Status", flags.join(" • "), true);
    }

    if let Some(thumbnail) = &summary.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }
    if let Some(url) = &summary.url {
        embed = embed.url(url);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_queue_embed(listing: &QueueListing) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE);

    if listing.upcoming.is_empty() {
        return embed
            .description("😴 **Nothing queued after the current track**\n\n💡 Use `/play <url>` to add music")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    let mut description = String::new();
    for item in listing.upcoming.iter().take(LISTING_LIMIT) {
        let duration = item
            .duration
            .map(|d| format!(" `[{}]`", format_duration(d)))
            .unwrap_or_default();
        let submitter = item.submitter.map(|u| format!(" • <@{}>", u)).unwrap_or_default();
        description.push_str(&format!("**{}**. {}{}{}\n", item.position, item.title, duration, submitter));
    }
    if listing.upcoming.len() > LISTING_LIMIT {
        description.push_str(&format!("… and {} more\n", listing.upcoming.len() - LISTING_LIMIT));
    }

    let mut info = format!("**Total:** {} tracks", listing.upcoming.len());
    if listing.total_duration > Duration::ZERO {
        info.push_str(&format!(" • **Duration:** {}", format_duration(listing.total_duration)));
    }

    embed
        .description(description)
        .field("Information", info, false)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

fn progress_line(summary: &TrackSummary) -> String {
    match (summary.elapsed, summary.total) {
        (Some(elapsed), Some(total)) => format!("{} / {}", format_duration(elapsed), format_duration(total)),
        (None, Some(total)) => format_duration(total),
        (Some(elapsed), None) => format!("{} / ?", format_duration(elapsed)),
        (None, None) => "Unknown".to_string(),
    }
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Paleta de colores
pub mod colors {
    use super::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
    pub const ACCENT_CYAN: Colour = Colour::from_rgb(23, 162, 184);
}
