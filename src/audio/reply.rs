use serenity::model::id::UserId;
use std::time::Duration;

/// User-visible result of a command or scheduler announcement.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Plain acknowledgment.
    Ack(String),
    /// Private error or denial.
    Error(String),
    /// Rich summary of one track.
    Track(TrackSummary),
    Listing(QueueListing),
}

impl Reply {
    pub fn ack(msg: impl Into<String>) -> Self {
        Self::Ack(msg.into())
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    NowPlaying,
    Queued { position: usize },
    UpNext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackSummary {
    pub kind: SummaryKind,
    pub title: String,
    pub url: Option<String>,
    pub thumbnail: Option<String>,
    /// `None` for clips the bot queued itself.
    pub submitter: Option<UserId>,
    pub elapsed: Option<Duration>,
    pub total: Option<Duration>,
    pub volume: u16,
    pub paused: bool,
    pub looping: bool,
}

impl TrackSummary {
    pub fn remaining(&self) -> Option<Duration> {
        let total = self.total?;
        Some(total.saturating_sub(self.elapsed.unwrap_or_default()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueListing {
    /// Entries after the head, tagged with their queue index (the head is 0).
    pub upcoming: Vec<ListedTrack>,
    pub total_duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListedTrack {
    pub position: usize,
    pub title: String,
    pub duration: Option<Duration>,
    pub submitter: Option<UserId>,
}
