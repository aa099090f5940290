use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, UserId};
use std::{
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::{
    reply::{SummaryKind, TrackSummary},
    signal::Mailbox,
};
use crate::platform::VoiceTransport;

pub const MAX_VOLUME: u16 = 200;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Track details resolved before enqueueing. Absent for uploaded files and
/// ambient clips.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub webpage_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Queued,
    Streaming,
    Finished,
    Skipped,
    Stopped,
    /// The transcoder never came up.
    Failed,
}

impl Lifecycle {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Skipped | Self::Stopped | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Vote quorum, permission-holder skip or queue clear.
    Skip,
    /// Guild teardown, idle disconnect or shutdown.
    Teardown,
}

impl StopReason {
    pub fn outcome(self) -> Lifecycle {
        match self {
            Self::Skip => Lifecycle::Skipped,
            Self::Teardown => Lifecycle::Stopped,
        }
    }
}

#[derive(Debug)]
struct EntryState {
    lifecycle: Lifecycle,
    volume: u16,
    looping: bool,
    started_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    skip_votes: HashSet<UserId>,
}

/// One queued or playing track.
///
/// Immutable identity (author, source, scheduling hints) sits in plain
/// fields; everything commands and the streamer mutate lives behind a small
/// per-entry lock that is never held across an await.
pub struct StreamEntry {
    id: u64,
    /// `None` for clips the bot queues on its own.
    pub author: Option<UserId>,
    pub announce_channel: ChannelId,
    pub source: String,
    pub metadata: Option<TrackMetadata>,
    /// Ambient and system sounds: no idle-timer reset, no URL filtering.
    pub special: bool,
    pub unskippable: bool,
    pub disconnect_on_finish: bool,
    /// Keeps its own volume when the queue advances onto it.
    pub volume_pinned: bool,
    state: Mutex<EntryState>,
    stop: CancellationToken,
    stop_reason: Mutex<Option<StopReason>>,
    /// Rebuild the transcoder at the current position (volume or seek).
    pub remake: Mailbox<()>,
    /// Swap the voice transport after a reconnect.
    pub redirect: Mailbox<Arc<dyn VoiceTransport>>,
}

impl StreamEntry {
    pub fn new(author: Option<UserId>, announce_channel: ChannelId, source: impl Into<String>, volume: u16) -> Self {
        Self {
            id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            author,
            announce_channel,
            source: source.into(),
            metadata: None,
            special: false,
            unskippable: false,
            disconnect_on_finish: false,
            volume_pinned: false,
            state: Mutex::new(EntryState {
                lifecycle: Lifecycle::Queued,
                volume: volume.min(MAX_VOLUME),
                looping: false,
                started_at: None,
                paused_at: None,
                skip_votes: HashSet::new(),
            }),
            stop: CancellationToken::new(),
            stop_reason: Mutex::new(None),
            remake: Mailbox::new(),
            redirect: Mailbox::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: TrackMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Marks the entry as a bot-owned clip (ambient filler, farewell).
    pub fn system_clip(mut self) -> Self {
        self.special = true;
        self.unskippable = true;
        self.volume_pinned = true;
        self
    }

    pub fn disconnect_on_finish(mut self) -> Self {
        self.disconnect_on_finish = true;
        self
    }

    pub fn pinned_volume(mut self) -> Self {
        self.volume_pinned = true;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Special and unskippable entries are exempt from votes and permission checks.
    pub fn is_protected(&self) -> bool {
        self.special && self.unskippable
    }

    pub fn title(&self) -> String {
        match &self.metadata {
            Some(meta) => meta.title.clone(),
            None if self.special => "Ambient sound".to_string(),
            None => "Uploaded file".to_string(),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.metadata.as_ref().and_then(|m| m.duration)
    }

    // Lifecycle

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    pub fn is_streaming(&self) -> bool {
        self.lifecycle() == Lifecycle::Streaming
    }

    /// `Queued → Streaming`. Stamps the start time and resets skip votes.
    pub fn begin_streaming(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Queued || self.stop.is_cancelled() {
            return false;
        }
        state.lifecycle = Lifecycle::Streaming;
        state.started_at = Some(now);
        state.paused_at = None;
        state.skip_votes.clear();
        true
    }

    /// `Streaming → Finished | Skipped | Stopped | Failed`.
    pub fn finish(&self, outcome: Lifecycle) -> bool {
        debug_assert!(outcome.is_terminal());
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Streaming {
            return false;
        }
        state.lifecycle = outcome;
        true
    }

    /// A looping entry that finished naturally goes back to `Queued` so the
    /// scheduler restreams it in place.
    pub fn rearm_loop(&self) -> bool {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Finished || !state.looping || self.stop.is_cancelled() {
            return false;
        }
        state.lifecycle = Lifecycle::Queued;
        true
    }

    // Stop signal

    /// Requests termination. The first reason wins; returns `false` when a
    /// stop was already requested.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        {
            let mut slot = self.stop_reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
        }
        self.stop.cancel();
        true
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.stop_reason.lock()
    }

    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.stop.cancelled()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    // Playback modifiers

    pub fn volume(&self) -> u16 {
        self.state.lock().volume
    }

    /// Clamps to `0..=200` and returns the applied value.
    pub fn set_volume(&self, volume: u16) -> u16 {
        let volume = volume.min(MAX_VOLUME);
        self.state.lock().volume = volume;
        volume
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused_at.is_some()
    }

    /// Flips the pause state and returns the new one. Resuming shifts the
    /// start time forward by the paused span so elapsed time excludes pauses.
    pub fn toggle_pause(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        match state.paused_at.take() {
            Some(paused_at) => {
                if let Some(started) = state.started_at.as_mut() {
                    *started += now - paused_at;
                }
                false
            }
            None => {
                state.paused_at = Some(now);
                true
            }
        }
    }

    pub fn is_looping(&self) -> bool {
        self.state.lock().looping
    }

    pub fn toggle_loop(&self) -> bool {
        let mut state = self.state.lock();
        state.looping = !state.looping;
        state.looping
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().started_at
    }

    /// Playback position, frozen while paused.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let state = self.state.lock();
        let Some(started) = state.started_at else {
            return Duration::ZERO;
        };
        let until = state.paused_at.unwrap_or(now);
        (until - started).to_std().unwrap_or_default()
    }

    /// Rewrites the start time so that `elapsed(now) == position`.
    pub fn seek(&self, position: Duration, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        let offset = chrono::Duration::from_std(position).unwrap_or_else(|_| chrono::Duration::zero());
        state.started_at = Some(now - offset);
        if state.paused_at.is_some() {
            state.paused_at = Some(now);
        }
    }

    // Skip votes

    /// Returns `false` when the user had already voted.
    pub fn add_skip_vote(&self, user: UserId) -> bool {
        self.state.lock().skip_votes.insert(user)
    }

    pub fn skip_votes(&self) -> usize {
        self.state.lock().skip_votes.len()
    }

    pub fn summary(&self, kind: SummaryKind, now: DateTime<Utc>) -> TrackSummary {
        let streaming = self.is_streaming();
        TrackSummary {
            kind,
            title: self.title(),
            url: self.metadata.as_ref().and_then(|m| m.webpage_url.clone()),
            thumbnail: self.metadata.as_ref().and_then(|m| m.thumbnail.clone()),
            submitter: self.author,
            elapsed: streaming.then(|| self.elapsed(now)),
            total: self.duration(),
            volume: self.volume(),
            paused: self.is_paused(),
            looping: self.is_looping(),
        }
    }
}

impl fmt::Debug for StreamEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamEntry")
            .field("id", &self.id)
            .field("title", &self.title())
            .field("lifecycle", &self.lifecycle())
            .field("special", &self.special)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry() -> StreamEntry {
        StreamEntry::new(Some(UserId::new(7)), ChannelId::new(3), "https://example.com/a.opus", 65)
    }

    #[test]
    fn lifecycle_walks_forward_only() {
        let e = entry();
        let t0 = Utc::now();
        assert!(!e.finish(Lifecycle::Finished), "cannot finish before streaming");
        assert!(e.begin_streaming(t0));
        assert!(!e.begin_streaming(t0));
        assert!(e.finish(Lifecycle::Finished));
        assert_eq!(e.lifecycle(), Lifecycle::Finished);
        assert!(!e.rearm_loop(), "not looping");
    }

    #[test]
    fn looping_entry_rearms_with_a_later_start() {
        let e = entry();
        let t0 = Utc::now();
        e.toggle_loop();
        e.begin_streaming(t0);
        e.finish(Lifecycle::Finished);

        assert!(e.rearm_loop());
        let t1 = t0 + chrono::Duration::seconds(5);
        assert!(e.begin_streaming(t1));
        assert!(e.started_at().unwrap() > t0);
    }

    #[test]
    fn skipped_looping_entry_stays_terminal() {
        let e = entry();
        e.toggle_loop();
        e.begin_streaming(Utc::now());
        e.finish(Lifecycle::Skipped);
        assert!(!e.rearm_loop());
    }

    #[test]
    fn first_stop_reason_wins() {
        let e = entry();
        assert!(e.request_stop(StopReason::Skip));
        assert!(!e.request_stop(StopReason::Teardown));
        assert_eq!(e.stop_reason(), Some(StopReason::Skip));
        assert!(e.is_stop_requested());
        assert!(!e.begin_streaming(Utc::now()));
    }

    #[test]
    fn volume_is_clamped() {
        let e = entry();
        assert_eq!(e.set_volume(999), 200);
        assert_eq!(e.volume(), 200);
    }

    #[test]
    fn pause_freezes_elapsed_and_resume_excludes_the_gap() {
        let e = entry();
        let t0 = Utc::now();
        e.begin_streaming(t0);

        let t10 = t0 + chrono::Duration::seconds(10);
        assert!(e.toggle_pause(t10));
        let t40 = t0 + chrono::Duration::seconds(40);
        assert_eq!(e.elapsed(t40), Duration::from_secs(10));

        assert!(!e.toggle_pause(t40));
        let t45 = t0 + chrono::Duration::seconds(45);
        assert_eq!(e.elapsed(t45), Duration::from_secs(15));
    }

    #[test]
    fn seek_moves_the_start_backwards() {
        let e = entry();
        let now = Utc::now();
        e.begin_streaming(now);
        e.seek(Duration::from_secs(90), now);
        assert_eq!(e.elapsed(now), Duration::from_secs(90));
    }

    #[test]
    fn votes_are_deduplicated_and_reset_on_restream() {
        let e = entry();
        assert!(e.add_skip_vote(UserId::new(1)));
        assert!(!e.add_skip_vote(UserId::new(1)));
        assert_eq!(e.skip_votes(), 1);

        e.begin_streaming(Utc::now());
        assert_eq!(e.skip_votes(), 0);
    }

    #[test]
    fn system_clips_are_protected() {
        let clip = StreamEntry::new(None, ChannelId::new(3), "/clips/rain.ogg", 65).system_clip();
        assert!(clip.is_protected());
        assert!(clip.volume_pinned);
        assert_eq!(clip.title(), "Ambient sound");
        assert!(!entry().is_protected());
    }
}
