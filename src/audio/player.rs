use chrono::Utc;
use regex::Regex;
use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tracing::{debug, info};

use super::{
    entry::{StopReason, StreamEntry, MAX_VOLUME},
    permissions::{PermissionGate, VoteOutcome},
    queue::NodeHandle,
    registry::{GuildRegistry, GuildSession},
    reply::{ListedTrack, QueueListing, Reply, SummaryKind},
};
use crate::{
    config::Config,
    error::{MusicError, MusicResult},
    platform::{ChatPlatform, VoiceConnector},
    sources::{is_valid_url, MetadataResolver},
    ui::format_duration,
};

/// Who issued a command, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    pub guild: GuildId,
    /// Text channel the command came from; replies and announcements go here.
    pub channel: ChannelId,
    pub user: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveTarget {
    Index(usize),
    All,
}

/// The music command surface.
///
/// Every command resolves the guild session, consults the permission gate
/// where it mutates, applies its change under the queue lock and returns
/// exactly one [`Reply`]. Metadata lookups happen before any lock is taken.
pub struct AudioPlayer {
    registry: Arc<GuildRegistry>,
    platform: Arc<dyn ChatPlatform>,
    voice: Arc<dyn VoiceConnector>,
    resolver: Arc<dyn MetadataResolver>,
    default_volume: u16,
    max_queue_size: usize,
}

impl AudioPlayer {
    pub fn new(
        config: &Config,
        registry: Arc<GuildRegistry>,
        platform: Arc<dyn ChatPlatform>,
        voice: Arc<dyn VoiceConnector>,
        resolver: Arc<dyn MetadataResolver>,
    ) -> Self {
        Self {
            registry,
            platform,
            voice,
            resolver,
            default_volume: config.default_volume,
            max_queue_size: config.max_queue_size,
        }
    }

    pub fn registry(&self) -> &Arc<GuildRegistry> {
        &self.registry
    }

    fn gate(&self) -> PermissionGate<'_> {
        PermissionGate::new(self.platform.as_ref(), &self.registry)
    }

    fn session(&self, guild: GuildId) -> MusicResult<Arc<GuildSession>> {
        self.registry
            .session(guild)
            .ok_or_else(|| MusicError::transport("I'm not in a voice channel. Use /connect first."))
    }

    fn head(session: &GuildSession) -> MusicResult<Arc<StreamEntry>> {
        session
            .queue
            .read()
            .head()
            .cloned()
            .ok_or_else(|| MusicError::user("Nothing is playing."))
    }

    /// Head entry for a modifier command: must exist, must not be a system
    /// clip, and the caller must pass the gate.
    fn controllable_head(&self, inv: Invocation, action: &str) -> MusicResult<Arc<StreamEntry>> {
        let session = self.session(inv.guild)?;
        let head = Self::head(&session)?;
        if head.is_protected() {
            return Err(MusicError::user(format!("This sound can't be {action}.")));
        }
        if !self.gate().has_permission(inv.guild, Some(&head), inv.user) {
            return Err(MusicError::denied(
                "Only the person who queued this, a DJ or a server manager can do that.",
            ));
        }
        Ok(head)
    }

    // Voice session

    pub async fn connect(&self, inv: Invocation) -> MusicResult<Reply> {
        let target = self
            .platform
            .voice_channel_of(inv.guild, inv.user)
            .ok_or_else(|| MusicError::user("Join a voice channel first."))?;

        if let Some(session) = self.registry.session(inv.guild) {
            if session.voice_channel() == target {
                if self.voice.current_channel(inv.guild).await == Some(target) {
                    return Ok(Reply::ack(format!("✅ Already connected to <#{target}>.")));
                }
                // The gateway dropped the call behind our back.
                let transport = self.voice.join(inv.guild, target).await?;
                session.redirect(target, transport);
                info!("🔁 Guild {} reconectada a {}", inv.guild, target);
                return Ok(Reply::ack(format!("🔁 Reconnected to <#{target}>.")));
            }

            let head = session.queue.read().head().cloned();
            if !self.gate().has_permission(inv.guild, head.as_deref(), inv.user) {
                return Err(MusicError::denied(format!(
                    "I'm busy in <#{}>.",
                    session.voice_channel()
                )));
            }

            let transport = self.voice.join(inv.guild, target).await?;
            session.redirect(target, transport);
            info!("🔀 Guild {} movida a {}", inv.guild, target);
            return Ok(Reply::ack(format!("🔀 Moved to <#{target}>.")));
        }

        let transport = self.voice.join(inv.guild, target).await?;
        self.registry
            .install(GuildSession::new(inv.guild, target, inv.channel, transport));
        self.registry.touch(inv.guild, Utc::now());
        Ok(Reply::ack(format!("🔊 Joined <#{target}>.")))
    }

    async fn ensure_session(&self, inv: Invocation) -> MusicResult<Arc<GuildSession>> {
        if let Some(session) = self.registry.session(inv.guild) {
            return Ok(session);
        }
        self.connect(inv).await?;
        self.session(inv.guild)
    }

    pub async fn disconnect(&self, inv: Invocation) -> MusicResult<Reply> {
        let session = self.session(inv.guild)?;
        let head = session.queue.read().head().cloned();
        if !self.gate().has_permission(inv.guild, head.as_deref(), inv.user) {
            return Err(MusicError::denied("You can't disconnect me while someone else's track is playing."));
        }

        let cleared = self.clear_all(&session, inv.user, false)?;
        debug!("Cola vaciada antes de desconectar ({} entradas)", cleared);
        self.registry.teardown(inv.guild, self.voice.as_ref()).await?;
        Ok(Reply::ack("👋 Disconnected."))
    }

    // Enqueueing

    pub async fn play(&self, inv: Invocation, url: &str, skip: bool) -> MusicResult<Reply> {
        let url = url.trim();
        if !is_valid_url(url) {
            return Err(MusicError::user("That doesn't look like a valid http(s) link."));
        }

        if skip {
            if let Some(session) = self.registry.session(inv.guild) {
                self.check_skip_replace(&session, inv)?;
            }
        }

        let track = self.resolver.resolve(url).await?;
        let session = self.ensure_session(inv).await?;

        let entry = StreamEntry::new(Some(inv.user), inv.channel, track.stream_url, self.default_volume)
            .with_metadata(track.metadata);
        if skip {
            self.skip_replace(&session, inv, entry)
        } else {
            self.enqueue(&session, entry)
        }
    }

    /// Queues an uploaded file. No metadata is looked up.
    pub async fn mp3(&self, inv: Invocation, attachment_url: &str) -> MusicResult<Reply> {
        if !is_valid_url(attachment_url) {
            return Err(MusicError::user("That attachment can't be played."));
        }
        let session = self.ensure_session(inv).await?;
        let entry = StreamEntry::new(Some(inv.user), inv.channel, attachment_url.trim(), self.default_volume);
        self.enqueue(&session, entry)
    }

    fn enqueue(&self, session: &GuildSession, entry: StreamEntry) -> MusicResult<Reply> {
        let entry = Arc::new(entry);
        let position = {
            let mut queue = session.queue.write();
            if queue.len() >= self.max_queue_size {
                return Err(MusicError::user(format!(
                    "The queue is full ({} tracks).",
                    self.max_queue_size
                )));
            }
            queue.push_back(entry.clone());
            queue.len() - 1
        };

        info!("➕ {} encolada en posición {}", entry.title(), position);
        Ok(Reply::Track(entry.summary(SummaryKind::Queued { position }, Utc::now())))
    }

    fn check_skip_replace(&self, session: &GuildSession, inv: Invocation) -> MusicResult<()> {
        let head = session.queue.read().head().cloned();
        match head {
            Some(head) if head.is_protected() => Err(MusicError::user("This sound can't be skipped.")),
            head if !self.gate().has_permission(inv.guild, head.as_deref(), inv.user) => Err(
                MusicError::denied("You need to own the current track, or be a DJ, to skip it."),
            ),
            _ => Ok(()),
        }
    }

    /// Inserts `entry` right behind the head and stops the head, so the new
    /// entry is what plays next. It keeps its own volume.
    fn skip_replace(&self, session: &GuildSession, inv: Invocation, entry: StreamEntry) -> MusicResult<Reply> {
        self.check_skip_replace(session, inv)?;
        let entry = Arc::new(entry.pinned_volume());

        let mut queue = session.queue.write();
        if queue.len() >= self.max_queue_size {
            return Err(MusicError::user("The queue is full."));
        }

        match queue.head_handle() {
            Some(head_handle) => {
                let head = queue.get(head_handle).cloned();
                queue.insert_after(head_handle, entry.clone());
                if let Some(head) = head {
                    head.request_stop(StopReason::Skip);
                }
            }
            None => {
                queue.push_back(entry.clone());
            }
        }
        drop(queue);

        info!("⏭️ {} reemplaza la pista actual", entry.title());
        Ok(Reply::Track(entry.summary(SummaryKind::UpNext, Utc::now())))
    }

    // Head modifiers

    pub async fn skip(&self, inv: Invocation) -> MusicResult<Reply> {
        let session = self.session(inv.guild)?;
        let head = Self::head(&session)?;
        if head.is_protected() {
            return Err(MusicError::user("This sound can't be skipped."));
        }

        let gate = self.gate();
        if gate.has_permission(inv.guild, Some(&head), inv.user) {
            head.request_stop(StopReason::Skip);
            return Ok(Reply::ack(format!("⏭️ Skipped **{}**.", head.title())));
        }

        if !head.is_streaming() {
            return Err(MusicError::user("Nothing is playing yet."));
        }
        let channel = session.voice_channel();
        if self.platform.voice_channel_of(inv.guild, inv.user) != Some(channel) {
            return Err(MusicError::denied(format!("Join <#{channel}> to vote.")));
        }

        let eligible = self.platform.eligible_listeners(inv.guild, channel);
        let reply = match gate.vote_skip(&head, inv.user, eligible) {
            VoteOutcome::Passed { votes, .. } => {
                head.request_stop(StopReason::Skip);
                info!("🗳️ Votación aprobada ({} votos), saltando {}", votes, head.title());
                Reply::ack(format!("⏭️ Vote passed, skipping **{}**.", head.title()))
            }
            VoteOutcome::Pending { votes, needed } => Reply::ack(format!(
                "🗳️ Vote registered, need {} more vote{}.",
                needed - votes,
                if needed - votes == 1 { "" } else { "s" }
            )),
            VoteOutcome::AlreadyVoted { votes, needed } => {
                Reply::ack(format!("🗳️ You already voted ({votes}/{needed})."))
            }
        };
        Ok(reply)
    }

    pub async fn pause(&self, inv: Invocation) -> MusicResult<Reply> {
        let head = self.controllable_head(inv, "paused")?;
        let paused = head.toggle_pause(Utc::now());
        Ok(Reply::ack(if paused { "⏸️ Paused." } else { "▶️ Resumed." }))
    }

    pub async fn toggle_loop(&self, inv: Invocation) -> MusicResult<Reply> {
        let head = self.controllable_head(inv, "looped")?;
        let looping = head.toggle_loop();
        Ok(Reply::ack(if looping {
            format!("🔂 Looping **{}**.", head.title())
        } else {
            "➡️ Loop off.".to_string()
        }))
    }

    pub async fn seek(&self, inv: Invocation, time: &str) -> MusicResult<Reply> {
        let position = parse_timestamp(time)?;
        let head = self.controllable_head(inv, "seeked")?;
        if !head.is_streaming() {
            return Err(MusicError::user("Nothing is playing yet."));
        }
        if let Some(total) = head.duration() {
            if position >= total {
                return Err(MusicError::user(format!(
                    "That's past the end ({}).",
                    format_duration(total)
                )));
            }
        }

        head.seek(position, Utc::now());
        head.remake.post(());
        Ok(Reply::ack(format!("⏩ Seeked to {}.", format_duration(position))))
    }

    pub async fn volume(&self, inv: Invocation, level: i64) -> MusicResult<Reply> {
        let head = self.controllable_head(inv, "changed")?;
        let level = level.clamp(0, i64::from(MAX_VOLUME)) as u16;
        let applied = head.set_volume(level);
        if head.is_streaming() {
            head.remake.post(());
        }
        Ok(Reply::ack(format!("🔊 Volume set to {applied}%.")))
    }

    // Removal

    pub async fn remove(&self, inv: Invocation, target: RemoveTarget) -> MusicResult<Reply> {
        let session = self.session(inv.guild)?;
        match target {
            RemoveTarget::All => {
                let cleared = self.clear_all(&session, inv.user, true)?;
                Ok(Reply::ack(format!("🗑️ Cleared {cleared} track{}.", if cleared == 1 { "" } else { "s" })))
            }
            RemoveTarget::Index(index) => {
                let (handle, entry) = {
                    let queue = session.queue.read();
                    queue
                        .nth(index)
                        .map(|(handle, entry)| (handle, entry.clone()))
                        .ok_or_else(|| MusicError::user(format!("There's nothing at position {index}.")))?
                };

                if !entry.is_protected() && !self.gate().has_permission(inv.guild, Some(&entry), inv.user) {
                    return Err(MusicError::denied("You can only remove tracks you queued."));
                }

                if !self.detach(&session, handle, &entry) {
                    return Err(MusicError::user("That track already left the queue."));
                }
                Ok(Reply::ack(format!("🗑️ Removed **{}**.", entry.title())))
            }
        }
    }

    /// Removes every entry. With `check`, the caller must pass the gate for
    /// each non-protected entry or nothing is removed.
    fn clear_all(&self, session: &GuildSession, user: UserId, check: bool) -> MusicResult<usize> {
        let snapshot: Vec<(NodeHandle, Arc<StreamEntry>)> = session
            .queue
            .read()
            .iter()
            .map(|(handle, entry)| (handle, entry.clone()))
            .collect();

        if check {
            let gate = self.gate();
            let denied = snapshot
                .iter()
                .any(|(_, entry)| !entry.is_protected() && !gate.has_permission(session.guild, Some(entry), user));
            if denied {
                return Err(MusicError::denied("Some of these tracks aren't yours to remove."));
            }
        }

        let mut cleared = 0;
        for (handle, entry) in &snapshot {
            if self.detach(session, *handle, entry) {
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    /// Takes an entry out of play. A streaming entry is only stopped; the
    /// scheduler pops it once its streamer has exited, which keeps a single
    /// streamer per guild.
    fn detach(&self, session: &GuildSession, handle: NodeHandle, entry: &StreamEntry) -> bool {
        let mut queue = session.queue.write();
        if queue.get(handle).is_none() {
            return false;
        }
        entry.request_stop(StopReason::Skip);
        if !entry.is_streaming() {
            queue.remove(handle);
        }
        true
    }

    // Read-only

    pub async fn queue(&self, inv: Invocation) -> MusicResult<Reply> {
        let session = self.session(inv.guild)?;
        let queue = session.queue.read();

        let upcoming: Vec<ListedTrack> = queue
            .iter()
            .enumerate()
            .skip(1)
            .map(|(position, (_, entry))| ListedTrack {
                position,
                title: entry.title(),
                duration: entry.duration(),
                submitter: entry.author,
            })
            .collect();
        let total_duration = upcoming.iter().filter_map(|t| t.duration).sum();

        Ok(Reply::Listing(QueueListing {
            upcoming,
            total_duration,
        }))
    }

    pub async fn now_playing(&self, inv: Invocation) -> MusicResult<Reply> {
        let session = self.session(inv.guild)?;
        let head = Self::head(&session)?;
        Ok(Reply::Track(head.summary(SummaryKind::NowPlaying, Utc::now())))
    }

    // Settings

    pub async fn set_dj_role(&self, inv: Invocation, role: Option<RoleId>) -> MusicResult<Reply> {
        if !self.platform.can_manage(inv.guild, inv.channel, inv.user) {
            return Err(MusicError::denied("You need Manage Server to change the DJ role."));
        }
        self.registry.set_dj_role(inv.guild, role);
        Ok(Reply::ack(match role {
            Some(role) => format!("🎧 DJ role set to <@&{role}>."),
            None => "🎧 DJ role cleared.".to_string(),
        }))
    }
}

fn timestamp_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(?:(?:(\d+):)?([0-5]?\d):)?(\d+)$").ok())
        .as_ref()
}

/// Accepts `ss`, `mm:ss`, `hh:mm:ss` or a humantime span such as `1m30s`.
pub fn parse_timestamp(input: &str) -> MusicResult<Duration> {
    let input = input.trim();
    if let Some(caps) = timestamp_pattern().and_then(|re| re.captures(input)) {
        let invalid = || MusicError::user(format!("`{input}` isn't a valid time."));
        let field = |i: usize| -> MusicResult<u64> {
            match caps.get(i) {
                Some(m) => m.as_str().parse().map_err(|_| invalid()),
                None => Ok(0),
            }
        };
        let (hours, minutes, seconds) = (field(1)?, field(2)?, field(3)?);
        if caps.get(2).is_some() && seconds >= 60 {
            return Err(invalid());
        }
        let total = hours
            .checked_mul(3600)
            .zip(minutes.checked_mul(60))
            .and_then(|(h, m)| h.checked_add(m))
            .and_then(|hm| hm.checked_add(seconds))
            .ok_or_else(invalid)?;
        return Ok(Duration::from_secs(total));
    }

    humantime::parse_duration(input)
        .map_err(|_| MusicError::user(format!("`{input}` isn't a valid time. Try `1:30` or `90`.")))
}
