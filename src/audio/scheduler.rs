use chrono::{DateTime, Utc};
use rand::{seq::SliceRandom, Rng};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    entry::{Lifecycle, StreamEntry},
    registry::{GuildRegistry, GuildSession},
    reply::{Reply, SummaryKind},
    streamer::{Streamer, StreamerContext, StreamerEvent},
};
use crate::{
    config::Config,
    platform::{ChatPlatform, VoiceConnector},
};

const AMBIENT_EXTENSIONS: &[&str] = &["ogg", "opus", "mp3", "wav", "m4a", "flac"];

/// Idle thresholds and the clips used to fill silence.
#[derive(Debug, Clone)]
struct IdlePolicy {
    ambient_after: Duration,
    farewell_after: Duration,
    disconnect_after: Duration,
    ambient_chance: f64,
    ambient_dir: PathBuf,
    farewell_clip: PathBuf,
    clip_volume: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleAction {
    Nothing,
    Ambient,
    Farewell,
    Disconnect,
}

impl IdlePolicy {
    /// Deadline order: only the furthest threshold passed applies.
    fn action(&self, idle: Duration) -> IdleAction {
        if idle >= self.disconnect_after {
            IdleAction::Disconnect
        } else if idle >= self.farewell_after {
            IdleAction::Farewell
        } else if idle >= self.ambient_after {
            IdleAction::Ambient
        } else {
            IdleAction::Nothing
        }
    }
}

enum Advance {
    Idle,
    Busy,
    Start(Arc<StreamEntry>),
}

/// Process-wide control loop advancing every guild's queue.
///
/// Each tick: report streamers that failed to start, pop finished heads,
/// promote the next entry, and run the idle state machine for empty queues.
/// A streamer that died in any way is noticed within one tick.
pub struct Popper {
    registry: Arc<GuildRegistry>,
    platform: Arc<dyn ChatPlatform>,
    voice: Arc<dyn VoiceConnector>,
    streamer: Arc<StreamerContext>,
    events: flume::Receiver<StreamerEvent>,
    idle: IdlePolicy,
    tick: Duration,
}

impl Popper {
    pub fn new(
        config: &Config,
        registry: Arc<GuildRegistry>,
        platform: Arc<dyn ChatPlatform>,
        voice: Arc<dyn VoiceConnector>,
        streamer: Arc<StreamerContext>,
        events: flume::Receiver<StreamerEvent>,
    ) -> Self {
        Self {
            registry,
            platform,
            voice,
            streamer,
            events,
            idle: IdlePolicy {
                ambient_after: Duration::from_secs(config.idle_ambient_secs),
                farewell_after: Duration::from_secs(config.idle_farewell_secs),
                disconnect_after: Duration::from_secs(config.idle_disconnect_secs),
                ambient_chance: config.ambient_chance.clamp(0.0, 1.0),
                ambient_dir: config.ambient_dir.clone(),
                farewell_clip: config.farewell_clip.clone(),
                clip_volume: config.default_volume,
            },
            tick: config.popper_tick(),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("⏱️ Scheduler iniciado (tick {:?})", self.tick);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.tick(Utc::now()).await,
            }
        }

        info!("⏱️ Scheduler detenido");
    }

    pub async fn tick(&self, now: DateTime<Utc>) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
        }

        for session in self.registry.sessions() {
            self.tick_guild(&session, now).await;
        }
    }

    async fn handle_event(&self, event: StreamerEvent) {
        match event {
            StreamerEvent::FailedToStart { guild, entry, error } => {
                warn!("⚠️ {} no pudo iniciar en guild {}", entry.title(), guild);
                if !entry.special {
                    let msg = format!("❌ Couldn't play **{}**: {}", entry.title(), error);
                    self.platform.send(entry.announce_channel, Reply::ack(msg)).await;
                }
            }
        }
    }

    async fn tick_guild(&self, session: &Arc<GuildSession>, now: DateTime<Utc>) {
        let guild = session.guild;

        let mut step = advance(session, now);
        if matches!(step, Advance::Idle) {
            let last_active = match self.registry.last_active(guild) {
                Some(at) => at,
                None => {
                    self.registry.touch(guild, now);
                    now
                }
            };
            let idle = (now - last_active).to_std().unwrap_or_default();

            match self.idle.action(idle) {
                IdleAction::Nothing => {}
                IdleAction::Disconnect => {
                    info!("💤 Guild {} inactiva {:?}, desconectando", guild, idle);
                    if let Err(e) = self.registry.teardown(guild, self.voice.as_ref()).await {
                        warn!("Error al desconectar guild {}: {}", guild, e);
                    }
                    return;
                }
                IdleAction::Farewell => {
                    if self.enqueue_farewell(session).await {
                        step = advance(session, now);
                    }
                }
                IdleAction::Ambient => {
                    if self.enqueue_ambient(session).await {
                        step = advance(session, now);
                    }
                }
            }
        }

        if let Advance::Start(entry) = step {
            Streamer::spawn(self.streamer.clone(), session.clone(), entry.clone());
            if !entry.special {
                let summary = entry.summary(SummaryKind::NowPlaying, now);
                self.platform.send(entry.announce_channel, Reply::Track(summary)).await;
            }
        }
    }

    async fn enqueue_farewell(&self, session: &GuildSession) -> bool {
        if !tokio::fs::try_exists(&self.idle.farewell_clip).await.unwrap_or(false) {
            return false;
        }
        let source = self.idle.farewell_clip.to_string_lossy().into_owned();
        let clip = StreamEntry::new(None, session.text_channel(), source, self.idle.clip_volume)
            .system_clip()
            .disconnect_on_finish();
        info!("👋 Encolando despedida en guild {}", session.guild);
        push_front_if_idle(session, clip)
    }

    async fn enqueue_ambient(&self, session: &GuildSession) -> bool {
        if !roll(self.idle.ambient_chance) {
            return false;
        }

        let clips = ambient_clips(&self.idle.ambient_dir).await;
        let Some(pick) = pick_one(&clips) else {
            debug!("Sin sonidos ambientales en {}", self.idle.ambient_dir.display());
            return false;
        };

        let source = pick.to_string_lossy().into_owned();
        let clip = StreamEntry::new(None, session.text_channel(), source, self.idle.clip_volume).system_clip();
        info!("🌧️ Sonido ambiental para guild {}: {}", session.guild, pick.display());
        push_front_if_idle(session, clip)
    }
}

/// One scheduling step for a guild, under the queue's write lock.
fn advance(session: &GuildSession, now: DateTime<Utc>) -> Advance {
    let mut queue = session.queue.write();

    loop {
        let Some(head) = queue.head().cloned() else {
            return Advance::Idle;
        };

        match head.lifecycle() {
            Lifecycle::Streaming => return Advance::Busy,
            Lifecycle::Queued => {
                if head.begin_streaming(now) {
                    return Advance::Start(head);
                }
                // Stopped before it ever started.
                queue.pop_front();
            }
            Lifecycle::Finished if head.rearm_loop() => {
                if head.begin_streaming(now) {
                    debug!("🔂 Repitiendo {}", head.title());
                    return Advance::Start(head);
                }
                queue.pop_front();
            }
            Lifecycle::Finished | Lifecycle::Skipped | Lifecycle::Stopped | Lifecycle::Failed => {
                queue.pop_front();
                if let Some(next) = queue.head() {
                    carry_volume(&head, next);
                }
            }
        }
    }
}

fn carry_volume(previous: &StreamEntry, next: &StreamEntry) {
    if previous.special || next.special || next.volume_pinned {
        return;
    }
    next.set_volume(previous.volume());
}

/// Ambient and farewell clips only go in while nothing else is queued; a
/// command may have raced in while the clip was being picked.
fn push_front_if_idle(session: &GuildSession, clip: StreamEntry) -> bool {
    let mut queue = session.queue.write();
    if !queue.is_empty() {
        return false;
    }
    queue.push_front(Arc::new(clip));
    true
}

fn roll(chance: f64) -> bool {
    rand::thread_rng().gen_bool(chance)
}

fn pick_one(clips: &[PathBuf]) -> Option<PathBuf> {
    clips.choose(&mut rand::thread_rng()).cloned()
}

async fn ambient_clips(dir: &Path) -> Vec<PathBuf> {
    let mut clips = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return clips,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_audio = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| AMBIENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_audio {
            clips.push(path);
        }
    }
    clips
}
