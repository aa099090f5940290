//! In-memory stand-ins for the voice gateway, chat platform, transcoder and
//! metadata lookup, plus a rig wiring them to a real player and scheduler.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};
use std::{
    collections::{HashMap, HashSet},
    io::Cursor,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::io::{AsyncReadExt, DuplexStream};

use super::{
    entry::TrackMetadata,
    ogg::fixtures::opus_stream,
    player::{AudioPlayer, Invocation},
    registry::GuildRegistry,
    reply::Reply,
    scheduler::Popper,
    streamer::StreamerContext,
    transcoder::{TranscodeRequest, TranscodeStream, Transcoder},
};
use crate::{
    config::Config,
    error::{MusicError, MusicResult},
    platform::{ChatPlatform, TransportClosed, VoiceConnector, VoiceTransport},
    sources::{MetadataResolver, ResolvedTrack},
};

pub const GUILD: GuildId = GuildId::new(100);
pub const TEXT: ChannelId = ChannelId::new(200);
pub const VOICE: ChannelId = ChannelId::new(300);

/// Accepts every packet immediately and keeps them for inspection.
#[derive(Default)]
pub struct RecordingTransport {
    packets: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn packets(&self) -> Vec<Bytes> {
        self.packets.lock().clone()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl VoiceTransport for RecordingTransport {
    async fn send(&self, packet: Bytes) -> Result<(), TransportClosed> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportClosed);
        }
        self.packets.lock().push(packet);
        // Roughly one Opus frame, so a stream does not finish in zero time.
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeVoice {
    joins: Mutex<Vec<(GuildId, ChannelId)>>,
    leaves: Mutex<Vec<GuildId>>,
    current: Mutex<HashMap<GuildId, ChannelId>>,
    transports: Mutex<Vec<Arc<RecordingTransport>>>,
}

impl FakeVoice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn joins(&self) -> Vec<(GuildId, ChannelId)> {
        self.joins.lock().clone()
    }

    pub fn leaves(&self) -> Vec<GuildId> {
        self.leaves.lock().clone()
    }

    /// Transport handed out by the most recent join.
    pub fn last_transport(&self) -> Option<Arc<RecordingTransport>> {
        self.transports.lock().last().cloned()
    }
}

#[async_trait]
impl VoiceConnector for FakeVoice {
    async fn join(&self, guild: GuildId, channel: ChannelId) -> MusicResult<Arc<dyn VoiceTransport>> {
        self.joins.lock().push((guild, channel));
        self.current.lock().insert(guild, channel);
        let transport = RecordingTransport::new();
        self.transports.lock().push(transport.clone());
        Ok(transport)
    }

    async fn leave(&self, guild: GuildId) -> MusicResult<()> {
        self.leaves.lock().push(guild);
        self.current.lock().remove(&guild);
        Ok(())
    }

    async fn current_channel(&self, guild: GuildId) -> Option<ChannelId> {
        self.current.lock().get(&guild).copied()
    }
}

/// Chat platform with hand-set permissions and voice states.
#[derive(Default)]
pub struct FakePlatform {
    pub managers: Mutex<HashSet<UserId>>,
    pub roles: Mutex<HashMap<UserId, RoleId>>,
    pub voice_states: Mutex<HashMap<UserId, ChannelId>>,
    pub listeners: Mutex<usize>,
    sent: Mutex<Vec<(ChannelId, Reply)>>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_in_voice(&self, user: UserId, channel: ChannelId) {
        self.voice_states.lock().insert(user, channel);
    }

    pub fn set_listeners(&self, count: usize) {
        *self.listeners.lock() = count;
    }

    pub fn sent(&self) -> Vec<(ChannelId, Reply)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn send(&self, channel: ChannelId, reply: Reply) {
        self.sent.lock().push((channel, reply));
    }

    fn can_manage(&self, _guild: GuildId, _channel: ChannelId, user: UserId) -> bool {
        self.managers.lock().contains(&user)
    }

    fn has_role(&self, _guild: GuildId, user: UserId, role: RoleId) -> bool {
        self.roles.lock().get(&user) == Some(&role)
    }

    fn voice_channel_of(&self, _guild: GuildId, user: UserId) -> Option<ChannelId> {
        self.voice_states.lock().get(&user).copied()
    }

    fn eligible_listeners(&self, _guild: GuildId, _channel: ChannelId) -> usize {
        *self.listeners.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeMode {
    /// A few packets, then the pipe stays open until stopped.
    Endless,
    /// A few packets, then end of stream.
    Finite,
    /// Spawning always fails.
    Failing,
}

/// Serves synthetic Ogg/Opus instead of running ffmpeg.
pub struct FakeTranscoder {
    mode: Mutex<TranscodeMode>,
    requests: Mutex<Vec<TranscodeRequest>>,
    // Writer halves kept alive so endless readers never see EOF.
    open_pipes: Mutex<Vec<DuplexStream>>,
}

impl FakeTranscoder {
    pub fn new(mode: TranscodeMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            requests: Mutex::new(Vec::new()),
            open_pipes: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mode(&self, mode: TranscodeMode) {
        *self.mode.lock() = mode;
    }

    pub fn requests(&self) -> Vec<TranscodeRequest> {
        self.requests.lock().clone()
    }
}

impl Transcoder for FakeTranscoder {
    fn spawn(&self, request: &TranscodeRequest) -> MusicResult<TranscodeStream> {
        self.requests.lock().push(request.clone());
        let packets = vec![vec![0xF8, 0xFF, 0xFE]; 3];
        let bytes = Cursor::new(opus_stream(&packets));

        match *self.mode.lock() {
            TranscodeMode::Failing => Err(MusicError::external("could not start ffmpeg: not found")),
            TranscodeMode::Finite => Ok(TranscodeStream::new(Box::pin(bytes), None)),
            TranscodeMode::Endless => {
                let (keep, pipe) = tokio::io::duplex(64);
                self.open_pipes.lock().push(keep);
                Ok(TranscodeStream::new(Box::pin(bytes.chain(pipe)), None))
            }
        }
    }
}

/// Titles every URL after its last path segment.
#[derive(Default)]
pub struct FakeResolver {
    pub failing: Mutex<HashSet<String>>,
}

#[async_trait]
impl MetadataResolver for FakeResolver {
    async fn resolve(&self, url: &str) -> MusicResult<ResolvedTrack> {
        if self.failing.lock().contains(url) {
            return Err(MusicError::external("Couldn't get info for that link"));
        }
        let title = url.rsplit('/').next().unwrap_or(url).to_string();
        Ok(ResolvedTrack {
            metadata: TrackMetadata {
                title,
                duration: Some(Duration::from_secs(180)),
                thumbnail: None,
                webpage_url: Some(url.to_string()),
            },
            stream_url: format!("{url}?stream"),
        })
    }
}

/// A player and scheduler sharing one registry over fake collaborators.
pub struct Rig {
    pub registry: Arc<GuildRegistry>,
    pub platform: Arc<FakePlatform>,
    pub voice: Arc<FakeVoice>,
    pub transcoder: Arc<FakeTranscoder>,
    pub resolver: Arc<FakeResolver>,
    pub player: AudioPlayer,
    pub popper: Popper,
    pub config: Config,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(Config {
            ambient_dir: "/nonexistent/ambient".into(),
            farewell_clip: "/nonexistent/farewell.ogg".into(),
            ..Config::default()
        })
    }

    pub fn with_config(config: Config) -> Self {
        let registry = Arc::new(GuildRegistry::new());
        let platform = FakePlatform::new();
        let voice = FakeVoice::new();
        let transcoder = FakeTranscoder::new(TranscodeMode::Endless);
        let resolver = Arc::new(FakeResolver::default());

        let (events_tx, events_rx) = flume::unbounded();
        let streamer = Arc::new(StreamerContext::new(
            &config,
            transcoder.clone(),
            registry.clone(),
            voice.clone(),
            events_tx,
        ));
        let player = AudioPlayer::new(
            &config,
            registry.clone(),
            platform.clone(),
            voice.clone(),
            resolver.clone(),
        );
        let popper = Popper::new(&config, registry.clone(), platform.clone(), voice.clone(), streamer, events_rx);

        Self {
            registry,
            platform,
            voice,
            transcoder,
            resolver,
            player,
            popper,
            config,
        }
    }

    /// Invocation from `user`, who is placed in the voice channel.
    pub fn user(&self, id: u64) -> Invocation {
        let user = UserId::new(id);
        self.platform.put_in_voice(user, VOICE);
        Invocation {
            guild: GUILD,
            channel: TEXT,
            user,
        }
    }

    pub async fn tick(&self) {
        self.popper.tick(Utc::now()).await;
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) {
        self.popper.tick(now).await;
    }

    /// Polls `check` for up to a second.
    pub async fn eventually(&self, mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }
}
