//! Discord-backed implementations of the platform traits.
//!
//! Voice goes through songbird: each join starts one live track fed by a
//! bounded channel of Opus packets. Packets are decoded to PCM with audiopus
//! and handed to songbird's raw adapter, so the mixer owns pacing and the
//! streamer is throttled by channel capacity.

use async_trait::async_trait;
use audiopus::{
    coder::Decoder,
    packet::Packet,
    Channels, MutSignals, SampleRate,
};
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::{
    all::{Cache, Http, Permissions},
    builder::CreateMessage,
    model::id::{ChannelId, GuildId, RoleId, UserId},
};
use songbird::{
    input::{Input, RawAdapter},
    Songbird,
};
use std::{
    io::{self, Read},
    sync::{Arc, OnceLock},
};
use symphonia::core::io::ReadOnlySource;
use tracing::{debug, error, info, warn};

use crate::{
    audio::reply::Reply,
    error::{MusicError, MusicResult},
    platform::{ChatPlatform, TransportClosed, VoiceConnector, VoiceTransport},
    ui,
};

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: usize = 2;
/// 20ms of stereo audio at 48kHz.
const FRAME_SAMPLES: usize = 960;
/// Packets queued ahead of the mixer; ~40ms of audio.
const PACKET_BUFFER: usize = 2;

/// Sender half of a live songbird track.
pub struct SongbirdTransport {
    packets: flume::Sender<Bytes>,
}

impl SongbirdTransport {
    /// A transport and the reader that decodes what it is sent.
    fn pair() -> MusicResult<(Self, OpusPcmReader)> {
        let (tx, rx) = flume::bounded(PACKET_BUFFER);
        Ok((Self { packets: tx }, OpusPcmReader::new(rx)?))
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn send(&self, packet: Bytes) -> Result<(), TransportClosed> {
        self.packets.send_async(packet).await.map_err(|_| TransportClosed)
    }
}

/// Decodes queued Opus packets into interleaved little-endian f32 PCM.
///
/// When the queue is momentarily empty a silent frame is produced so the
/// mixer never sees end of stream while the streamer is between packets.
/// Dropping every sender ends the stream.
struct OpusPcmReader {
    packets: flume::Receiver<Bytes>,
    decoder: Mutex<Decoder>,
    pcm: Vec<f32>,
    pending: Vec<u8>,
    cursor: usize,
}

impl OpusPcmReader {
    fn new(packets: flume::Receiver<Bytes>) -> MusicResult<Self> {
        let decoder = Decoder::new(SampleRate::Hz48000, Channels::Stereo)
            .map_err(|e| MusicError::internal(format!("opus decoder: {e}")))?;
        Ok(Self {
            packets,
            decoder: Mutex::new(decoder),
            pcm: vec![0.0; FRAME_SAMPLES * CHANNELS * 6],
            pending: Vec::new(),
            cursor: 0,
        })
    }

    /// Refills `pending`. Returns false once every sender is gone.
    fn refill(&mut self) -> bool {
        self.pending.clear();
        self.cursor = 0;

        let samples = match self.packets.try_recv() {
            Ok(packet) => {
                let decoded = (|| {
                    let input = Packet::try_from(&packet[..])?;
                    let output = MutSignals::try_from(&mut self.pcm[..])?;
                    self.decoder.lock().decode_float(Some(input), output, false)
                })();
                match decoded {
                    Ok(per_channel) => per_channel * CHANNELS,
                    Err(e) => {
                        debug!("🔇 Paquete Opus inválido: {}", e);
                        self.pcm[..FRAME_SAMPLES * CHANNELS].fill(0.0);
                        FRAME_SAMPLES * CHANNELS
                    }
                }
            }
            Err(flume::TryRecvError::Empty) => {
                self.pcm[..FRAME_SAMPLES * CHANNELS].fill(0.0);
                FRAME_SAMPLES * CHANNELS
            }
            Err(flume::TryRecvError::Disconnected) => return false,
        };

        for sample in &self.pcm[..samples] {
            self.pending.extend_from_slice(&sample.to_le_bytes());
        }
        true
    }
}

impl Read for OpusPcmReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cursor >= self.pending.len() && !self.refill() {
            return Ok(0);
        }
        let available = &self.pending[self.cursor..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.cursor += n;
        Ok(n)
    }
}

/// Voice connections through the songbird manager registered on the client.
pub struct SongbirdVoice {
    manager: Arc<Songbird>,
}

impl SongbirdVoice {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdVoice {
    async fn join(&self, guild: GuildId, channel: ChannelId) -> MusicResult<Arc<dyn VoiceTransport>> {
        let call = self.manager.join(guild, channel).await.map_err(|e| {
            error!("❌ Error al conectar al canal de voz en guild {}: {:?}", guild, e);
            MusicError::transport("Couldn't join your voice channel.")
        })?;

        let (transport, reader) = SongbirdTransport::pair()?;
        let input: Input = RawAdapter::new(ReadOnlySource::new(reader), SAMPLE_RATE, CHANNELS as u32).into();

        {
            let mut call = call.lock().await;
            // The previous track's reader is dropped here, which closes the
            // old transport.
            call.stop();
            call.play_input(input);
        }

        info!("🔊 Conectado al canal de voz {} en guild {}", channel, guild);
        Ok(Arc::new(transport))
    }

    async fn leave(&self, guild: GuildId) -> MusicResult<()> {
        if self.manager.get(guild).is_none() {
            return Ok(());
        }
        self.manager.remove(guild).await.map_err(|e| {
            warn!("⚠️ Error al desconectar en guild {}: {:?}", guild, e);
            MusicError::transport("Couldn't leave the voice channel.")
        })?;
        info!("👋 Desconectado del canal de voz en guild {}", guild);
        Ok(())
    }

    async fn current_channel(&self, guild: GuildId) -> Option<ChannelId> {
        let call = self.manager.get(guild)?;
        let channel = call.lock().await.current_channel()?;
        Some(ChannelId::from(channel.0))
    }
}

/// Chat platform over serenity's cache and HTTP client.
///
/// Both only exist once the gateway is up, so they are attached from the
/// `ready` event. Until then every check answers conservatively.
#[derive(Default)]
pub struct DiscordPlatform {
    context: OnceLock<(Arc<Cache>, Arc<Http>)>,
}

impl DiscordPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, cache: Arc<Cache>, http: Arc<Http>) {
        if self.context.set((cache, http)).is_err() {
            debug!("🔁 Plataforma ya inicializada");
        }
    }

    fn cache(&self) -> Option<&Arc<Cache>> {
        self.context.get().map(|(cache, _)| cache)
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn send(&self, channel: ChannelId, reply: Reply) {
        let Some((_, http)) = self.context.get() else {
            warn!("⚠️ Mensaje descartado, cliente no listo");
            return;
        };
        let message = CreateMessage::new().embed(ui::reply_embed(&reply));
        if let Err(e) = channel.send_message(http, message).await {
            warn!("⚠️ Error enviando mensaje a {}: {:?}", channel, e);
        }
    }

    fn can_manage(&self, guild: GuildId, channel: ChannelId, user: UserId) -> bool {
        let Some(cache) = self.cache() else {
            return false;
        };
        let Some(guild) = cache.guild(guild) else {
            return false;
        };
        if guild.owner_id == user {
            return true;
        }
        match (guild.channels.get(&channel), guild.members.get(&user)) {
            (Some(channel), Some(member)) => guild
                .user_permissions_in(channel, member)
                .contains(Permissions::MANAGE_GUILD),
            _ => false,
        }
    }

    fn has_role(&self, guild: GuildId, user: UserId, role: RoleId) -> bool {
        self.cache()
            .and_then(|cache| cache.guild(guild))
            .and_then(|guild| guild.members.get(&user).map(|m| m.roles.contains(&role)))
            .unwrap_or(false)
    }

    fn voice_channel_of(&self, guild: GuildId, user: UserId) -> Option<ChannelId> {
        let guild = self.cache()?.guild(guild)?;
        guild.voice_states.get(&user)?.channel_id
    }

    fn eligible_listeners(&self, guild: GuildId, channel: ChannelId) -> usize {
        let Some(cache) = self.cache() else {
            return 0;
        };
        let me = cache.current_user().id;
        let Some(guild) = cache.guild(guild) else {
            return 0;
        };
        guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel) && state.user_id != me)
            .filter(|state| !(state.self_mute || state.self_deaf || state.mute || state.deaf))
            .count()
    }
}
