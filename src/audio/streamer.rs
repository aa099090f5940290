use chrono::Utc;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    entry::{Lifecycle, StreamEntry},
    ogg::{is_opus_header, OggPacketReader},
    registry::{GuildRegistry, GuildSession},
    transcoder::{TranscodeRequest, TranscodeStream, Transcoder},
};
use crate::{
    config::Config,
    error::MusicError,
    platform::{VoiceConnector, VoiceTransport},
};

const PAUSE_POLL: Duration = Duration::from_millis(250);

/// Posted by streamers for the scheduler to pick up on its next tick.
#[derive(Debug)]
pub enum StreamerEvent {
    FailedToStart {
        guild: GuildId,
        entry: Arc<StreamEntry>,
        error: MusicError,
    },
}

/// Shared dependencies of every streamer task.
pub struct StreamerContext {
    transcoder: Arc<dyn Transcoder>,
    registry: Arc<GuildRegistry>,
    voice: Arc<dyn VoiceConnector>,
    events: flume::Sender<StreamerEvent>,
    bitrate: u32,
    stall_timeout: Duration,
    redirect_timeout: Duration,
}

impl StreamerContext {
    pub fn new(
        config: &Config,
        transcoder: Arc<dyn Transcoder>,
        registry: Arc<GuildRegistry>,
        voice: Arc<dyn VoiceConnector>,
        events: flume::Sender<StreamerEvent>,
    ) -> Self {
        Self {
            transcoder,
            registry,
            voice,
            events,
            bitrate: config.opus_bitrate,
            stall_timeout: Duration::from_secs(config.stall_timeout_secs),
            redirect_timeout: Duration::from_secs(config.redirect_timeout_secs),
        }
    }
}

enum Step {
    Remake,
    Done(Lifecycle),
}

/// Relays one entry's transcoder output to the guild's voice transport.
///
/// The entry must already be `Streaming`; the scheduler flips it under the
/// queue lock before spawning so at most one streamer runs per guild.
pub struct Streamer {
    ctx: Arc<StreamerContext>,
    session: Arc<GuildSession>,
    entry: Arc<StreamEntry>,
}

impl Streamer {
    pub fn spawn(ctx: Arc<StreamerContext>, session: Arc<GuildSession>, entry: Arc<StreamEntry>) -> JoinHandle<()> {
        let streamer = Self { ctx, session, entry };
        tokio::spawn(streamer.run())
    }

    async fn run(self) {
        let guild = self.session.guild;
        info!("▶️ Streaming {} en guild {}", self.entry.title(), guild);

        let outcome = match self.stream().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("❌ No se pudo iniciar el transcoder para {}: {}", self.entry.title(), e);
                self.entry.finish(Lifecycle::Failed);
                let event = StreamerEvent::FailedToStart {
                    guild,
                    entry: self.entry.clone(),
                    error: e,
                };
                if self.ctx.events.send(event).is_err() {
                    warn!("Scheduler no disponible para reportar el fallo");
                }
                Lifecycle::Failed
            }
        };

        if !self.entry.special && self.is_current_session() {
            self.ctx.registry.touch(guild, Utc::now());
        }

        if outcome != Lifecycle::Failed {
            self.entry.finish(outcome);
        }
        info!("⏹️ {} terminó como {:?}", self.entry.title(), outcome);

        if self.entry.disconnect_on_finish && outcome != Lifecycle::Stopped && self.is_current_session() {
            info!("👋 Desconectando guild {} tras el clip de despedida", guild);
            if let Err(e) = self.ctx.registry.teardown(guild, self.ctx.voice.as_ref()).await {
                warn!("Error al desconectar guild {}: {}", guild, e);
            }
        }
    }

    async fn stream(&self) -> Result<Lifecycle, MusicError> {
        let mut transport = self.session.transport();
        let mut stream = self.open(Duration::ZERO)?;

        loop {
            let step = self.pump(&mut stream, &mut transport).await;
            stream.shutdown().await;

            match step {
                Step::Done(outcome) => return Ok(outcome),
                Step::Remake => {
                    let position = self.entry.elapsed(Utc::now());
                    debug!("🔁 Reconstruyendo transcoder en {:?}", position);
                    stream = self.open(position)?;
                }
            }
        }
    }

    fn open(&self, offset: Duration) -> Result<TranscodeStream, MusicError> {
        self.ctx.transcoder.spawn(&TranscodeRequest {
            source: self.entry.source.clone(),
            volume: self.entry.volume(),
            offset,
            network_retry: !self.entry.special,
            bitrate: self.ctx.bitrate,
        })
    }

    async fn pump(&self, stream: &mut TranscodeStream, transport: &mut Arc<dyn VoiceTransport>) -> Step {
        let mut reader = OggPacketReader::new(&mut stream.output);

        loop {
            while self.entry.is_paused() {
                tokio::select! {
                    _ = self.entry.stopped() => return Step::Done(self.stop_outcome()),
                    _ = tokio::time::sleep(PAUSE_POLL) => {}
                }
            }

            if self.entry.remake.take().is_some() {
                return Step::Remake;
            }
            if let Some(redirect) = self.entry.redirect.take() {
                debug!("🔀 Cambiando transporte de voz");
                *transport = redirect;
            }

            let packet = tokio::select! {
                biased;
                _ = self.entry.stopped() => return Step::Done(self.stop_outcome()),
                read = tokio::time::timeout(self.ctx.stall_timeout, reader.next_packet()) => match read {
                    Ok(Ok(Some(packet))) => packet,
                    Ok(Ok(None)) => return Step::Done(Lifecycle::Finished),
                    Ok(Err(e)) => {
                        debug!("Framing corrupto, fin del stream: {}", e);
                        return Step::Done(Lifecycle::Finished);
                    }
                    Err(_) => {
                        warn!("⏳ Transcoder sin datos durante {:?}, terminando", self.ctx.stall_timeout);
                        return Step::Done(Lifecycle::Finished);
                    }
                },
            };

            if is_opus_header(&packet) {
                continue;
            }

            loop {
                let sent = tokio::select! {
                    biased;
                    _ = self.entry.stopped() => return Step::Done(self.stop_outcome()),
                    sent = transport.send(packet.clone()) => sent,
                };
                if sent.is_ok() {
                    break;
                }
                match self.await_redirect().await {
                    Some(redirect) => *transport = redirect,
                    None => return Step::Done(self.stop_outcome()),
                }
            }
        }
    }

    /// Waits a bounded time for a replacement transport after the current
    /// one closed.
    async fn await_redirect(&self) -> Option<Arc<dyn VoiceTransport>> {
        warn!("🔌 Transporte cerrado, esperando redirección");
        tokio::select! {
            _ = self.entry.stopped() => None,
            redirect = self.entry.redirect.wait() => Some(redirect),
            _ = tokio::time::sleep(self.ctx.redirect_timeout) => {
                warn!("Sin redirección tras {:?}", self.ctx.redirect_timeout);
                None
            }
        }
    }

    /// Skipped or stopped depending on who asked; a lost transport with no
    /// stop request counts as stopped.
    fn stop_outcome(&self) -> Lifecycle {
        self.entry
            .stop_reason()
            .map_or(Lifecycle::Stopped, |reason| reason.outcome())
    }

    fn is_current_session(&self) -> bool {
        self.ctx
            .registry
            .session(self.session.guild)
            .is_some_and(|s| Arc::ptr_eq(&s, &self.session))
    }
}
