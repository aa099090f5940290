use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod error;
mod platform;
mod sources;
mod storage;
mod ui;

use crate::audio::{
    player::AudioPlayer,
    registry::GuildRegistry,
    scheduler::Popper,
    streamer::StreamerContext,
    transcoder::FfmpegTranscoder,
};
use crate::bot::{
    discord::{DiscordPlatform, SongbirdVoice},
    JukeboxBot,
};
use crate::config::Config;
use crate::platform::VoiceConnector;
use crate::sources::YtDlpResolver;
use crate::storage::JsonStorage;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jukebox_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    let resolver = Arc::new(YtDlpResolver::new(config.ytdlp_path.clone()));
    if let Err(e) = resolver.verify().await {
        warn!("⚠️ yt-dlp no verificado: {:?}", e);
    }

    // Inicializar almacenamiento JSON
    let storage = Arc::new(JsonStorage::new(config.data_dir.clone()).await?);
    let registry = Arc::new(GuildRegistry::new());
    match registry.load_dj_roles(&storage).await {
        Ok(count) => info!("🎧 {} roles DJ cargados", count),
        Err(e) => warn!("⚠️ No se pudieron cargar los roles DJ: {:?}", e),
    }

    let songbird = Songbird::serenity();
    let voice: Arc<dyn VoiceConnector> = Arc::new(SongbirdVoice::new(songbird.clone()));
    let platform = Arc::new(DiscordPlatform::new());

    let (events_tx, events_rx) = flume::unbounded();
    let streamer = Arc::new(StreamerContext::new(
        &config,
        Arc::new(FfmpegTranscoder::new(config.ffmpeg_path.clone())),
        registry.clone(),
        voice.clone(),
        events_tx,
    ));
    let player = Arc::new(AudioPlayer::new(
        &config,
        registry.clone(),
        platform.clone(),
        voice.clone(),
        resolver,
    ));
    let popper = Popper::new(&config, registry.clone(), platform.clone(), voice.clone(), streamer, events_rx);

    // Guild member cache backs the DJ role and permission checks
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES | GatewayIntents::GUILD_MEMBERS;

    let config = Arc::new(config);
    let handler = JukeboxBot::new(config.clone(), player, platform, voice.clone());

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    let shutdown = CancellationToken::new();
    let popper_task = tokio::spawn(popper.run(shutdown.clone()));
    tokio::spawn(persist_dj_roles(
        registry.clone(),
        storage.clone(),
        config.clone(),
        shutdown.clone(),
    ));

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        signal_token.cancel();

        for session in registry.sessions() {
            if let Err(e) = registry.teardown(session.guild, voice.as_ref()).await {
                warn!("⚠️ Error cerrando sesión en guild {}: {:?}", session.guild, e);
            }
        }
        if let Err(e) = registry.save_dj_roles(&storage, true).await {
            error!("❌ Error guardando roles DJ: {:?}", e);
        }
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    shutdown.cancel();
    if let Err(e) = popper_task.await {
        error!("Error al detener el scheduler: {:?}", e);
    }

    Ok(())
}

/// Flushes DJ roles to disk whenever they changed.
async fn persist_dj_roles(
    registry: Arc<GuildRegistry>,
    storage: Arc<JsonStorage>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.save_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = registry.save_dj_roles(&storage, false).await {
                    warn!("⚠️ Error guardando roles DJ: {:?}", e);
                }
            }
        }
    }
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = tokio::process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = tokio::process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
