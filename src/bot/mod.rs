//! # Bot Module
//!
//! Discord front end for the jukebox.
//!
//! This module contains:
//! - Slash command registration and dispatch
//! - Discord-backed voice and chat adapters ([`discord`])
//! - Event handling (ready, interactions, voice state updates)
//!
//! ## Architecture
//!
//! The bot is built around the [`JukeboxBot`] struct which implements
//! Serenity's [`EventHandler`] trait. Music state lives in the
//! [`GuildRegistry`] shared with the scheduler; this layer only turns
//! gateway events into [`AudioPlayer`] calls.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod discord;
pub mod handlers;

use crate::{
    audio::{player::AudioPlayer, registry::GuildRegistry},
    config::Config,
    platform::VoiceConnector,
};
use discord::DiscordPlatform;

/// Main Discord bot handler.
pub struct JukeboxBot {
    /// Bot configuration loaded from environment variables
    config: Arc<Config>,
    pub player: Arc<AudioPlayer>,
    /// Needs the gateway cache, attached once the client is ready
    platform: Arc<DiscordPlatform>,
    voice: Arc<dyn VoiceConnector>,
}

impl JukeboxBot {
    pub fn new(
        config: Arc<Config>,
        player: Arc<AudioPlayer>,
        platform: Arc<DiscordPlatform>,
        voice: Arc<dyn VoiceConnector>,
    ) -> Self {
        Self {
            config,
            player,
            platform,
            voice,
        }
    }

    fn registry(&self) -> &Arc<GuildRegistry> {
        self.player.registry()
    }

    /// Registers slash commands with Discord.
    ///
    /// With `GUILD_ID` set, commands go to that guild only (near-instant
    /// propagation, useful for development); otherwise they are global.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        self.platform.attach(ctx.cache.clone(), ctx.http.clone());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Keeps the guild session in step with the bot's own voice state: a
    /// kick tears the session down, a drag to another channel is recorded.
    async fn voice_state_update(&self, ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        if new.user_id != ctx.cache.current_user().id {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(session) = self.registry().session(guild_id) else {
            return;
        };

        match bot_voice_change(session.voice_channel(), new.channel_id) {
            BotVoiceChange::Unchanged => {}
            BotVoiceChange::Moved(channel) => {
                info!("🔀 Bot movido a {} en guild {}", channel, guild_id);
                session.set_voice_channel(channel);
            }
            BotVoiceChange::Left => {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                if let Err(e) = self.registry().teardown(guild_id, self.voice.as_ref()).await {
                    error!("Error al limpiar la sesión: {:?}", e);
                }
            }
        }
    }
}

/// What a voice state update for the bot itself means for its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BotVoiceChange {
    Unchanged,
    Moved(ChannelId),
    Left,
}

fn bot_voice_change(session_channel: ChannelId, now_in: Option<ChannelId>) -> BotVoiceChange {
    match now_in {
        None => BotVoiceChange::Left,
        Some(channel) if channel == session_channel => BotVoiceChange::Unchanged,
        Some(channel) => BotVoiceChange::Moved(channel),
    }
}
