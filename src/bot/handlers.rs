use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseFollowup, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::application::{CommandInteraction, ResolvedOption, ResolvedValue},
    prelude::Context,
};
use std::{future::Future, sync::Arc};
use tracing::{error, info};

use crate::{
    audio::{
        player::{AudioPlayer, Invocation, RemoveTarget},
        reply::Reply,
    },
    bot::JukeboxBot,
    error::{MusicError, MusicResult},
    ui::embeds,
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &JukeboxBot) -> Result<()> {
    let Some(guild) = command.guild_id else {
        return respond(ctx, &command, Reply::Error("❌ Commands only work inside a server.".into())).await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild
    );

    let inv = Invocation {
        guild,
        channel: command.channel_id,
        user: command.user.id,
    };

    // Metadata lookups can outlast the interaction deadline.
    let slow = matches!(command.data.name.as_str(), "play" | "mp3" | "connect");
    if slow {
        command.defer(&ctx.http).await?;
    }

    let reply = match guarded(dispatch(bot.player.clone(), command.clone(), inv)).await {
        Ok(reply) => reply,
        Err(e) => {
            if matches!(e, MusicError::Internal(_)) {
                error!("❌ Error interno en /{}: {}", command.data.name, e);
            }
            Reply::Error(e.user_message())
        }
    };

    if !slow {
        return respond(ctx, &command, reply).await;
    }

    let embed = embeds::reply_embed(&reply);
    match deferred_delivery(&reply) {
        DeferredDelivery::EditOriginal => {
            command
                .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
                .await?;
        }
        DeferredDelivery::PrivateFollowup => {
            // A deferred response is public; errors go out as an ephemeral followup.
            command.delete_response(&ctx.http).await?;
            command
                .create_followup(
                    &ctx.http,
                    CreateInteractionResponseFollowup::new().embed(embed).ephemeral(true),
                )
                .await?;
        }
    }
    Ok(())
}

/// How a reply reaches the user once the interaction was deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferredDelivery {
    EditOriginal,
    PrivateFollowup,
}

fn deferred_delivery(reply: &Reply) -> DeferredDelivery {
    if reply.is_private() {
        DeferredDelivery::PrivateFollowup
    } else {
        DeferredDelivery::EditOriginal
    }
}

/// Runs a command on its own task so a panic becomes an internal error
/// instead of taking the process down.
async fn guarded<F>(command: F) -> MusicResult<Reply>
where
    F: Future<Output = MusicResult<Reply>> + Send + 'static,
{
    match tokio::spawn(command).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            error!("💥 Pánico ejecutando comando: {:?}", e);
            Err(MusicError::internal("command panicked"))
        }
        Err(e) => Err(MusicError::internal(format!("command task cancelled: {e}"))),
    }
}

async fn dispatch(player: Arc<AudioPlayer>, command: CommandInteraction, inv: Invocation) -> MusicResult<Reply> {
    let options = command.data.options();

    match command.data.name.as_str() {
        "connect" => player.connect(inv).await,
        "disconnect" => player.disconnect(inv).await,
        "play" => {
            let url = string_option(&options, "url").ok_or_else(|| MusicError::user("Give me a link to play."))?;
            let skip = bool_option(&options, "skip").unwrap_or(false);
            player.play(inv, url, skip).await
        }
        "mp3" => {
            let attachment = options
                .iter()
                .find_map(|o| match o.value {
                    ResolvedValue::Attachment(a) if o.name == "file" => Some(a),
                    _ => None,
                })
                .ok_or_else(|| MusicError::user("Attach an audio file."))?;
            player.mp3(inv, &attachment.url).await
        }
        "skip" => player.skip(inv).await,
        "pause" => player.pause(inv).await,
        "loop" => player.toggle_loop(inv).await,
        "seek" => {
            let time = string_option(&options, "time").ok_or_else(|| MusicError::user("Tell me where to seek to."))?;
            player.seek(inv, time).await
        }
        "vol" => {
            let level = options
                .iter()
                .find_map(|o| match o.value {
                    ResolvedValue::Integer(level) if o.name == "level" => Some(level),
                    _ => None,
                })
                .ok_or_else(|| MusicError::user("Give me a volume between 0 and 200."))?;
            player.volume(inv, level).await
        }
        "remove" => {
            let target = string_option(&options, "target").ok_or_else(|| MusicError::user("Tell me what to remove."))?;
            player.remove(inv, parse_remove_target(target)?).await
        }
        "queue" => player.queue(inv).await,
        "np" => player.now_playing(inv).await,
        "dj" => {
            let role = options.iter().find_map(|o| match o.value {
                ResolvedValue::Role(role) if o.name == "role" => Some(role.id),
                _ => None,
            });
            player.set_dj_role(inv, role).await
        }
        other => Err(MusicError::user(format!("Unknown command /{other}."))),
    }
}

async fn respond(ctx: &Context, command: &CommandInteraction, reply: Reply) -> Result<()> {
    let message = CreateInteractionResponseMessage::new()
        .embed(embeds::reply_embed(&reply))
        .ephemeral(reply.is_private());
    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await?;
    Ok(())
}

fn string_option<'a>(options: &[ResolvedOption<'a>], name: &str) -> Option<&'a str> {
    options.iter().find_map(|o| match o.value {
        ResolvedValue::String(value) if o.name == name => Some(value),
        _ => None,
    })
}

fn bool_option(options: &[ResolvedOption<'_>], name: &str) -> Option<bool> {
    options.iter().find_map(|o| match o.value {
        ResolvedValue::Boolean(value) if o.name == name => Some(value),
        _ => None,
    })
}

/// `all` (any case) or a queue position.
pub fn parse_remove_target(input: &str) -> MusicResult<RemoveTarget> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") {
        return Ok(RemoveTarget::All);
    }
    input
        .parse()
        .map(RemoveTarget::Index)
        .map_err(|_| MusicError::user(format!("`{input}` isn't a queue position. Use a number or `all`.")))
}
