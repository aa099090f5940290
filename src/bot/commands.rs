use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        connect_command(),
        disconnect_command(),
        play_command(),
        mp3_command(),
        skip_command(),
        pause_command(),
        loop_command(),
        seek_command(),
        vol_command(),
        remove_command(),
        queue_command(),
        np_command(),
        dj_command(),
    ]
}

// Conexión

fn connect_command() -> CreateCommand {
    CreateCommand::new("connect")
        .description("Join your voice channel")
}

fn disconnect_command() -> CreateCommand {
    CreateCommand::new("disconnect")
        .description("Clear the queue and leave the voice channel")
}

// Reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Queue a track from a link")
        .add_option(CreateCommandOption::new(CommandOptionType::String, "url", "Link to the track").required(true))
        .add_option(CreateCommandOption::new(
            CommandOptionType::Boolean,
            "skip",
            "Replace the current track right away",
        ))
}

fn mp3_command() -> CreateCommand {
    CreateCommand::new("mp3")
        .description("Queue an uploaded audio file")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Attachment, "file", "Audio file to play").required(true),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip")
        .description("Skip the current track, or vote to skip it")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause")
        .description("Pause or resume the current track")
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop")
        .description("Toggle looping of the current track")
}

fn seek_command() -> CreateCommand {
    CreateCommand::new("seek")
        .description("Jump to a position in the current track")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "time", "Position, e.g. 90, 1:30 or 1m30s")
                .required(true),
        )
}

fn vol_command() -> CreateCommand {
    CreateCommand::new("vol")
        .description("Set the volume of the current track")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "level", "Volume (0-200)")
                .required(true)
                .min_int_value(0)
                .max_int_value(200),
        )
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Remove a track from the queue")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "target", "Queue position, or `all`").required(true),
        )
}

// Información

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Show the upcoming tracks")
}

fn np_command() -> CreateCommand {
    CreateCommand::new("np")
        .description("Show the track that is playing")
}

// Configuración

fn dj_command() -> CreateCommand {
    CreateCommand::new("dj")
        .description("Set the role allowed to control any track")
        .add_option(CreateCommandOption::new(
            CommandOptionType::Role,
            "role",
            "DJ role; leave empty to clear it",
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_is_registered_once() {
        let names: Vec<String> = all_commands()
            .iter()
            .map(|c| serde_json::to_value(c).unwrap()["name"].as_str().unwrap().to_string())
            .collect();
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();

        assert_eq!(names.len(), 13);
        assert_eq!(unique.len(), names.len());
        assert!(names.iter().any(|n| n == "np"));
    }
}
