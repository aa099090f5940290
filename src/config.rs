use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: u16,
    pub max_queue_size: usize,
    pub opus_bitrate: u32,
    pub ffmpeg_path: PathBuf,
    pub ytdlp_path: PathBuf,

    // Paths
    pub data_dir: PathBuf,
    pub ambient_dir: PathBuf,
    pub farewell_clip: PathBuf,

    // Scheduler
    pub popper_tick_ms: u64,
    pub idle_ambient_secs: u64,
    pub idle_farewell_secs: u64,
    pub idle_disconnect_secs: u64,
    pub ambient_chance: f64,

    // Timeouts
    pub stall_timeout_secs: u64,
    pub redirect_timeout_secs: u64,

    // Persistence
    pub save_interval_secs: u64,
}

fn env_or<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()?)
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Audio
            default_volume: env_or("DEFAULT_VOLUME", "65")?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", "500")?,
            opus_bitrate: env_or("OPUS_BITRATE", "96000")?, // 96kbps (Discord default)
            ffmpeg_path: env_or("FFMPEG_PATH", "ffmpeg")?,
            ytdlp_path: env_or("YTDLP_PATH", "yt-dlp")?,

            // Paths
            data_dir: env_or("DATA_DIR", "./data")?,
            ambient_dir: env_or("AMBIENT_DIR", "./assets/ambient")?,
            farewell_clip: env_or("FAREWELL_CLIP", "./assets/farewell.ogg")?,

            // Scheduler
            popper_tick_ms: env_or("POPPER_TICK_MS", "3000")?,
            idle_ambient_secs: env_or("IDLE_AMBIENT_SECS", "120")?,
            idle_farewell_secs: env_or("IDLE_FAREWELL_SECS", "590")?,
            idle_disconnect_secs: env_or("IDLE_DISCONNECT_SECS", "600")?,
            ambient_chance: env_or("AMBIENT_CHANCE", "0.25")?,

            stall_timeout_secs: env_or("STALL_TIMEOUT_SECS", "30")?,
            redirect_timeout_secs: env_or("REDIRECT_TIMEOUT_SECS", "10")?,

            save_interval_secs: env_or("SAVE_INTERVAL_SECS", "300")?,
        };

        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0 and 200 percent
    /// - Opus bitrate must stay within 8–510kbps (Discord limits)
    /// - Idle thresholds must escalate: ambient < farewell < disconnect
    /// - The scheduler tick and queue size must be non-zero
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 200 {
            anyhow::bail!("Default volume must be between 0 and 200, got: {}", self.default_volume);
        }

        if self.opus_bitrate > 510_000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8_000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.popper_tick_ms == 0 {
            anyhow::bail!("Scheduler tick must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if !(self.idle_ambient_secs < self.idle_farewell_secs
            && self.idle_farewell_secs < self.idle_disconnect_secs)
        {
            anyhow::bail!(
                "Idle thresholds must escalate (ambient {}s < farewell {}s < disconnect {}s)",
                self.idle_ambient_secs,
                self.idle_farewell_secs,
                self.idle_disconnect_secs
            );
        }

        if !(0.0..=1.0).contains(&self.ambient_chance) {
            anyhow::bail!("Ambient chance must be a probability, got: {}", self.ambient_chance);
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the bot token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}% vol, {}kbps, queue limit {}\n  \
            Idle: ambient {}s, farewell {}s, disconnect {}s (tick {}ms)\n  \
            Data: {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume,
            self.opus_bitrate / 1000,
            self.max_queue_size,
            self.idle_ambient_secs,
            self.idle_farewell_secs,
            self.idle_disconnect_secs,
            self.popper_tick_ms,
            self.data_dir.display(),
        )
    }

    pub fn popper_tick(&self) -> Duration {
        Duration::from_millis(self.popper_tick_ms)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: 65,
            max_queue_size: 500,
            opus_bitrate: 96_000,
            ffmpeg_path: "ffmpeg".into(),
            ytdlp_path: "yt-dlp".into(),

            data_dir: "./data".into(),
            ambient_dir: "./assets/ambient".into(),
            farewell_clip: "./assets/farewell.ogg".into(),

            popper_tick_ms: 3000,
            idle_ambient_secs: 120,
            idle_farewell_secs: 590,
            idle_disconnect_secs: 600,
            ambient_chance: 0.25,

            stall_timeout_secs: 30,
            redirect_timeout_secs: 10,

            save_interval_secs: 300,
        }
    }
}
