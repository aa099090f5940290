use async_trait::async_trait;
use serde::Deserialize;
use std::{path::PathBuf, process::Stdio, time::Duration};
use tracing::{info, warn};

use super::{MetadataResolver, ResolvedTrack};
use crate::{
    audio::entry::TrackMetadata,
    error::{MusicError, MusicResult},
};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(45);

/// Metadata lookup through `yt-dlp --dump-json`.
pub struct YtDlpResolver {
    binary: PathBuf,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    /// Direct media URL for the selected format.
    url: Option<String>,
    is_live: Option<bool>,
}

impl YtDlpResolver {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Verifica que yt-dlp esté disponible
    pub async fn verify(&self) -> anyhow::Result<()> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await?;

        if !output.status.success() {
            anyhow::bail!("yt-dlp no disponible");
        }
        info!("✅ yt-dlp versión: {}", String::from_utf8_lossy(&output.stdout).trim());
        Ok(())
    }

    fn parse(url: &str, stdout: &[u8]) -> MusicResult<ResolvedTrack> {
        // Playlists print one object per line; only the first entry is used.
        let first = stdout
            .split(|&b| b == b'\n')
            .find(|line| !line.iter().all(u8::is_ascii_whitespace))
            .ok_or_else(|| MusicError::external("yt-dlp returned no metadata"))?;

        let info: VideoInfo = serde_json::from_slice(first)
            .map_err(|e| MusicError::external(format!("unreadable yt-dlp output: {e}")))?;

        let stream_url = info
            .url
            .ok_or_else(|| MusicError::external("yt-dlp found no playable format"))?;

        let duration = match info.is_live {
            Some(true) => None,
            _ => info
                .duration
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(Duration::from_secs_f64),
        };

        Ok(ResolvedTrack {
            metadata: TrackMetadata {
                title: info.title.unwrap_or_else(|| "Unknown".to_string()),
                duration,
                thumbnail: info.thumbnail,
                webpage_url: info.webpage_url.or_else(|| Some(url.to_string())),
            },
            stream_url,
        })
    }
}

#[async_trait]
impl MetadataResolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> MusicResult<ResolvedTrack> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args([
            "--dump-json",
            "--no-playlist",
            "--format",
            "bestaudio/best",
            "--socket-timeout",
            "15",
            "--retries",
            "2",
            "--quiet",
            "--no-warnings",
        ])
        .arg("--")
        .arg(url)
        .stdin(Stdio::null())
        .kill_on_drop(true);

        let output = tokio::time::timeout(LOOKUP_TIMEOUT, cmd.output())
            .await
            .map_err(|_| MusicError::external("Timed out looking up that link"))?
            .map_err(|e| MusicError::external(format!("could not run yt-dlp: {e}")))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp falló para {}: {}", url, error.trim());
            return Err(MusicError::external("Couldn't get info for that link"));
        }

        let track = Self::parse(url, &output.stdout)?;
        info!("🔍 Metadatos resueltos: {}", track.metadata.title);
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_dump_json_output() {
        let json = br#"{"title":"Song","duration":212.4,"thumbnail":"https://i.example/t.jpg","webpage_url":"https://www.youtube.com/watch?v=abc","url":"https://rr1.example/videoplayback"}"#;
        let track = YtDlpResolver::parse("https://youtu.be/abc", json).unwrap();

        assert_eq!(track.stream_url, "https://rr1.example/videoplayback");
        assert_eq!(track.metadata.title, "Song");
        assert_eq!(track.metadata.duration, Some(Duration::from_secs_f64(212.4)));
        assert_eq!(
            track.metadata.webpage_url.as_deref(),
            Some("https://www.youtube.com/watch?v=abc")
        );
    }

    #[test]
    fn live_streams_have_no_duration() {
        let json = br#"{"title":"Radio","duration":0,"is_live":true,"url":"https://live.example/x"}"#;
        let track = YtDlpResolver::parse("https://live.example", json).unwrap();
        assert!(track.metadata.duration.is_none());
        assert_eq!(track.metadata.webpage_url.as_deref(), Some("https://live.example"));
    }

    #[test]
    fn missing_format_is_an_external_error() {
        let json = br#"{"title":"Nothing"}"#;
        let err = YtDlpResolver::parse("https://x.example", json).unwrap_err();
        assert!(matches!(err, MusicError::ExternalProcess(_)));
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(YtDlpResolver::parse("https://x.example", b"\n\n").is_err());
    }
}
