use std::{path::PathBuf, pin::Pin, process::Stdio, time::Duration};
use tokio::{
    io::AsyncRead,
    process::{Child, Command},
};
use tracing::{debug, warn};

use crate::error::{MusicError, MusicResult};

/// Parameters for one transcoder run.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub source: String,
    /// Percent, 0–200.
    pub volume: u16,
    /// Start position inside the source.
    pub offset: Duration,
    /// Network reconnect flags; off for local system clips.
    pub network_retry: bool,
    pub bitrate: u32,
}

/// Running transcoder: its stdout plus the child to reap.
pub struct TranscodeStream {
    pub output: Pin<Box<dyn AsyncRead + Send>>,
    child: Option<Child>,
}

impl TranscodeStream {
    pub fn new(output: Pin<Box<dyn AsyncRead + Send>>, child: Option<Child>) -> Self {
        Self { output, child }
    }

    /// Kills and reaps the subprocess. Called on every exit path, including
    /// a natural end of stream, so no zombie is left behind.
    pub async fn shutdown(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("Transcoder ya había terminado: {}", e);
            }
            match child.wait().await {
                Ok(status) => debug!("🧹 Transcoder recogido ({})", status),
                Err(e) => warn!("No se pudo recoger el transcoder: {}", e),
            }
        }
    }
}

pub trait Transcoder: Send + Sync {
    fn spawn(&self, request: &TranscodeRequest) -> MusicResult<TranscodeStream>;
}

/// ffmpeg emitting Ogg/Opus on stdout.
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    pub fn args(request: &TranscodeRequest) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .into_iter()
            .map(String::from)
            .collect();

        if request.network_retry {
            args.extend(
                [
                    "-reconnect",
                    "1",
                    "-reconnect_streamed",
                    "1",
                    "-reconnect_delay_max",
                    "5",
                ]
                .into_iter()
                .map(String::from),
            );
        }

        if !request.offset.is_zero() {
            args.push("-ss".into());
            args.push(format!("{:.3}", request.offset.as_secs_f64()));
        }

        args.push("-i".into());
        args.push(request.source.clone());

        args.extend(
            [
                "-vn".to_string(),
                "-af".to_string(),
                format!("volume={:.2}", f64::from(request.volume) / 100.0),
                "-c:a".to_string(),
                "libopus".to_string(),
                "-b:a".to_string(),
                request.bitrate.to_string(),
                "-ar".to_string(),
                "48000".to_string(),
                "-ac".to_string(),
                "2".to_string(),
                "-frame_duration".to_string(),
                "20".to_string(),
                "-f".to_string(),
                "ogg".to_string(),
                "pipe:1".to_string(),
            ],
        );

        args
    }
}

impl Transcoder for FfmpegTranscoder {
    fn spawn(&self, request: &TranscodeRequest) -> MusicResult<TranscodeStream> {
        let mut child = Command::new(&self.binary)
            .args(Self::args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MusicError::external(format!("could not start ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MusicError::external("ffmpeg stdout pipe unavailable"))?;

        debug!("🎛️ ffmpeg lanzado para {} (offset {:?})", request.source, request.offset);
        Ok(TranscodeStream::new(Box::pin(stdout), Some(child)))
    }
}
