pub mod ytdlp;

use async_trait::async_trait;
use url::Url;

use crate::{audio::entry::TrackMetadata, error::MusicResult};

pub use ytdlp::YtDlpResolver;

/// A track ready to enqueue: display metadata plus the location the
/// transcoder should read from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub metadata: TrackMetadata,
    pub stream_url: String,
}

/// Trait común para las búsquedas de metadatos
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> MusicResult<ResolvedTrack>;
}

/// Only plain web URLs are accepted from users.
pub fn is_valid_url(candidate: &str) -> bool {
    match Url::parse(candidate.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}
