//! Narrow interfaces to everything outside the music core.
//!
//! The queue, streamer and scheduler only ever talk to the chat platform,
//! the voice gateway, the metadata lookup and the transcoder through these
//! traits. The Discord-backed implementations live in [`crate::bot::discord`].

use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};
use std::sync::Arc;
use thiserror::Error;

use crate::{audio::reply::Reply, error::MusicResult};

#[derive(Debug, Clone, Copy, Error)]
#[error("voice transport closed")]
pub struct TransportClosed;

/// Outbound voice packet sink. `send` resolves once the transport accepted
/// the packet, which paces the caller at playback speed.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn send(&self, packet: Bytes) -> Result<(), TransportClosed>;
}

#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn join(&self, guild: GuildId, channel: ChannelId) -> MusicResult<Arc<dyn VoiceTransport>>;

    async fn leave(&self, guild: GuildId) -> MusicResult<()>;

    /// Channel the bot is currently connected to, if any.
    async fn current_channel(&self, guild: GuildId) -> Option<ChannelId>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Posts a message to a text channel. Failures are logged by the
    /// implementation, never propagated into the music core.
    async fn send(&self, channel: ChannelId, reply: Reply);

    /// Whether `user` holds guild-management permission in `channel`.
    fn can_manage(&self, guild: GuildId, channel: ChannelId, user: UserId) -> bool;

    fn has_role(&self, guild: GuildId, user: UserId, role: RoleId) -> bool;

    fn voice_channel_of(&self, guild: GuildId, user: UserId) -> Option<ChannelId>;

    /// Members of `channel` who are neither self- nor server-muted or
    /// deafened, excluding the bot itself.
    fn eligible_listeners(&self, guild: GuildId, channel: ChannelId) -> usize;
}
