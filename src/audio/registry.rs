use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serenity::model::id::{ChannelId, GuildId, RoleId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, info, warn};

use super::{entry::StopReason, queue::MusicQueue};
use crate::{
    error::MusicResult,
    platform::{VoiceConnector, VoiceTransport},
    storage::JsonStorage,
};

pub const DJ_ROLES_BLOB: &str = "dj_roles";

/// Everything that exists while the bot sits in a guild's voice channel.
pub struct GuildSession {
    pub guild: GuildId,
    pub queue: RwLock<MusicQueue>,
    voice_channel: RwLock<ChannelId>,
    /// Text channel for bot-initiated clips; set by whoever connected.
    text_channel: ChannelId,
    transport: RwLock<Arc<dyn VoiceTransport>>,
}

impl GuildSession {
    pub fn new(
        guild: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
        transport: Arc<dyn VoiceTransport>,
    ) -> Self {
        Self {
            guild,
            queue: RwLock::new(MusicQueue::new()),
            voice_channel: RwLock::new(voice_channel),
            text_channel,
            transport: RwLock::new(transport),
        }
    }

    pub fn voice_channel(&self) -> ChannelId {
        *self.voice_channel.read()
    }

    pub fn text_channel(&self) -> ChannelId {
        self.text_channel
    }

    pub fn transport(&self) -> Arc<dyn VoiceTransport> {
        self.transport.read().clone()
    }

    /// Records a move the voice gateway already carried out; the live
    /// transport follows the call on its own.
    pub fn set_voice_channel(&self, channel: ChannelId) {
        *self.voice_channel.write() = channel;
    }

    /// Installs a new transport after a reconnect and forwards it to the
    /// entry currently streaming, if any.
    pub fn redirect(&self, channel: ChannelId, transport: Arc<dyn VoiceTransport>) {
        *self.voice_channel.write() = channel;
        *self.transport.write() = transport.clone();

        let queue = self.queue.read();
        if let Some(entry) = queue.iter().map(|(_, e)| e).find(|e| e.is_streaming()) {
            entry.redirect.post(transport);
            debug!("🔀 Transporte redirigido para la entrada {}", entry.id());
        }
    }
}

/// Process-wide guild state.
///
/// Three independently sharded maps: live sessions, last-activity stamps and
/// DJ roles. Lookups clone the session `Arc` out of the map so no map guard
/// is ever held while a queue lock is taken.
#[derive(Default)]
pub struct GuildRegistry {
    sessions: DashMap<GuildId, Arc<GuildSession>>,
    last_active: DashMap<GuildId, DateTime<Utc>>,
    dj_roles: DashMap<GuildId, RoleId>,
    dj_dirty: AtomicBool,
}

impl GuildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, guild: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions.get(&guild).map(|s| s.clone())
    }

    /// Installs `session` unless another one won the race; returns whichever
    /// is registered.
    pub fn install(&self, session: GuildSession) -> Arc<GuildSession> {
        let guild = session.guild;
        let installed = self
            .sessions
            .entry(guild)
            .or_insert_with(|| Arc::new(session))
            .clone();
        info!("🎧 Sesión de voz registrada para guild {}", guild);
        installed
    }

    pub fn remove(&self, guild: GuildId) -> Option<Arc<GuildSession>> {
        self.last_active.remove(&guild);
        self.sessions.remove(&guild).map(|(_, s)| s)
    }

    /// Ends a guild's voice session: every entry is stopped as a teardown,
    /// the queue is dropped and the voice connection is left.
    pub async fn teardown(&self, guild: GuildId, voice: &dyn VoiceConnector) -> MusicResult<()> {
        if let Some(session) = self.remove(guild) {
            let drained = session.queue.write().drain();
            for entry in &drained {
                entry.request_stop(StopReason::Teardown);
            }
            info!("🛑 Sesión de guild {} cerrada ({} entradas)", guild, drained.len());
        }
        voice.leave(guild).await
    }

    /// Snapshot of all sessions; the map is only locked while copying.
    pub fn sessions(&self) -> Vec<Arc<GuildSession>> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    pub fn touch(&self, guild: GuildId, now: DateTime<Utc>) {
        self.last_active.insert(guild, now);
    }

    pub fn last_active(&self, guild: GuildId) -> Option<DateTime<Utc>> {
        self.last_active.get(&guild).map(|t| *t)
    }

    // DJ roles

    pub fn dj_role(&self, guild: GuildId) -> Option<RoleId> {
        self.dj_roles.get(&guild).map(|r| *r)
    }

    pub fn set_dj_role(&self, guild: GuildId, role: Option<RoleId>) {
        match role {
            Some(role) => {
                self.dj_roles.insert(guild, role);
            }
            None => {
                self.dj_roles.remove(&guild);
            }
        }
        self.dj_dirty.store(true, Ordering::Release);
    }

    pub async fn load_dj_roles(&self, storage: &JsonStorage) -> Result<usize> {
        let stored: HashMap<u64, u64> = storage.load(DJ_ROLES_BLOB).await?.unwrap_or_default();
        let mut loaded = 0;
        for (guild, role) in stored {
            if guild == 0 || role == 0 {
                warn!("Ignorando rol DJ inválido ({} → {})", guild, role);
                continue;
            }
            self.dj_roles.insert(GuildId::new(guild), RoleId::new(role));
            loaded += 1;
        }
        if loaded > 0 {
            info!("📂 Cargados {} roles de DJ", loaded);
        }
        Ok(loaded)
    }

    /// Writes DJ roles out when they changed since the last save, or always
    /// with `force`.
    pub async fn save_dj_roles(&self, storage: &JsonStorage, force: bool) -> Result<()> {
        if !self.dj_dirty.swap(false, Ordering::AcqRel) && !force {
            return Ok(());
        }

        let snapshot: HashMap<u64, u64> = self
            .dj_roles
            .iter()
            .map(|r| (r.key().get(), r.value().get()))
            .collect();

        if let Err(e) = storage.save(DJ_ROLES_BLOB, &snapshot).await {
            self.dj_dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!("💾 {} roles de DJ guardados", snapshot.len());
        Ok(())
    }
}
