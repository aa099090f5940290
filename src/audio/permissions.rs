use serenity::model::id::{GuildId, UserId};
use tracing::debug;

use super::{entry::StreamEntry, registry::GuildRegistry};
use crate::platform::ChatPlatform;

/// Outcome of a skip vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Quorum reached; the caller should stop the entry.
    Passed { votes: usize, needed: usize },
    Pending { votes: usize, needed: usize },
    AlreadyVoted { votes: usize, needed: usize },
}

/// Stream-level authorization.
///
/// Decisions depend only on the entry, the caller and platform state, so
/// asking twice without an intervening change gives the same answer.
pub struct PermissionGate<'a> {
    platform: &'a dyn ChatPlatform,
    registry: &'a GuildRegistry,
}

impl<'a> PermissionGate<'a> {
    pub fn new(platform: &'a dyn ChatPlatform, registry: &'a GuildRegistry) -> Self {
        Self { platform, registry }
    }

    /// `entry` is whatever sits at the queue position the command targets;
    /// `None` means the queue has nothing to protect there.
    pub fn has_permission(&self, guild: GuildId, entry: Option<&StreamEntry>, user: UserId) -> bool {
        let Some(entry) = entry else {
            return true;
        };

        if entry.is_protected() || entry.author == Some(user) {
            return true;
        }

        if self.platform.can_manage(guild, entry.announce_channel, user) {
            return true;
        }

        match self.registry.dj_role(guild) {
            Some(role) => self.platform.has_role(guild, user, role),
            None => false,
        }
    }

    /// Registers `user`'s vote against `entry`. The quorum is half the
    /// eligible listeners, rounded down.
    pub fn vote_skip(&self, entry: &StreamEntry, user: UserId, eligible: usize) -> VoteOutcome {
        let needed = eligible / 2;
        let fresh = entry.add_skip_vote(user);
        let votes = entry.skip_votes();
        debug!("🗳️ Voto de {} para {} ({}/{})", user, entry.id(), votes, needed);

        if votes >= needed {
            VoteOutcome::Passed { votes, needed }
        } else if fresh {
            VoteOutcome::Pending { votes, needed }
        } else {
            VoteOutcome::AlreadyVoted { votes, needed }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockChatPlatform;
    use mockall::predicate::eq;
    use serenity::model::id::{ChannelId, RoleId};

    const GUILD: GuildId = GuildId::new(1);
    const AUTHOR: UserId = UserId::new(10);
    const OTHER: UserId = UserId::new(20);

    fn entry() -> StreamEntry {
        StreamEntry::new(Some(AUTHOR), ChannelId::new(3), "https://a.example", 65)
    }

    fn denying_platform() -> MockChatPlatform {
        let mut platform = MockChatPlatform::new();
        platform.expect_can_manage().return_const(false);
        platform.expect_has_role().return_const(false);
        platform
    }

    #[test]
    fn empty_position_is_permitted() {
        let platform = MockChatPlatform::new();
        let registry = GuildRegistry::new();
        assert!(PermissionGate::new(&platform, &registry).has_permission(GUILD, None, OTHER));
    }

    #[test]
    fn author_is_permitted_without_platform_lookups() {
        let platform = MockChatPlatform::new();
        let registry = GuildRegistry::new();
        assert!(PermissionGate::new(&platform, &registry).has_permission(GUILD, Some(&entry()), AUTHOR));
    }

    #[test]
    fn manager_is_checked_on_the_announce_channel() {
        let mut platform = MockChatPlatform::new();
        platform
            .expect_can_manage()
            .with(eq(GUILD), eq(ChannelId::new(3)), eq(OTHER))
            .return_const(true);
        let registry = GuildRegistry::new();
        assert!(PermissionGate::new(&platform, &registry).has_permission(GUILD, Some(&entry()), OTHER));
    }

    #[test]
    fn dj_role_holder_is_permitted() {
        let mut platform = MockChatPlatform::new();
        platform.expect_can_manage().return_const(false);
        platform
            .expect_has_role()
            .with(eq(GUILD), eq(OTHER), eq(RoleId::new(77)))
            .return_const(true);
        let registry = GuildRegistry::new();
        registry.set_dj_role(GUILD, Some(RoleId::new(77)));

        assert!(PermissionGate::new(&platform, &registry).has_permission(GUILD, Some(&entry()), OTHER));
    }

    #[test]
    fn without_dj_role_configured_the_role_is_never_asked() {
        let mut platform = MockChatPlatform::new();
        platform.expect_can_manage().return_const(false);
        platform.expect_has_role().never();
        let registry = GuildRegistry::new();

        assert!(!PermissionGate::new(&platform, &registry).has_permission(GUILD, Some(&entry()), OTHER));
    }

    #[test]
    fn decision_is_deterministic() {
        let platform = denying_platform();
        let registry = GuildRegistry::new();
        registry.set_dj_role(GUILD, Some(RoleId::new(77)));
        let gate = PermissionGate::new(&platform, &registry);
        let e = entry();

        for user in [AUTHOR, OTHER] {
            let first = gate.has_permission(GUILD, Some(&e), user);
            for _ in 0..5 {
                assert_eq!(gate.has_permission(GUILD, Some(&e), user), first);
            }
        }
    }

    #[test]
    fn protected_entries_skip_the_gate() {
        let platform = MockChatPlatform::new();
        let registry = GuildRegistry::new();
        let clip = StreamEntry::new(None, ChannelId::new(3), "/clips/rain.ogg", 65).system_clip();
        assert!(PermissionGate::new(&platform, &registry).has_permission(GUILD, Some(&clip), OTHER));
    }

    #[test]
    fn vote_fires_exactly_at_half_the_listeners() {
        let platform = MockChatPlatform::new();
        let registry = GuildRegistry::new();
        let gate = PermissionGate::new(&platform, &registry);

        for eligible in 2..=9usize {
            let e = entry();
            let needed = eligible / 2;
            for voter in 1..needed {
                assert!(
                    matches!(gate.vote_skip(&e, UserId::new(voter as u64), eligible), VoteOutcome::Pending { .. }),
                    "{voter} of {eligible} must not pass"
                );
            }
            assert_eq!(
                gate.vote_skip(&e, UserId::new(needed as u64), eligible),
                VoteOutcome::Passed { votes: needed, needed }
            );
        }
    }

    #[test]
    fn single_listener_passes_on_first_vote() {
        let platform = MockChatPlatform::new();
        let registry = GuildRegistry::new();
        let gate = PermissionGate::new(&platform, &registry);
        assert!(matches!(gate.vote_skip(&entry(), OTHER, 1), VoteOutcome::Passed { .. }));
    }

    #[test]
    fn repeated_vote_does_not_count_twice() {
        let platform = MockChatPlatform::new();
        let registry = GuildRegistry::new();
        let gate = PermissionGate::new(&platform, &registry);
        let e = entry();

        assert_eq!(gate.vote_skip(&e, OTHER, 6), VoteOutcome::Pending { votes: 1, needed: 3 });
        assert_eq!(gate.vote_skip(&e, OTHER, 6), VoteOutcome::AlreadyVoted { votes: 1, needed: 3 });
    }
}
