//! Resolves stored feature entries into the permission overwrites applied to
//! a live channel.
//!
//! Precedence is explicit and ordered: the everyone entry (plus the lock
//! flag) establishes the baseline, role entries override it for members
//! holding the role, and user entries override everything. Within one target
//! the per-feature bits are merged into a single overwrite. Entries whose
//! target no longer resolves are kept in storage but skipped here and
//! reported as integrity issues.

use std::collections::{BTreeMap, HashSet};

use serenity::model::channel::{PermissionOverwrite, PermissionOverwriteType};
use serenity::model::id::{RoleId, UserId};
use serenity::model::permissions::Permissions;

use super::types::{FeatureEntry, FeatureKind, TargetKind};

/// A stored target id that no longer resolves to a live role or member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityIssue {
    pub guild_id: u64,
    pub target_id: u64,
    pub target_kind: TargetKind,
    pub feature: FeatureKind,
}

#[derive(Debug, Default)]
pub struct ResolvedOverlay {
    pub overwrites: Vec<PermissionOverwrite>,
    pub issues: Vec<IntegrityIssue>,
}

/// Permission bits a feature toggles. `value = true` grants `allow_on_true`,
/// `value = false` grants the inverse.
fn feature_bits(feature: FeatureKind) -> (Permissions, bool) {
    match feature {
        FeatureKind::Permit => (Permissions::CONNECT, true),
        // Forcing push-to-talk means denying voice activation.
        FeatureKind::PushToTalk => (Permissions::USE_VAD, false),
        FeatureKind::PrioritySpeaker => (Permissions::PRIORITY_SPEAKER, true),
        FeatureKind::Soundboard => (Permissions::USE_SOUNDBOARD, true),
    }
}

fn precedence_rank(kind: TargetKind) -> u8 {
    match kind {
        TargetKind::Everyone => 0,
        TargetKind::Role => 1,
        TargetKind::User => 2,
    }
}

/// Computes the overwrite set for a channel.
///
/// `roles` and `members` are the ids that currently resolve in the guild;
/// anything else becomes an [`IntegrityIssue`]. The everyone target always
/// resolves (its role id equals the guild id by platform convention).
pub fn resolve_overlay(
    guild_id: u64,
    lock: bool,
    entries: &[FeatureEntry],
    roles: &HashSet<u64>,
    members: &HashSet<u64>,
) -> ResolvedOverlay {
    // (precedence rank, target id) -> (allow, deny); BTreeMap keeps the
    // output ordered everyone -> roles -> users.
    let mut merged: BTreeMap<(u8, u64), (Permissions, Permissions)> = BTreeMap::new();
    let mut issues = Vec::new();

    let mut grant = |rank: u8, target: u64, bits: Permissions, allowed: bool| {
        let (allow, deny) = merged.entry((rank, target)).or_insert((
            Permissions::empty(),
            Permissions::empty(),
        ));
        if allowed {
            allow.insert(bits);
            deny.remove(bits);
        } else {
            deny.insert(bits);
            allow.remove(bits);
        }
    };

    if lock {
        grant(
            precedence_rank(TargetKind::Everyone),
            guild_id,
            Permissions::CONNECT,
            false,
        );
    }

    for entry in entries {
        let resolved = match entry.target_kind {
            TargetKind::Everyone => true,
            TargetKind::Role => roles.contains(&entry.target_id),
            TargetKind::User => members.contains(&entry.target_id),
        };
        if !resolved {
            issues.push(IntegrityIssue {
                guild_id,
                target_id: entry.target_id,
                target_kind: entry.target_kind,
                feature: entry.feature,
            });
            continue;
        }

        let (bits, allow_on_true) = feature_bits(entry.feature);
        let target = match entry.target_kind {
            TargetKind::Everyone => guild_id,
            _ => entry.target_id,
        };
        grant(
            precedence_rank(entry.target_kind),
            target,
            bits,
            entry.value == allow_on_true,
        );
    }

    let overwrites = merged
        .into_iter()
        .map(|((rank, target), (allow, deny))| PermissionOverwrite {
            allow,
            deny,
            kind: if rank == precedence_rank(TargetKind::User) {
                PermissionOverwriteType::Member(UserId::new(target))
            } else {
                PermissionOverwriteType::Role(RoleId::new(target))
            },
        })
        .collect();

    ResolvedOverlay { overwrites, issues }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: u64 = 500;

    fn entry(feature: FeatureKind, target_id: u64, kind: TargetKind, value: bool) -> FeatureEntry {
        FeatureEntry {
            feature,
            target_id,
            target_kind: kind,
            value,
        }
    }

    fn find<'a>(
        overlay: &'a ResolvedOverlay,
        kind: &PermissionOverwriteType,
    ) -> Option<&'a PermissionOverwrite> {
        overlay.overwrites.iter().find(|o| o.kind == *kind)
    }

    #[test]
    fn test_lock_denies_everyone_connect() {
        let overlay = resolve_overlay(GUILD, true, &[], &HashSet::new(), &HashSet::new());
        assert_eq!(overlay.overwrites.len(), 1);
        let everyone = find(&overlay, &PermissionOverwriteType::Role(RoleId::new(GUILD))).unwrap();
        assert!(everyone.deny.contains(Permissions::CONNECT));
        assert!(overlay.issues.is_empty());
    }

    #[test]
    fn test_precedence_ordering() {
        let roles = HashSet::from([10]);
        let members = HashSet::from([20]);
        let entries = [
            entry(FeatureKind::Permit, 20, TargetKind::User, true),
            entry(FeatureKind::Permit, 10, TargetKind::Role, false),
            entry(FeatureKind::Permit, 0, TargetKind::Everyone, false),
        ];
        let overlay = resolve_overlay(GUILD, false, &entries, &roles, &members);

        // everyone -> role -> user, regardless of input order
        let kinds: Vec<_> = overlay.overwrites.iter().map(|o| o.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PermissionOverwriteType::Role(RoleId::new(GUILD)),
                PermissionOverwriteType::Role(RoleId::new(10)),
                PermissionOverwriteType::Member(UserId::new(20)),
            ]
        );

        let user = find(&overlay, &PermissionOverwriteType::Member(UserId::new(20))).unwrap();
        assert!(user.allow.contains(Permissions::CONNECT));
        let role = find(&overlay, &PermissionOverwriteType::Role(RoleId::new(10))).unwrap();
        assert!(role.deny.contains(Permissions::CONNECT));
    }

    #[test]
    fn test_features_merge_per_target() {
        let members = HashSet::from([20]);
        let entries = [
            entry(FeatureKind::Permit, 20, TargetKind::User, true),
            entry(FeatureKind::PushToTalk, 20, TargetKind::User, true),
            entry(FeatureKind::Soundboard, 20, TargetKind::User, false),
        ];
        let overlay = resolve_overlay(GUILD, false, &entries, &HashSet::new(), &members);
        assert_eq!(overlay.overwrites.len(), 1);

        let user = &overlay.overwrites[0];
        assert!(user.allow.contains(Permissions::CONNECT));
        // ptt enabled denies voice activation
        assert!(user.deny.contains(Permissions::USE_VAD));
        assert!(user.deny.contains(Permissions::USE_SOUNDBOARD));
    }

    #[test]
    fn test_unresolvable_targets_become_issues() {
        let roles = HashSet::from([10]);
        let entries = [
            entry(FeatureKind::Permit, 10, TargetKind::Role, true),
            entry(FeatureKind::Permit, 99, TargetKind::Role, true),
            entry(FeatureKind::PrioritySpeaker, 77, TargetKind::User, true),
        ];
        let overlay = resolve_overlay(GUILD, false, &entries, &roles, &HashSet::new());

        assert_eq!(overlay.overwrites.len(), 1);
        assert_eq!(overlay.issues.len(), 2);
        assert!(overlay
            .issues
            .iter()
            .any(|i| i.target_id == 99 && i.target_kind == TargetKind::Role));
        assert!(overlay
            .issues
            .iter()
            .any(|i| i.target_id == 77 && i.target_kind == TargetKind::User));
        // No overwrite was emitted for the stale ids
        assert!(find(&overlay, &PermissionOverwriteType::Role(RoleId::new(99))).is_none());
    }

    #[test]
    fn test_lock_merges_with_everyone_entry() {
        let entries = [entry(FeatureKind::Soundboard, 0, TargetKind::Everyone, true)];
        let overlay = resolve_overlay(GUILD, true, &entries, &HashSet::new(), &HashSet::new());
        assert_eq!(overlay.overwrites.len(), 1);
        let everyone = &overlay.overwrites[0];
        assert!(everyone.deny.contains(Permissions::CONNECT));
        assert!(everyone.allow.contains(Permissions::USE_SOUNDBOARD));
    }
}
