//! Domain types shared by the voice provisioning subsystem.

/// The tuple under which settings, permissions and ownership are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope {
    pub guild_id: u64,
    pub jtc_channel_id: u64,
    pub owner_id: u64,
}

impl Scope {
    pub fn new(guild_id: u64, jtc_channel_id: u64, owner_id: u64) -> Self {
        Self {
            guild_id,
            jtc_channel_id,
            owner_id,
        }
    }

    /// Same trigger, different owner. Used when ownership moves.
    pub fn with_owner(self, owner_id: u64) -> Self {
        Self { owner_id, ..self }
    }
}

/// What a stored permission/feature entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    User,
    Role,
    Everyone,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::User => "user",
            TargetKind::Role => "role",
            TargetKind::Everyone => "everyone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(TargetKind::User),
            "role" => Some(TargetKind::Role),
            "everyone" => Some(TargetKind::Everyone),
            _ => None,
        }
    }
}

/// The four customizable per-target features, stored as one tagged table
/// instead of four near-identical ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// Connect permission (permit/reject).
    Permit,
    /// Force push-to-talk by denying voice activation.
    PushToTalk,
    PrioritySpeaker,
    Soundboard,
}

impl FeatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Permit => "permit",
            FeatureKind::PushToTalk => "ptt",
            FeatureKind::PrioritySpeaker => "priority_speaker",
            FeatureKind::Soundboard => "soundboard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "permit" => Some(FeatureKind::Permit),
            "ptt" => Some(FeatureKind::PushToTalk),
            "priority_speaker" => Some(FeatureKind::PrioritySpeaker),
            "soundboard" => Some(FeatureKind::Soundboard),
            _ => None,
        }
    }
}

/// One stored feature/permission row for a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureEntry {
    pub feature: FeatureKind,
    pub target_id: u64,
    pub target_kind: TargetKind,
    /// Permit/enabled flag; meaning depends on the feature kind.
    pub value: bool,
}

/// Reusable customization template for a scope. Applies to every channel
/// created under the scope, not to one channel instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSettingsProfile {
    /// None means "use the owner's display name".
    pub name: Option<String>,
    /// None means unlimited.
    pub user_limit: Option<u32>,
    pub lock: bool,
}

/// Lifecycle of a cached channel entry. `Deleted` is terminal; abandonment
/// is derived from live presence rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Active,
    Deleted,
}

/// A persisted managed-channel row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceChannelRow {
    pub scope: Scope,
    pub channel_id: u64,
    pub created_at: i64,
    pub last_activity: i64,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips() {
        for kind in [
            FeatureKind::Permit,
            FeatureKind::PushToTalk,
            FeatureKind::PrioritySpeaker,
            FeatureKind::Soundboard,
        ] {
            assert_eq!(FeatureKind::parse(kind.as_str()), Some(kind));
        }
        for kind in [TargetKind::User, TargetKind::Role, TargetKind::Everyone] {
            assert_eq!(TargetKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FeatureKind::parse("unknown"), None);
        assert_eq!(TargetKind::parse(""), None);
    }

    #[test]
    fn test_scope_with_owner() {
        let scope = Scope::new(1, 2, 3);
        let moved = scope.with_owner(9);
        assert_eq!(moved.guild_id, 1);
        assert_eq!(moved.jtc_channel_id, 2);
        assert_eq!(moved.owner_id, 9);
    }
}
