//! Channel provisioning: the join-to-create fast path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::error::VoiceError;
use super::types::{ChannelState, Scope, VoiceChannelRow};
use super::VoiceService;

/// One async mutex per (guild, jtc, owner) scope. Provisioning, claim and
/// transfer for the same scope serialize on it; without this, two rapid join
/// events would create duplicate channels.
#[derive(Default)]
pub struct ScopeLocks {
    inner: Mutex<HashMap<Scope, Arc<tokio::sync::Mutex<()>>>>,
}

impl ScopeLocks {
    fn entry(&self, scope: Scope) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap();
        map.entry(scope)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Non-blocking acquisition for the provisioning path: a second trigger
    /// event while the first is in flight gets `None` instead of queueing up
    /// another channel.
    pub fn try_acquire(&self, scope: Scope) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        self.entry(scope).try_lock_owned().ok()
    }

    pub async fn acquire(&self, scope: Scope) -> tokio::sync::OwnedMutexGuard<()> {
        self.entry(scope).lock_owned().await
    }
}

impl VoiceService {
    /// Provisions a channel for a member who joined a trigger channel.
    ///
    /// Remote creation failure aborts before anything is persisted. Overlay
    /// and member-move failures are logged and non-fatal: the channel stands
    /// and the member can join it manually.
    pub async fn provision(
        &self,
        guild_id: u64,
        jtc_channel_id: u64,
        user_id: u64,
    ) -> Result<u64, VoiceError> {
        if let Some(remaining) = self.db.cooldown_remaining(
            guild_id,
            jtc_channel_id,
            user_id,
            self.creation_cooldown,
            self.now(),
        )? {
            return Err(VoiceError::CooldownActive(remaining));
        }

        let scope = Scope::new(guild_id, jtc_channel_id, user_id);
        let _guard = self.locks.try_acquire(scope).ok_or(VoiceError::ScopeLocked)?;

        let profile = self.db.get_channel_profile(&scope)?.unwrap_or_default();
        let name = match &profile.name {
            Some(name) => name.clone(),
            None => self.platform.display_name(guild_id, user_id).await?,
        };
        let parent = match self.platform.parent_category(guild_id, jtc_channel_id).await {
            Ok(parent) => parent,
            Err(err) => {
                warn!(
                    "Voice: could not resolve parent category of trigger {}: {}",
                    jtc_channel_id, err
                );
                None
            }
        };

        let channel_id = self
            .platform
            .create_voice_channel(guild_id, parent, &name, profile.user_limit)
            .await?;
        info!(
            "Voice: created channel {} ({:?}) for {} via trigger {}",
            channel_id, name, user_id, jtc_channel_id
        );

        let issues = self
            .apply_overlay_to_channel(channel_id, &scope, profile.lock)
            .await;
        self.record_issues(&issues);

        if let Err(err) = self.platform.move_member(guild_id, user_id, channel_id).await {
            warn!(
                "Voice: could not move member {} into channel {}: {}",
                user_id, channel_id, err
            );
        }

        let now = self.now();
        self.db.insert_voice_channel(&VoiceChannelRow {
            scope,
            channel_id,
            created_at: now,
            last_activity: now,
            active: true,
        })?;
        self.cache.insert(scope, channel_id, ChannelState::Active);
        self.db
            .record_cooldown(guild_id, jtc_channel_id, user_id, now)?;
        self.db
            .set_user_jtc_preference(guild_id, user_id, jtc_channel_id)?;

        Ok(channel_id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serenity::model::channel::PermissionOverwriteType;
    use serenity::model::id::RoleId;
    use serenity::model::permissions::Permissions;

    use super::super::test_support::{service, service_with, GUILD, JTC, OWNER};
    use super::super::types::{FeatureEntry, FeatureKind, TargetKind};
    use super::*;

    #[tokio::test]
    async fn test_provision_defaults() {
        let (service, platform) = service();
        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();

        // No profile: display name, unlimited, unlocked
        let channel = platform.channel(channel_id).unwrap();
        assert_eq!(channel.name, "Alice");
        assert_eq!(channel.user_limit, None);
        assert!(platform.overwrites(channel_id).is_empty());

        // Member was moved in, row and cache recorded
        assert_eq!(platform.moves(), vec![(GUILD, OWNER, channel_id)]);
        let row = service.db.get_voice_channel(channel_id).unwrap().unwrap();
        assert!(row.active);
        assert_eq!(row.scope, Scope::new(GUILD, JTC, OWNER));
        assert!(service.cache.get(channel_id).is_some());

        // Preference points at the trigger that was used
        assert_eq!(
            service.db.get_user_jtc_preference(GUILD, OWNER).unwrap(),
            Some(JTC)
        );
    }

    #[tokio::test]
    async fn test_provision_applies_profile() {
        let (service, platform) = service();
        let scope = Scope::new(GUILD, JTC, OWNER);
        service
            .db
            .upsert_channel_profile(&scope, Some("war room"), Some(5), Some(true))
            .unwrap();

        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();
        let channel = platform.channel(channel_id).unwrap();
        assert_eq!(channel.name, "war room");
        assert_eq!(channel.user_limit, Some(5));

        // lock=true shows up as an everyone deny on connect
        let overwrites = platform.overwrites(channel_id);
        let everyone = overwrites
            .iter()
            .find(|o| o.kind == PermissionOverwriteType::Role(RoleId::new(GUILD)))
            .unwrap();
        assert!(everyone.deny.contains(Permissions::CONNECT));
    }

    #[tokio::test]
    async fn test_provision_under_parent_category() {
        let (service, platform) = service();
        platform.set_parent(JTC, 42);
        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();
        assert_eq!(platform.channel(channel_id).unwrap().parent_id, Some(42));
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let (service, _platform) = service_with(Duration::from_secs(60), Duration::from_secs(0));
        service.provision(GUILD, JTC, OWNER).await.unwrap();

        let err = service.provision(GUILD, JTC, OWNER).await.unwrap_err();
        assert!(matches!(err, VoiceError::CooldownActive(_)));

        // Another user is unaffected
        let (service2, platform2) = service_with(Duration::from_secs(60), Duration::from_secs(0));
        platform2.add_member(GUILD, 301, "Bob");
        service2.provision(GUILD, JTC, OWNER).await.unwrap();
        service2.provision(GUILD, JTC, 301).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_creation_persists_nothing() {
        let (service, platform) = service();
        platform.fail_next_create();

        let err = service.provision(GUILD, JTC, OWNER).await.unwrap_err();
        assert!(matches!(err, VoiceError::RemoteForbidden));
        assert!(service.db.list_active_channels().unwrap().is_empty());
        assert!(service.cache.is_empty());
        // The window was not burned by the failure
        service.provision(GUILD, JTC, OWNER).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_role_entry_is_integrity_issue() {
        let (service, platform) = service();
        platform.add_role(GUILD, 10);
        let scope = Scope::new(GUILD, JTC, OWNER);
        for (target_id, value) in [(10, true), (99, true)] {
            service
                .db
                .upsert_feature_entry(
                    &scope,
                    &FeatureEntry {
                        feature: FeatureKind::Permit,
                        target_id,
                        target_kind: TargetKind::Role,
                        value,
                    },
                )
                .unwrap();
        }

        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();

        // Provisioning succeeded and only the live role got an overwrite
        let overwrites = platform.overwrites(channel_id);
        assert_eq!(overwrites.len(), 1);
        assert_eq!(
            overwrites[0].kind,
            PermissionOverwriteType::Role(RoleId::new(10))
        );

        let issues = service.integrity_issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].target_id, 99);
        assert_eq!(issues[0].target_kind, TargetKind::Role);

        // The stale entry stays in storage for inspection
        assert_eq!(service.db.feature_entries(&scope).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_scope_lock_blocks_duplicate() {
        let (service, _platform) = service();
        let scope = Scope::new(GUILD, JTC, OWNER);
        let _held = service.locks.try_acquire(scope).unwrap();

        let err = service.provision(GUILD, JTC, OWNER).await.unwrap_err();
        assert!(matches!(err, VoiceError::ScopeLocked));
    }
}
