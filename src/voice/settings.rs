//! Settings application: persist first, then best-effort re-apply to any
//! live channel in the scope. A remote failure never rolls back the
//! persisted value.

use std::collections::HashSet;

use tracing::warn;

use super::error::VoiceError;
use super::overlay::{resolve_overlay, IntegrityIssue};
use super::types::{FeatureEntry, FeatureKind, Scope, TargetKind};
use super::VoiceService;

impl VoiceService {
    /// Updates the scope's settings profile and pushes the changed fields to
    /// every live channel under it.
    pub async fn update_channel_settings(
        &self,
        guild_id: u64,
        jtc_channel_id: u64,
        user_id: u64,
        name: Option<String>,
        user_limit: Option<u32>,
        lock: Option<bool>,
    ) -> Result<(), VoiceError> {
        let scope = Scope::new(guild_id, jtc_channel_id, user_id);
        self.db
            .upsert_channel_profile(&scope, name.as_deref(), user_limit, lock)?;

        for row in self.db.channels_by_owner(&scope)? {
            if name.is_some() || user_limit.is_some() {
                if let Err(err) = self
                    .platform
                    .edit_channel(row.channel_id, name.as_deref(), user_limit)
                    .await
                {
                    warn!(
                        "Voice: settings saved but channel {} was not updated: {}",
                        row.channel_id, err
                    );
                }
            }
            if let Some(locked) = lock {
                let issues = self
                    .apply_overlay_to_channel(row.channel_id, &scope, locked)
                    .await;
                self.record_issues(&issues);
            }
        }
        Ok(())
    }

    /// Persists one feature entry (last write wins) and re-applies the
    /// overlay to the scope's live channels.
    pub async fn set_feature_setting(
        &self,
        guild_id: u64,
        jtc_channel_id: u64,
        user_id: u64,
        feature: FeatureKind,
        target_id: u64,
        target_kind: TargetKind,
        value: bool,
    ) -> Result<(), VoiceError> {
        let scope = Scope::new(guild_id, jtc_channel_id, user_id);
        self.db.upsert_feature_entry(
            &scope,
            &FeatureEntry {
                feature,
                target_id,
                target_kind,
                value,
            },
        )?;

        let lock = self
            .db
            .get_channel_profile(&scope)?
            .map(|profile| profile.lock)
            .unwrap_or(false);
        for row in self.db.channels_by_owner(&scope)? {
            let issues = self
                .apply_overlay_to_channel(row.channel_id, &scope, lock)
                .await;
            self.record_issues(&issues);
        }
        Ok(())
    }

    /// Resolves the scope's stored entries and applies the overwrite set to a
    /// channel. Apply failures are per-entry warnings; the returned issues
    /// are the targets that no longer resolve.
    pub(crate) async fn apply_overlay_to_channel(
        &self,
        channel_id: u64,
        scope: &Scope,
        lock: bool,
    ) -> Vec<IntegrityIssue> {
        let entries = match self.db.feature_entries(scope) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    "Voice: could not load feature entries for channel {}: {}",
                    channel_id, err
                );
                return Vec::new();
            }
        };
        if entries.is_empty() && !lock {
            return Vec::new();
        }

        let roles = if entries.iter().any(|e| e.target_kind == TargetKind::Role) {
            match self.platform.role_ids(scope.guild_id).await {
                Ok(roles) => roles,
                Err(err) => {
                    // Without the live role set every role entry would look
                    // stale; skip the overlay instead of reporting noise.
                    warn!(
                        "Voice: could not fetch roles for guild {}; overlay for channel {} skipped: {}",
                        scope.guild_id, channel_id, err
                    );
                    return Vec::new();
                }
            }
        } else {
            HashSet::new()
        };

        let mut members = HashSet::new();
        for entry in entries.iter().filter(|e| e.target_kind == TargetKind::User) {
            match self
                .platform
                .member_exists(scope.guild_id, entry.target_id)
                .await
            {
                Ok(true) => {
                    members.insert(entry.target_id);
                }
                Ok(false) => {}
                Err(err) => {
                    // Lookup failure is not evidence the member is gone.
                    warn!(
                        "Voice: member lookup for {} failed, assuming present: {}",
                        entry.target_id, err
                    );
                    members.insert(entry.target_id);
                }
            }
        }

        let resolved = resolve_overlay(scope.guild_id, lock, &entries, &roles, &members);
        for overwrite in &resolved.overwrites {
            if let Err(err) = self
                .platform
                .apply_overwrites(channel_id, std::slice::from_ref(overwrite))
                .await
            {
                warn!(
                    "Voice: could not apply overwrite {:?} on channel {}: {}",
                    overwrite.kind, channel_id, err
                );
            }
        }
        resolved.issues
    }
}
