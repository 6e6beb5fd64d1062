//! Lifecycle janitor: periodic reclamation of empty channels and cleanup of
//! scopes whose join-to-create trigger was removed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::VoiceError;
use super::platform::PlatformError;
use super::types::ChannelState;
use super::VoiceService;

/// What a stale-trigger cleanup actually removed.
#[derive(Debug, Default)]
pub struct StaleCleanupReport {
    pub channels_deleted: usize,
    pub channels_skipped: usize,
    pub rows_deleted: HashMap<String, usize>,
}

/// Periodic sweep loop. Spawned once at startup.
pub async fn run_janitor(service: Arc<VoiceService>, interval: Duration) {
    info!("Starting voice janitor, sweeping every {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match service.sweep_empty_channels().await {
            Ok(0) => {}
            Ok(reclaimed) => debug!("Janitor: reclaimed {} empty channels", reclaimed),
            Err(err) => warn!("Janitor sweep error: {}", err),
        }
    }
}

impl VoiceService {
    /// Reclaims channels that have had no non-bot members for longer than the
    /// grace period. Tolerates remote channels that are already gone.
    pub async fn sweep_empty_channels(&self) -> anyhow::Result<usize> {
        let rows = self.db.run_blocking(|db| db.list_active_channels()).await?;
        let grace = self.empty_grace_period.as_secs() as i64;
        let mut reclaimed = 0;

        for row in rows {
            let now = self.now();
            let humans = match self
                .platform
                .voice_members(row.scope.guild_id, row.channel_id)
                .await
            {
                Ok(members) => members.iter().filter(|m| !m.is_bot).count(),
                // Remote resource already gone: reclaim the row below.
                Err(PlatformError::NotFound) => 0,
                Err(err) => {
                    warn!(
                        "Janitor: could not inspect channel {}: {}",
                        row.channel_id, err
                    );
                    continue;
                }
            };

            if humans > 0 {
                self.db.touch_channel_activity(row.channel_id, now)?;
                continue;
            }
            if now - row.last_activity < grace {
                continue;
            }

            // Serialize with provisioning/claim for this scope, then re-check:
            // the row may have been purged, or someone may have just joined.
            let _guard = self.locks.acquire(row.scope).await;
            let Some(current) = self.db.get_voice_channel(row.channel_id)? else {
                continue;
            };
            if !current.active {
                continue;
            }
            let occupied = match self
                .platform
                .voice_members(row.scope.guild_id, row.channel_id)
                .await
            {
                Ok(members) => members.iter().any(|m| !m.is_bot),
                Err(PlatformError::NotFound) => false,
                Err(_) => true,
            };
            if occupied {
                continue;
            }
            // A join-and-leave while we waited refreshed the activity stamp;
            // the channel gets a fresh grace window in that case.
            if now - current.last_activity < grace {
                continue;
            }

            match self.platform.delete_channel(row.channel_id).await {
                Ok(()) | Err(PlatformError::NotFound) => {}
                Err(err) => {
                    warn!(
                        "Janitor: could not delete empty channel {}: {}",
                        row.channel_id, err
                    );
                    continue;
                }
            }
            self.cache.set_state(row.channel_id, ChannelState::Deleted);
            self.db.retire_voice_channel(row.channel_id)?;
            self.cache.remove(row.channel_id);
            info!("Janitor: reclaimed empty channel {}", row.channel_id);
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    /// Replaces a guild's trigger set and cleans up everything scoped to the
    /// triggers that disappeared.
    pub async fn set_jtc_channels(
        &self,
        guild_id: u64,
        channel_ids: &[u64],
    ) -> Result<StaleCleanupReport, VoiceError> {
        let previous = self.db.set_jtc_channels(guild_id, channel_ids)?;
        self.replace_jtc_index(guild_id, channel_ids);

        let current: HashSet<u64> = channel_ids.iter().copied().collect();
        let stale: Vec<u64> = previous
            .into_iter()
            .filter(|id| !current.contains(id))
            .collect();
        if stale.is_empty() {
            return Ok(StaleCleanupReport::default());
        }
        info!(
            "Voice: triggers {:?} removed from guild {}, cleaning up",
            stale, guild_id
        );
        self.cleanup_stale_jtc(guild_id, &stale).await
    }

    /// Removes channels and rows scoped to triggers that are no longer
    /// configured. Non-empty channels are skipped with a warning; their
    /// registry rows stay until the empty-channel sweep catches them.
    /// Idempotent: a second run with the same stale set deletes nothing.
    pub async fn cleanup_stale_jtc(
        &self,
        guild_id: u64,
        stale_jtc_ids: &[u64],
    ) -> Result<StaleCleanupReport, VoiceError> {
        let mut report = StaleCleanupReport::default();

        for &jtc_channel_id in stale_jtc_ids {
            let mut deleted_ids = Vec::new();
            for row in self.db.channels_for_jtc(guild_id, jtc_channel_id)? {
                let humans = match self
                    .platform
                    .voice_members(guild_id, row.channel_id)
                    .await
                {
                    Ok(members) => members.iter().filter(|m| !m.is_bot).count(),
                    Err(PlatformError::NotFound) => 0,
                    Err(err) => {
                        warn!(
                            "Voice: could not inspect channel {} under stale trigger {}: {}",
                            row.channel_id, jtc_channel_id, err
                        );
                        report.channels_skipped += 1;
                        continue;
                    }
                };
                if humans > 0 {
                    warn!(
                        "Voice: skipping non-empty channel {} under stale trigger {} ({} members)",
                        row.channel_id, jtc_channel_id, humans
                    );
                    report.channels_skipped += 1;
                    continue;
                }
                match self.platform.delete_channel(row.channel_id).await {
                    Ok(()) | Err(PlatformError::NotFound) => {}
                    Err(err) => {
                        warn!(
                            "Voice: could not delete channel {} under stale trigger {}: {}",
                            row.channel_id, jtc_channel_id, err
                        );
                        report.channels_skipped += 1;
                        continue;
                    }
                }
                deleted_ids.push(row.channel_id);
            }

            let counts = self
                .db
                .purge_jtc_scope(guild_id, jtc_channel_id, &deleted_ids)?;
            for channel_id in &deleted_ids {
                self.cache.remove(*channel_id);
            }
            report.channels_deleted += deleted_ids.len();
            for (table, count) in counts {
                *report.rows_deleted.entry(table).or_default() += count;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::platform::VoicePlatform;
    use super::super::test_support::{service, service_with, GUILD, JTC, OWNER};
    use super::super::types::Scope;
    use super::*;

    #[tokio::test]
    async fn test_sweep_reclaims_abandoned_channel() {
        let (service, platform) = service(); // zero grace
        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();

        // Occupied: nothing to reclaim
        assert_eq!(service.sweep_empty_channels().await.unwrap(), 0);

        platform.disconnect_all(channel_id);
        assert_eq!(service.sweep_empty_channels().await.unwrap(), 1);
        assert!(service.db.get_voice_channel(channel_id).unwrap().is_none());
        assert!(service.cache.get(channel_id).is_none());
        assert_eq!(platform.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_respects_grace_period() {
        let (service, platform) =
            service_with(Duration::from_secs(0), Duration::from_secs(3600));
        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();
        platform.disconnect_all(channel_id);

        // Empty, but not for long enough
        assert_eq!(service.sweep_empty_channels().await.unwrap(), 0);
        assert!(service.db.get_voice_channel(channel_id).unwrap().is_some());

        // Backdate the last activity beyond the grace period
        let stale_ts = service.now() - 7200;
        service
            .db
            .touch_channel_activity(channel_id, stale_ts)
            .unwrap();
        assert_eq!(service.sweep_empty_channels().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_rechecks_activity_under_lock() {
        let (service, platform) =
            service_with(Duration::from_secs(0), Duration::from_secs(3600));
        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();
        platform.disconnect_all(channel_id);
        let stale_ts = service.now() - 7200;
        service
            .db
            .touch_channel_activity(channel_id, stale_ts)
            .unwrap();

        // Hold the scope lock so the sweep parks after its pre-lock checks
        let guard = service
            .locks
            .acquire(Scope::new(GUILD, JTC, OWNER))
            .await;
        let svc = service.clone();
        let sweep = tokio::spawn(async move { svc.sweep_empty_channels().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Someone joined and left while the sweep waited
        service
            .db
            .touch_channel_activity(channel_id, service.now())
            .unwrap();
        drop(guard);

        // Fresh activity means a fresh grace window, not deletion
        assert_eq!(sweep.await.unwrap().unwrap(), 0);
        assert!(service.db.get_voice_channel(channel_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_tolerates_missing_remote() {
        let (service, platform) = service();
        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();

        // Someone deleted the channel out from under us
        platform.delete_channel(channel_id).await.unwrap();
        assert_eq!(service.sweep_empty_channels().await.unwrap(), 1);
        assert!(service.db.get_voice_channel(channel_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_jtc_cleanup_scoping() {
        let (service, platform) = service();
        // Triggers A and B go stale, C stays
        let (a, b, c) = (JTC, 51, 52);
        service.set_jtc_channels(GUILD, &[a, b, c]).await.unwrap();

        let ch_a = service.provision(GUILD, a, OWNER).await.unwrap();
        let ch_b = service.provision(GUILD, b, OWNER).await.unwrap();
        let ch_c = service.provision(GUILD, c, OWNER).await.unwrap();
        for channel in [ch_a, ch_b, ch_c] {
            platform.disconnect_all(channel);
        }
        service
            .db
            .upsert_channel_profile(&Scope::new(GUILD, c, OWNER), Some("keep"), None, None)
            .unwrap();

        let report = service.set_jtc_channels(GUILD, &[c]).await.unwrap();
        assert_eq!(report.channels_deleted, 2);
        assert_eq!(report.channels_skipped, 0);
        assert_eq!(report.rows_deleted["voice_channels"], 2);

        // Only the stale scopes went away
        assert!(service.db.get_voice_channel(ch_a).unwrap().is_none());
        assert!(service.db.get_voice_channel(ch_b).unwrap().is_none());
        assert!(service.db.get_voice_channel(ch_c).unwrap().is_some());
        assert!(service
            .db
            .get_channel_profile(&Scope::new(GUILD, c, OWNER))
            .unwrap()
            .is_some());
        assert!(!service.is_jtc(GUILD, a));
        assert!(service.is_jtc(GUILD, c));

        // Idempotent: the same stale set again deletes nothing
        let report = service.cleanup_stale_jtc(GUILD, &[a, b]).await.unwrap();
        assert_eq!(report.channels_deleted, 0);
        assert!(report.rows_deleted.values().all(|&count| count == 0));
    }

    #[tokio::test]
    async fn test_stale_jtc_skips_occupied_channel() {
        let (service, platform) = service();
        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();
        service
            .db
            .upsert_channel_profile(&Scope::new(GUILD, JTC, OWNER), Some("mine"), None, None)
            .unwrap();

        // Owner is still connected (provision moved them in)
        let report = service.set_jtc_channels(GUILD, &[]).await.unwrap();

        assert_eq!(report.channels_deleted, 0);
        assert_eq!(report.channels_skipped, 1);
        // The channel survived, its settings rows did not
        assert_eq!(platform.channel_count(), 1);
        assert!(service.db.get_voice_channel(channel_id).unwrap().is_some());
        assert!(service
            .db
            .get_channel_profile(&Scope::new(GUILD, JTC, OWNER))
            .unwrap()
            .is_none());
    }
}
