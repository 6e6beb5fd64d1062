//! Ownership registry: the persisted channel rows plus an in-memory mirror
//! for fast lookups, and the claim/transfer semantics.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use super::error::VoiceError;
use super::platform::PlatformError;
use super::types::{ChannelState, Scope, VoiceChannelRow};
use super::VoiceService;

#[derive(Debug, Clone)]
pub struct CachedChannel {
    pub scope: Scope,
    pub state: ChannelState,
}

#[derive(Default)]
struct CacheInner {
    by_channel: HashMap<u64, CachedChannel>,
    by_scope: HashMap<Scope, HashSet<u64>>,
}

/// Mirror of the active registry rows. Mutated only on the locked write
/// paths; readers get an eventually consistent view and the database stays
/// the source of truth.
#[derive(Default)]
pub struct ChannelCache {
    inner: Mutex<CacheInner>,
}

impl ChannelCache {
    pub fn populate(&self, rows: &[VoiceChannelRow]) {
        let mut inner = self.inner.lock().unwrap();
        inner.by_channel.clear();
        inner.by_scope.clear();
        for row in rows {
            inner.by_channel.insert(
                row.channel_id,
                CachedChannel {
                    scope: row.scope,
                    state: ChannelState::Active,
                },
            );
            inner
                .by_scope
                .entry(row.scope)
                .or_default()
                .insert(row.channel_id);
        }
    }

    pub fn insert(&self, scope: Scope, channel_id: u64, state: ChannelState) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .by_channel
            .insert(channel_id, CachedChannel { scope, state });
        inner.by_scope.entry(scope).or_default().insert(channel_id);
    }

    pub fn get(&self, channel_id: u64) -> Option<CachedChannel> {
        self.inner.lock().unwrap().by_channel.get(&channel_id).cloned()
    }

    pub fn scope_channels(&self, scope: &Scope) -> Vec<u64> {
        self.inner
            .lock()
            .unwrap()
            .by_scope
            .get(scope)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn remove(&self, channel_id: u64) -> Option<CachedChannel> {
        let mut inner = self.inner.lock().unwrap();
        let cached = inner.by_channel.remove(&channel_id)?;
        if let Some(set) = inner.by_scope.get_mut(&cached.scope) {
            set.remove(&channel_id);
            if set.is_empty() {
                inner.by_scope.remove(&cached.scope);
            }
        }
        Some(cached)
    }

    /// Rekeys the scope index when ownership moves.
    pub fn set_owner(&self, channel_id: u64, new_owner_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        let Some(cached) = inner.by_channel.get(&channel_id).cloned() else {
            return;
        };
        let new_scope = cached.scope.with_owner(new_owner_id);
        if let Some(set) = inner.by_scope.get_mut(&cached.scope) {
            set.remove(&channel_id);
            if set.is_empty() {
                inner.by_scope.remove(&cached.scope);
            }
        }
        inner.by_scope.entry(new_scope).or_default().insert(channel_id);
        inner.by_channel.insert(
            channel_id,
            CachedChannel {
                scope: new_scope,
                state: cached.state,
            },
        );
    }

    pub fn set_state(&self, channel_id: u64, state: ChannelState) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(cached) = inner.by_channel.get_mut(&channel_id) {
            cached.state = state;
        }
    }

    /// Removes every entry for the guild (optionally only one owner's).
    /// Returns how many entries went away.
    pub fn evict_guild(&self, guild_id: u64, owner_id: Option<u64>) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let victims: Vec<u64> = inner
            .by_channel
            .iter()
            .filter(|(_, cached)| {
                cached.scope.guild_id == guild_id
                    && owner_id.map_or(true, |owner| cached.scope.owner_id == owner)
            })
            .map(|(id, _)| *id)
            .collect();
        for channel_id in &victims {
            if let Some(cached) = inner.by_channel.remove(channel_id) {
                if let Some(set) = inner.by_scope.get_mut(&cached.scope) {
                    set.remove(channel_id);
                    if set.is_empty() {
                        inner.by_scope.remove(&cached.scope);
                    }
                }
            }
        }
        victims.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VoiceService {
    /// Live channels owned by the user under the given trigger. Reads the
    /// persisted rows, not the cache.
    pub fn get_user_channels(
        &self,
        guild_id: u64,
        jtc_channel_id: u64,
        user_id: u64,
    ) -> Result<Vec<VoiceChannelRow>, VoiceError> {
        let scope = Scope::new(guild_id, jtc_channel_id, user_id);
        Ok(self.db.channels_by_owner(&scope)?)
    }

    /// Takes over an abandoned channel. Succeeds only while the recorded
    /// owner is not connected to it.
    pub async fn claim(&self, channel_id: u64, claimant_id: u64) -> Result<(), VoiceError> {
        let row = self
            .db
            .get_voice_channel(channel_id)?
            .filter(|row| row.active)
            .ok_or(VoiceError::UnknownChannel(channel_id))?;

        let _guard = self.locks.acquire(row.scope).await;
        // Re-read now that we hold the scope: a concurrent claim or purge may
        // have won the race.
        let row = self
            .db
            .get_voice_channel(channel_id)?
            .filter(|row| row.active)
            .ok_or(VoiceError::UnknownChannel(channel_id))?;
        if row.scope.owner_id == claimant_id {
            return Ok(());
        }

        let members = self
            .platform
            .voice_members(row.scope.guild_id, channel_id)
            .await?;
        if members.iter().any(|m| m.user_id == row.scope.owner_id) {
            return Err(VoiceError::OwnerPresent);
        }

        if !self.db.set_channel_owner(channel_id, claimant_id)? {
            return Err(VoiceError::UnknownChannel(channel_id));
        }
        self.cache.set_owner(channel_id, claimant_id);
        info!(
            "Voice: channel {} claimed by {} from absent owner {}",
            channel_id, claimant_id, row.scope.owner_id
        );
        Ok(())
    }

    /// Owner-initiated handoff. No presence check; the caller just has to own
    /// the channel.
    pub async fn transfer(
        &self,
        channel_id: u64,
        caller_id: u64,
        new_owner_id: u64,
    ) -> Result<(), VoiceError> {
        let row = self
            .db
            .get_voice_channel(channel_id)?
            .filter(|row| row.active)
            .ok_or(VoiceError::UnknownChannel(channel_id))?;

        let _guard = self.locks.acquire(row.scope).await;
        // Re-read under the lock: a claim may have moved ownership while we
        // waited, and a stale check would hand the channel back.
        let row = self
            .db
            .get_voice_channel(channel_id)?
            .filter(|row| row.active)
            .ok_or(VoiceError::UnknownChannel(channel_id))?;
        if row.scope.owner_id != caller_id {
            return Err(VoiceError::NotOwner);
        }

        if !self.db.set_channel_owner(channel_id, new_owner_id)? {
            return Err(VoiceError::UnknownChannel(channel_id));
        }
        self.cache.set_owner(channel_id, new_owner_id);
        info!(
            "Voice: channel {} transferred from {} to {}",
            channel_id, caller_id, new_owner_id
        );
        Ok(())
    }

    /// Deletes every active channel the user owns in the guild. Returns how
    /// many were removed. Already-gone remote channels are fine.
    pub async fn delete_user_owned_channels(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<usize, VoiceError> {
        let rows = self.db.channels_owned_in_guild(guild_id, user_id)?;
        let mut deleted = 0;
        for row in rows {
            let _guard = self.locks.acquire(row.scope).await;
            match self.platform.delete_channel(row.channel_id).await {
                Ok(()) | Err(PlatformError::NotFound) => {}
                Err(err) => {
                    warn!(
                        "Voice: could not delete channel {}: {}",
                        row.channel_id, err
                    );
                    continue;
                }
            }
            self.db.retire_voice_channel(row.channel_id)?;
            self.cache.remove(row.channel_id);
            debug!("Voice: deleted owned channel {}", row.channel_id);
            deleted += 1;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{service, GUILD, JTC, OWNER};
    use super::*;

    #[test]
    fn test_cache_rekey_and_evict() {
        let cache = ChannelCache::default();
        let scope = Scope::new(1, 2, 3);
        cache.insert(scope, 100, ChannelState::Active);
        cache.insert(scope, 101, ChannelState::Active);
        assert_eq!(cache.scope_channels(&scope).len(), 2);

        cache.set_owner(100, 9);
        assert_eq!(cache.scope_channels(&scope), vec![101]);
        assert_eq!(cache.scope_channels(&scope.with_owner(9)), vec![100]);
        assert_eq!(cache.get(100).unwrap().scope.owner_id, 9);

        assert_eq!(cache.evict_guild(1, Some(9)), 1);
        assert_eq!(cache.evict_guild(1, None), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_claim_requires_absent_owner() {
        let (service, platform) = service();
        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();

        // Provisioning moved the owner in; claiming must fail
        let err = service.claim(channel_id, 400).await.unwrap_err();
        assert!(matches!(err, VoiceError::OwnerPresent));

        platform.disconnect_all(channel_id);
        platform.connect(channel_id, 400, false);
        service.claim(channel_id, 400).await.unwrap();

        let row = service.db.get_voice_channel(channel_id).unwrap().unwrap();
        assert_eq!(row.scope.owner_id, 400);
        assert_eq!(service.cache.get(channel_id).unwrap().scope.owner_id, 400);
    }

    #[tokio::test]
    async fn test_claim_unknown_channel() {
        let (service, _platform) = service();
        let err = service.claim(777, 400).await.unwrap_err();
        assert!(matches!(err, VoiceError::UnknownChannel(777)));
    }

    #[tokio::test]
    async fn test_transfer_owner_only() {
        let (service, _platform) = service();
        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();

        let err = service.transfer(channel_id, 400, 500).await.unwrap_err();
        assert!(matches!(err, VoiceError::NotOwner));

        // No presence requirement for a voluntary handoff
        service.transfer(channel_id, OWNER, 500).await.unwrap();
        let row = service.db.get_voice_channel(channel_id).unwrap().unwrap();
        assert_eq!(row.scope.owner_id, 500);
    }

    #[tokio::test]
    async fn test_transfer_rechecks_owner_under_lock() {
        let (service, platform) = service();
        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();
        platform.disconnect_all(channel_id);

        // Hold the scope lock so the transfer parks after its first read
        let guard = service
            .locks
            .acquire(Scope::new(GUILD, JTC, OWNER))
            .await;
        let svc = service.clone();
        let transfer =
            tokio::spawn(async move { svc.transfer(channel_id, OWNER, 500).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // A claim completes while the transfer is parked
        service.db.set_channel_owner(channel_id, 400).unwrap();
        service.cache.set_owner(channel_id, 400);
        drop(guard);

        // The ex-owner's transfer must not steal the channel back
        let err = transfer.await.unwrap().unwrap_err();
        assert!(matches!(err, VoiceError::NotOwner));
        let row = service.db.get_voice_channel(channel_id).unwrap().unwrap();
        assert_eq!(row.scope.owner_id, 400);
    }

    #[tokio::test]
    async fn test_delete_user_owned_channels() {
        let (service, platform) = service();
        let channel_id = service.provision(GUILD, JTC, OWNER).await.unwrap();
        assert_eq!(platform.channel_count(), 1);

        let deleted = service.delete_user_owned_channels(GUILD, OWNER).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(platform.channel_count(), 0);
        assert!(service.db.get_voice_channel(channel_id).unwrap().is_none());
        assert!(service.cache.get(channel_id).is_none());

        // Nothing left; a second call is a no-op
        let deleted = service.delete_user_owned_channels(GUILD, OWNER).await.unwrap();
        assert_eq!(deleted, 0);
    }
}
