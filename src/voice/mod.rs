//! Join-to-create voice channel management.
//!
//! A member joining a configured trigger channel gets an ephemeral channel
//! provisioned from their per-scope settings profile. [`VoiceService`] owns
//! the persisted state, the in-memory channel cache and the per-scope locks;
//! the database remains the source of truth.

pub mod error;
pub mod events;
pub mod janitor;
pub mod overlay;
pub mod platform;
pub mod provisioner;
pub mod purge;
pub mod registry;
pub mod settings;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

pub use error::VoiceError;
pub use overlay::IntegrityIssue;
pub use types::{ChannelSettingsProfile, FeatureEntry, FeatureKind, Scope, TargetKind};

use crate::db::Database;
use platform::VoicePlatform;
use provisioner::ScopeLocks;
use registry::ChannelCache;

pub struct VoiceService {
    pub(crate) db: Database,
    pub(crate) platform: Arc<dyn VoicePlatform>,
    pub(crate) cache: ChannelCache,
    pub(crate) locks: ScopeLocks,
    /// guild id -> configured trigger channel ids
    jtc_index: Mutex<HashMap<u64, HashSet<u64>>>,
    /// Unresolvable stored targets seen since startup, for admin inspection.
    integrity_log: Mutex<Vec<IntegrityIssue>>,
    pub(crate) creation_cooldown: Duration,
    pub(crate) empty_grace_period: Duration,
}

impl VoiceService {
    pub fn new(
        db: Database,
        platform: Arc<dyn VoicePlatform>,
        creation_cooldown: Duration,
        empty_grace_period: Duration,
    ) -> Self {
        Self {
            db,
            platform,
            cache: ChannelCache::default(),
            locks: ScopeLocks::default(),
            jtc_index: Mutex::new(HashMap::new()),
            integrity_log: Mutex::new(Vec::new()),
            creation_cooldown,
            empty_grace_period,
        }
    }

    /// Mirrors persisted state into memory. Called once at startup.
    pub fn load(&self) -> anyhow::Result<()> {
        let rows = self.db.list_active_channels()?;
        let count = rows.len();
        self.cache.populate(&rows);

        let mut index: HashMap<u64, HashSet<u64>> = HashMap::new();
        for (guild_id, channel_id) in self.db.all_jtc_channels()? {
            index.entry(guild_id).or_default().insert(channel_id);
        }
        let triggers = index.values().map(|set| set.len()).sum::<usize>();
        *self.jtc_index.lock().unwrap() = index;

        info!(
            "Voice: loaded {} active channels and {} JTC triggers",
            count, triggers
        );
        Ok(())
    }

    pub fn is_jtc(&self, guild_id: u64, channel_id: u64) -> bool {
        self.jtc_index
            .lock()
            .unwrap()
            .get(&guild_id)
            .map(|set| set.contains(&channel_id))
            .unwrap_or(false)
    }

    pub(crate) fn replace_jtc_index(&self, guild_id: u64, channel_ids: &[u64]) {
        let mut index = self.jtc_index.lock().unwrap();
        if channel_ids.is_empty() {
            index.remove(&guild_id);
        } else {
            index.insert(guild_id, channel_ids.iter().copied().collect());
        }
    }

    pub fn jtc_channels(&self, guild_id: u64) -> Vec<u64> {
        let index = self.jtc_index.lock().unwrap();
        index
            .get(&guild_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn record_issues(&self, issues: &[IntegrityIssue]) {
        if issues.is_empty() {
            return;
        }
        for issue in issues {
            warn!(
                "Voice: integrity issue in guild {}: stored {} target {} for {:?} no longer resolves",
                issue.guild_id,
                issue.target_kind.as_str(),
                issue.target_id,
                issue.feature
            );
        }
        self.integrity_log.lock().unwrap().extend_from_slice(issues);
    }

    /// Integrity issues recorded since startup, most recent last.
    pub fn integrity_issues(&self) -> Vec<IntegrityIssue> {
        self.integrity_log.lock().unwrap().clone()
    }

    /// Picks the trigger scope a settings command refers to when the caller
    /// did not name one: their most recently used trigger, else the guild's
    /// only configured trigger.
    pub fn resolve_scope(
        &self,
        guild_id: u64,
        user_id: u64,
        explicit_jtc: Option<u64>,
    ) -> Result<Scope, VoiceError> {
        if let Some(jtc) = explicit_jtc {
            return Ok(Scope::new(guild_id, jtc, user_id));
        }
        if let Some(jtc) = self.db.get_user_jtc_preference(guild_id, user_id)? {
            if self.is_jtc(guild_id, jtc) {
                return Ok(Scope::new(guild_id, jtc, user_id));
            }
        }
        let configured = self.jtc_channels(guild_id);
        match configured.as_slice() {
            [only] => Ok(Scope::new(guild_id, *only, user_id)),
            [] => Err(VoiceError::Platform(
                "no join-to-create trigger is configured for this guild".to_string(),
            )),
            _ => Err(VoiceError::Platform(
                "multiple triggers configured; join one first or name it explicitly".to_string(),
            )),
        }
    }

    pub(crate) fn now(&self) -> i64 {
        Utc::now().timestamp()
    }

    /// Refreshes the activity timestamp of a managed channel.
    pub fn touch_activity(&self, channel_id: u64) -> Result<(), VoiceError> {
        self.db.touch_channel_activity(channel_id, self.now())?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::platform::mock::MockPlatform;
    use super::*;

    pub const GUILD: u64 = 1;
    pub const JTC: u64 = 50;
    pub const OWNER: u64 = 300;

    pub fn service_with(
        cooldown: Duration,
        grace: Duration,
    ) -> (Arc<VoiceService>, Arc<MockPlatform>) {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        db.set_jtc_channels(GUILD, &[JTC]).unwrap();

        let platform = Arc::new(MockPlatform::new());
        platform.add_member(GUILD, OWNER, "Alice");

        let service = Arc::new(VoiceService::new(
            db,
            platform.clone(),
            cooldown,
            grace,
        ));
        service.load().unwrap();
        (service, platform)
    }

    pub fn service() -> (Arc<VoiceService>, Arc<MockPlatform>) {
        service_with(Duration::from_secs(30), Duration::from_secs(0))
    }
}
