//! Bulk removal of all voice-related rows for a guild or a single user,
//! paired with cache eviction so lookups never see deleted rows.

use std::collections::HashMap;

use tracing::info;

use super::error::VoiceError;
use super::VoiceService;

#[derive(Debug)]
pub struct PurgeOutcome {
    /// table name -> rows deleted
    pub rows_deleted: HashMap<String, usize>,
    pub channels_evicted: usize,
}

impl VoiceService {
    /// Deletes every row scoped to the guild (and user, if given) in a single
    /// transaction; the transaction rolls back entirely on failure, so the
    /// cache is only touched after a successful commit. A second call on the
    /// same scope returns all-zero counts.
    pub async fn purge(
        &self,
        guild_id: u64,
        user_id: Option<u64>,
    ) -> Result<PurgeOutcome, VoiceError> {
        // Resolve the affected channels before their rows disappear.
        let affected = self.db.active_channel_ids(guild_id, user_id)?;

        let rows_deleted = self
            .db
            .run_blocking(move |db| db.purge_guild_scope(guild_id, user_id))
            .await?;

        let mut channels_evicted = 0;
        for channel_id in affected {
            if self.cache.remove(channel_id).is_some() {
                channels_evicted += 1;
            }
        }

        let total: usize = rows_deleted.values().sum();
        info!(
            "Voice: purged {} rows for guild {} (user: {:?}), evicted {} cached channels",
            total, guild_id, user_id, channels_evicted
        );
        Ok(PurgeOutcome {
            rows_deleted,
            channels_evicted,
        })
    }
}
