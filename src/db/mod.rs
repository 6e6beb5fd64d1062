use rusqlite::{Connection, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::voice::types::{
    ChannelSettingsProfile, FeatureEntry, FeatureKind, Scope, TargetKind, VoiceChannelRow,
};

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

fn id_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<u64> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid snowflake id: {raw}").into(),
        )
    })
}

fn read_channel_row(row: &rusqlite::Row) -> rusqlite::Result<VoiceChannelRow> {
    Ok(VoiceChannelRow {
        scope: Scope::new(id_col(row, 0)?, id_col(row, 1)?, id_col(row, 2)?),
        channel_id: id_col(row, 3)?,
        created_at: row.get(4)?,
        last_activity: row.get(5)?,
        active: row.get(6)?,
    })
}

const CHANNEL_COLUMNS: &str =
    "guild_id, jtc_channel_id, owner_id, channel_id, created_at, last_activity, active";

impl Database {
    pub fn new(config: &Config) -> Result<Self> {
        Self::open(&config.database_url)
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let sql = "
            CREATE TABLE IF NOT EXISTS voice_channels (
                guild_id TEXT NOT NULL,
                jtc_channel_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                channel_id TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL,
                last_activity INTEGER NOT NULL,
                active BOOLEAN NOT NULL DEFAULT TRUE
            );
            CREATE INDEX IF NOT EXISTS idx_voice_channels_scope
                ON voice_channels (guild_id, jtc_channel_id, owner_id);

            CREATE TABLE IF NOT EXISTS channel_settings (
                guild_id TEXT NOT NULL,
                jtc_channel_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                channel_name TEXT,
                user_limit INTEGER,
                lock BOOLEAN NOT NULL DEFAULT FALSE,
                PRIMARY KEY (guild_id, jtc_channel_id, owner_id)
            );

            CREATE TABLE IF NOT EXISTS feature_settings (
                guild_id TEXT NOT NULL,
                jtc_channel_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                feature TEXT NOT NULL,
                target_id TEXT NOT NULL,
                target_type TEXT NOT NULL,
                value BOOLEAN NOT NULL,
                PRIMARY KEY (guild_id, jtc_channel_id, owner_id, feature, target_id, target_type)
            );

            CREATE TABLE IF NOT EXISTS user_jtc_preferences (
                guild_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                jtc_channel_id TEXT NOT NULL,
                PRIMARY KEY (guild_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS cooldowns (
                guild_id TEXT NOT NULL,
                jtc_channel_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                last_created_at INTEGER NOT NULL,
                PRIMARY KEY (guild_id, jtc_channel_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS jtc_channels (
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                PRIMARY KEY (guild_id, channel_id)
            );
        ";
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Runs a closure against the database on the blocking thread pool.
    /// Used by sweep-sized work so it does not stall the event loop.
    pub async fn run_blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    // --- Ownership registry rows ---

    pub fn insert_voice_channel(&self, row: &VoiceChannelRow) -> anyhow::Result<()> {
        debug!(
            "Database: Recording channel {} for owner {} (jtc {})",
            row.channel_id, row.scope.owner_id, row.scope.jtc_channel_id
        );
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO voice_channels (guild_id, jtc_channel_id, owner_id, channel_id, created_at, last_activity, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            (
                row.scope.guild_id.to_string(),
                row.scope.jtc_channel_id.to_string(),
                row.scope.owner_id.to_string(),
                row.channel_id.to_string(),
                row.created_at,
                row.last_activity,
                row.active,
            ),
        )?;
        Ok(())
    }

    pub fn get_voice_channel(&self, channel_id: u64) -> anyhow::Result<Option<VoiceChannelRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM voice_channels WHERE channel_id = ?1"
        ))?;
        let mut rows = stmt.query([channel_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_channel_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn channels_by_owner(&self, scope: &Scope) -> anyhow::Result<Vec<VoiceChannelRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM voice_channels
             WHERE guild_id = ?1 AND jtc_channel_id = ?2 AND owner_id = ?3 AND active = TRUE"
        ))?;
        let rows = stmt.query_map(
            (
                scope.guild_id.to_string(),
                scope.jtc_channel_id.to_string(),
                scope.owner_id.to_string(),
            ),
            read_channel_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>>>()?)
    }

    pub fn channels_owned_in_guild(
        &self,
        guild_id: u64,
        owner_id: u64,
    ) -> anyhow::Result<Vec<VoiceChannelRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM voice_channels
             WHERE guild_id = ?1 AND owner_id = ?2 AND active = TRUE"
        ))?;
        let rows = stmt.query_map(
            (guild_id.to_string(), owner_id.to_string()),
            read_channel_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>>>()?)
    }

    pub fn channels_for_jtc(
        &self,
        guild_id: u64,
        jtc_channel_id: u64,
    ) -> anyhow::Result<Vec<VoiceChannelRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM voice_channels
             WHERE guild_id = ?1 AND jtc_channel_id = ?2"
        ))?;
        let rows = stmt.query_map(
            (guild_id.to_string(), jtc_channel_id.to_string()),
            read_channel_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>>>()?)
    }

    pub fn list_active_channels(&self) -> anyhow::Result<Vec<VoiceChannelRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM voice_channels WHERE active = TRUE"
        ))?;
        let rows = stmt.query_map([], read_channel_row)?;
        Ok(rows.collect::<Result<Vec<_>>>()?)
    }

    pub fn touch_channel_activity(&self, channel_id: u64, ts: i64) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE voice_channels SET last_activity = ?1 WHERE channel_id = ?2 AND active = TRUE",
            (ts, channel_id.to_string()),
        )?;
        Ok(())
    }

    /// Rewrites the owner of a live channel. Returns false if no active row
    /// matched.
    pub fn set_channel_owner(&self, channel_id: u64, new_owner_id: u64) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE voice_channels SET owner_id = ?1 WHERE channel_id = ?2 AND active = TRUE",
            (new_owner_id.to_string(), channel_id.to_string()),
        )?;
        Ok(changed > 0)
    }

    /// Marks a channel inactive and removes its row in one transaction.
    /// Returns false if the row was already gone.
    pub fn retire_voice_channel(&self, channel_id: u64) -> anyhow::Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let id = channel_id.to_string();
        tx.execute(
            "UPDATE voice_channels SET active = FALSE WHERE channel_id = ?1",
            [&id],
        )?;
        let removed = tx.execute("DELETE FROM voice_channels WHERE channel_id = ?1", [&id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    // --- Settings store ---

    /// Partial upsert: only the provided fields change, the rest keep their
    /// stored values (or the defaults on first write).
    pub fn upsert_channel_profile(
        &self,
        scope: &Scope,
        name: Option<&str>,
        user_limit: Option<u32>,
        lock: Option<bool>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let key = (
            scope.guild_id.to_string(),
            scope.jtc_channel_id.to_string(),
            scope.owner_id.to_string(),
        );

        let exists = conn
            .prepare(
                "SELECT 1 FROM channel_settings
                 WHERE guild_id = ?1 AND jtc_channel_id = ?2 AND owner_id = ?3",
            )?
            .exists((key.0.as_str(), key.1.as_str(), key.2.as_str()))?;

        if exists {
            if let Some(n) = name {
                conn.execute(
                    "UPDATE channel_settings SET channel_name = ?1
                     WHERE guild_id = ?2 AND jtc_channel_id = ?3 AND owner_id = ?4",
                    (n, key.0.as_str(), key.1.as_str(), key.2.as_str()),
                )?;
            }
            if let Some(l) = user_limit {
                conn.execute(
                    "UPDATE channel_settings SET user_limit = ?1
                     WHERE guild_id = ?2 AND jtc_channel_id = ?3 AND owner_id = ?4",
                    (l, key.0.as_str(), key.1.as_str(), key.2.as_str()),
                )?;
            }
            if let Some(locked) = lock {
                conn.execute(
                    "UPDATE channel_settings SET lock = ?1
                     WHERE guild_id = ?2 AND jtc_channel_id = ?3 AND owner_id = ?4",
                    (locked, key.0.as_str(), key.1.as_str(), key.2.as_str()),
                )?;
            }
        } else {
            conn.execute(
                "INSERT INTO channel_settings (guild_id, jtc_channel_id, owner_id, channel_name, user_limit, lock)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    key.0.as_str(),
                    key.1.as_str(),
                    key.2.as_str(),
                    name,
                    user_limit,
                    lock.unwrap_or(false),
                ),
            )?;
        }
        Ok(())
    }

    pub fn get_channel_profile(
        &self,
        scope: &Scope,
    ) -> anyhow::Result<Option<ChannelSettingsProfile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT channel_name, user_limit, lock FROM channel_settings
             WHERE guild_id = ?1 AND jtc_channel_id = ?2 AND owner_id = ?3",
        )?;
        let mut rows = stmt.query((
            scope.guild_id.to_string(),
            scope.jtc_channel_id.to_string(),
            scope.owner_id.to_string(),
        ))?;
        if let Some(row) = rows.next()? {
            Ok(Some(ChannelSettingsProfile {
                name: row.get(0)?,
                user_limit: row.get(1)?,
                lock: row.get(2)?,
            }))
        } else {
            Ok(None)
        }
    }

    /// Last write wins: one row per (scope, feature, target) tuple.
    pub fn upsert_feature_entry(&self, scope: &Scope, entry: &FeatureEntry) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO feature_settings (guild_id, jtc_channel_id, owner_id, feature, target_id, target_type, value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(guild_id, jtc_channel_id, owner_id, feature, target_id, target_type)
             DO UPDATE SET value = ?7",
            (
                scope.guild_id.to_string(),
                scope.jtc_channel_id.to_string(),
                scope.owner_id.to_string(),
                entry.feature.as_str(),
                entry.target_id.to_string(),
                entry.target_kind.as_str(),
                entry.value,
            ),
        )?;
        Ok(())
    }

    pub fn feature_entries(&self, scope: &Scope) -> anyhow::Result<Vec<FeatureEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT feature, target_id, target_type, value FROM feature_settings
             WHERE guild_id = ?1 AND jtc_channel_id = ?2 AND owner_id = ?3",
        )?;
        let rows = stmt.query_map(
            (
                scope.guild_id.to_string(),
                scope.jtc_channel_id.to_string(),
                scope.owner_id.to_string(),
            ),
            |row| {
                let feature: String = row.get(0)?;
                let target_kind: String = row.get(2)?;
                Ok((feature, id_col(row, 1)?, target_kind, row.get::<_, bool>(3)?))
            },
        )?;

        let mut entries = Vec::new();
        for row in rows {
            let (feature, target_id, target_kind, value) = row?;
            // Unknown discriminators would mean a schema mismatch; skip them
            // rather than poisoning every read of the scope.
            let (Some(feature), Some(target_kind)) =
                (FeatureKind::parse(&feature), TargetKind::parse(&target_kind))
            else {
                continue;
            };
            entries.push(FeatureEntry {
                feature,
                target_id,
                target_kind,
                value,
            });
        }
        Ok(entries)
    }

    // --- Cooldowns & preferences ---

    /// Returns how long the caller still has to wait, if inside the window.
    pub fn cooldown_remaining(
        &self,
        guild_id: u64,
        jtc_channel_id: u64,
        user_id: u64,
        window: Duration,
        now: i64,
    ) -> anyhow::Result<Option<Duration>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT last_created_at FROM cooldowns
             WHERE guild_id = ?1 AND jtc_channel_id = ?2 AND user_id = ?3",
        )?;
        let mut rows = stmt.query((
            guild_id.to_string(),
            jtc_channel_id.to_string(),
            user_id.to_string(),
        ))?;
        if let Some(row) = rows.next()? {
            let last: i64 = row.get(0)?;
            let elapsed = now.saturating_sub(last);
            let window_secs = window.as_secs() as i64;
            if elapsed < window_secs {
                return Ok(Some(Duration::from_secs((window_secs - elapsed) as u64)));
            }
        }
        Ok(None)
    }

    pub fn record_cooldown(
        &self,
        guild_id: u64,
        jtc_channel_id: u64,
        user_id: u64,
        now: i64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cooldowns (guild_id, jtc_channel_id, user_id, last_created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(guild_id, jtc_channel_id, user_id) DO UPDATE SET last_created_at = ?4",
            (
                guild_id.to_string(),
                jtc_channel_id.to_string(),
                user_id.to_string(),
                now,
            ),
        )?;
        Ok(())
    }

    pub fn set_user_jtc_preference(
        &self,
        guild_id: u64,
        user_id: u64,
        jtc_channel_id: u64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_jtc_preferences (guild_id, user_id, jtc_channel_id)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(guild_id, user_id) DO UPDATE SET jtc_channel_id = ?3",
            (
                guild_id.to_string(),
                user_id.to_string(),
                jtc_channel_id.to_string(),
            ),
        )?;
        Ok(())
    }

    pub fn get_user_jtc_preference(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> anyhow::Result<Option<u64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT jtc_channel_id FROM user_jtc_preferences WHERE guild_id = ?1 AND user_id = ?2",
        )?;
        let mut rows = stmt.query((guild_id.to_string(), user_id.to_string()))?;
        match rows.next()? {
            Some(row) => Ok(Some(id_col(row, 0)?)),
            None => Ok(None),
        }
    }

    // --- JTC trigger configuration ---

    pub fn jtc_channels(&self, guild_id: u64) -> anyhow::Result<Vec<u64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT channel_id FROM jtc_channels WHERE guild_id = ?1")?;
        let rows = stmt.query_map([guild_id.to_string()], |row| id_col(row, 0))?;
        Ok(rows.collect::<Result<Vec<_>>>()?)
    }

    pub fn all_jtc_channels(&self) -> anyhow::Result<Vec<(u64, u64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT guild_id, channel_id FROM jtc_channels")?;
        let rows = stmt.query_map([], |row| Ok((id_col(row, 0)?, id_col(row, 1)?)))?;
        Ok(rows.collect::<Result<Vec<_>>>()?)
    }

    /// Replaces a guild's trigger set in one transaction and returns the
    /// previous set, so the caller can compute which triggers went stale.
    pub fn set_jtc_channels(&self, guild_id: u64, ids: &[u64]) -> anyhow::Result<Vec<u64>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let guild = guild_id.to_string();

        let previous = {
            let mut stmt = tx.prepare("SELECT channel_id FROM jtc_channels WHERE guild_id = ?1")?;
            let rows = stmt.query_map([&guild], |row| id_col(row, 0))?;
            rows.collect::<Result<Vec<_>>>()?
        };

        tx.execute("DELETE FROM jtc_channels WHERE guild_id = ?1", [&guild])?;
        for id in ids {
            tx.execute(
                "INSERT INTO jtc_channels (guild_id, channel_id) VALUES (?1, ?2)",
                (&guild, id.to_string()),
            )?;
        }
        tx.commit()?;
        Ok(previous)
    }

    // --- Bulk purge & stale-scope cleanup ---

    pub fn active_channel_ids(
        &self,
        guild_id: u64,
        user_id: Option<u64>,
    ) -> anyhow::Result<Vec<u64>> {
        let conn = self.conn.lock().unwrap();
        let guild = guild_id.to_string();
        let mut out = Vec::new();
        match user_id {
            Some(user) => {
                let mut stmt = conn.prepare(
                    "SELECT channel_id FROM voice_channels WHERE guild_id = ?1 AND owner_id = ?2",
                )?;
                let rows = stmt.query_map((&guild, user.to_string()), |row| id_col(row, 0))?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT channel_id FROM voice_channels WHERE guild_id = ?1")?;
                let rows = stmt.query_map([&guild], |row| id_col(row, 0))?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Deletes every voice-related row for the guild (and user, if given) in a
    /// single transaction. Returns per-table deleted counts; a second call on
    /// the same scope yields all zeros.
    pub fn purge_guild_scope(
        &self,
        guild_id: u64,
        user_id: Option<u64>,
    ) -> anyhow::Result<HashMap<String, usize>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let guild = guild_id.to_string();
        let mut counts = HashMap::new();

        match user_id {
            Some(user) => {
                let user = user.to_string();
                counts.insert(
                    "voice_channels".to_string(),
                    tx.execute(
                        "DELETE FROM voice_channels WHERE guild_id = ?1 AND owner_id = ?2",
                        (&guild, &user),
                    )?,
                );
                counts.insert(
                    "channel_settings".to_string(),
                    tx.execute(
                        "DELETE FROM channel_settings WHERE guild_id = ?1 AND owner_id = ?2",
                        (&guild, &user),
                    )?,
                );
                counts.insert(
                    "feature_settings".to_string(),
                    tx.execute(
                        "DELETE FROM feature_settings WHERE guild_id = ?1 AND owner_id = ?2",
                        (&guild, &user),
                    )?,
                );
                counts.insert(
                    "user_jtc_preferences".to_string(),
                    tx.execute(
                        "DELETE FROM user_jtc_preferences WHERE guild_id = ?1 AND user_id = ?2",
                        (&guild, &user),
                    )?,
                );
                counts.insert(
                    "cooldowns".to_string(),
                    tx.execute(
                        "DELETE FROM cooldowns WHERE guild_id = ?1 AND user_id = ?2",
                        (&guild, &user),
                    )?,
                );
            }
            None => {
                counts.insert(
                    "voice_channels".to_string(),
                    tx.execute("DELETE FROM voice_channels WHERE guild_id = ?1", [&guild])?,
                );
                counts.insert(
                    "channel_settings".to_string(),
                    tx.execute("DELETE FROM channel_settings WHERE guild_id = ?1", [&guild])?,
                );
                counts.insert(
                    "feature_settings".to_string(),
                    tx.execute("DELETE FROM feature_settings WHERE guild_id = ?1", [&guild])?,
                );
                counts.insert(
                    "user_jtc_preferences".to_string(),
                    tx.execute(
                        "DELETE FROM user_jtc_preferences WHERE guild_id = ?1",
                        [&guild],
                    )?,
                );
                counts.insert(
                    "cooldowns".to_string(),
                    tx.execute("DELETE FROM cooldowns WHERE guild_id = ?1", [&guild])?,
                );
            }
        }

        tx.commit()?;
        Ok(counts)
    }

    /// Purges everything persisted under a stale JTC trigger, plus the
    /// registry rows of `deleted_channel_ids` (channels the janitor managed to
    /// delete remotely). Rows of channels that were skipped as non-empty stay.
    pub fn purge_jtc_scope(
        &self,
        guild_id: u64,
        jtc_channel_id: u64,
        deleted_channel_ids: &[u64],
    ) -> anyhow::Result<HashMap<String, usize>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let guild = guild_id.to_string();
        let jtc = jtc_channel_id.to_string();
        let mut counts = HashMap::new();

        let mut channels = 0;
        for channel_id in deleted_channel_ids {
            channels += tx.execute(
                "DELETE FROM voice_channels WHERE channel_id = ?1",
                [channel_id.to_string()],
            )?;
        }
        counts.insert("voice_channels".to_string(), channels);
        counts.insert(
            "channel_settings".to_string(),
            tx.execute(
                "DELETE FROM channel_settings WHERE guild_id = ?1 AND jtc_channel_id = ?2",
                (&guild, &jtc),
            )?,
        );
        counts.insert(
            "feature_settings".to_string(),
            tx.execute(
                "DELETE FROM feature_settings WHERE guild_id = ?1 AND jtc_channel_id = ?2",
                (&guild, &jtc),
            )?,
        );
        counts.insert(
            "user_jtc_preferences".to_string(),
            tx.execute(
                "DELETE FROM user_jtc_preferences WHERE guild_id = ?1 AND jtc_channel_id = ?2",
                (&guild, &jtc),
            )?,
        );
        counts.insert(
            "cooldowns".to_string(),
            tx.execute(
                "DELETE FROM cooldowns WHERE guild_id = ?1 AND jtc_channel_id = ?2",
                (&guild, &jtc),
            )?,
        );

        tx.commit()?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        db
    }

    fn row(guild: u64, jtc: u64, owner: u64, channel: u64, ts: i64) -> VoiceChannelRow {
        VoiceChannelRow {
            scope: Scope::new(guild, jtc, owner),
            channel_id: channel,
            created_at: ts,
            last_activity: ts,
            active: true,
        }
    }

    #[test]
    fn test_channel_id_unique() {
        let db = test_db();
        db.insert_voice_channel(&row(1, 2, 3, 100, 0)).unwrap();
        // Same channel id under a different scope must be rejected
        assert!(db.insert_voice_channel(&row(1, 2, 4, 100, 0)).is_err());

        // Multiple channels per scope are fine
        db.insert_voice_channel(&row(1, 2, 3, 101, 0)).unwrap();
        assert_eq!(db.channels_by_owner(&Scope::new(1, 2, 3)).unwrap().len(), 2);
    }

    #[test]
    fn test_owner_rewrite_and_retire() {
        let db = test_db();
        db.insert_voice_channel(&row(1, 2, 3, 100, 0)).unwrap();

        assert!(db.set_channel_owner(100, 9).unwrap());
        let stored = db.get_voice_channel(100).unwrap().unwrap();
        assert_eq!(stored.scope.owner_id, 9);
        assert_eq!(stored.scope.guild_id, 1);

        assert!(db.retire_voice_channel(100).unwrap());
        assert!(db.get_voice_channel(100).unwrap().is_none());
        // Retiring again is a no-op
        assert!(!db.retire_voice_channel(100).unwrap());
        // No active row left to rewrite
        assert!(!db.set_channel_owner(100, 5).unwrap());
    }

    #[test]
    fn test_profile_partial_upsert() {
        let db = test_db();
        let scope = Scope::new(1, 2, 3);

        assert!(db.get_channel_profile(&scope).unwrap().is_none());

        db.upsert_channel_profile(&scope, Some("den"), None, None)
            .unwrap();
        let profile = db.get_channel_profile(&scope).unwrap().unwrap();
        assert_eq!(profile.name.as_deref(), Some("den"));
        assert_eq!(profile.user_limit, None);
        assert!(!profile.lock);

        db.upsert_channel_profile(&scope, None, Some(5), Some(true))
            .unwrap();
        let profile = db.get_channel_profile(&scope).unwrap().unwrap();
        assert_eq!(profile.name.as_deref(), Some("den")); // untouched
        assert_eq!(profile.user_limit, Some(5));
        assert!(profile.lock);
    }

    #[test]
    fn test_feature_last_write_wins() {
        let db = test_db();
        let scope = Scope::new(1, 2, 3);
        let entry = |value| FeatureEntry {
            feature: FeatureKind::Permit,
            target_id: 42,
            target_kind: TargetKind::User,
            value,
        };

        db.upsert_feature_entry(&scope, &entry(true)).unwrap();
        db.upsert_feature_entry(&scope, &entry(false)).unwrap();

        let entries = db.feature_entries(&scope).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].value);
    }

    #[test]
    fn test_cooldown_window() {
        let db = test_db();
        let window = Duration::from_secs(30);

        assert!(db.cooldown_remaining(1, 2, 3, window, 1000).unwrap().is_none());

        db.record_cooldown(1, 2, 3, 1000).unwrap();
        let remaining = db.cooldown_remaining(1, 2, 3, window, 1010).unwrap();
        assert_eq!(remaining, Some(Duration::from_secs(20)));

        // Outside the window
        assert!(db.cooldown_remaining(1, 2, 3, window, 1030).unwrap().is_none());
        // A different trigger is unaffected
        assert!(db.cooldown_remaining(1, 7, 3, window, 1010).unwrap().is_none());
    }

    #[test]
    fn test_jtc_set_returns_previous() {
        let db = test_db();
        assert!(db.set_jtc_channels(1, &[10, 11]).unwrap().is_empty());

        let mut previous = db.set_jtc_channels(1, &[11, 12]).unwrap();
        previous.sort_unstable();
        assert_eq!(previous, vec![10, 11]);

        let mut current = db.jtc_channels(1).unwrap();
        current.sort_unstable();
        assert_eq!(current, vec![11, 12]);
    }

    #[test]
    fn test_purge_guild_scope_idempotent() {
        let db = test_db();
        db.insert_voice_channel(&row(1, 2, 3, 100, 0)).unwrap();
        db.insert_voice_channel(&row(1, 2, 4, 101, 0)).unwrap();
        db.upsert_channel_profile(&Scope::new(1, 2, 3), Some("den"), None, None)
            .unwrap();
        db.record_cooldown(1, 2, 3, 0).unwrap();
        db.set_user_jtc_preference(1, 3, 2).unwrap();

        let counts = db.purge_guild_scope(1, Some(3)).unwrap();
        assert_eq!(counts["voice_channels"], 1);
        assert_eq!(counts["channel_settings"], 1);
        assert_eq!(counts["cooldowns"], 1);
        assert_eq!(counts["user_jtc_preferences"], 1);

        // The other owner's row survived a user-scoped purge
        assert!(db.get_voice_channel(101).unwrap().is_some());

        // Second call: all zeros
        let counts = db.purge_guild_scope(1, Some(3)).unwrap();
        assert!(counts.values().all(|&count| count == 0));

        // Guild-wide purge removes the rest
        let counts = db.purge_guild_scope(1, None).unwrap();
        assert_eq!(counts["voice_channels"], 1);
        let counts = db.purge_guild_scope(1, None).unwrap();
        assert!(counts.values().all(|&count| count == 0));
    }

    #[test]
    fn test_purge_jtc_scope_leaves_other_triggers() {
        let db = test_db();
        // Rows under triggers A=10, B=11, C=12
        db.insert_voice_channel(&row(1, 10, 3, 100, 0)).unwrap();
        db.insert_voice_channel(&row(1, 11, 3, 101, 0)).unwrap();
        db.insert_voice_channel(&row(1, 12, 3, 102, 0)).unwrap();
        for jtc in [10, 11, 12] {
            db.upsert_channel_profile(&Scope::new(1, jtc, 3), Some("x"), None, None)
                .unwrap();
            db.record_cooldown(1, jtc, 3, 0).unwrap();
        }

        for (jtc, channel) in [(10, 100), (11, 101)] {
            let counts = db.purge_jtc_scope(1, jtc, &[channel]).unwrap();
            assert_eq!(counts["voice_channels"], 1);
            assert_eq!(counts["channel_settings"], 1);
            assert_eq!(counts["cooldowns"], 1);
        }

        // Trigger C untouched
        assert!(db.get_voice_channel(102).unwrap().is_some());
        assert!(db.get_channel_profile(&Scope::new(1, 12, 3)).unwrap().is_some());

        // Idempotent: rerunning the stale set deletes nothing further
        let counts = db.purge_jtc_scope(1, 10, &[100]).unwrap();
        assert!(counts.values().all(|&count| count == 0));
    }
}
