use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub discord_token: String,
    pub application_id: u64,
    pub owner_id: Option<u64>,
    pub database_url: String,
    pub status_message: String,
    // Provisioning settings
    pub creation_cooldown: Duration,
    // Janitor settings
    pub empty_grace_period: Duration,
    pub janitor_interval: Duration,
    pub dev_guild_id: Option<u64>,
    pub register_commands: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            application_id: env::var("APPLICATION_ID")
                .map_err(|_| anyhow::anyhow!("APPLICATION_ID must be set"))?
                .parse()
                .map_err(|_| anyhow::anyhow!("APPLICATION_ID must be a valid u64"))?,
            owner_id: env::var("OWNER_ID").ok().and_then(|id| id.parse().ok()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/voxcord.db".to_string()),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Join to create a channel!".to_string()),
            creation_cooldown: duration_var("CREATION_COOLDOWN", "30s"),
            empty_grace_period: duration_var("EMPTY_GRACE_PERIOD", "60s"),
            janitor_interval: duration_var("JANITOR_INTERVAL", "2m"),
            dev_guild_id: env::var("DEV_GUILD_ID").ok().and_then(|id| id.parse().ok()),
            register_commands: env::var("REGISTER_COMMANDS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        })
    }
}

/// Reads a humantime duration (e.g. "30s", "5m") from the environment,
/// falling back to `default` on missing or unparsable values.
fn duration_var(name: &str, default: &str) -> Duration {
    let fallback = humantime::parse_duration(default).unwrap_or(Duration::from_secs(60));
    match env::var(name) {
        Ok(raw) => humantime::parse_duration(&raw).unwrap_or(fallback),
        Err(_) => fallback,
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("application_id", &self.application_id)
            .field("owner_id", &self.owner_id)
            .field("database_url", &self.database_url)
            .field("status_message", &self.status_message)
            .field("creation_cooldown", &self.creation_cooldown)
            .field("empty_grace_period", &self.empty_grace_period)
            .field("janitor_interval", &self.janitor_interval)
            .field("dev_guild_id", &self.dev_guild_id)
            .field("register_commands", &self.register_commands)
            .finish()
    }
}
