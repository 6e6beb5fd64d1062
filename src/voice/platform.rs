//! Thin abstraction over the Discord REST/cache surface.
//!
//! Everything the provisioning subsystem needs from the platform goes through
//! this trait, so the whole lifecycle can be exercised against an in-memory
//! double. 403/404 responses are expected outcomes and map to their own
//! variants.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::{CreateChannel, EditChannel, EditMember};
use serenity::http::{Http, HttpError};
use serenity::model::channel::{ChannelType, PermissionOverwrite};
use serenity::model::id::{ChannelId, GuildId, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("remote entity not found")]
    NotFound,
    #[error("remote operation forbidden")]
    Forbidden,
    #[error("{0}")]
    Other(String),
}

/// A member currently connected to a voice channel.
#[derive(Debug, Clone)]
pub struct VoiceMember {
    pub user_id: u64,
    pub is_bot: bool,
}

#[async_trait]
pub trait VoicePlatform: Send + Sync {
    /// Creates a voice channel and returns its id.
    async fn create_voice_channel(
        &self,
        guild_id: u64,
        parent_id: Option<u64>,
        name: &str,
        user_limit: Option<u32>,
    ) -> Result<u64, PlatformError>;

    async fn delete_channel(&self, channel_id: u64) -> Result<(), PlatformError>;

    async fn edit_channel(
        &self,
        channel_id: u64,
        name: Option<&str>,
        user_limit: Option<u32>,
    ) -> Result<(), PlatformError>;

    /// Applies permission overwrites one by one; the caller decides how to
    /// treat partial failure.
    async fn apply_overwrites(
        &self,
        channel_id: u64,
        overwrites: &[PermissionOverwrite],
    ) -> Result<(), PlatformError>;

    async fn move_member(
        &self,
        guild_id: u64,
        user_id: u64,
        channel_id: u64,
    ) -> Result<(), PlatformError>;

    /// Members currently connected to the given voice channel.
    async fn voice_members(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<Vec<VoiceMember>, PlatformError>;

    async fn role_ids(&self, guild_id: u64) -> Result<HashSet<u64>, PlatformError>;

    async fn member_exists(&self, guild_id: u64, user_id: u64) -> Result<bool, PlatformError>;

    async fn display_name(&self, guild_id: u64, user_id: u64) -> Result<String, PlatformError>;

    /// Category the given channel sits under, if any.
    async fn parent_category(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<Option<u64>, PlatformError>;
}

/// Production implementation over serenity's HTTP client and gateway cache.
pub struct DiscordPlatform {
    http: Arc<Http>,
    cache: Arc<serenity::cache::Cache>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>, cache: Arc<serenity::cache::Cache>) -> Self {
        Self { http, cache }
    }
}

fn map_serenity_err(err: serenity::Error) -> PlatformError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(ref resp)) = err {
        match resp.status_code.as_u16() {
            404 => return PlatformError::NotFound,
            403 => return PlatformError::Forbidden,
            _ => {}
        }
    }
    PlatformError::Other(err.to_string())
}

#[async_trait]
impl VoicePlatform for DiscordPlatform {
    async fn create_voice_channel(
        &self,
        guild_id: u64,
        parent_id: Option<u64>,
        name: &str,
        user_limit: Option<u32>,
    ) -> Result<u64, PlatformError> {
        let mut builder = CreateChannel::new(name).kind(ChannelType::Voice);
        if let Some(parent) = parent_id {
            builder = builder.category(ChannelId::new(parent));
        }
        if let Some(limit) = user_limit {
            builder = builder.user_limit(limit);
        }
        let channel = GuildId::new(guild_id)
            .create_channel(&self.http, builder)
            .await
            .map_err(map_serenity_err)?;
        Ok(channel.id.get())
    }

    async fn delete_channel(&self, channel_id: u64) -> Result<(), PlatformError> {
        ChannelId::new(channel_id)
            .delete(&self.http)
            .await
            .map_err(map_serenity_err)?;
        Ok(())
    }

    async fn edit_channel(
        &self,
        channel_id: u64,
        name: Option<&str>,
        user_limit: Option<u32>,
    ) -> Result<(), PlatformError> {
        let mut builder = EditChannel::new();
        if let Some(name) = name {
            builder = builder.name(name);
        }
        if let Some(limit) = user_limit {
            builder = builder.user_limit(limit);
        }
        ChannelId::new(channel_id)
            .edit(&self.http, builder)
            .await
            .map_err(map_serenity_err)?;
        Ok(())
    }

    async fn apply_overwrites(
        &self,
        channel_id: u64,
        overwrites: &[PermissionOverwrite],
    ) -> Result<(), PlatformError> {
        let channel = ChannelId::new(channel_id);
        for overwrite in overwrites {
            channel
                .create_permission(&self.http, overwrite.clone())
                .await
                .map_err(map_serenity_err)?;
        }
        Ok(())
    }

    async fn move_member(
        &self,
        guild_id: u64,
        user_id: u64,
        channel_id: u64,
    ) -> Result<(), PlatformError> {
        GuildId::new(guild_id)
            .edit_member(
                &self.http,
                UserId::new(user_id),
                EditMember::new().voice_channel(ChannelId::new(channel_id)),
            )
            .await
            .map_err(map_serenity_err)?;
        Ok(())
    }

    async fn voice_members(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<Vec<VoiceMember>, PlatformError> {
        let guild = self
            .cache
            .guild(GuildId::new(guild_id))
            .ok_or(PlatformError::NotFound)?;
        let mut members = Vec::new();
        for (user_id, state) in guild.voice_states.iter() {
            if state.channel_id.map(|c| c.get()) != Some(channel_id) {
                continue;
            }
            let is_bot = guild
                .members
                .get(user_id)
                .map(|m| m.user.bot)
                .unwrap_or(false);
            members.push(VoiceMember {
                user_id: user_id.get(),
                is_bot,
            });
        }
        Ok(members)
    }

    async fn role_ids(&self, guild_id: u64) -> Result<HashSet<u64>, PlatformError> {
        let guild = self
            .cache
            .guild(GuildId::new(guild_id))
            .ok_or(PlatformError::NotFound)?;
        Ok(guild.roles.keys().map(|id| id.get()).collect())
    }

    async fn member_exists(&self, guild_id: u64, user_id: u64) -> Result<bool, PlatformError> {
        if let Some(guild) = self.cache.guild(GuildId::new(guild_id)) {
            if guild.members.contains_key(&UserId::new(user_id)) {
                return Ok(true);
            }
        }
        match self
            .http
            .get_member(GuildId::new(guild_id), UserId::new(user_id))
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => match map_serenity_err(err) {
                PlatformError::NotFound => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn display_name(&self, guild_id: u64, user_id: u64) -> Result<String, PlatformError> {
        if let Some(guild) = self.cache.guild(GuildId::new(guild_id)) {
            if let Some(member) = guild.members.get(&UserId::new(user_id)) {
                return Ok(member.display_name().to_string());
            }
        }
        let member = self
            .http
            .get_member(GuildId::new(guild_id), UserId::new(user_id))
            .await
            .map_err(map_serenity_err)?;
        Ok(member.display_name().to_string())
    }

    async fn parent_category(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<Option<u64>, PlatformError> {
        if let Some(guild) = self.cache.guild(GuildId::new(guild_id)) {
            if let Some(channel) = guild.channels.get(&ChannelId::new(channel_id)) {
                return Ok(channel.parent_id.map(|id| id.get()));
            }
        }
        let channel = ChannelId::new(channel_id)
            .to_channel(&self.http)
            .await
            .map_err(map_serenity_err)?;
        Ok(channel.guild().and_then(|c| c.parent_id).map(|id| id.get()))
    }
}
