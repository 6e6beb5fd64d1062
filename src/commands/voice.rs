use crate::voice::{FeatureKind, TargetKind, VoiceError};
use crate::{Context, Error};
use poise::serenity_prelude as serenity;

/// Manage your personal voice channel
#[poise::command(
    slash_command,
    guild_only,
    subcommands(
        "name", "limit", "lock", "unlock", "permit", "reject", "ptt", "priority",
        "soundboard", "claim", "transfer", "delete", "list"
    )
)]
pub async fn voice(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// The voice channel the caller is currently connected to, if any.
fn current_voice_channel(ctx: &Context<'_>) -> Option<u64> {
    let guild = ctx.guild()?;
    guild
        .voice_states
        .get(&ctx.author().id)
        .and_then(|state| state.channel_id)
        .map(|id| id.get())
}

fn resolve_target(
    user: Option<&serenity::User>,
    role: Option<&serenity::Role>,
    everyone: bool,
) -> Option<(u64, TargetKind)> {
    match (user, role, everyone) {
        (Some(user), None, false) => Some((user.id.get(), TargetKind::User)),
        (None, Some(role), false) => Some((role.id.get(), TargetKind::Role)),
        (None, None, true) => Some((0, TargetKind::Everyone)),
        _ => None,
    }
}

async fn apply_profile_change(
    ctx: Context<'_>,
    name: Option<String>,
    user_limit: Option<u32>,
    lock: Option<bool>,
    confirmation: &str,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?.get();
    let user_id = ctx.author().id.get();
    let scope = ctx.data().voice.resolve_scope(guild_id, user_id, None)?;

    ctx.data()
        .voice
        .update_channel_settings(
            scope.guild_id,
            scope.jtc_channel_id,
            scope.owner_id,
            name,
            user_limit,
            lock,
        )
        .await?;
    ctx.say(format!("✅ {confirmation}")).await?;
    Ok(())
}

async fn apply_feature_change(
    ctx: Context<'_>,
    feature: FeatureKind,
    user: Option<serenity::User>,
    role: Option<serenity::Role>,
    everyone: bool,
    value: bool,
    confirmation: &str,
) -> Result<(), Error> {
    let Some((target_id, target_kind)) = resolve_target(user.as_ref(), role.as_ref(), everyone)
    else {
        ctx.say("❌ Pick exactly one target: a user, a role, or everyone.")
            .await?;
        return Ok(());
    };
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?.get();
    let user_id = ctx.author().id.get();
    let scope = ctx.data().voice.resolve_scope(guild_id, user_id, None)?;

    ctx.data()
        .voice
        .set_feature_setting(
            scope.guild_id,
            scope.jtc_channel_id,
            scope.owner_id,
            feature,
            target_id,
            target_kind,
            value,
        )
        .await?;
    ctx.say(format!("✅ {confirmation}")).await?;
    Ok(())
}

/// Rename your channel
#[poise::command(slash_command)]
pub async fn name(
    ctx: Context<'_>,
    #[description = "New channel name"] name: String,
) -> Result<(), Error> {
    let confirmation = format!("Channel name set to **{name}**.");
    apply_profile_change(ctx, Some(name), None, None, &confirmation).await
}

/// Set the user limit of your channel
#[poise::command(slash_command)]
pub async fn limit(
    ctx: Context<'_>,
    #[description = "Maximum members (0 for unlimited)"]
    #[min = 0]
    #[max = 99]
    limit: u32,
) -> Result<(), Error> {
    let confirmation = if limit == 0 {
        "User limit removed.".to_string()
    } else {
        format!("User limit set to **{limit}**.")
    };
    apply_profile_change(ctx, None, Some(limit), None, &confirmation).await
}

/// Lock your channel so nobody new can join
#[poise::command(slash_command)]
pub async fn lock(ctx: Context<'_>) -> Result<(), Error> {
    apply_profile_change(ctx, None, None, Some(true), "Channel locked.").await
}

/// Unlock your channel
#[poise::command(slash_command)]
pub async fn unlock(ctx: Context<'_>) -> Result<(), Error> {
    apply_profile_change(ctx, None, None, Some(false), "Channel unlocked.").await
}

/// Allow a user or role to join your channel
#[poise::command(slash_command)]
pub async fn permit(
    ctx: Context<'_>,
    #[description = "User to permit"] user: Option<serenity::User>,
    #[description = "Role to permit"] role: Option<serenity::Role>,
    #[description = "Apply to everyone"] everyone: Option<bool>,
) -> Result<(), Error> {
    apply_feature_change(
        ctx,
        FeatureKind::Permit,
        user,
        role,
        everyone.unwrap_or(false),
        true,
        "Target permitted.",
    )
    .await
}

/// Deny a user or role access to your channel
#[poise::command(slash_command)]
pub async fn reject(
    ctx: Context<'_>,
    #[description = "User to reject"] user: Option<serenity::User>,
    #[description = "Role to reject"] role: Option<serenity::Role>,
    #[description = "Apply to everyone"] everyone: Option<bool>,
) -> Result<(), Error> {
    apply_feature_change(
        ctx,
        FeatureKind::Permit,
        user,
        role,
        everyone.unwrap_or(false),
        false,
        "Target rejected.",
    )
    .await
}

/// Force push-to-talk for a user or role in your channel
#[poise::command(slash_command)]
pub async fn ptt(
    ctx: Context<'_>,
    #[description = "Require push-to-talk"] enabled: bool,
    #[description = "User"] user: Option<serenity::User>,
    #[description = "Role"] role: Option<serenity::Role>,
    #[description = "Apply to everyone"] everyone: Option<bool>,
) -> Result<(), Error> {
    apply_feature_change(
        ctx,
        FeatureKind::PushToTalk,
        user,
        role,
        everyone.unwrap_or(false),
        enabled,
        "Push-to-talk setting saved.",
    )
    .await
}

/// Grant or revoke priority speaker in your channel
#[poise::command(slash_command)]
pub async fn priority(
    ctx: Context<'_>,
    #[description = "Enable priority speaker"] enabled: bool,
    #[description = "User"] user: Option<serenity::User>,
    #[description = "Role"] role: Option<serenity::Role>,
    #[description = "Apply to everyone"] everyone: Option<bool>,
) -> Result<(), Error> {
    apply_feature_change(
        ctx,
        FeatureKind::PrioritySpeaker,
        user,
        role,
        everyone.unwrap_or(false),
        enabled,
        "Priority speaker setting saved.",
    )
    .await
}

/// Allow or deny the soundboard in your channel
#[poise::command(slash_command)]
pub async fn soundboard(
    ctx: Context<'_>,
    #[description = "Enable the soundboard"] enabled: bool,
    #[description = "User"] user: Option<serenity::User>,
    #[description = "Role"] role: Option<serenity::Role>,
    #[description = "Apply to everyone"] everyone: Option<bool>,
) -> Result<(), Error> {
    apply_feature_change(
        ctx,
        FeatureKind::Soundboard,
        user,
        role,
        everyone.unwrap_or(false),
        enabled,
        "Soundboard setting saved.",
    )
    .await
}

/// Claim the channel you are in if its owner left
#[poise::command(slash_command)]
pub async fn claim(ctx: Context<'_>) -> Result<(), Error> {
    let Some(channel_id) = current_voice_channel(&ctx) else {
        ctx.say("❌ Join the voice channel you want to claim first.")
            .await?;
        return Ok(());
    };

    match ctx.data().voice.claim(channel_id, ctx.author().id.get()).await {
        Ok(()) => ctx.say("✅ Channel is yours now.").await?,
        Err(VoiceError::OwnerPresent) => {
            ctx.say("❌ The owner is still here; you can't claim this channel.")
                .await?
        }
        Err(VoiceError::UnknownChannel(_)) => {
            ctx.say("❌ This is not a managed voice channel.").await?
        }
        Err(err) => ctx.say(format!("❌ Claim failed: {err}")).await?,
    };
    Ok(())
}

/// Hand your channel to another member
#[poise::command(slash_command)]
pub async fn transfer(
    ctx: Context<'_>,
    #[description = "New owner"] member: serenity::User,
) -> Result<(), Error> {
    let Some(channel_id) = current_voice_channel(&ctx) else {
        ctx.say("❌ Join your voice channel first.").await?;
        return Ok(());
    };

    match ctx
        .data()
        .voice
        .transfer(channel_id, ctx.author().id.get(), member.id.get())
        .await
    {
        Ok(()) => {
            ctx.say(format!("✅ Channel transferred to **{}**.", member.name))
                .await?
        }
        Err(VoiceError::NotOwner) => {
            ctx.say("❌ Only the channel owner can transfer it.").await?
        }
        Err(err) => ctx.say(format!("❌ Transfer failed: {err}")).await?,
    };
    Ok(())
}

/// Delete the channels you own in this server
#[poise::command(slash_command)]
pub async fn delete(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?.get();
    ctx.defer().await?;

    let deleted = ctx
        .data()
        .voice
        .delete_user_owned_channels(guild_id, ctx.author().id.get())
        .await?;
    if deleted == 0 {
        ctx.say("You don't own any managed voice channels here.").await?;
    } else {
        ctx.say(format!("✅ Deleted {deleted} channel(s).")).await?;
    }
    Ok(())
}

/// List the channels you own in this server
#[poise::command(slash_command)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?.get();
    let user_id = ctx.author().id.get();
    let scope = ctx.data().voice.resolve_scope(guild_id, user_id, None)?;

    let rows = ctx
        .data()
        .voice
        .get_user_channels(scope.guild_id, scope.jtc_channel_id, scope.owner_id)?;
    if rows.is_empty() {
        ctx.say("You don't own any managed voice channels here.").await?;
        return Ok(());
    }
    let lines: Vec<String> = rows
        .iter()
        .map(|row| format!("<#{}>", row.channel_id))
        .collect();
    ctx.say(format!("Your channels: {}", lines.join(", "))).await?;
    Ok(())
}
