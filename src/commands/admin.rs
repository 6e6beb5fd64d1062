use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::info;

/// Administrative voice-channel controls
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands("purge", "trigger", "integrity")
)]
pub async fn voiceadmin(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Manage join-to-create trigger channels
#[poise::command(slash_command, subcommands("add", "remove", "show"))]
pub async fn trigger(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Register a voice channel as a join-to-create trigger
#[poise::command(slash_command)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Voice channel that spawns personal channels"]
    #[channel_types("Voice")]
    channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?.get();
    let mut triggers = ctx.data().voice.jtc_channels(guild_id);
    let channel_id = channel.id.get();
    if triggers.contains(&channel_id) {
        ctx.say("❌ That channel is already a trigger.").await?;
        return Ok(());
    }
    triggers.push(channel_id);

    ctx.data().voice.set_jtc_channels(guild_id, &triggers).await?;
    info!("Admin: trigger {} added in guild {}", channel_id, guild_id);
    ctx.say(format!("✅ **{}** now spawns personal channels.", channel.name))
        .await?;
    Ok(())
}

/// Remove a trigger and clean up everything scoped to it
#[poise::command(slash_command)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Trigger channel to remove"]
    #[channel_types("Voice")]
    channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?.get();
    let channel_id = channel.id.get();
    let triggers: Vec<u64> = ctx
        .data()
        .voice
        .jtc_channels(guild_id)
        .into_iter()
        .filter(|id| *id != channel_id)
        .collect();

    ctx.defer().await?;
    let report = ctx.data().voice.set_jtc_channels(guild_id, &triggers).await?;
    let rows: usize = report.rows_deleted.values().sum();

    let mut summary = format!(
        "✅ Trigger removed. Deleted {} channel(s) and {} stored row(s).",
        report.channels_deleted, rows
    );
    if report.channels_skipped > 0 {
        summary.push_str(&format!(
            " Skipped {} channel(s) that still have members.",
            report.channels_skipped
        ));
    }
    ctx.say(summary).await?;
    Ok(())
}

/// Show the configured triggers
#[poise::command(slash_command)]
pub async fn show(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?.get();
    let triggers = ctx.data().voice.jtc_channels(guild_id);
    if triggers.is_empty() {
        ctx.say("No join-to-create triggers configured.").await?;
    } else {
        let list: Vec<String> = triggers.iter().map(|id| format!("<#{id}>")).collect();
        ctx.say(format!("Triggers: {}", list.join(", "))).await?;
    }
    Ok(())
}

/// Delete all stored voice data for this server or a single user
#[poise::command(slash_command)]
pub async fn purge(
    ctx: Context<'_>,
    #[description = "Only purge this user's data"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?.get();
    ctx.defer().await?;

    let outcome = ctx
        .data()
        .voice
        .purge(guild_id, user.as_ref().map(|u| u.id.get()))
        .await?;

    let mut lines: Vec<String> = outcome
        .rows_deleted
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(table, count)| format!("`{table}`: {count}"))
        .collect();
    lines.sort();
    if lines.is_empty() {
        ctx.say("Nothing to purge.").await?;
    } else {
        ctx.say(format!(
            "✅ Purged {} (evicted {} cached channel(s)).",
            lines.join(", "),
            outcome.channels_evicted
        ))
        .await?;
    }
    Ok(())
}

/// Show stored permission targets that no longer resolve
#[poise::command(slash_command)]
pub async fn integrity(ctx: Context<'_>) -> Result<(), Error> {
    let issues = ctx.data().voice.integrity_issues();
    if issues.is_empty() {
        ctx.say("No integrity issues recorded.").await?;
        return Ok(());
    }
    let lines: Vec<String> = issues
        .iter()
        .rev()
        .take(20)
        .map(|issue| {
            format!(
                "• {} `{}` ({:?}) in guild {}",
                issue.target_kind.as_str(),
                issue.target_id,
                issue.feature,
                issue.guild_id
            )
        })
        .collect();
    ctx.say(format!(
        "⚠️ {} unresolved target(s):\n{}",
        issues.len(),
        lines.join("\n")
    ))
    .await?;
    Ok(())
}
