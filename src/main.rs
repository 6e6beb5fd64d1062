use std::sync::Arc;

use poise::serenity_prelude as serenity;
use tracing::{error, info};
use voxcord::commands::{admin, voice};
use voxcord::voice::events::{classify, dispatcher};
use voxcord::voice::janitor::run_janitor;
use voxcord::voice::platform::DiscordPlatform;
use voxcord::voice::VoiceService;
use voxcord::{config::Config, Data};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    let discord_token = config.discord_token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![voice::voice(), admin::voiceadmin()],
            event_handler: |_ctx, event, _framework, data| {
                Box::pin(async move {
                    if let serenity::FullEvent::VoiceStateUpdate { old, new } = event {
                        if let Some(guild_id) = new.guild_id {
                            let old_channel =
                                old.as_ref().and_then(|s| s.channel_id).map(|id| id.get());
                            let new_channel = new.channel_id.map(|id| id.get());
                            if let Some(event) = classify(
                                guild_id.get(),
                                new.user_id.get(),
                                old_channel,
                                new_channel,
                            ) {
                                // Dispatcher going away means we are shutting down
                                let _ = data.voice_tx.send(event);
                            }
                        }
                    }
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                info!("Bot is ready!");
                if let Some(guild_id) = config.dev_guild_id {
                    poise::builtins::register_in_guild(
                        ctx,
                        &framework.options().commands,
                        serenity::GuildId::new(guild_id),
                    )
                    .await?;
                } else if config.register_commands {
                    poise::builtins::register_globally(ctx, &framework.options().commands)
                        .await?;
                }

                // Set bot status
                ctx.set_activity(Some(serenity::ActivityData::custom(&config.status_message)));

                let db = voxcord::db::Database::new(&config).expect("Failed to open database");
                db.execute_init().expect("Failed to initialize database");

                let platform = Arc::new(DiscordPlatform::new(
                    ctx.http.clone(),
                    ctx.cache.clone(),
                ));
                let service = Arc::new(VoiceService::new(
                    db.clone(),
                    platform,
                    config.creation_cooldown,
                    config.empty_grace_period,
                ));
                service.load().expect("Failed to load voice state");

                let (voice_tx, voice_dispatcher) = dispatcher(service.clone());
                tokio::spawn(voice_dispatcher.run());
                tokio::spawn(run_janitor(service.clone(), config.janitor_interval));

                Ok(Data {
                    config,
                    db,
                    voice: service,
                    voice_tx,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_VOICE_STATES;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
