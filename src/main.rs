// This is the entry point of the leveling bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases, APIs)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

mod config;

use crate::config::BotConfig;
use crate::core::leveling::{
    message_queue, monitor_store, ChatEvent, LevelUpDispatcher, LevelingService, Readiness,
};
use crate::discord::leveling::{SerenityNotifier, SerenityRoleGranter};
use crate::discord::{Data, Error};
use crate::infra::economy::SqliteCreditStore;
use crate::infra::leveling::{JsonSettingsStore, SqliteLevelStore};
use crate::infra::mee6::Mee6Client;
use crate::infra::tatsu::TatsuClient;
use anyhow::Context as _;
use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

/// How often the store is pinged while it is unreachable.
const STORE_RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// How often the store is pinged while it is healthy.
const STORE_HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Event handler for non-command Discord events.
/// Guild messages are queued here and turned into XP by the queue consumer.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        // DMs never give experience
        let Some(guild_id) = new_message.guild_id else {
            return Ok(());
        };

        let event = ChatEvent {
            author_id: new_message.author.id.get(),
            author_name: new_message.author.name.clone(),
            author_is_bot: new_message.author.bot,
            guild_id: guild_id.get(),
            channel_id: new_message.channel_id.get(),
            content: new_message.content.clone(),
            arrived_at: Utc::now(),
        };
        data.queue.enqueue(event);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = BotConfig::from_env()?;

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================
    // Services that talk to Discord need the client's http and cache, so the
    // composition root lives in `setup`.

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let prefix = config.command_prefixes.first().cloned();
    let additional_prefixes = config
        .command_prefixes
        .iter()
        .skip(1)
        .map(|prefix| poise::Prefix::Literal(Box::leak(prefix.clone().into_boxed_str())))
        .collect();
    let token = config.discord_token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            // Register all our commands here
            commands: vec![
                discord::commands::leveling::profile(),
                discord::commands::leveling::top(),
                discord::commands::leveling::rep(),
                discord::commands::leveling::reps(),
                discord::commands::leveling::represet(),
                discord::commands::leveling::lvlinfo(),
                discord::commands::leveling::profileset(),
                discord::commands::leveling::forgetme(),
                discord::commands::lvladmin::lvladmin(),
                discord::commands::links::rolelink(),
                discord::commands::links::badge(),
                discord::commands::imports::lvlimport(),
            ],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix,
                additional_prefixes,
                ..Default::default()
            },
            // Event handler for messages and other events
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("🤖 Bot is starting up...");

                // ============================================================
                // DEPENDENCY INJECTION
                // ============================================================
                // This is the "composition root" where we wire everything together.

                let store = Arc::new(SqliteLevelStore::connect_lazy(&config.database_url)?);
                let settings = JsonSettingsStore::new(&config.settings_path)?;
                let credits = Arc::new(SqliteCreditStore::new(&config.database_url).await?);
                let readiness = Readiness::new();

                let dispatcher = LevelUpDispatcher::new(
                    Arc::new(SerenityRoleGranter::new(ctx.http.clone())),
                    Arc::new(SerenityNotifier::new(ctx.http.clone(), ctx.cache.clone())),
                );
                let leveling = Arc::new(LevelingService::new(
                    Arc::clone(&store),
                    settings,
                    credits,
                    dispatcher,
                    readiness.clone(),
                    config.leveling_options(),
                ));

                // Health monitor. Its first ping also creates the tables.
                tokio::spawn(monitor_store(
                    store,
                    readiness,
                    STORE_RETRY_INTERVAL,
                    STORE_HEALTH_INTERVAL,
                ));

                // Single consumer that turns queued messages into XP
                let (queue, receiver) = message_queue(config.queue_capacity);
                tokio::spawn(receiver.run(Arc::clone(&leveling), config.batch_interval));

                let mee6 = Arc::new(Mee6Client::new()?);
                let tatsu = match config.tatsumaki_api_key.as_deref() {
                    Some(key) => Some(Arc::new(TatsuClient::new(key)?)),
                    None => {
                        tracing::info!("No Tatsumaki API key, Tatsumaki import disabled");
                        None
                    }
                };

                // Register slash commands globally (can take up to an hour to propagate)
                // For faster development, use register_in_guild instead:
                // poise::builtins::register_in_guild(ctx, &framework.options().commands, guild_id).await?;
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                tracing::info!("✅ Commands registered!");
                tracing::info!("🚀 Bot is ready!");

                Ok(Data {
                    leveling,
                    queue,
                    mee6,
                    tatsu,
                })
            })
        })
        .build();

    // Create the client and start the bot
    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    client.start().await.context("Error running bot")?;
    Ok(())
}
