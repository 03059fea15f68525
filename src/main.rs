// This is the entry point of the moderation bot.
//
// **Architecture Overview:**
// - `core/` = Moderation engine (platform-agnostic)
// - `infra/` = Implementations of core traits (SQLite)
// - `discord/` = Discord-specific adapters (commands, events, actions)
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
use crate::core::moderation::{AuditSink, ModerationDispatcher};
use crate::discord::moderation::actions::SerenityChatActions;
use crate::discord::moderation::audit_channel::ChannelAuditSink;
use crate::discord::moderation::{commands, events};
use crate::discord::{Data, Error};
use crate::infra::moderation::SqliteModerationStore;
use poise::serenity_prelude as serenity;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How often idle flood windows are dropped.
const FLOOD_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Event handler for non-command Discord events.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    events::handle_event(ctx, event, data).await
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    let config = BotConfig::from_env().expect(
        "Invalid configuration! Create a .env file with at least DISCORD_TOKEN set.",
    );

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    if let Some(parent) = Path::new(&config.database_path).parent() {
        std::fs::create_dir_all(parent).expect("Failed to create data directory for SQLite files");
    }

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Storage is created up front; everything that needs the HTTP client is
    // wired in `setup` once the client exists.

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{}?mode=rwc", config.database_path))
        .await
        .expect("Failed to connect to moderation DB");
    let store = Arc::new(SqliteModerationStore::new(pool));
    store
        .migrate()
        .await
        .expect("Failed to migrate moderation DB");

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::DIRECT_MESSAGES
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS; // Joins and departures

    let engine = config.engine.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::commands(),
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up...");

                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered");

                let actions = Arc::new(SerenityChatActions::new(ctx.http.clone()));
                let audit: Arc<dyn AuditSink> =
                    Arc::new(ChannelAuditSink::new(ctx.http.clone(), Arc::clone(&store)));
                let moderation = Arc::new(ModerationDispatcher::new(
                    store,
                    actions,
                    engine,
                    Some(audit),
                ));

                // Background sweep of flood windows for members who went quiet.
                let sweeper = Arc::clone(&moderation);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(FLOOD_SWEEP_INTERVAL);
                    loop {
                        interval.tick().await;
                        let dropped = sweeper
                            .flood()
                            .sweep_idle(chrono::Utc::now(), FLOOD_SWEEP_INTERVAL);
                        if dropped > 0 {
                            tracing::debug!(dropped, "Swept idle flood windows");
                        }
                    }
                });

                tracing::info!("Bot is ready!");
                Ok(Data { moderation })
            })
        })
        .build();

    // Create the client and start the bot
    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
