use kotori::character::load_characters;
use kotori::commands::{general, memory};
use kotori::config::Config;
use kotori::context::ContextAssembler;
use kotori::db::Database;
use kotori::llm::LlmClient;
use kotori::relay::RelayHub;
use kotori::services::chat_log::ChatLogger;
use kotori::services::profile::ProfileUpdater;
use kotori::services::responder::Responder;
use kotori::store::MemoryStore;
use kotori::summarize::HistorySummarizer;
use kotori::{handler, Data};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let discord_token = config.discord_token.clone();

    let characters = load_characters(&config.characters_file)?;
    let character = characters[0].clone();
    info!(
        "Loaded {} characters, active: {}",
        characters.len(),
        character.name
    );

    if let Some(parent) = std::path::Path::new(&config.database_url).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::new(&config.database_url)?;
    db.execute_init()?;

    let llm = LlmClient::new(&config)?;
    let store = Arc::new(MemoryStore::with_capacity(
        db.clone(),
        config.memory.cache_capacity,
    ));
    let summarizer = HistorySummarizer::new(llm.clone());
    let assembler = ContextAssembler::new(
        store.clone(),
        db.clone(),
        summarizer.clone(),
        config.memory.clone(),
    );
    let updater = Arc::new(ProfileUpdater::new(
        store.clone(),
        summarizer.clone(),
        config.memory.profile_summary_threshold,
        config.memory.max_facts,
    ));
    let responder = Arc::new(Responder::new(
        store.clone(),
        summarizer,
        assembler,
        llm,
        updater.clone(),
        config.memory.channel_history_threshold,
    ));
    let relay = RelayHub::new(config.relay_capacity);
    let chat_log = ChatLogger::new(db);

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![general::ping(), memory::clear(), memory::profile()],
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    if let serenity::FullEvent::Message { new_message } = event {
                        if let Err(e) = handler::handle_message(ctx, new_message, data).await {
                            error!("Error handling message: {:?}", e);
                        }
                    }
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Logged in as {}", ready.user.name);
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                // Set bot status
                ctx.set_activity(Some(serenity::ActivityData::custom(&config.status_message)));

                Ok(Data {
                    config,
                    http_client: reqwest::Client::new(),
                    character,
                    store,
                    updater,
                    responder,
                    chat_log,
                    relay,
                    bot_id: ready.user.id.get(),
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::DIRECT_MESSAGES
        | serenity::GatewayIntents::GUILD_PRESENCES;

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
