pub mod activity;
pub mod character;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod facts;
pub mod handler;
pub mod llm;
pub mod models;
pub mod relay;
pub mod services;
pub mod store;
pub mod summarize;
pub mod typing;

use std::sync::Arc;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub http_client: reqwest::Client,
    /// The active persona
    pub character: character::Character,
    pub store: Arc<store::MemoryStore>,
    pub updater: Arc<services::profile::ProfileUpdater>,
    pub responder: Arc<services::responder::Responder>,
    pub chat_log: services::chat_log::ChatLogger,
    pub relay: relay::RelayHub,
    /// Bot's own user ID for mention detection
    pub bot_id: u64,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
