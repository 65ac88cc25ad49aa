use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which text-generation backend answers chat messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Gemini,
    OpenRouter,
    Horde,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openrouter" => Ok(Self::OpenRouter),
            "horde" | "aihorde" => Ok(Self::Horde),
            other => Err(anyhow::anyhow!("Unknown LLM_BACKEND '{}'", other)),
        }
    }
}

/// Generation parameters passed through to every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stop: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.9,
            max_tokens: 300,
            top_p: 0.9,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: Vec::new(),
        }
    }
}

/// Thresholds and windows for history, profiles and prompt context.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// Channel history length at which older turns are folded into a summary.
    pub channel_history_threshold: usize,
    /// Messages a user sends before their profile is re-summarized.
    pub profile_summary_threshold: usize,
    pub max_facts: usize,
    pub context_message_limit: usize,
    pub context_message_offset: usize,
    pub advisory_summary_window: usize,
    /// Histories and profiles kept in memory before idle ones are evicted.
    pub cache_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            channel_history_threshold: 50,
            profile_summary_threshold: 4,
            max_facts: 20,
            context_message_limit: 50,
            context_message_offset: 0,
            advisory_summary_window: 10,
            cache_capacity: 1000,
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub llm_backend: BackendKind,
    pub gemini_api_key: Option<String>,
    pub gemini_url: String,
    pub gemini_model: String,
    pub gemini_summary_model: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_url: String,
    pub openrouter_model: String,
    pub horde_api_key: String,
    pub horde_url: String,
    pub generation: GenerationParams,
    pub llm_timeout_secs: u64,
    pub database_url: String,
    pub characters_file: String,
    pub status_message: String,
    pub memory: MemoryConfig,
    pub typing_interval: Duration,
    pub relay_capacity: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let memory_defaults = MemoryConfig::default();
        let generation_defaults = GenerationParams::default();

        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            llm_backend: env::var("LLM_BACKEND")
                .unwrap_or_else(|_| "gemini".to_string())
                .parse()?,
            gemini_api_key: env::var("GEMINI_API_KEY").ok(),
            gemini_url: env::var("GEMINI_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta".to_string()
            }),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash-exp-image-generation".to_string()),
            gemini_summary_model: env::var("GEMINI_SUMMARY_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            openrouter_api_key: env::var("OPENROUTER_API_KEY").ok(),
            openrouter_url: env::var("OPENROUTER_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
            openrouter_model: env::var("OPENROUTER_MODEL")
                .unwrap_or_else(|_| "deepseek/deepseek-chat".to_string()),
            horde_api_key: env::var("HORDE_API_KEY")
                .unwrap_or_else(|_| "0000000000".to_string()),
            horde_url: env::var("HORDE_URL")
                .unwrap_or_else(|_| "https://oai.aihorde.net/v1".to_string()),
            generation: GenerationParams {
                temperature: parse_var("LLM_TEMPERATURE", generation_defaults.temperature),
                max_tokens: parse_var("LLM_MAX_TOKENS", generation_defaults.max_tokens),
                top_p: parse_var("LLM_TOP_P", generation_defaults.top_p),
                frequency_penalty: parse_var(
                    "LLM_FREQUENCY_PENALTY",
                    generation_defaults.frequency_penalty,
                ),
                presence_penalty: parse_var(
                    "LLM_PRESENCE_PENALTY",
                    generation_defaults.presence_penalty,
                ),
                stop: env::var("LLM_STOP")
                    .map(|s| {
                        s.split(',')
                            .map(|p| p.trim().to_string())
                            .filter(|p| !p.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            llm_timeout_secs: parse_var("LLM_TIMEOUT_SECS", 120),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/kotori.db".to_string()),
            characters_file: env::var("CHARACTERS_FILE")
                .unwrap_or_else(|_| "characters.toml".to_string()),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Chatting".to_string()),
            memory: MemoryConfig {
                channel_history_threshold: parse_var(
                    "CHANNEL_HISTORY_THRESHOLD",
                    memory_defaults.channel_history_threshold,
                ),
                profile_summary_threshold: parse_var(
                    "PROFILE_SUMMARY_THRESHOLD",
                    memory_defaults.profile_summary_threshold,
                ),
                max_facts: parse_var("MAX_FACTS", memory_defaults.max_facts),
                context_message_limit: parse_var(
                    "CONTEXT_MESSAGE_LIMIT",
                    memory_defaults.context_message_limit,
                ),
                context_message_offset: parse_var(
                    "CONTEXT_MESSAGE_OFFSET",
                    memory_defaults.context_message_offset,
                ),
                advisory_summary_window: parse_var(
                    "ADVISORY_SUMMARY_WINDOW",
                    memory_defaults.advisory_summary_window,
                ),
                cache_capacity: parse_var(
                    "MEMORY_CACHE_CAPACITY",
                    memory_defaults.cache_capacity,
                ),
            },
            typing_interval: env::var("TYPING_INTERVAL")
                .ok()
                .and_then(|v| humantime::parse_duration(&v).ok())
                .unwrap_or(Duration::from_secs(5)),
            relay_capacity: parse_var("RELAY_CAPACITY", 256),
        })
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("llm_backend", &self.llm_backend)
            .field(
                "gemini_api_key",
                &self.gemini_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("gemini_url", &self.gemini_url)
            .field("gemini_model", &self.gemini_model)
            .field("gemini_summary_model", &self.gemini_summary_model)
            .field(
                "openrouter_api_key",
                &self.openrouter_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("openrouter_url", &self.openrouter_url)
            .field("openrouter_model", &self.openrouter_model)
            .field("horde_api_key", &"[REDACTED]")
            .field("horde_url", &self.horde_url)
            .field("generation", &self.generation)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("database_url", &self.database_url)
            .field("characters_file", &self.characters_file)
            .field("status_message", &self.status_message)
            .field("memory", &self.memory)
            .field("typing_interval", &self.typing_interval)
            .field("relay_capacity", &self.relay_capacity)
            .finish()
    }
}

/// Discord message limit is 2000 characters
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;
