use super::gemini::GeminiBackend;
use super::horde::HordeBackend;
use super::openrouter::OpenRouterBackend;
use super::{Backend, BackendError, Conversation};
use crate::config::{BackendKind, Config};
use crate::models::{Reply, ReplyStatus};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const APOLOGY: &str = "Sorry, I'm having trouble thinking right now!";

/// The one backend chosen at startup, behind a boundary that never fails.
#[derive(Clone)]
pub struct LlmClient {
    backend: Arc<dyn Backend>,
}

impl LlmClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.llm_timeout())
            .build()?;

        let backend: Arc<dyn Backend> = match config.llm_backend {
            BackendKind::Gemini => {
                let key = config
                    .gemini_api_key
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("GEMINI_API_KEY must be set for the gemini backend"))?;
                Arc::new(GeminiBackend::new(
                    http,
                    config.gemini_url.as_str(),
                    key,
                    config.gemini_model.as_str(),
                    config.gemini_summary_model.as_str(),
                    config.generation.clone(),
                ))
            }
            BackendKind::OpenRouter => {
                let key = config.openrouter_api_key.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("OPENROUTER_API_KEY must be set for the openrouter backend")
                })?;
                Arc::new(OpenRouterBackend::new(
                    http,
                    &config.openrouter_url,
                    key,
                    config.openrouter_model.as_str(),
                    config.generation.clone(),
                ))
            }
            BackendKind::Horde => Arc::new(HordeBackend::new(
                http,
                &config.horde_url,
                &config.horde_api_key,
                config.generation.clone(),
            )),
        };

        info!("LLM backend: {}", backend.name());
        Ok(Self { backend })
    }

    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Sends the conversation and always comes back with something to show.
    pub async fn generate(&self, conversation: &Conversation) -> Reply {
        match self.backend.send(conversation).await {
            Ok(output) if output.text.trim().is_empty() && output.images.is_empty() => {
                warn!("LLM ({}): empty response", self.backend.name());
                Reply {
                    text: APOLOGY.to_string(),
                    images: Vec::new(),
                    status: ReplyStatus::Failed,
                }
            }
            Ok(output) => Reply {
                text: output.text,
                images: output.images,
                status: ReplyStatus::Complete,
            },
            Err(BackendError::SafetyBlocked { reason }) => {
                warn!("Failed to generate image for reason: {}", reason);
                Reply {
                    text: format!("Couldn't generate image for reason: \"{}\"", reason),
                    images: Vec::new(),
                    status: ReplyStatus::Blocked,
                }
            }
            Err(e) => {
                error!("LLM ({}) error: {}", self.backend.name(), e);
                Reply {
                    text: APOLOGY.to_string(),
                    images: Vec::new(),
                    status: ReplyStatus::Failed,
                }
            }
        }
    }

    pub async fn completion(&self, prompt: &str) -> Result<String, BackendError> {
        self.backend.complete(prompt).await
    }

    /// Structured extraction into `T`, using `T`'s JSON schema.
    pub async fn extract<T>(&self, prompt: &str) -> Result<T, BackendError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = serde_json::to_value(schemars::schema_for!(T))?;
        let raw = self.backend.extract(prompt, &schema).await?;
        Ok(serde_json::from_str(parse_json_payload(&raw))?)
    }
}

/// The JSON object inside a reply that may be wrapped in prose or a code fence.
fn parse_json_payload(raw: &str) -> &str {
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw.trim(),
    }
}
