//! AI Horde backend.
//!
//! The Horde exposes an OpenAI-compatible endpoint backed by a volunteer pool
//! whose models come and go, so every request first fetches the current
//! catalog and then walks it with [`try_models`].

use super::chat_completion::{build_request, first_content, openai_client, to_request_messages, user_prompt};
use super::failover::try_models;
use super::{Backend, BackendError, BackendOutput, Conversation};
use crate::config::GenerationParams;
use async_openai::{config::OpenAIConfig, types::ChatCompletionRequestMessage, Client};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

pub struct HordeBackend {
    http: reqwest::Client,
    client: Client<OpenAIConfig>,
    base_url: String,
    params: GenerationParams,
}

impl HordeBackend {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: &str,
        params: GenerationParams,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: openai_client(&base_url, api_key, http.clone()),
            http,
            base_url,
            params,
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                code: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let catalog: Value = response.json().await?;
        let models = parse_catalog(&catalog)?;
        info!("Horde: {} models in catalog", models.len());
        Ok(models)
    }

    async fn chat(&self, messages: Vec<ChatCompletionRequestMessage>) -> Result<String, BackendError> {
        let models = self.list_models().await?;
        try_models(&models, |model| {
            let messages = messages.clone();
            async move {
                debug!("Horde: trying {}", model);
                let request = build_request(&model, messages, &self.params)?;
                let response = self.client.chat().create(request).await?;
                first_content(&response)
            }
        })
        .await
    }
}

#[async_trait]
impl Backend for HordeBackend {
    fn name(&self) -> &str {
        "horde"
    }

    async fn send(&self, conversation: &Conversation) -> Result<BackendOutput, BackendError> {
        let messages = to_request_messages(conversation)?;
        Ok(BackendOutput::text(self.chat(messages).await?))
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        self.chat(user_prompt(prompt)?).await
    }
}

/// Model ids from an OpenAI-style `/models` listing, in catalog order.
pub fn parse_catalog(catalog: &Value) -> Result<Vec<String>, BackendError> {
    let data = catalog["data"]
        .as_array()
        .ok_or_else(|| BackendError::Malformed("model catalog has no data array".to_string()))?;
    Ok(data
        .iter()
        .filter_map(|model| model["id"].as_str())
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string)
        .collect())
}
