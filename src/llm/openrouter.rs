//! OpenRouter backend (OpenAI-compatible chat completions).

use super::chat_completion::{build_request, first_content, openai_client, to_request_messages, user_prompt};
use super::{Backend, BackendError, BackendOutput, Conversation};
use crate::config::GenerationParams;
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use tracing::debug;

pub struct OpenRouterBackend {
    client: Client<OpenAIConfig>,
    model: String,
    params: GenerationParams,
}

impl OpenRouterBackend {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: &str,
        model: impl Into<String>,
        params: GenerationParams,
    ) -> Self {
        Self {
            client: openai_client(base_url, api_key, http),
            model: model.into(),
            params,
        }
    }
}

#[async_trait]
impl Backend for OpenRouterBackend {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn send(&self, conversation: &Conversation) -> Result<BackendOutput, BackendError> {
        let messages = to_request_messages(conversation)?;
        debug!(
            "OpenRouter: sending {} messages to {}",
            messages.len(),
            self.model
        );
        let request = build_request(&self.model, messages, &self.params)?;
        let response = self.client.chat().create(request).await?;
        Ok(BackendOutput::text(first_content(&response)?))
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let request = build_request(&self.model, user_prompt(prompt)?, &self.params)?;
        let response = self.client.chat().create(request).await?;
        first_content(&response)
    }
}
