//! Helpers shared by the OpenAI-compatible backends.

use super::{BackendError, Conversation, TurnRole};
use crate::config::GenerationParams;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, Stop,
    },
    Client,
};

pub fn openai_client(base_url: &str, api_key: &str, http: reqwest::Client) -> Client<OpenAIConfig> {
    let config = OpenAIConfig::new()
        .with_api_base(base_url)
        .with_api_key(api_key);
    Client::with_config(config).with_http_client(http)
}

/// Flattens a conversation into text-only chat messages.
pub fn to_request_messages(
    conversation: &Conversation,
) -> Result<Vec<ChatCompletionRequestMessage>, BackendError> {
    conversation
        .turns
        .iter()
        .map(|turn| {
            let content = turn.text();
            let message: ChatCompletionRequestMessage = match turn.role {
                TurnRole::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(content)
                    .build()?
                    .into(),
                TurnRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(content)
                    .build()?
                    .into(),
                TurnRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content)
                    .build()?
                    .into(),
            };
            Ok(message)
        })
        .collect()
}

pub fn user_prompt(prompt: &str) -> Result<Vec<ChatCompletionRequestMessage>, BackendError> {
    Ok(vec![ChatCompletionRequestUserMessageArgs::default()
        .content(prompt.to_string())
        .build()?
        .into()])
}

#[allow(deprecated)]
pub fn build_request(
    model: &str,
    messages: Vec<ChatCompletionRequestMessage>,
    params: &GenerationParams,
) -> Result<CreateChatCompletionRequest, BackendError> {
    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(model)
        .messages(messages)
        .temperature(params.temperature)
        .top_p(params.top_p)
        .frequency_penalty(params.frequency_penalty)
        .presence_penalty(params.presence_penalty)
        .max_tokens(params.max_tokens);
    if !params.stop.is_empty() {
        args.stop(Stop::StringArray(params.stop.clone()));
    }
    Ok(args.build()?)
}

/// Content of the first choice; missing or blank content is malformed.
pub fn first_content(response: &CreateChatCompletionResponse) -> Result<String, BackendError> {
    let choice = response
        .choices
        .first()
        .ok_or_else(|| BackendError::Malformed("no choices in response".to_string()))?;
    match choice.message.content.as_deref().map(str::trim) {
        Some(content) if !content.is_empty() => Ok(content.to_string()),
        _ => Err(BackendError::Malformed(
            "first choice has no message content".to_string(),
        )),
    }
}
