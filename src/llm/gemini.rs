//! Gemini `generateContent` backend.
//!
//! Chat is modelled as a session seeded with the prior turns; each
//! `send_message` posts the whole session plus the new turn and, on success,
//! records both in the session.

use super::{Backend, BackendError, BackendOutput, Conversation, Part, Turn, TurnRole};
use crate::config::GenerationParams;
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

const SAFETY_CATEGORIES: [&str; 5] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_CIVIC_INTEGRITY",
];

/// Finish reasons that mean the candidate was withheld.
const BLOCKING_FINISH_REASONS: [&str; 5] = [
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
];

pub struct GeminiBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    summary_model: String,
    params: GenerationParams,
}

impl GeminiBackend {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        chat_model: impl Into<String>,
        summary_model: impl Into<String>,
        params: GenerationParams,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            chat_model: chat_model.into(),
            summary_model: summary_model.into(),
            params,
        }
    }

    pub fn start_chat(&self, history: &[Turn]) -> ChatSession<'_> {
        ChatSession {
            backend: self,
            contents: history.iter().map(to_content).collect(),
        }
    }

    fn chat_generation_config(&self) -> Value {
        let mut config = json!({
            "responseModalities": ["TEXT", "IMAGE"],
            "temperature": self.params.temperature,
            "topP": self.params.top_p,
            "maxOutputTokens": self.params.max_tokens,
        });
        if !self.params.stop.is_empty() {
            config["stopSequences"] = json!(self.params.stop);
        }
        config
    }

    async fn generate_content(&self, model: &str, body: &Value) -> Result<Value, BackendError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        debug!("Gemini: POST {}", url);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                code: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn generate_text(&self, body: Value) -> Result<String, BackendError> {
        let response = self.generate_content(&self.summary_model, &body).await?;
        let output = parse_response(&response)?;
        if output.text.trim().is_empty() {
            return Err(BackendError::Malformed("response has no text part".to_string()));
        }
        Ok(output.text)
    }
}

pub struct ChatSession<'a> {
    backend: &'a GeminiBackend,
    contents: Vec<Value>,
}

impl ChatSession<'_> {
    pub async fn send_message(&mut self, turn: &Turn) -> Result<BackendOutput, BackendError> {
        let mut contents = self.contents.clone();
        contents.push(to_content(turn));

        let body = json!({
            "contents": contents,
            "safetySettings": safety_settings(),
            "generationConfig": self.backend.chat_generation_config(),
        });

        let response = self
            .backend
            .generate_content(&self.backend.chat_model, &body)
            .await?;
        let output = parse_response(&response)?;

        self.contents = contents;
        self.contents.push(json!({
            "role": "model",
            "parts": [{ "text": output.text }],
        }));
        Ok(output)
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn send(&self, conversation: &Conversation) -> Result<BackendOutput, BackendError> {
        let (turn, history) = conversation
            .split_last()
            .ok_or_else(|| BackendError::Request("empty conversation".to_string()))?;
        let mut chat = self.start_chat(history);
        chat.send_message(turn).await
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        self.generate_text(json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        }))
        .await
    }

    async fn extract(&self, prompt: &str, schema: &Value) -> Result<String, BackendError> {
        self.generate_text(json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": to_gemini_schema(schema),
            },
        }))
        .await
    }
}

fn safety_settings() -> Value {
    Value::Array(
        SAFETY_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": "BLOCK_NONE" }))
            .collect(),
    )
}

/// Gemini has no system role inside `contents`; persona text goes in as a
/// user turn ahead of the history.
fn to_content(turn: &Turn) -> Value {
    let role = match turn.role {
        TurnRole::System | TurnRole::User => "user",
        TurnRole::Assistant => "model",
    };
    let parts: Vec<Value> = turn
        .parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => json!({ "text": text }),
            Part::Image(image) => json!({
                "inlineData": { "mimeType": image.mime_type, "data": image.data }
            }),
        })
        .collect();
    json!({ "role": role, "parts": parts })
}

/// Extracts text and images from a `generateContent` response.
pub fn parse_response(response: &Value) -> Result<BackendOutput, BackendError> {
    if let Some(reason) = response["promptFeedback"]["blockReason"].as_str() {
        return Err(BackendError::SafetyBlocked {
            reason: reason.to_string(),
        });
    }

    let candidate = response["candidates"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| BackendError::Malformed("response has no candidates".to_string()))?;

    if let Some(reason) = candidate["finishReason"].as_str() {
        if BLOCKING_FINISH_REASONS.contains(&reason) {
            warn!("Gemini: candidate withheld with finish reason {}", reason);
            return Err(BackendError::SafetyBlocked {
                reason: reason.to_string(),
            });
        }
    }

    let parts = candidate["content"]["parts"]
        .as_array()
        .ok_or_else(|| BackendError::Malformed("candidate has no content parts".to_string()))?;

    let text = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .find(|t| !t.trim().is_empty())
        .unwrap_or_default()
        .to_string();

    let mut images = Vec::new();
    for part in parts {
        let inline = &part["inlineData"];
        let is_image = inline["mimeType"]
            .as_str()
            .is_some_and(|mime| mime.starts_with("image/"));
        if !is_image {
            continue;
        }
        let data = inline["data"]
            .as_str()
            .ok_or_else(|| BackendError::Malformed("inline image without data".to_string()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| BackendError::Malformed(format!("invalid image data: {}", e)))?;
        images.push(bytes);
    }

    Ok(BackendOutput { text, images })
}

/// Converts a JSON Schema (as generated by `schemars`) into the OpenAPI
/// subset Gemini accepts for `responseSchema`.
pub fn to_gemini_schema(schema: &Value) -> Value {
    let mut out = Map::new();

    match &schema["type"] {
        Value::String(kind) => {
            out.insert("type".into(), json!(kind.to_uppercase()));
        }
        Value::Array(kinds) => {
            let mut nullable = false;
            for kind in kinds.iter().filter_map(Value::as_str) {
                if kind == "null" {
                    nullable = true;
                } else if !out.contains_key("type") {
                    out.insert("type".into(), json!(kind.to_uppercase()));
                }
            }
            if nullable {
                out.insert("nullable".into(), json!(true));
            }
        }
        _ => {}
    }

    if let Some(description) = schema["description"].as_str() {
        out.insert("description".into(), json!(description));
    }

    if let Some(properties) = schema["properties"].as_object() {
        let converted: Map<String, Value> = properties
            .iter()
            .map(|(name, prop)| (name.clone(), to_gemini_schema(prop)))
            .collect();
        out.insert("properties".into(), Value::Object(converted));
    }

    if schema["items"].is_object() {
        out.insert("items".into(), to_gemini_schema(&schema["items"]));
    }

    if let Some(required) = schema["required"].as_array() {
        out.insert("required".into(), Value::Array(required.clone()));
    }

    Value::Object(out)
}
