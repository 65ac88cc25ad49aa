use crate::models::ImageData;
use async_trait::async_trait;
use serde_json::Value;

pub mod chat_completion;
pub mod client;
pub mod error;
pub mod failover;
pub mod gemini;
pub mod horde;
pub mod openrouter;

pub use client::LlmClient;
pub use error::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Image(ImageData),
}

/// One role-tagged content item sent to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(TurnRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, text)
    }

    pub fn with_image(mut self, image: ImageData) -> Self {
        self.parts.push(Part::Image(image));
        self
    }

    /// Text parts joined by newlines. Images become a short placeholder for
    /// backends that only accept text.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => text.as_str(),
                Part::Image(_) => "[image attached]",
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageData> {
        self.parts.iter().filter_map(|part| match part {
            Part::Image(image) => Some(image),
            Part::Text(_) => None,
        })
    }
}

/// Ordered prompt: persona first, the new message last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    pub turns: Vec<Turn>,
}

impl Conversation {
    /// Splits off the newest turn from everything before it.
    pub fn split_last(&self) -> Option<(&Turn, &[Turn])> {
        self.turns.split_last()
    }
}

/// Raw backend result before it is turned into a [`crate::models::Reply`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendOutput {
    pub text: String,
    pub images: Vec<Vec<u8>>,
}

impl BackendOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }
}

/// A text-generation service.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Sends a full conversation and returns the generated turn.
    async fn send(&self, conversation: &Conversation) -> Result<BackendOutput, BackendError>;

    /// Single-prompt text completion.
    async fn complete(&self, prompt: &str) -> Result<String, BackendError>;

    /// Completion constrained to `schema`; returns the raw JSON text.
    async fn extract(&self, prompt: &str, schema: &Value) -> Result<String, BackendError> {
        let prompt = format!(
            "{}\n\nRespond only with a JSON object that matches this JSON schema:\n{}",
            prompt, schema
        );
        self.complete(&prompt).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_text_with_image_placeholder() {
        let turn = Turn::user("look at this").with_image(ImageData {
            mime_type: "image/png".to_string(),
            data: "AAAA".to_string(),
        });
        assert_eq!(turn.text(), "look at this\n[image attached]");
        assert_eq!(turn.images().count(), 1);
    }

    #[test]
    fn test_split_last() {
        let conversation = Conversation {
            turns: vec![Turn::system("persona"), Turn::user("hi")],
        };
        let (last, rest) = conversation.split_last().unwrap();
        assert_eq!(last.text(), "hi");
        assert_eq!(rest.len(), 1);
        assert!(Conversation::default().split_last().is_none());
    }
}
