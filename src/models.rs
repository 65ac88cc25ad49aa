//! Core conversation types shared by the store, the context assembler and the
//! backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author id carried by every message the bot itself produced.
pub const SYSTEM_AUTHOR_ID: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    /// Assistant turn. Older stores used the `model` spelling.
    #[serde(alias = "model")]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub username: String,
    pub display_name: String,
}

impl Author {
    pub fn system() -> Self {
        Self {
            id: SYSTEM_AUTHOR_ID.to_string(),
            username: SYSTEM_AUTHOR_ID.to_string(),
            display_name: SYSTEM_AUTHOR_ID.to_string(),
        }
    }
}

/// Inline image, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    pub mime_type: String,
    pub data: String,
}

/// One turn in a conversation. Never mutated once appended to a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: Author,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageData>,
}

impl ChatMessage {
    pub fn user(author: Author, content: impl Into<String>) -> Self {
        Self {
            author,
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            image: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            author: Author::system(),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: Option<ImageData>) -> Self {
        self.image = image;
        self
    }

    /// Label used when rendering transcripts for summarization.
    pub fn speaker(&self) -> &str {
        match self.role {
            Role::Assistant => self.role.as_str(),
            Role::User if self.author.display_name.is_empty() => self.role.as_str(),
            Role::User => &self.author.display_name,
        }
    }
}

/// Ordered messages for one channel, DM, user or character.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelHistory {
    pub messages: Vec<ChatMessage>,
}

impl ChannelHistory {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends while keeping timestamps non-decreasing.
    pub fn push(&mut self, mut message: ChatMessage) {
        if let Some(last) = self.messages.last() {
            if message.timestamp < last.timestamp {
                message.timestamp = last.timestamp;
            }
        }
        self.messages.push(message);
    }

    /// `limit` messages ending `offset` messages before the newest one.
    pub fn window(&self, limit: usize, offset: usize) -> &[ChatMessage] {
        let end = self.messages.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        &self.messages[start..end]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub personality: String,
    pub summary: String,
    #[serde(default)]
    pub facts: Vec<String>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            personality: "unknown".to_string(),
            summary: String::new(),
            facts: Vec::new(),
        }
    }
}

/// What the bot has learned about its own persona from past conversations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    #[serde(default)]
    pub facts: Vec<String>,
    /// Replies produced since the last fact extraction.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Text plus any images a backend produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub images: Vec<Vec<u8>>,
    pub status: ReplyStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Complete,
    /// The backend refused for safety reasons; `text` explains why.
    Blocked,
    /// Any other failure; `text` is a generic apology.
    Failed,
}

impl Reply {
    pub fn is_complete(&self) -> bool {
        self.status == ReplyStatus::Complete
    }
}
