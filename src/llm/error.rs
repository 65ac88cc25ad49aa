//! Backend error taxonomy.

use async_openai::error::OpenAIError;
use thiserror::Error;

/// Everything that can go wrong talking to a text-generation backend.
///
/// None of these reach Discord users: [`crate::llm::LlmClient::generate`]
/// turns them into fixed reply text.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// Network failure or timeout.
    #[error("backend request failed: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("backend returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// The body was not the shape the backend promises.
    #[error("malformed backend response: {0}")]
    Malformed(String),

    /// The backend refused to answer for safety reasons.
    #[error("response blocked for safety: {reason}")]
    SafetyBlocked { reason: String },

    /// The community pool advertised no models at all.
    #[error("no models available")]
    NoModels,

    /// Every candidate model failed or answered with empty text.
    #[error("all {attempts} candidate models failed")]
    Exhausted { attempts: usize },

    /// The request could not be built or was rejected by the backend.
    #[error("invalid backend request: {0}")]
    Request(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Malformed(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

impl From<OpenAIError> for BackendError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::Reqwest(e) => BackendError::Transport(e.to_string()),
            e @ OpenAIError::JSONDeserialize(..) => BackendError::Malformed(e.to_string()),
            other => BackendError::Request(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Malformed(err.to_string())
    }
}
