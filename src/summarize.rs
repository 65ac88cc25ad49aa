//! History summarization.
//!
//! Two jobs share the same transcript rendering: folding a subject's pending
//! messages into a profile (structured extraction), and condensing a run of
//! channel messages into a short free-text summary.

use crate::llm::LlmClient;
use crate::models::ChatMessage;
use crate::store::MemoryStore;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{error, info, warn};

/// Structured data about the user's personality, summary, and facts.
#[derive(Debug, Deserialize, JsonSchema)]
struct UserExtraction {
    /// A few words describing the user's personality.
    personality: String,
    /// A concise summary of their interactions so far.
    summary: String,
    /// List of important facts the user has explicitly mentioned.
    #[serde(default)]
    facts: Vec<String>,
}

/// Structured data about the character's facts.
#[derive(Debug, Deserialize, JsonSchema)]
struct CharacterExtraction {
    /// List of important facts the character has explicitly mentioned.
    #[serde(default)]
    facts: Vec<String>,
}

/// Whose messages are being summarized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject<'a> {
    User,
    Character(&'a str),
}

/// Long-term memory for one subject, before or after summarization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Digest {
    pub personality: Option<String>,
    pub summary: String,
    pub facts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summarized {
    pub digest: Digest,
    /// False when the existing digest came back unchanged (nothing to do, or
    /// the backend failed).
    pub fresh: bool,
}

impl Summarized {
    fn unchanged(existing: &Digest) -> Self {
        Self {
            digest: existing.clone(),
            fresh: false,
        }
    }
}

/// `"{speaker}: {text}"` per message, one per line.
pub fn render_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.speaker(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone)]
pub struct HistorySummarizer {
    llm: LlmClient,
}

impl HistorySummarizer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Folds `messages` into `existing`. The returned facts are candidates
    /// only; merging and bounding them is the caller's job.
    pub async fn summarize(
        &self,
        subject: Subject<'_>,
        existing: &Digest,
        messages: &[ChatMessage],
    ) -> Summarized {
        if messages.is_empty() {
            return Summarized::unchanged(existing);
        }

        let transcript = render_transcript(messages);
        let result = match subject {
            Subject::User => self
                .llm
                .extract::<UserExtraction>(&user_prompt(existing, &transcript))
                .await
                .map(|e| Digest {
                    personality: Some(e.personality),
                    summary: e.summary,
                    facts: e.facts,
                }),
            Subject::Character(name) => self
                .llm
                .extract::<CharacterExtraction>(&character_prompt(name, existing, &transcript))
                .await
                .map(|e| Digest {
                    personality: existing.personality.clone(),
                    summary: existing.summary.clone(),
                    facts: e.facts,
                }),
        };

        match result {
            Ok(digest) => Summarized {
                digest,
                fresh: true,
            },
            Err(e) => {
                error!("Error summarizing {:?} history: {}", subject, e);
                Summarized::unchanged(existing)
            }
        }
    }

    /// Short free-text summary of a run of messages. `None` when there is
    /// nothing to summarize or the backend failed.
    pub async fn condense(&self, messages: &[ChatMessage]) -> Option<String> {
        if messages.is_empty() {
            return None;
        }

        let prompt = format!(
            "Summarize the following conversation briefly while keeping key details and user personalities:\n\n{}",
            render_transcript(messages)
        );
        match self.llm.completion(&prompt).await {
            Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            Ok(_) => {
                warn!("Summarizer: backend returned an empty summary");
                None
            }
            Err(e) => {
                error!("Error summarizing conversation: {}", e);
                None
            }
        }
    }

    /// Replaces everything but the newest `threshold / 2` channel messages
    /// with a single summary message once the history reaches `threshold`.
    ///
    /// Returns whether the history was compacted. On backend failure the
    /// history is left as it was.
    pub async fn compact_channel(&self, store: &MemoryStore, channel_id: &str, threshold: usize) -> bool {
        let history = store.channels.get(channel_id).await;
        if threshold == 0 || history.len() < threshold {
            return false;
        }

        let keep = threshold / 2;
        let prefix = &history.messages[..history.len() - keep];
        let Some(summary) = self.condense(prefix).await else {
            warn!("Channel {}: summarization failed, history left untrimmed", channel_id);
            return false;
        };

        let compacted = prefix.len();
        let replaced = store
            .channels
            .update(channel_id, |current| {
                // Messages appended meanwhile sit after the summarized prefix.
                if current.messages.len() < compacted || current.messages[..compacted] != *prefix {
                    return false;
                }
                let mut summary_message = ChatMessage::assistant(format!("Summary: {}", summary));
                summary_message.timestamp = current.messages[compacted - 1].timestamp;
                current.messages.drain(..compacted);
                current.messages.insert(0, summary_message);
                true
            })
            .await;

        if replaced {
            info!("Channel {}: compacted {} messages into a summary", channel_id, compacted);
        } else {
            warn!("Channel {}: history changed during summarization, skipped", channel_id);
        }
        replaced
    }
}

fn user_prompt(existing: &Digest, transcript: &str) -> String {
    format!(
        "Analyze the following conversation and extract structured information about the user.\n\
         Identify their personality traits, summarize their interactions, and extract key facts they have explicitly mentioned.\n\n\
         Existing User Profile:\n\
         - Personality: {}\n\
         - Summary: {}\n\
         - Important Facts: {}\n\n\
         Messages:\n{}\n\n\
         Update the user profile with a refined personality description, a concise summary of recent interactions, \
         and any new important facts mentioned.",
        existing.personality.as_deref().unwrap_or("unknown"),
        existing.summary,
        existing.facts.join(", "),
        transcript
    )
}

fn character_prompt(name: &str, existing: &Digest, transcript: &str) -> String {
    format!(
        "Analyze the following messages written by {name} and extract facts {name} has explicitly stated about themself.\n\n\
         Known facts about {name}: {}\n\n\
         Messages:\n{}\n\n\
         Return only facts that are new or still true.",
        existing.facts.join(", "),
        transcript
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::llm::testing::{FakeBackend, InterleavingBackend};
    use crate::llm::BackendError;
    use crate::models::{Author, Role};
    use std::sync::Arc;

    fn alice() -> Author {
        Author {
            id: "u1".to_string(),
            username: "alice".to_string(),
            display_name: "Alice".to_string(),
        }
    }

    fn summarizer() -> (Arc<FakeBackend>, HistorySummarizer) {
        let backend = Arc::new(FakeBackend::new());
        let llm = LlmClient::with_backend(backend.clone());
        (backend, HistorySummarizer::new(llm))
    }

    fn existing() -> Digest {
        Digest {
            personality: Some("curious".to_string()),
            summary: "asks about tea".to_string(),
            facts: vec!["likes tea".to_string()],
        }
    }

    #[tokio::test]
    async fn test_empty_messages_never_call_backend() {
        let (backend, summarizer) = summarizer();
        let result = summarizer.summarize(Subject::User, &existing(), &[]).await;
        assert_eq!(result.digest, existing());
        assert!(!result.fresh);
        assert_eq!(summarizer.condense(&[]).await, None);
        assert_eq!(backend.prompt_count(), 0);
    }

    #[tokio::test]
    async fn test_user_extraction() {
        let (backend, summarizer) = summarizer();
        backend.push_completion(Ok(
            r#"{"personality":"cheerful","summary":"plays piano","facts":["plays piano"]}"#.to_string(),
        ));
        let messages = vec![
            ChatMessage::user(alice(), "I play piano"),
            ChatMessage::assistant("nice!"),
        ];

        let result = summarizer.summarize(Subject::User, &existing(), &messages).await;
        assert!(result.fresh);
        assert_eq!(result.digest.personality.as_deref(), Some("cheerful"));
        assert_eq!(result.digest.summary, "plays piano");
        assert_eq!(result.digest.facts, vec!["plays piano"]);

        let prompt = backend.last_prompt().unwrap();
        assert!(prompt.contains("Alice: I play piano\nassistant: nice!"));
        assert!(prompt.contains("- Important Facts: likes tea"));
    }

    #[tokio::test]
    async fn test_backend_failure_returns_existing() {
        let (backend, summarizer) = summarizer();
        backend.push_completion(Err(BackendError::Transport("timeout".into())));
        backend.push_completion(Ok("not json at all".to_string()));
        let messages = vec![ChatMessage::user(alice(), "hello")];

        let failed = summarizer.summarize(Subject::User, &existing(), &messages).await;
        assert_eq!(failed.digest, existing());
        assert!(!failed.fresh);

        let malformed = summarizer.summarize(Subject::User, &existing(), &messages).await;
        assert_eq!(malformed.digest, existing());
        assert!(!malformed.fresh);
    }

    #[tokio::test]
    async fn test_character_extraction_keeps_summary() {
        let (backend, summarizer) = summarizer();
        backend.push_completion(Ok(r#"{"facts":["keeps a cat"]}"#.to_string()));
        let messages = vec![ChatMessage::assistant("My cat is asleep on the altar again.")];

        let result = summarizer
            .summarize(Subject::Character("Kotori"), &existing(), &messages)
            .await;
        assert!(result.fresh);
        assert_eq!(result.digest.facts, vec!["keeps a cat"]);
        assert_eq!(result.digest.summary, "asks about tea");
        assert!(backend.last_prompt().unwrap().contains("written by Kotori"));
    }

    #[tokio::test]
    async fn test_compact_channel() {
        let (backend, summarizer) = summarizer();
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        let store = MemoryStore::new(db);

        let messages: Vec<_> = (0..6)
            .map(|i| ChatMessage::user(alice(), format!("m{}", i)))
            .collect();
        store.append_channel_messages("c1", messages).await;

        // Below threshold: untouched, no backend call.
        assert!(!summarizer.compact_channel(&store, "c1", 8).await);
        assert_eq!(backend.prompt_count(), 0);

        backend.push_completion(Ok("they counted to three".to_string()));
        assert!(summarizer.compact_channel(&store, "c1", 6).await);

        let history = store.channels.get("c1").await;
        let contents: Vec<_> = history.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Summary: they counted to three", "m3", "m4", "m5"]);
        assert_eq!(history.messages[0].role, Role::Assistant);
        assert!(history.messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(backend.last_prompt().unwrap().contains("Alice: m0\nAlice: m1\nAlice: m2"));
    }

    #[tokio::test]
    async fn test_compact_channel_failure_keeps_history() {
        let (backend, summarizer) = summarizer();
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        let store = MemoryStore::new(db);
        let messages: Vec<_> = (0..4)
            .map(|i| ChatMessage::user(alice(), format!("m{}", i)))
            .collect();
        store.append_channel_messages("c1", messages).await;

        backend.push_completion(Err(BackendError::Transport("down".into())));
        assert!(!summarizer.compact_channel(&store, "c1", 4).await);
        assert_eq!(store.channels.get("c1").await.len(), 4);
    }

    fn counted(n: usize) -> Vec<ChatMessage> {
        (0..n).map(|i| ChatMessage::user(alice(), format!("m{}", i))).collect()
    }

    #[tokio::test]
    async fn test_compact_skips_history_replaced_meanwhile() {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        let store = Arc::new(MemoryStore::new(db));
        store.append_channel_messages("c1", counted(4)).await;

        let during_store = store.clone();
        let backend = Arc::new(InterleavingBackend::new(move || {
            let store = during_store.clone();
            async move {
                store.clear_history("c1").await;
                store
                    .append_channel_messages("c1", vec![ChatMessage::user(alice(), "fresh start")])
                    .await;
            }
        }));
        backend.inner.push_completion(Ok("they counted".to_string()));
        let summarizer = HistorySummarizer::new(LlmClient::with_backend(backend.clone()));

        assert!(!summarizer.compact_channel(&store, "c1", 4).await);
        let history = store.channels.get("c1").await;
        let contents: Vec<_> = history.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["fresh start"]);
    }

    #[tokio::test]
    async fn test_compact_keeps_messages_appended_meanwhile() {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        let store = Arc::new(MemoryStore::new(db));
        store.append_channel_messages("c1", counted(4)).await;

        let during_store = store.clone();
        let backend = Arc::new(InterleavingBackend::new(move || {
            let store = during_store.clone();
            async move {
                store
                    .append_channel_messages("c1", vec![ChatMessage::user(alice(), "late")])
                    .await;
            }
        }));
        backend.inner.push_completion(Ok("they counted".to_string()));
        let summarizer = HistorySummarizer::new(LlmClient::with_backend(backend.clone()));

        assert!(summarizer.compact_channel(&store, "c1", 4).await);
        let history = store.channels.get("c1").await;
        let contents: Vec<_> = history.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Summary: they counted", "m2", "m3", "late"]);
    }
}
