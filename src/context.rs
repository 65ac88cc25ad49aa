//! Conversation context assembly.
//!
//! Builds the exact ordered prompt sent to a backend: persona first, then the
//! channel's recent history oldest-first, then an optional advisory summary of
//! older logged messages, and finally the new message.

use crate::activity::{describe_activities, ActivitySignal};
use crate::character::Character;
use crate::config::MemoryConfig;
use crate::db::{Database, LoggedMessage};
use crate::llm::{Conversation, Turn};
use crate::models::{Author, ChatMessage, ImageData, Role, UserProfile};
use crate::store::MemoryStore;
use crate::summarize::HistorySummarizer;
use std::sync::Arc;
use tracing::{debug, error};

/// A message the bot has been asked to answer.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub author: Author,
    pub channel_id: String,
    /// Text with the bot mention already stripped.
    pub content: String,
    pub images: Vec<ImageData>,
    pub activities: Vec<ActivitySignal>,
}

impl IncomingMessage {
    /// The history entry recorded once the reply succeeds.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::user(self.author.clone(), self.content.clone())
            .with_image(self.images.first().cloned())
    }
}

pub struct ContextAssembler {
    store: Arc<MemoryStore>,
    db: Database,
    summarizer: HistorySummarizer,
    memory: MemoryConfig,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<MemoryStore>,
        db: Database,
        summarizer: HistorySummarizer,
        memory: MemoryConfig,
    ) -> Self {
        Self {
            store,
            db,
            summarizer,
            memory,
        }
    }

    pub async fn build(&self, incoming: &IncomingMessage, character: &Character) -> Conversation {
        let activity = describe_activities(&incoming.activities);
        let advisory = self.advisory_summary(&incoming.channel_id).await;

        let history = self.store.channels.get(&incoming.channel_id).await;
        let recent = history.window(
            self.memory.context_message_limit,
            self.memory.context_message_offset,
        );

        let learned = self.store.characters.get(&character.name).await.facts;
        let profile = self.store.profile(&incoming.author.id).await;

        let mut turns = Vec::with_capacity(recent.len() + 3);
        turns.push(Turn::system(persona(character, &learned, &profile, &activity)));
        turns.extend(recent.iter().map(history_turn));
        if let Some(summary) = advisory {
            turns.push(Turn::system(format!(
                "Summary of earlier conversation in this channel: {}",
                summary
            )));
        }
        turns.push(new_message_turn(incoming));

        debug!(
            "Context: {} turns for channel {} ({} history)",
            turns.len(),
            incoming.channel_id,
            recent.len()
        );
        Conversation { turns }
    }

    /// Summary of the logged messages just older than the raw history window.
    /// Failures only cost the summary.
    async fn advisory_summary(&self, channel_id: &str) -> Option<String> {
        let window = self.memory.advisory_summary_window;
        if window == 0 {
            return None;
        }
        let offset = self.memory.context_message_limit + self.memory.context_message_offset;
        let channel = channel_id.to_string();
        let logged = self
            .db
            .run_blocking(move |db| db.channel_messages(&channel, window, offset))
            .await;

        match logged {
            Ok(rows) => {
                let messages: Vec<ChatMessage> = rows
                    .into_iter()
                    .map(LoggedMessage::into_chat_message)
                    .collect();
                self.summarizer.condense(&messages).await
            }
            Err(e) => {
                error!("Context: failed to read logged messages for {}: {}", channel_id, e);
                None
            }
        }
    }
}

fn persona(character: &Character, learned: &[String], profile: &UserProfile, activity: &str) -> String {
    let mut facts: Vec<&str> = character.facts.iter().map(String::as_str).collect();
    for fact in learned {
        if !facts.contains(&fact.as_str()) {
            facts.push(fact);
        }
    }

    format!(
        "From now on, you are {}, {}. Your personality: {}. Your lore: {}. Facts about yourself: {}\n\
         This user has talked to you before. Here is what you know about them:\n\
         - Personality: {}\n\
         - Summary: {}\n\
         - Facts: {}\n\
         - Discord Activity: {}\n\
         Keep responses short and casual, don't talk about your personal info unless it's relevant. Don't use emojis.\n\
         You can generate both text and images. If the user asks for a drawing, respond with an image.",
        character.name,
        character.description,
        character.personality,
        character.lore,
        facts.join(", "),
        profile.personality,
        profile.summary,
        profile.facts.join(", "),
        activity
    )
}

fn attributed(author: &Author, content: &str) -> String {
    format!("{} ({}): {}", author.display_name, author.username, content)
}

fn history_turn(message: &ChatMessage) -> Turn {
    let turn = match message.role {
        Role::User => Turn::user(attributed(&message.author, &message.content)),
        Role::Assistant => Turn::assistant(message.content.clone()),
    };
    match &message.image {
        Some(image) => turn.with_image(image.clone()),
        None => turn,
    }
}

fn new_message_turn(incoming: &IncomingMessage) -> Turn {
    incoming.images.iter().cloned().fold(
        Turn::user(attributed(&incoming.author, &incoming.content)),
        Turn::with_image,
    )
}
