use crate::character::Character;
use crate::context::{ContextAssembler, IncomingMessage};
use crate::llm::LlmClient;
use crate::models::{ChatMessage, Reply};
use crate::services::profile::ProfileUpdater;
use crate::store::MemoryStore;
use crate::summarize::HistorySummarizer;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct Response {
    pub reply: Reply,
    /// Profile updates started by this reply. Dropping them detaches them.
    pub profile_tasks: Vec<JoinHandle<bool>>,
}

/// Context assembly, the backend call and the memory writes for one reply.
pub struct Responder {
    store: Arc<MemoryStore>,
    summarizer: HistorySummarizer,
    assembler: ContextAssembler,
    llm: LlmClient,
    updater: Arc<ProfileUpdater>,
    channel_history_threshold: usize,
}

impl Responder {
    pub fn new(
        store: Arc<MemoryStore>,
        summarizer: HistorySummarizer,
        assembler: ContextAssembler,
        llm: LlmClient,
        updater: Arc<ProfileUpdater>,
        channel_history_threshold: usize,
    ) -> Self {
        Self {
            store,
            summarizer,
            assembler,
            llm,
            updater,
            channel_history_threshold,
        }
    }

    pub async fn generate_response(&self, incoming: &IncomingMessage, character: &Character) -> Response {
        self.summarizer
            .compact_channel(&self.store, &incoming.channel_id, self.channel_history_threshold)
            .await;

        let conversation = self.assembler.build(incoming, character).await;
        let reply = self.llm.generate(&conversation).await;
        if !reply.is_complete() {
            debug!("Responder: {:?} reply, memory left untouched", reply.status);
            return Response {
                reply,
                profile_tasks: Vec::new(),
            };
        }

        let text = character.strip_name_prefix(&reply.text).to_string();
        let user_message = incoming.to_chat_message();
        let model_message = ChatMessage::assistant(text.clone());

        self.store
            .append_channel_messages(
                &incoming.channel_id,
                vec![user_message.clone(), model_message.clone()],
            )
            .await;
        self.store
            .append_user_message(&incoming.author.id, user_message)
            .await;
        self.store
            .append_character_message(&character.name, model_message)
            .await;

        let profile_tasks = [
            self.updater.on_user_message(&incoming.author.id),
            self.updater.on_character_message(&character.name),
        ]
        .into_iter()
        .flatten()
        .collect();

        info!(
            "Responder: replied in {} ({} chars, {} images)",
            incoming.channel_id,
            text.len(),
            reply.images.len()
        );
        Response {
            reply: Reply { text, ..reply },
            profile_tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::db::Database;
    use crate::llm::testing::FakeBackend;
    use crate::llm::{BackendError, BackendOutput, TurnRole};
    use crate::models::{Author, ReplyStatus, Role};

    struct Fixture {
        backend: Arc<FakeBackend>,
        store: Arc<MemoryStore>,
        responder: Responder,
    }

    fn fixture(threshold: usize) -> Fixture {
        let backend = Arc::new(FakeBackend::new());
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        let store = Arc::new(MemoryStore::new(db.clone()));
        let llm = LlmClient::with_backend(backend.clone());
        let summarizer = HistorySummarizer::new(llm.clone());
        let memory = MemoryConfig {
            advisory_summary_window: 0,
            profile_summary_threshold: threshold,
            ..MemoryConfig::default()
        };
        let assembler = ContextAssembler::new(store.clone(), db, summarizer.clone(), memory.clone());
        let updater = Arc::new(ProfileUpdater::new(
            store.clone(),
            summarizer.clone(),
            memory.profile_summary_threshold,
            memory.max_facts,
        ));
        let responder = Responder::new(
            store.clone(),
            summarizer,
            assembler,
            llm,
            updater,
            memory.channel_history_threshold,
        );
        Fixture {
            backend,
            store,
            responder,
        }
    }

    fn kotori() -> Character {
        Character {
            name: "Kotori".to_string(),
            aliases: vec![],
            description: "a sleepy shrine maiden".to_string(),
            personality: "dry".to_string(),
            lore: String::new(),
            facts: vec![],
        }
    }

    fn incoming(content: &str) -> IncomingMessage {
        IncomingMessage {
            author: Author {
                id: "u1".to_string(),
                username: "alice".to_string(),
                display_name: "Alice".to_string(),
            },
            channel_id: "c1".to_string(),
            content: content.to_string(),
            images: vec![],
            activities: vec![],
        }
    }

    #[tokio::test]
    async fn test_successful_reply_updates_memory() {
        let fx = fixture(4);
        fx.backend.push_reply(Ok(BackendOutput {
            text: "Kotori: hi Alice".to_string(),
            images: vec![vec![1]],
        }));

        let response = fx.responder.generate_response(&incoming("hello"), &kotori()).await;
        assert_eq!(response.reply.text, "hi Alice");
        assert_eq!(response.reply.images, vec![vec![1]]);
        assert!(response.profile_tasks.is_empty());

        let channel = fx.store.channels.get("c1").await;
        assert_eq!(channel.len(), 2);
        assert_eq!(channel.messages[0].content, "hello");
        assert_eq!(channel.messages[1].role, Role::Assistant);
        assert_eq!(channel.messages[1].content, "hi Alice");
        assert_eq!(fx.store.user_histories.get("u1").await.len(), 1);
        assert_eq!(fx.store.characters.get("Kotori").await.messages.len(), 1);

        // The second message sees the first exchange as history.
        fx.backend.push_reply(Ok(BackendOutput::text("still here")));
        fx.responder.generate_response(&incoming("again"), &kotori()).await;
        let sent = fx.backend.sent.lock().unwrap();
        let turns = &sent[1].turns;
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].role, TurnRole::System);
        assert_eq!(turns[2].text(), "hi Alice");
        assert_eq!(turns[3].text(), "Alice (alice): again");
    }

    #[tokio::test]
    async fn test_failed_reply_leaves_memory_alone() {
        let fx = fixture(1);
        fx.backend
            .push_reply(Err(BackendError::Transport("timeout".into())));

        let response = fx.responder.generate_response(&incoming("hello"), &kotori()).await;
        assert_eq!(response.reply.status, ReplyStatus::Failed);
        assert!(response.profile_tasks.is_empty());
        assert!(fx.store.channels.get("c1").await.is_empty());
        assert!(fx.store.user_histories.get("u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_spawns_profile_updates() {
        let fx = fixture(1);
        fx.backend.push_reply(Ok(BackendOutput::text("hello!")));
        // Both updates run concurrently, so either may take either answer.
        let extraction = r#"{"personality":"warm","summary":"said hello","facts":["greets people"]}"#;
        fx.backend
            .push_completion(Ok(extraction.to_string()))
            .push_completion(Ok(extraction.to_string()));

        let response = fx.responder.generate_response(&incoming("hello"), &kotori()).await;
        assert_eq!(response.profile_tasks.len(), 2);
        for task in response.profile_tasks {
            task.await.unwrap();
        }

        assert_eq!(fx.store.profile("u1").await.summary, "said hello");
        assert_eq!(fx.store.profile("u1").await.facts, vec!["greets people"]);
        assert_eq!(fx.store.characters.get("Kotori").await.facts, vec!["greets people"]);
    }
}
