use crate::db::{Database, LogEntry};
use tracing::error;

/// Writes observed messages to the relational log. Failures are logged and
/// never reach the reply path.
#[derive(Clone)]
pub struct ChatLogger {
    db: Database,
}

impl ChatLogger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn log(&self, entry: LogEntry) -> bool {
        let message_id = entry.message_id.clone();
        match self.db.run_blocking(move |db| db.log_message(&entry)).await {
            Ok(()) => true,
            Err(e) => {
                error!("Error logging message {}: {}", message_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ChannelInfo;
    use crate::models::{Author, ImageData, Role};
    use chrono::Utc;

    fn entry(id: &str) -> LogEntry {
        LogEntry {
            message_id: id.to_string(),
            author: Author {
                id: "u1".to_string(),
                username: "alice".to_string(),
                display_name: "Alice".to_string(),
            },
            role: Role::User,
            channel: ChannelInfo {
                id: "dm-1".to_string(),
                name: "DM".to_string(),
                is_dm: true,
                server: None,
            },
            content: "hello".to_string(),
            timestamp: Utc::now(),
            attachments: vec![ImageData {
                mime_type: "image/png".to_string(),
                data: "AAAA".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_log_message() {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        let logger = ChatLogger::new(db.clone());

        assert!(logger.log(entry("m1")).await);
        assert!(logger.log(entry("m1")).await);

        let logged = db.channel_messages("dm-1", 10, 0).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].image.as_ref().unwrap().data, "AAAA");
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        // No schema: every insert fails.
        let db = Database::new(":memory:").unwrap();
        let logger = ChatLogger::new(db);
        assert!(!logger.log(entry("m1")).await);
    }
}
