use crate::models::{Author, ChatMessage, ImageData, Role};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

mod schema;

/// Channel details recorded alongside each logged message.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub is_dm: bool,
    /// `(server_id, server_name)` for guild channels.
    pub server: Option<(String, String)>,
}

/// One message to append to the relational chat log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub message_id: String,
    pub author: Author,
    pub role: Role,
    pub channel: ChannelInfo,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachments: Vec<ImageData>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedMessage {
    pub discord_id: String,
    pub author: Author,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
    pub image: Option<ImageData>,
}

impl LoggedMessage {
    pub fn into_chat_message(self) -> ChatMessage {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        ChatMessage {
            author: self.author,
            role: self.role,
            content: self.content,
            timestamp,
            image: self.image,
        }
    }
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let conn = self.conn();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(schema::SCHEMA)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Runs `f` on the blocking pool so SQLite work never stalls the runtime.
    pub async fn run_blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    // --- Key-value memory ---

    pub fn load_memory(&self, namespace: &str, key: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM memory WHERE namespace = ?1 AND key = ?2",
                (namespace, key),
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn save_memory(&self, namespace: &str, key: &str, value: &str) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO memory (namespace, key, value, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
             ON CONFLICT(namespace, key) DO UPDATE SET value = ?3, updated_at = CURRENT_TIMESTAMP",
            (namespace, key, value),
        )?;
        Ok(())
    }

    pub fn delete_memory(&self, namespace: &str, key: &str) -> anyhow::Result<usize> {
        let conn = self.conn();
        let count = conn.execute(
            "DELETE FROM memory WHERE namespace = ?1 AND key = ?2",
            (namespace, key),
        )?;
        Ok(count)
    }

    // --- Chat log ---

    /// Records the author, channel and message in one transaction. Re-logging
    /// the same Discord message id is a no-op for the message row.
    pub fn log_message(&self, entry: &LogEntry) -> anyhow::Result<()> {
        debug!(
            "Database: Logging message {} from user {} in channel {}",
            entry.message_id, entry.author.id, entry.channel.id
        );
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO users (id, username, display_name) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET username = ?2, display_name = ?3",
            (&entry.author.id, &entry.author.username, &entry.author.display_name),
        )?;

        if let Some((server_id, server_name)) = &entry.channel.server {
            tx.execute(
                "INSERT INTO servers (id, name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET name = ?2",
                (server_id, server_name),
            )?;
        }

        tx.execute(
            "INSERT INTO channels (id, name, is_dm, server_id) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = ?2",
            (
                &entry.channel.id,
                &entry.channel.name,
                entry.channel.is_dm,
                entry.channel.server.as_ref().map(|(id, _)| id.as_str()),
            ),
        )?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO messages (discord_id, user_id, channel_id, role, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                &entry.message_id,
                &entry.author.id,
                &entry.channel.id,
                entry.role.as_str(),
                &entry.content,
                entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        )?;

        if inserted > 0 {
            for attachment in &entry.attachments {
                tx.execute(
                    "INSERT INTO message_attachments (message_id, mime_type, data) VALUES (?1, ?2, ?3)",
                    (&entry.message_id, &attachment.mime_type, &attachment.data),
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Messages for a channel in chronological order, skipping the newest
    /// `offset` rows. Only the first image of each message is returned.
    pub fn channel_messages(
        &self,
        channel_id: &str,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<LoggedMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT m.discord_id, u.id, u.username, u.display_name, m.role, m.content, m.timestamp,
                    a.mime_type, a.data
             FROM messages m
             JOIN users u ON m.user_id = u.id
             LEFT JOIN message_attachments a
                ON a.id = (SELECT MIN(id) FROM message_attachments WHERE message_id = m.discord_id)
             WHERE m.channel_id = ?1
             ORDER BY m.timestamp DESC, m.id DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map((channel_id, limit as i64, offset as i64), |row| {
            let role: String = row.get(4)?;
            let mime_type: Option<String> = row.get(7)?;
            let data: Option<String> = row.get(8)?;
            Ok(LoggedMessage {
                discord_id: row.get(0)?,
                author: Author {
                    id: row.get(1)?,
                    username: row.get(2)?,
                    display_name: row.get(3)?,
                },
                role: parse_role(&role),
                content: row.get(5)?,
                timestamp: row.get(6)?,
                image: mime_type
                    .zip(data)
                    .map(|(mime_type, data)| ImageData { mime_type, data }),
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        results.reverse();

        debug!(
            "Database: Channel {} returned {} logged messages",
            channel_id,
            results.len()
        );
        Ok(results)
    }
}

fn parse_role(role: &str) -> Role {
    match role {
        "assistant" | "model" => Role::Assistant,
        _ => Role::User,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_db() -> Database {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        db
    }

    fn entry(id: &str, channel: &str, content: &str, minutes_ago: i64) -> LogEntry {
        LogEntry {
            message_id: id.to_string(),
            author: Author {
                id: "u1".to_string(),
                username: "alice".to_string(),
                display_name: "Alice".to_string(),
            },
            role: Role::User,
            channel: ChannelInfo {
                id: channel.to_string(),
                name: "general".to_string(),
                is_dm: false,
                server: Some(("g1".to_string(), "Guild".to_string())),
            },
            content: content.to_string(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_memory_kv() {
        let db = test_db();
        assert_eq!(db.load_memory("profile", "u1").unwrap(), None);

        db.save_memory("profile", "u1", "{\"a\":1}").unwrap();
        db.save_memory("profile", "u1", "{\"a\":2}").unwrap();
        assert_eq!(
            db.load_memory("profile", "u1").unwrap().as_deref(),
            Some("{\"a\":2}")
        );
        // Namespaces are independent
        assert_eq!(db.load_memory("channel", "u1").unwrap(), None);

        assert_eq!(db.delete_memory("profile", "u1").unwrap(), 1);
        assert_eq!(db.delete_memory("profile", "u1").unwrap(), 0);
    }

    #[test]
    fn test_log_and_read_channel() {
        let db = test_db();
        db.log_message(&entry("m1", "c1", "oldest", 30)).unwrap();
        db.log_message(&entry("m2", "c1", "middle", 20)).unwrap();
        db.log_message(&entry("m3", "c1", "newest", 10)).unwrap();
        db.log_message(&entry("m4", "c2", "elsewhere", 5)).unwrap();
        // Idempotent on discord id
        db.log_message(&entry("m3", "c1", "newest", 10)).unwrap();

        let all: Vec<_> = db
            .channel_messages("c1", 10, 0)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(all, vec!["oldest", "middle", "newest"]);

        let older: Vec<_> = db
            .channel_messages("c1", 1, 1)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(older, vec!["middle"]);

        assert!(db.channel_messages("missing", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_log_attachments_and_roles() {
        let db = test_db();
        let mut with_image = entry("m1", "c1", "look", 3);
        with_image.attachments = vec![
            ImageData {
                mime_type: "image/png".to_string(),
                data: "AAAA".to_string(),
            },
            ImageData {
                mime_type: "image/jpeg".to_string(),
                data: "BBBB".to_string(),
            },
        ];
        db.log_message(&with_image).unwrap();

        let mut reply = entry("m2", "c1", "nice", 1);
        reply.role = Role::Assistant;
        reply.author = Author::system();
        db.log_message(&reply).unwrap();

        let rows = db.channel_messages("c1", 10, 0).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].image.as_ref().map(|i| i.mime_type.as_str()),
            Some("image/png")
        );
        assert_eq!(rows[1].role, Role::Assistant);
        assert!(rows[1].image.is_none());

        let msg = rows[0].clone().into_chat_message();
        assert_eq!(msg.author.display_name, "Alice");
        assert_eq!(msg.content, "look");
    }

    #[tokio::test]
    async fn test_run_blocking() {
        let db = test_db();
        db.run_blocking(|db| db.save_memory("profile", "u9", "{}"))
            .await
            .unwrap();
        let value = db
            .run_blocking(|db| db.load_memory("profile", "u9"))
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("{}"));
    }
}
