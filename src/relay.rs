//! Fan-out of observed messages to real-time observers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Flat record of one inbound or outbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRecord {
    pub user_id: String,
    pub channel_id: String,
    pub username: String,
    pub display_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct RelayHub {
    sender: broadcast::Sender<RelayRecord>,
}

impl RelayHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Fire-and-forget; having no observers is not an error.
    pub fn notify(&self, record: RelayRecord) {
        if self.sender.send(record).is_err() {
            trace!("Relay: no observers connected");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayRecord> {
        self.sender.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content: &str) -> RelayRecord {
        RelayRecord {
            user_id: "u1".to_string(),
            channel_id: "c1".to_string(),
            username: "alice".to_string(),
            display_name: "Alice".to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_notify_without_observers() {
        let hub = RelayHub::new(4);
        assert_eq!(hub.observer_count(), 0);
        hub.notify(record("nobody listening"));
    }

    #[tokio::test]
    async fn test_observers_receive_in_order() {
        let hub = RelayHub::new(4);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.notify(record("one"));
        hub.notify(record("two"));

        assert_eq!(first.recv().await.unwrap().content, "one");
        assert_eq!(first.recv().await.unwrap().content, "two");
        assert_eq!(second.recv().await.unwrap().content, "one");
    }

    #[test]
    fn test_record_serializes_flat() {
        let json = serde_json::to_value(record("hi")).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["displayName"], "Alice");
        assert_eq!(json["content"], "hi");
    }
}
