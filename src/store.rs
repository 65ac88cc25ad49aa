//! Memory store: in-process maps of histories and profiles backed by the
//! `memory` table.
//!
//! Each key gets its own async mutex, so every mutation of one channel, user or
//! character is serialized with its write-back. Values are loaded lazily on
//! first access; a missing or unparsable row is treated as the default value.
//! Idle keys are evicted least recently used first once the cache is full;
//! their rows stay in the database and are reloaded on next access.

use crate::db::Database;
use crate::models::{ChannelHistory, CharacterProfile, ChatMessage, UserProfile};
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// A loaded value and the epoch it belongs to. The epoch changes whenever the
/// key is cleared or its slot is recreated after eviction.
struct Slot<T> {
    value: Option<T>,
    epoch: u64,
}

type SharedSlot<T> = Arc<tokio::sync::Mutex<Slot<T>>>;

/// One persisted map, e.g. all channel histories.
pub struct KeyedStore<T> {
    namespace: &'static str,
    db: Database,
    capacity: NonZeroUsize,
    next_epoch: AtomicU64,
    slots: Mutex<LruCache<String, SharedSlot<T>>>,
}

impl<T> KeyedStore<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + 'static,
{
    pub fn new(namespace: &'static str, db: Database) -> Self {
        Self::with_capacity(namespace, db, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(namespace: &'static str, db: Database, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            namespace,
            db,
            capacity,
            next_epoch: AtomicU64::new(0),
            slots: Mutex::new(LruCache::unbounded()),
        }
    }

    fn fresh_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    fn slot(&self, key: &str) -> SharedSlot<T> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(slot) = slots.get(key) {
            return slot.clone();
        }

        let slot = Arc::new(tokio::sync::Mutex::new(Slot {
            value: None,
            epoch: self.fresh_epoch(),
        }));
        slots.put(key.to_string(), slot.clone());

        // Only slots nobody holds can go; a busy key must keep its mutex.
        while slots.len() > self.capacity.get() {
            let idle = slots
                .iter()
                .rev()
                .find(|(_, slot)| Arc::strong_count(slot) == 1)
                .map(|(key, _)| key.clone());
            match idle {
                Some(idle) => {
                    slots.pop(&idle);
                }
                None => break,
            }
        }
        slot
    }

    /// Number of keys currently held in memory.
    pub fn cached(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    async fn load(&self, key: &str) -> T {
        let namespace = self.namespace;
        let owned_key = key.to_string();
        let raw = self
            .db
            .run_blocking(move |db| db.load_memory(namespace, &owned_key))
            .await;

        match raw {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Store: unparsable {} entry for {}: {}", namespace, key, e);
                T::default()
            }),
            Ok(None) => T::default(),
            Err(e) => {
                error!("Store: failed to load {} entry for {}: {}", namespace, key, e);
                T::default()
            }
        }
    }

    async fn persist(&self, key: &str, value: &T) {
        let namespace = self.namespace;
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                error!("Store: failed to serialize {} entry for {}: {}", namespace, key, e);
                return;
            }
        };
        let owned_key = key.to_string();
        if let Err(e) = self
            .db
            .run_blocking(move |db| db.save_memory(namespace, &owned_key, &serialized))
            .await
        {
            error!("Store: failed to save {} entry for {}: {}", namespace, key, e);
        }
    }

    /// Current value for `key`, or the default if nothing is stored.
    pub async fn get(&self, key: &str) -> T {
        self.snapshot(key).await.0
    }

    /// Current value together with its epoch, for a later [`Self::update_if`].
    pub async fn snapshot(&self, key: &str) -> (T, u64) {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        if guard.value.is_none() {
            guard.value = Some(self.load(key).await);
        }
        (guard.value.clone().unwrap_or_default(), guard.epoch)
    }

    /// Applies `f` and writes the result back before releasing the key.
    pub async fn update<R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> R {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        self.apply(key, &mut guard, f).await
    }

    /// Like [`Self::update`], but does nothing and returns `None` if the key
    /// was cleared or reloaded since `epoch` was taken.
    pub async fn update_if<R>(&self, key: &str, epoch: u64, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        if guard.epoch != epoch {
            debug!("Store: stale {} update for {} dropped", self.namespace, key);
            return None;
        }
        Some(self.apply(key, &mut guard, f).await)
    }

    async fn apply<R>(&self, key: &str, slot: &mut Slot<T>, f: impl FnOnce(&mut T) -> R) -> R {
        if slot.value.is_none() {
            slot.value = Some(self.load(key).await);
        }
        let value = slot.value.get_or_insert_with(T::default);
        let result = f(value);
        self.persist(key, value).await;
        result
    }

    pub async fn save(&self, key: &str, value: T) {
        self.update(key, |current| *current = value).await
    }

    /// Drops the in-memory copy and the stored row.
    pub async fn clear(&self, key: &str) -> bool {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        guard.value = Some(T::default());
        guard.epoch = self.fresh_epoch();

        let namespace = self.namespace;
        let owned_key = key.to_string();
        match self
            .db
            .run_blocking(move |db| db.delete_memory(namespace, &owned_key))
            .await
        {
            Ok(count) => {
                debug!("Store: cleared {} entry for {}", namespace, key);
                count > 0
            }
            Err(e) => {
                error!("Store: failed to clear {} entry for {}: {}", namespace, key, e);
                false
            }
        }
    }
}

/// Everything the bot remembers between messages.
pub struct MemoryStore {
    pub channels: KeyedStore<ChannelHistory>,
    pub user_histories: KeyedStore<ChannelHistory>,
    pub profiles: KeyedStore<UserProfile>,
    pub characters: KeyedStore<CharacterProfile>,
}

impl MemoryStore {
    pub fn new(db: Database) -> Self {
        Self::with_capacity(db, DEFAULT_CACHE_CAPACITY)
    }

    /// `capacity` bounds each of the four maps separately.
    pub fn with_capacity(db: Database, capacity: usize) -> Self {
        Self {
            channels: KeyedStore::with_capacity("channel_history", db.clone(), capacity),
            user_histories: KeyedStore::with_capacity("user_history", db.clone(), capacity),
            profiles: KeyedStore::with_capacity("user_profile", db.clone(), capacity),
            characters: KeyedStore::with_capacity("character_profile", db, capacity),
        }
    }

    pub async fn append_channel_messages(&self, channel_id: &str, messages: Vec<ChatMessage>) {
        self.channels
            .update(channel_id, |history| {
                for message in messages {
                    history.push(message);
                }
            })
            .await
    }

    pub async fn append_user_message(&self, user_id: &str, message: ChatMessage) {
        self.user_histories
            .update(user_id, |history| history.push(message))
            .await
    }

    pub async fn append_character_message(&self, name: &str, message: ChatMessage) {
        self.characters
            .update(name, |profile| profile.messages.push(message))
            .await
    }

    pub async fn profile(&self, user_id: &str) -> UserProfile {
        self.profiles.get(user_id).await
    }

    pub async fn clear_profile(&self, user_id: &str) -> bool {
        self.profiles.clear(user_id).await
    }

    /// Clears a user's pending history or a channel's history, whichever the
    /// id names.
    pub async fn clear_history(&self, id: &str) -> bool {
        let user = self.user_histories.clear(id).await;
        let channel = self.channels.clear(id).await;
        user || channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Author;

    fn test_store() -> (Database, MemoryStore) {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        (db.clone(), MemoryStore::new(db))
    }

    fn alice() -> Author {
        Author {
            id: "u1".to_string(),
            username: "alice".to_string(),
            display_name: "Alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_entries_default() {
        let (_db, store) = test_store();
        let profile = store.profile("nobody").await;
        assert_eq!(profile, UserProfile::default());
        assert!(store.channels.get("c1").await.is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_entry_is_empty() {
        let (db, store) = test_store();
        db.save_memory("user_profile", "u1", "not json").unwrap();
        assert_eq!(store.profile("u1").await, UserProfile::default());
    }

    #[tokio::test]
    async fn test_updates_persist_across_instances() {
        let (db, store) = test_store();
        store
            .append_channel_messages("c1", vec![ChatMessage::user(alice(), "hello")])
            .await;
        store
            .profiles
            .update("u1", |p| p.facts.push("likes tea".to_string()))
            .await;

        let reopened = MemoryStore::new(db);
        let history = reopened.channels.get("c1").await;
        assert_eq!(history.messages[0].content, "hello");
        assert_eq!(reopened.profile("u1").await.facts, vec!["likes tea"]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_serialized() {
        let (_db, store) = test_store();
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_user_message("u1", ChatMessage::user(alice(), format!("m{}", i)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.user_histories.get("u1").await.len(), 20);
    }

    #[tokio::test]
    async fn test_clear_hooks() {
        let (db, store) = test_store();
        store.profiles.save("u1", UserProfile {
            personality: "cheerful".to_string(),
            summary: "talks about tea".to_string(),
            facts: vec!["likes tea".to_string()],
        }).await;
        store.append_user_message("u1", ChatMessage::user(alice(), "hi")).await;

        assert!(store.clear_profile("u1").await);
        assert!(store.clear_history("u1").await);
        assert_eq!(store.profile("u1").await, UserProfile::default());
        assert!(store.user_histories.get("u1").await.is_empty());
        assert_eq!(db.load_memory("user_profile", "u1").unwrap(), None);

        assert!(!store.clear_profile("u1").await);
    }

    #[tokio::test]
    async fn test_clear_invalidates_snapshot() {
        let (_db, store) = test_store();
        store.profiles.update("u1", |p| p.summary = "before".to_string()).await;

        let (_, epoch) = store.profiles.snapshot("u1").await;
        assert_eq!(
            store.profiles.update_if("u1", epoch, |p| p.summary = "current".to_string()).await,
            Some(())
        );

        store.clear_profile("u1").await;
        let stale = store
            .profiles
            .update_if("u1", epoch, |p| p.summary = "stale".to_string())
            .await;
        assert_eq!(stale, None);
        assert_eq!(store.profile("u1").await, UserProfile::default());
    }

    #[tokio::test]
    async fn test_idle_keys_are_evicted() {
        let (db, _) = test_store();
        let store = MemoryStore::with_capacity(db, 2);
        for i in 0..5 {
            store
                .append_user_message(&format!("u{}", i), ChatMessage::user(alice(), "hi"))
                .await;
        }
        assert_eq!(store.user_histories.cached(), 2);

        // Evicted keys reload from the database.
        assert_eq!(store.user_histories.get("u0").await.len(), 1);
        assert_eq!(store.user_histories.cached(), 2);
    }

    #[tokio::test]
    async fn test_busy_keys_are_not_evicted() {
        let (db, _) = test_store();
        let store = MemoryStore::with_capacity(db, 1);
        let busy = store.user_histories.slot("busy");
        let _guard = busy.lock().await;

        store.append_user_message("u1", ChatMessage::user(alice(), "hi")).await;
        store.append_user_message("u2", ChatMessage::user(alice(), "hi")).await;
        // "u1" went; "busy" is held and "u2" was just inserted.
        assert_eq!(store.user_histories.cached(), 2);
        assert!(Arc::ptr_eq(&busy, &store.user_histories.slot("busy")));
    }
}
