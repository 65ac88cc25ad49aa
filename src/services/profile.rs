//! Profile updating.
//!
//! Every observed message bumps a per-subject counter; when it reaches the
//! threshold the counter resets and the subject's pending messages are folded
//! into its profile in a background task.

use crate::facts::merge_facts;
use crate::models::UserProfile;
use crate::store::MemoryStore;
use crate::summarize::{Digest, HistorySummarizer, Subject};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Messages seen per subject since its last summarization. Process-local.
#[derive(Default)]
pub struct MessageCounter {
    counts: Mutex<HashMap<String, usize>>,
}

impl MessageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> usize {
        let counts = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        counts.get(key).copied().unwrap_or(0)
    }

    /// Counts one message. Returns true, with the count reset to zero, once
    /// `threshold` is reached.
    pub fn tick(&self, key: &str, threshold: usize) -> bool {
        let mut counts = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        if *count >= threshold {
            *count = 0;
            true
        } else {
            false
        }
    }

    pub fn reset(&self, key: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        counts.remove(key);
    }
}

pub struct ProfileUpdater {
    store: Arc<MemoryStore>,
    summarizer: HistorySummarizer,
    counter: MessageCounter,
    threshold: usize,
    max_facts: usize,
}

impl ProfileUpdater {
    pub fn new(
        store: Arc<MemoryStore>,
        summarizer: HistorySummarizer,
        threshold: usize,
        max_facts: usize,
    ) -> Self {
        Self {
            store,
            summarizer,
            counter: MessageCounter::new(),
            threshold,
            max_facts,
        }
    }

    pub fn counter(&self) -> &MessageCounter {
        &self.counter
    }

    /// Counts a user message and, at the threshold, starts resummarizing the
    /// user's profile. The handle is only for callers that need to wait.
    pub fn on_user_message(self: &Arc<Self>, user_id: &str) -> Option<JoinHandle<bool>> {
        if !self.counter.tick(user_id, self.threshold) {
            debug!(
                "Profile: user {} at {}/{} messages",
                user_id,
                self.counter.get(user_id),
                self.threshold
            );
            return None;
        }

        let updater = Arc::clone(self);
        let user_id = user_id.to_string();
        Some(tokio::spawn(async move { updater.summarize_user(&user_id).await }))
    }

    /// Same as [`Self::on_user_message`] for the persona's own replies.
    pub fn on_character_message(self: &Arc<Self>, name: &str) -> Option<JoinHandle<bool>> {
        if !self.counter.tick(&format!("character:{}", name), self.threshold) {
            return None;
        }

        let updater = Arc::clone(self);
        let name = name.to_string();
        Some(tokio::spawn(async move { updater.summarize_character(&name).await }))
    }

    /// Forgets the user's profile and restarts their message count.
    pub async fn forget_user(&self, user_id: &str) -> bool {
        self.counter.reset(user_id);
        self.store.clear_profile(user_id).await
    }

    /// Folds the user's pending messages into their profile. Returns whether
    /// the profile changed.
    ///
    /// The pending messages are trimmed to the newest `threshold / 2` whether
    /// or not the summary succeeds. A profile cleared meanwhile is left alone.
    pub async fn summarize_user(&self, user_id: &str) -> bool {
        let (pending, history_epoch) = self.store.user_histories.snapshot(user_id).await;
        let (profile, profile_epoch) = self.store.profiles.snapshot(user_id).await;
        let existing = Digest {
            personality: Some(profile.personality),
            summary: profile.summary,
            facts: profile.facts,
        };

        let result = self
            .summarizer
            .summarize(Subject::User, &existing, &pending.messages)
            .await;

        let consumed = self.consumed(pending.len());
        self.store
            .user_histories
            .update_if(user_id, history_epoch, |history| {
                let consumed = consumed.min(history.messages.len());
                history.messages.drain(..consumed);
            })
            .await;

        if !result.fresh {
            warn!("Profile: no new summary for user {}, profile unchanged", user_id);
            return false;
        }

        let digest = result.digest;
        let max_facts = self.max_facts;
        let fact_count = self
            .store
            .profiles
            .update_if(user_id, profile_epoch, |profile: &mut UserProfile| {
                if let Some(personality) = digest.personality.filter(|p| !p.trim().is_empty()) {
                    profile.personality = personality;
                }
                profile.summary = digest.summary;
                profile.facts = merge_facts(&profile.facts, &digest.facts, max_facts);
                profile.facts.len()
            })
            .await;

        let Some(fact_count) = fact_count else {
            info!("Profile: user {} was cleared during summarization, result dropped", user_id);
            return false;
        };
        info!(
            "Profile: updated user {} from {} messages ({} facts)",
            user_id,
            pending.len(),
            fact_count
        );
        true
    }

    /// Extracts facts the persona stated about itself from its pending
    /// replies. Pending replies are trimmed the same way as a user's.
    pub async fn summarize_character(&self, name: &str) -> bool {
        let (character, epoch) = self.store.characters.snapshot(name).await;
        let existing = Digest {
            facts: character.facts,
            ..Digest::default()
        };

        let result = self
            .summarizer
            .summarize(Subject::Character(name), &existing, &character.messages)
            .await;

        let fresh = result.fresh;
        let max_facts = self.max_facts;
        let consumed = self.consumed(character.messages.len());
        let updated = self
            .store
            .characters
            .update_if(name, epoch, |profile| {
                if fresh {
                    profile.facts = merge_facts(&profile.facts, &result.digest.facts, max_facts);
                }
                let consumed = consumed.min(profile.messages.len());
                profile.messages.drain(..consumed);
            })
            .await
            .is_some();

        if !fresh {
            warn!("Profile: no new facts for character {}", name);
            return false;
        }
        if updated {
            info!("Profile: updated facts for character {}", name);
        }
        updated
    }

    /// How many of `pending` messages a summarization attempt retires.
    fn consumed(&self, pending: usize) -> usize {
        pending.saturating_sub(self.threshold / 2)
    }
}
