use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduler::JobHandle;

/// Deterministic identifier for a (sender, recipient) conversation pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn for_pair(sender_id: &str, recipient_id: &str) -> Self {
        Self(format!("{}:{}", sender_id, recipient_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message waiting in a conversation batch. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMessage {
    pub sender_id: String,
    pub recipient_id: String,
    pub text: String,
    pub message_id: String,
    pub received_at: DateTime<Utc>,
}

/// One conversation's accumulated messages plus the handle of its pending
/// reply job. The two live and die together: an entry is created on the
/// first message and removed when a dispatch job claims it.
#[derive(Debug, Default)]
struct ConversationBatch {
    messages: Vec<PendingMessage>,
    handle: Option<JobHandle>,
}

/// Result of appending a message to a conversation.
#[derive(Debug)]
pub struct AppendOutcome {
    /// Copy of the batch after the append, in arrival order. Jobs operate on
    /// this snapshot, never on the live map.
    pub snapshot: Vec<PendingMessage>,
    /// Handle of the job scheduled for the previous state of the batch, if
    /// any. The caller revokes it and schedules a replacement.
    pub previous_handle: Option<JobHandle>,
}

/// Outcome of a compare-and-clear attempt by a finishing dispatch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The entry belonged to this job and was removed.
    Cleared,
    /// The entry exists but is owned by a newer job; left in place.
    Superseded,
    /// No entry for the key; it was already cleared.
    Absent,
}

/// Shared store of per-conversation batches.
///
/// The scheduling coordinator is the only writer on the append path, while
/// dispatch jobs clear entries concurrently. `clear_if_current` keys removal
/// to the owning job id, which bounds the window in which a superseded job
/// could race a live batch.
#[derive(Default)]
pub struct BatchStore {
    entries: DashMap<ConversationKey, ConversationBatch>,
}

impl BatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, creating the batch if this is the conversation's
    /// first. Atomic get-or-create; takes the previous job handle out of the
    /// entry so exactly one caller revokes it.
    pub fn append(&self, key: &ConversationKey, message: PendingMessage) -> AppendOutcome {
        let mut entry = self.entries.entry(key.clone()).or_default();
        entry.messages.push(message);
        AppendOutcome {
            snapshot: entry.messages.clone(),
            previous_handle: entry.handle.take(),
        }
    }

    /// Record the job handle now responsible for the batch. Returns false if
    /// the entry has vanished, which cannot happen while the handle slot is
    /// empty (clear_if_current never matches a handle-less entry) and is
    /// logged by the caller as a race.
    pub fn record_handle(&self, key: &ConversationKey, handle: JobHandle) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Remove the entry only if it is still owned by `job_id`.
    pub fn clear_if_current(&self, key: &ConversationKey, job_id: Uuid) -> ClearOutcome {
        let removed = self
            .entries
            .remove_if(key, |_, batch| {
                batch.handle.as_ref().map(JobHandle::id) == Some(job_id)
            })
            .is_some();
        if removed {
            ClearOutcome::Cleared
        } else if self.entries.contains_key(key) {
            ClearOutcome::Superseded
        } else {
            ClearOutcome::Absent
        }
    }

    /// Copy of a batch's messages, if the conversation is live.
    pub fn snapshot(&self, key: &ConversationKey) -> Option<Vec<PendingMessage>> {
        self.entries.get(key).map(|e| e.messages.clone())
    }

    /// Id of the job currently owning a batch, if any.
    pub fn current_job(&self, key: &ConversationKey) -> Option<Uuid> {
        self.entries
            .get(key)
            .and_then(|e| e.handle.as_ref().map(JobHandle::id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> PendingMessage {
        PendingMessage {
            sender_id: "111".into(),
            recipient_id: "222".into(),
            text: text.into(),
            message_id: format!("mid.{}", text),
            received_at: Utc::now(),
        }
    }

    fn key() -> ConversationKey {
        ConversationKey::for_pair("111", "222")
    }

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(ConversationKey::for_pair("a", "b"), ConversationKey::for_pair("a", "b"));
        assert_ne!(ConversationKey::for_pair("a", "b"), ConversationKey::for_pair("b", "a"));
    }

    #[test]
    fn test_first_append_creates_batch() {
        let store = BatchStore::new();
        let outcome = store.append(&key(), msg("one"));
        assert_eq!(outcome.snapshot.len(), 1);
        assert!(outcome.previous_handle.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_appends_preserve_arrival_order() {
        let store = BatchStore::new();
        store.append(&key(), msg("one"));
        store.append(&key(), msg("two"));
        let outcome = store.append(&key(), msg("three"));
        let texts: Vec<&str> = outcome.snapshot.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_append_takes_previous_handle() {
        let store = BatchStore::new();
        store.append(&key(), msg("one"));
        let handle = JobHandle::new();
        assert!(store.record_handle(&key(), handle.clone()));

        let outcome = store.append(&key(), msg("two"));
        assert_eq!(outcome.previous_handle.map(|h| h.id()), Some(handle.id()));
        // Handle slot is now empty until the caller records a replacement
        assert!(store.current_job(&key()).is_none());
    }

    #[test]
    fn test_clear_if_current_matches_owner() {
        let store = BatchStore::new();
        store.append(&key(), msg("one"));
        let handle = JobHandle::new();
        store.record_handle(&key(), handle.clone());

        assert_eq!(store.clear_if_current(&key(), handle.id()), ClearOutcome::Cleared);
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear_if_current_superseded() {
        let store = BatchStore::new();
        store.append(&key(), msg("one"));
        let old = JobHandle::new();
        store.record_handle(&key(), old.clone());

        // A newer job took over the batch
        store.append(&key(), msg("two"));
        let new = JobHandle::new();
        store.record_handle(&key(), new);

        assert_eq!(store.clear_if_current(&key(), old.id()), ClearOutcome::Superseded);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clear_if_current_absent() {
        let store = BatchStore::new();
        assert_eq!(store.clear_if_current(&key(), Uuid::new_v4()), ClearOutcome::Absent);
    }

    #[test]
    fn test_clear_never_matches_handle_less_entry() {
        let store = BatchStore::new();
        store.append(&key(), msg("one"));
        // No handle recorded yet; any job id must leave the entry alone
        assert_eq!(store.clear_if_current(&key(), Uuid::new_v4()), ClearOutcome::Superseded);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = BatchStore::new();
        store.append(&key(), msg("one"));
        let snap = store.snapshot(&key()).unwrap();
        store.append(&key(), msg("two"));
        assert_eq!(snap.len(), 1);
        assert_eq!(store.snapshot(&key()).unwrap().len(), 2);
    }

    #[test]
    fn test_distinct_conversations_isolated() {
        let store = BatchStore::new();
        store.append(&ConversationKey::for_pair("a", "x"), msg("one"));
        store.append(&ConversationKey::for_pair("b", "x"), msg("two"));
        assert_eq!(store.len(), 2);
        assert_eq!(store.snapshot(&ConversationKey::for_pair("a", "x")).unwrap().len(), 1);
    }
}
