use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Upper bound on retained webhook events; oldest evicted first.
pub const EVENT_BUFFER_CAPACITY: usize = 100;

/// A raw webhook event as accepted at the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

struct Inner {
    events: VecDeque<EventRecord>,
    subscribers: Vec<mpsc::UnboundedSender<EventRecord>>,
}

/// Bounded ring buffer of recent webhook events with live fan-out.
///
/// Every append rewrites the JSON snapshot file in full (the buffer is small,
/// so an append-only format buys nothing) and pushes the record to all live
/// subscribers. A subscriber whose channel is gone is dropped on the next
/// append, which is how client disconnects are detected.
pub struct EventStore {
    inner: Mutex<Inner>,
    path: PathBuf,
}

impl EventStore {
    /// Load the buffer from its snapshot file, keeping at most the newest
    /// `EVENT_BUFFER_CAPACITY` records. Load failures log and start empty.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut events = VecDeque::with_capacity(EVENT_BUFFER_CAPACITY);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<EventRecord>>(&bytes) {
                Ok(stored) => {
                    let skip = stored.len().saturating_sub(EVENT_BUFFER_CAPACITY);
                    events.extend(stored.into_iter().skip(skip));
                    tracing::info!(count = events.len(), path = %path.display(), "webhook events loaded");
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "failed to parse event snapshot, starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to read event snapshot, starting empty");
            }
        }
        Self {
            inner: Mutex::new(Inner {
                events,
                subscribers: Vec::new(),
            }),
            path,
        }
    }

    /// Append a record: evict the oldest past capacity, fan out to live
    /// subscribers, then rewrite the snapshot file.
    pub async fn append(&self, record: EventRecord) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            if inner.events.len() == EVENT_BUFFER_CAPACITY {
                inner.events.pop_front();
            }
            inner.events.push_back(record.clone());

            // Fan out; a failed send means the subscriber went away
            inner
                .subscribers
                .retain(|tx| tx.send(record.clone()).is_ok());

            serde_json::to_vec_pretty(&inner.events.iter().collect::<Vec<_>>())
        };

        match snapshot {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&self.path, bytes).await {
                    tracing::error!(path = %self.path.display(), error = %e, "failed to persist event snapshot");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize event snapshot");
            }
        }
    }

    /// Register a live subscriber. Returns the full current buffer for replay
    /// plus the channel that receives everything appended afterwards.
    pub async fn subscribe(&self) -> (Vec<EventRecord>, mpsc::UnboundedReceiver<EventRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        inner.subscribers.push(tx);
        (inner.events.iter().cloned().collect(), rx)
    }

    /// Current buffer contents, oldest first.
    pub async fn recent(&self) -> Vec<EventRecord> {
        self.inner.lock().await.events.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }
}
