use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use metrics::counter;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchStore, ConversationKey, PendingMessage};
use crate::config::Settings;
use crate::scheduler::{Job, TaskQueue};
use crate::sentiment::{self, Sentiment};
use crate::webhook::{CommentEvent, DirectMessageEvent, InboundEvent};

/// Timing rules for deferred replies.
#[derive(Debug, Clone)]
pub struct DebouncePolicy {
    /// Upper bound of the random delay given to a conversation's first reply
    /// job and to every comment reply job.
    pub initial_delay_max: Duration,
    /// Fixed delay used when a follow-up message reschedules a batch job.
    pub debounce_delay: Duration,
    /// Added to a batch job's delay to form its expiry.
    pub batch_expiry_slack: Duration,
    /// Added to a comment job's delay to form its expiry.
    pub comment_expiry_slack: Duration,
}

impl DebouncePolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            initial_delay_max: Duration::from_secs(settings.initial_reply_delay_max_secs),
            debounce_delay: Duration::from_secs(settings.debounce_delay_secs),
            batch_expiry_slack: Duration::from_secs(settings.batch_expiry_slack_secs),
            comment_expiry_slack: Duration::from_secs(settings.comment_expiry_slack_secs),
        }
    }
}

fn comment_reply(tone: Sentiment) -> &'static str {
    match tone {
        Sentiment::Positive => "Thank you so much for the kind words! We really appreciate you.",
        Sentiment::Negative => {
            "We're sorry this wasn't a great experience. Please send us a DM so we can make it right."
        }
    }
}

/// Scheduling coordinator: turns inbound events into batches and deferred
/// jobs. All scheduling mutations run on one task, so append, revoke and
/// record-handle for a conversation never interleave with each other; only
/// finishing dispatch jobs touch the store concurrently, through
/// compare-and-clear.
pub struct BatchEngine {
    store: Arc<BatchStore>,
    queue: Arc<dyn TaskQueue>,
    policy: DebouncePolicy,
}

/// Sending half of the engine's command channel, shared by request handlers.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<InboundEvent>,
}

impl EngineHandle {
    pub async fn submit(&self, event: InboundEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::warn!("batch engine is gone, dropping event");
            counter!("engine_events_dropped_total").increment(1);
        }
    }
}

impl BatchEngine {
    pub fn new(store: Arc<BatchStore>, queue: Arc<dyn TaskQueue>, policy: DebouncePolicy) -> Self {
        Self {
            store,
            queue,
            policy,
        }
    }

    /// Run the coordinator loop until cancellation. Returns the handle used
    /// to feed it events.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> (EngineHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<InboundEvent>(256);
        let engine = self.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("batch engine shutting down");
                        break;
                    }
                    maybe = rx.recv() => {
                        match maybe {
                            Some(event) => engine.handle_event(event),
                            None => break,
                        }
                    }
                }
            }
        });
        (EngineHandle { tx }, task)
    }

    pub fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::DirectMessage(dm) => self.handle_direct_message(dm),
            InboundEvent::Comment(comment) => self.handle_comment(comment),
        }
    }

    fn handle_direct_message(&self, dm: DirectMessageEvent) {
        if dm.is_echo {
            tracing::debug!(sender_id = %dm.sender_id, "skipping echo of our own message");
            return;
        }

        let key = ConversationKey::for_pair(&dm.sender_id, &dm.recipient_id);
        let message = PendingMessage {
            sender_id: dm.sender_id,
            recipient_id: dm.recipient_id,
            text: dm.text,
            message_id: dm.message_id,
            received_at: received_at(dm.timestamp),
        };

        let outcome = self.store.append(&key, message);
        let delay = match outcome.previous_handle {
            Some(previous) => {
                // Batch extended: drop the old job and push the reply out by
                // the fixed debounce interval
                self.queue.revoke(&previous);
                counter!("batches_rescheduled_total").increment(1);
                self.policy.debounce_delay
            }
            None => {
                counter!("batches_opened_total").increment(1);
                self.random_delay()
            }
        };
        let expiry = delay + self.policy.batch_expiry_slack;

        tracing::info!(
            conversation = %key,
            pending = outcome.snapshot.len(),
            delay_secs = delay.as_secs_f64(),
            "batch reply scheduled"
        );
        let handle = self.queue.schedule(
            Job::DmBatch {
                key: key.clone(),
                snapshot: outcome.snapshot,
            },
            delay,
            expiry,
        );
        if !self.store.record_handle(&key, handle) {
            tracing::warn!(conversation = %key, "batch vanished before its handle was recorded");
        }
    }

    fn handle_comment(&self, comment: CommentEvent) {
        if comment.from_id == comment.recipient_account_id {
            tracing::debug!(comment_id = %comment.comment_id, "skipping our own comment");
            return;
        }

        // Comment replies are canned and composed up front; only the send is
        // deferred. No batching across comments.
        let tone = sentiment::classify(&comment.text);
        let delay = self.random_delay();
        let expiry = delay + self.policy.comment_expiry_slack;

        tracing::info!(
            comment_id = %comment.comment_id,
            from = %comment.from_username,
            tone = tone.as_str(),
            delay_secs = delay.as_secs_f64(),
            "comment reply scheduled"
        );
        counter!("comment_replies_scheduled_total").increment(1);
        self.queue.schedule(
            Job::CommentReply {
                comment_id: comment.comment_id,
                message: comment_reply(tone).to_string(),
                account_id: comment.recipient_account_id,
            },
            delay,
            expiry,
        );
    }

    fn random_delay(&self) -> Duration {
        let max = self.policy.initial_delay_max.as_secs_f64();
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=max))
    }
}

/// Platform timestamps are milliseconds since the epoch; an unusable value
/// falls back to the arrival time.
fn received_at(timestamp_ms: i64) -> DateTime<Utc> {
    if timestamp_ms > 0
        && let Some(ts) = Utc.timestamp_millis_opt(timestamp_ms).single()
    {
        return ts;
    }
    Utc::now()
}
