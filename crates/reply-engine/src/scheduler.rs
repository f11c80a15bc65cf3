use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::counter;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batch::{ConversationKey, PendingMessage};
use crate::dispatch::Dispatcher;

/// Opaque reference to a scheduled unit of deferred work. Cloneable so the
/// store can hold one copy while the engine revokes another.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn revoke(&self) {
        self.cancel.cancel();
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload of a deferred reply job. Batch jobs carry a snapshot of their
/// conversation taken at schedule time; they never read the live map.
#[derive(Debug, Clone)]
pub enum Job {
    DmBatch {
        key: ConversationKey,
        snapshot: Vec<PendingMessage>,
    },
    CommentReply {
        comment_id: String,
        message: String,
        account_id: String,
    },
}

/// Delayed task queue with best-effort revocation.
///
/// `revoke` is non-terminating: a job that has already started is not
/// interrupted, only a not-yet-started one is dropped. Jobs also carry an
/// expiry measured from schedule time; a job that wakes past its expiry is
/// dropped instead of executed.
pub trait TaskQueue: Send + Sync {
    fn schedule(&self, job: Job, delay: Duration, expiry: Duration) -> JobHandle;
    fn revoke(&self, handle: &JobHandle);
}

/// Runtime-backed queue: each job is a spawned task that sleeps out its
/// delay, then runs the dispatcher. Job failures surface here, at the queue
/// layer, rather than being swallowed inside the worker.
pub struct TokioTaskQueue {
    dispatcher: Arc<Dispatcher>,
}

impl TokioTaskQueue {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl TaskQueue for TokioTaskQueue {
    fn schedule(&self, job: Job, delay: Duration, expiry: Duration) -> JobHandle {
        let handle = JobHandle::new();
        let job_id = handle.id;
        let cancel = handle.cancel.clone();
        let dispatcher = self.dispatcher.clone();
        let scheduled_at = Instant::now();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(job_id = %job_id, "job revoked before start");
                    counter!("jobs_revoked_total").increment(1);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if scheduled_at.elapsed() >= expiry {
                tracing::warn!(job_id = %job_id, "job woke past its expiry, dropping");
                counter!("jobs_expired_total").increment(1);
                return;
            }

            if let Err(e) = dispatcher.run(job_id, job).await {
                // Queue-level retry surface: the worker re-raises, we log.
                tracing::error!(job_id = %job_id, error = %e, "dispatch job failed");
                counter!("jobs_failed_total").increment(1);
            }
        });

        handle
    }

    fn revoke(&self, handle: &JobHandle) {
        handle.revoke();
    }
}

/// A scheduled job as captured by the recording queue.
#[derive(Debug, Clone)]
pub struct RecordedJob {
    pub handle: JobHandle,
    pub job: Job,
    pub delay: Duration,
    pub expiry: Duration,
}

/// In-memory queue that records schedule and revoke calls without running
/// anything. Drives deterministic tests of the batching engine.
#[derive(Default)]
pub struct RecordingQueue {
    scheduled: Mutex<Vec<RecordedJob>>,
    revoked: Mutex<Vec<Uuid>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<RecordedJob> {
        self.scheduled.lock().expect("recording queue poisoned").clone()
    }

    pub fn revoked_ids(&self) -> Vec<Uuid> {
        self.revoked.lock().expect("recording queue poisoned").clone()
    }

    /// Jobs scheduled and not (yet) revoked, in schedule order.
    pub fn live_jobs(&self) -> Vec<RecordedJob> {
        let revoked = self.revoked_ids();
        self.scheduled()
            .into_iter()
            .filter(|r| !revoked.contains(&r.handle.id()))
            .collect()
    }
}

impl TaskQueue for RecordingQueue {
    fn schedule(&self, job: Job, delay: Duration, expiry: Duration) -> JobHandle {
        let handle = JobHandle::new();
        self.scheduled
            .lock()
            .expect("recording queue poisoned")
            .push(RecordedJob {
                handle: handle.clone(),
                job,
                delay,
                expiry,
            });
        handle
    }

    fn revoke(&self, handle: &JobHandle) {
        self.revoked
            .lock()
            .expect("recording queue poisoned")
            .push(handle.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        assert_ne!(JobHandle::new().id(), JobHandle::new().id());
    }

    #[test]
    fn test_recording_queue_tracks_schedule_and_revoke() {
        let queue = RecordingQueue::new();
        let h1 = queue.schedule(
            Job::CommentReply {
                comment_id: "c1".into(),
                message: "m".into(),
                account_id: "a".into(),
            },
            Duration::from_secs(10),
            Duration::from_secs(40),
        );
        let _h2 = queue.schedule(
            Job::CommentReply {
                comment_id: "c2".into(),
                message: "m".into(),
                account_id: "a".into(),
            },
            Duration::from_secs(5),
            Duration::from_secs(35),
        );

        assert_eq!(queue.scheduled().len(), 2);
        queue.revoke(&h1);
        let live = queue.live_jobs();
        assert_eq!(live.len(), 1);
        match &live[0].job {
            Job::CommentReply { comment_id, .. } => assert_eq!(comment_id, "c2"),
            other => panic!("unexpected job {:?}", other),
        }
    }
}
