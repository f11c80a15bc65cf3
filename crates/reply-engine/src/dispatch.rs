use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;
use uuid::Uuid;

use crate::batch::{BatchStore, ClearOutcome, ConversationKey, PendingMessage};
use crate::completion::TextGenerator;
use crate::credentials::CredentialStore;
use crate::scheduler::Job;
use crate::sentiment::{self, Sentiment};

/// Fixed preamble for every generated reply.
const SYSTEM_PROMPT: &str = "You are the social media assistant for this account. \
Write a short, friendly direct-message reply to the customer messages below. \
Reply with the message text only.";

/// Outbound message delivery. The Graph API client satisfies this; tests
/// substitute a recording fake.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_dm(
        &self,
        access_token: &str,
        account_id: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<()>;

    async fn send_comment_reply(
        &self,
        access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> Result<()>;
}

#[async_trait]
impl MessageSender for graph_client::GraphClient {
    async fn send_dm(
        &self,
        access_token: &str,
        account_id: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<()> {
        self.send_message(access_token, account_id, recipient_id, text)
            .await
    }

    async fn send_comment_reply(
        &self,
        access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> Result<()> {
        self.reply_to_comment(access_token, comment_id, text).await
    }
}

/// How a dispatch job ended. Surfaced for logging and tests; only `Replied`
/// means an external send was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Replied,
    /// The job's snapshot was empty: it was superseded and has nothing to do.
    NoMessages,
    /// No access token provisioned for the recipient account; nothing sent.
    MissingCredential,
}

/// Executes scheduled reply jobs. Runs on the task queue, concurrently with
/// the request path; touches only the job's snapshot plus a compare-and-clear
/// against the live batch store.
pub struct Dispatcher {
    store: Arc<BatchStore>,
    credentials: Arc<CredentialStore>,
    sender: Arc<dyn MessageSender>,
    generator: Arc<dyn TextGenerator>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<BatchStore>,
        credentials: Arc<CredentialStore>,
        sender: Arc<dyn MessageSender>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            store,
            credentials,
            sender,
            generator,
        }
    }

    pub async fn run(&self, job_id: Uuid, job: Job) -> Result<DispatchOutcome> {
        match job {
            Job::DmBatch { key, snapshot } => self.dispatch_batch(job_id, key, snapshot).await,
            Job::CommentReply {
                comment_id,
                message,
                account_id,
            } => self.dispatch_comment(&comment_id, &message, &account_id).await,
        }
    }

    async fn dispatch_batch(
        &self,
        job_id: Uuid,
        key: ConversationKey,
        snapshot: Vec<PendingMessage>,
    ) -> Result<DispatchOutcome> {
        let Some(first) = snapshot.first() else {
            tracing::info!(conversation = %key, "no messages to process");
            counter!("dispatch_noop_total").increment(1);
            return Ok(DispatchOutcome::NoMessages);
        };

        let combined = snapshot
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let tone = sentiment::classify(&combined);

        let reply = match self.generator.complete(&compose_prompt(tone, &combined)).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(conversation = %key, error = %e, "text generation failed, using fallback reply");
                counter!("generation_fallbacks_total").increment(1);
                fallback_reply(tone).to_string()
            }
        };

        let account_id = first.recipient_id.clone();
        let recipient_id = first.sender_id.clone();
        let Some(token) = self.credentials.get(&account_id) else {
            tracing::error!(account_id = %account_id, conversation = %key, "no access token for account, reply not sent");
            counter!("dispatch_missing_credential_total").increment(1);
            return Ok(DispatchOutcome::MissingCredential);
        };

        match self
            .sender
            .send_dm(&token, &account_id, &recipient_id, &reply)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    conversation = %key,
                    messages = snapshot.len(),
                    tone = tone.as_str(),
                    "batched reply sent"
                );
                counter!("replies_sent_total", "kind" => "dm").increment(1);
            }
            Err(e) => {
                // Not retried here; the conversation is still marked handled
                tracing::error!(conversation = %key, error = %e, "failed to send reply");
                counter!("replies_failed_total", "kind" => "dm").increment(1);
            }
        }

        self.clear_live(&key, job_id);
        Ok(DispatchOutcome::Replied)
    }

    async fn dispatch_comment(
        &self,
        comment_id: &str,
        message: &str,
        account_id: &str,
    ) -> Result<DispatchOutcome> {
        let Some(token) = self.credentials.get(account_id) else {
            tracing::error!(account_id = %account_id, comment_id = %comment_id, "no access token for account, comment reply not sent");
            counter!("dispatch_missing_credential_total").increment(1);
            return Ok(DispatchOutcome::MissingCredential);
        };

        match self
            .sender
            .send_comment_reply(&token, comment_id, message)
            .await
        {
            Ok(()) => {
                tracing::info!(comment_id = %comment_id, "comment reply sent");
                counter!("replies_sent_total", "kind" => "comment").increment(1);
            }
            Err(e) => {
                tracing::error!(comment_id = %comment_id, error = %e, "failed to send comment reply");
                counter!("replies_failed_total", "kind" => "comment").increment(1);
            }
        }
        Ok(DispatchOutcome::Replied)
    }

    /// Clear this job's live batch entry. Finding it already gone or owned by
    /// a newer job means a superseded job raced the coordinator; logged, not
    /// an error.
    fn clear_live(&self, key: &ConversationKey, job_id: Uuid) {
        match self.store.clear_if_current(key, job_id) {
            ClearOutcome::Cleared => {
                tracing::debug!(conversation = %key, "batch cleared");
            }
            ClearOutcome::Superseded => {
                tracing::warn!(conversation = %key, "batch owned by a newer job, possible duplicate dispatch");
            }
            ClearOutcome::Absent => {
                tracing::warn!(conversation = %key, "batch already cleared, possible duplicate dispatch");
            }
        }
    }
}

/// Full prompt: fixed system prompt, sentiment-selected tone directive, then
/// the concatenated customer messages.
pub fn compose_prompt(tone: Sentiment, combined_text: &str) -> String {
    format!("{}\n{}\n\nCustomer messages:\n{}", SYSTEM_PROMPT, tone_directive(tone), combined_text)
}

fn tone_directive(tone: Sentiment) -> &'static str {
    match tone {
        Sentiment::Positive => "Respond in an enthusiastic, thankful tone.",
        Sentiment::Negative => "Respond in an apologetic, helpful tone.",
    }
}

/// Canned replies used when text generation fails.
pub fn fallback_reply(tone: Sentiment) -> &'static str {
    match tone {
        Sentiment::Positive => {
            "Thank you so much for reaching out! We really appreciate your message and will get back to you shortly."
        }
        Sentiment::Negative => {
            "We're sorry to hear that. Thank you for letting us know, our team will follow up with you as soon as possible."
        }
    }
}
