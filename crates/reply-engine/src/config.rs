use serde::Deserialize;
use std::sync::OnceLock;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Shared secret used to verify webhook signatures
    pub app_secret: String,
    /// Token echoed back during the platform's webhook verification handshake
    pub verify_token: String,

    /// Base URL of the platform Graph API
    #[serde(default = "default_graph_api_base")]
    pub graph_api_base: String,

    /// Text-generation endpoint (OpenAI-style chat completions)
    #[serde(default = "default_completion_api_base")]
    pub completion_api_base: String,
    /// API key for the completion endpoint; empty disables generation and
    /// replies fall back to canned responses
    #[serde(default)]
    pub completion_api_key: String,
    #[serde(default = "default_completion_model")]
    pub completion_model: String,
    /// Timeout for a single completion call
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,

    /// Snapshot file for the webhook event buffer
    #[serde(default = "default_events_file")]
    pub events_file: String,
    /// Durable store for per-account access tokens
    #[serde(default = "default_credentials_file")]
    pub credentials_file: String,

    /// Upper bound of the random delay before the first reply to a new
    /// conversation, in seconds
    #[serde(default = "default_initial_reply_delay_max_secs")]
    pub initial_reply_delay_max_secs: u64,
    /// Fixed delay used when a batch is extended and its job rescheduled
    #[serde(default = "default_debounce_delay_secs")]
    pub debounce_delay_secs: u64,
    /// Slack added to a batch job's delay to form its expiry
    #[serde(default = "default_batch_expiry_slack_secs")]
    pub batch_expiry_slack_secs: u64,
    /// Slack added to a comment job's delay to form its expiry
    #[serde(default = "default_comment_expiry_slack_secs")]
    pub comment_expiry_slack_secs: u64,

    /// Rate limit: requests per second per IP
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u64,
    /// Rate limit: burst size
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
}

fn default_listen_addr() -> String { "0.0.0.0:8080".into() }
fn default_graph_api_base() -> String { "https://graph.instagram.com/v21.0".into() }
fn default_completion_api_base() -> String { "https://api.openai.com/v1".into() }
fn default_completion_model() -> String { "gpt-4o-mini".into() }
fn default_completion_timeout_secs() -> u64 { 30 }
fn default_events_file() -> String { "webhook_events.json".into() }
fn default_credentials_file() -> String { "account_tokens.json".into() }
fn default_initial_reply_delay_max_secs() -> u64 { 60 }
fn default_debounce_delay_secs() -> u64 { 30 }
fn default_batch_expiry_slack_secs() -> u64 { 600 }
fn default_comment_expiry_slack_secs() -> u64 { 30 }
fn default_rate_limit_rps() -> u64 { 10 }
fn default_rate_limit_burst() -> u32 { 20 }

static SETTINGS: OnceLock<Settings> = OnceLock::new();

pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(|| {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("RB"))
            .build()
            .expect("Failed to build config")
            .try_deserialize()
            .expect("Failed to deserialize config")
    })
}
