use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use common::crypto;
use common::ratelimit::RateLimitLayer;
use reply_engine::batch::BatchStore;
use reply_engine::completion::{CompletionClient, TextGenerator};
use reply_engine::config;
use reply_engine::credentials::CredentialStore;
use reply_engine::dispatch::{Dispatcher, MessageSender};
use reply_engine::engine::{BatchEngine, DebouncePolicy, EngineHandle};
use reply_engine::events::{EventRecord, EventStore};
use reply_engine::scheduler::TokioTaskQueue;
use reply_engine::webhook;

struct AppState {
    events: Arc<EventStore>,
    credentials: Arc<CredentialStore>,
    engine: EngineHandle,
}

#[derive(Deserialize)]
struct ProvisionPayload {
    account_id: String,
    access_token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (dev only, non-fatal in production)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let s = config::settings();

    let events = Arc::new(EventStore::load(&s.events_file).await);
    let credentials = Arc::new(CredentialStore::load(&s.credentials_file).await);

    let sender: Arc<dyn MessageSender> =
        Arc::new(graph_client::GraphClient::new(&s.graph_api_base)?);
    let generator: Arc<dyn TextGenerator> = Arc::new(CompletionClient::new(
        &s.completion_api_base,
        &s.completion_api_key,
        &s.completion_model,
        Duration::from_secs(s.completion_timeout_secs),
    )?);

    let store = Arc::new(BatchStore::new());
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        credentials.clone(),
        sender,
        generator,
    ));
    let queue = Arc::new(TokioTaskQueue::new(dispatcher));

    // Create cancellation token for graceful shutdown of background tasks
    let cancel_token = CancellationToken::new();

    let engine = Arc::new(BatchEngine::new(
        store,
        queue,
        DebouncePolicy::from_settings(s),
    ));
    let (engine_handle, engine_task) = engine.spawn(cancel_token.clone());

    // Configure rate limiting on the public surface
    let rate_limiter = RateLimitLayer::new(s.rate_limit_rps, s.rate_limit_burst);
    let sweeper_handle = rate_limiter.spawn_sweeper(cancel_token.clone());

    let state = Arc::new(AppState {
        events,
        credentials,
        engine: engine_handle,
    });

    let app = Router::new()
        .route("/webhook", get(verify_subscription).post(receive_webhook))
        .route("/webhook_events", get(list_events))
        .route("/events", get(stream_events))
        .route("/accounts", post(provision_account))
        .route(
            "/metrics",
            get(move || {
                let handle = prometheus_handle.clone();
                async move { handle.render() }
            }),
        )
        .layer(rate_limiter)
        .with_state(state);

    let listen_addr = &s.listen_addr;
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!("Listening on {}", listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
        .await?;

    // Cancel background tasks and wait for them to complete
    tracing::info!("Cancelling background tasks...");
    cancel_token.cancel();

    let shutdown_timeout = Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = engine_task.await;
        let _ = sweeper_handle.await;
    })
    .await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel_token.cancelled() => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

/// Platform webhook verification handshake: echo the challenge back when the
/// mode and token match. Query keys use the platform's dotted names.
async fn verify_subscription(
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == Some("subscribe") && token == Some(config::settings().verify_token.as_str()) {
        tracing::info!("webhook subscription verified");
        (StatusCode::OK, challenge)
    } else {
        tracing::warn!(?mode, "webhook verification failed");
        counter!("webhook_rejected_total", "reason" => "verification").increment(1);
        (StatusCode::FORBIDDEN, "Verification failed".into())
    }
}

async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let signature = headers
        .get(crypto::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if !crypto::verify_webhook_signature(&config::settings().app_secret, &body, signature) {
        tracing::warn!("rejecting webhook with bad signature");
        counter!("webhook_rejected_total", "reason" => "signature").increment(1);
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "invalid signature"})),
        );
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting webhook with malformed body");
            counter!("webhook_rejected_total", "reason" => "body").increment(1);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "malformed json body"})),
            );
        }
    };

    // Record first so the feed sees every authenticated event, even ones that
    // produce no typed events
    state
        .events
        .append(EventRecord {
            timestamp: Utc::now(),
            payload: payload.clone(),
        })
        .await;
    counter!("webhook_events_total").increment(1);

    let parsed = webhook::parse_events(&payload);
    let count = parsed.len();
    for event in parsed {
        state.engine.submit(event).await;
    }

    tracing::info!(events = count, "webhook accepted");
    (StatusCode::OK, Json(json!({"status": "received", "events": count})))
}

async fn list_events(State(state): State<Arc<AppState>>) -> Json<Vec<EventRecord>> {
    Json(state.events.recent().await)
}

/// SSE feed: replay the buffer, then tail live events. Keepalive comments
/// hold idle connections open through proxies.
async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (replay, rx) = state.events.subscribe().await;
    counter!("event_stream_subscribers_total").increment(1);

    let stream = tokio_stream::iter(replay)
        .chain(UnboundedReceiverStream::new(rx))
        .map(|record| {
            let data = serde_json::to_string(&record).unwrap_or_else(|_| "{}".into());
            Ok(Event::default().data(data))
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    )
}

async fn provision_account(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ProvisionPayload>,
) -> (StatusCode, Json<serde_json::Value>) {
    if payload.account_id.is_empty() || payload.access_token.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "account_id and access_token are required"})),
        );
    }

    match state
        .credentials
        .set(&payload.account_id, &payload.access_token)
        .await
    {
        Ok(()) => {
            tracing::info!(account_id = %payload.account_id, "account credential stored");
            counter!("accounts_provisioned_total").increment(1);
            (
                StatusCode::OK,
                Json(json!({"status": "stored", "account_id": payload.account_id})),
            )
        }
        Err(e) => {
            tracing::error!(account_id = %payload.account_id, error = %e, "failed to persist credential");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to persist credential"})),
            )
        }
    }
}
