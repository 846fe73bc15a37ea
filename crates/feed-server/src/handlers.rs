//! HTTP handlers and process wiring for the feed server.
//!
//! Routes:
//! - `GET /health`
//! - `GET /v1/feed?user_id=&limit=&cursor=`
//! - `POST /v1/posts` (caller identity in `x-user-id`)

use crate::config::{Config, ConsumerSettings};
use crate::error::ApiError;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use feed_consumer::{
    ConsumerError, ConsumerStats, EventConsumer, JetStreamConfig, JetStreamSource, NatsDeadLetters,
};
use feed_core::{FanoutEngine, FeedService, NewPost, RequestContext, SqliteTimelineStore};
use feed_protocol::api::{AddPostRequest, GetFeedRequest, GetFeedResponse};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Header carrying the caller identity forwarded by the gateway.
pub const CALLER_HEADER: &str = "x-user-id";

/// Shared server state.
pub struct AppState {
    /// Reads and the synchronous post trigger.
    pub service: FeedService<SqliteTimelineStore>,
}

/// Authenticated caller, taken from [`CALLER_HEADER`].
pub struct Caller(pub RequestContext);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|caller| !caller.is_empty())
            .map(|caller| Caller(RequestContext::new(caller)))
            .ok_or(ApiError::Unauthenticated)
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/feed", get(get_feed_handler))
        .route("/v1/posts", post(add_post_handler))
        .with_state(state)
}

/// Run the HTTP server and, if enabled, the event consumer.
///
/// Returns after a shutdown signal once the consumer has drained, or with an
/// error if the consumer lost its source.
///
/// # Errors
///
/// Returns an error if the server fails to start or the consumer fails.
pub async fn run_server(config: Config) -> Result<()> {
    let store = SqliteTimelineStore::open(&config.storage.sqlite())
        .context("Failed to open timeline store")?;
    // Connections open lazily; touch the database so a bad path fails here.
    let entries = store
        .count_entries(None)
        .await
        .context("Failed to open timeline store")?;
    info!(entries, "Timeline store ready");
    let service = FeedService::new(
        Arc::new(store),
        config.feed.reader(),
        config.feed.fanout_chunk_size,
    );

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let cancel = CancellationToken::new();
    let consumer = if config.consumer.enabled {
        Some(spawn_consumer(&config.consumer, Arc::clone(service.engine()), cancel.clone()).await?)
    } else {
        info!("Event consumer disabled; fan-out only through POST /v1/posts");
        None
    };

    let app = router(Arc::new(AppState { service }));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Feed server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;
    cancel.cancel();

    if let Some(handle) = consumer {
        let stats = handle
            .await
            .context("Event consumer task panicked")?
            .context("Event consumer failed")?;
        info!(
            applied = stats.applied,
            retried = stats.retried,
            dead_lettered = stats.dead_lettered,
            "Event consumer drained"
        );
    }

    Ok(())
}

async fn spawn_consumer(
    settings: &ConsumerSettings,
    engine: Arc<FanoutEngine<SqliteTimelineStore>>,
    cancel: CancellationToken,
) -> Result<JoinHandle<Result<ConsumerStats, ConsumerError>>> {
    let source = JetStreamSource::connect(&JetStreamConfig {
        url: settings.nats_url.clone(),
        stream: settings.stream.clone(),
        subject: settings.subject.clone(),
        durable_name: settings.durable_name.clone(),
    })
    .await
    .context("Failed to bind notification stream")?;

    let dead_letters = NatsDeadLetters::connect(&settings.nats_url, settings.dead_letter_subject.clone())
        .await
        .context("Failed to connect dead-letter sink")?;

    let consumer = EventConsumer::new(
        Box::new(source),
        engine,
        Arc::new(dead_letters),
        settings.consumer(),
    );

    Ok(tokio::spawn(async move {
        let result = consumer.run(cancel.clone()).await;
        if result.is_err() {
            // Take the server down with the consumer so the supervisor restarts both.
            cancel.cancel();
        }
        result
    }))
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => info!("Shutdown signal received"),
        () = cancel.cancelled() => info!("Shutting down after consumer stop"),
    }
}

fn record<T>(route: &'static str, result: &Result<T, ApiError>) {
    let status = match result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status(),
    };
    metrics::record_request(route, status.as_u16());
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// One page of a timeline.
async fn get_feed_handler(
    State(state): State<Arc<AppState>>,
    Query(req): Query<GetFeedRequest>,
) -> Result<Json<GetFeedResponse>, ApiError> {
    let result = state
        .service
        .get_feed(req)
        .await
        .map(Json)
        .map_err(ApiError::from);
    record("/v1/feed", &result);
    result
}

/// Fire-and-forget fan-out of a post by the caller.
async fn add_post_handler(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Json(req): Json<AddPostRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let post_id = req.post_id.clone();
    let result = NewPost::try_from(req)
        .and_then(|post| state.service.add_post(&ctx, post))
        .map(|_detached| {
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "status": "accepted", "post_id": post_id })),
            )
        })
        .map_err(ApiError::from);
    record("/v1/posts", &result);
    result
}
