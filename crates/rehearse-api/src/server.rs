//! API server implementation.
//!
//! Provides health, ready, metrics, and evaluation endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use rehearse_core::idempotency::IdempotencyGuard;
use rehearse_core::queue::{InMemoryJobQueue, JobQueue};
use rehearse_core::result_store::{MemoryResultStore, ResultStore};
use rehearse_core::scrub::{RegexScrubber, TranscriptScrubber};
use rehearse_core::worker::{Evaluator, NoopEvaluator, WorkerPool};

use crate::config::Config;
use crate::rate_limit::RateLimitState;

// ============================================================================
// Health and Ready Responses
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all request handlers.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    store: Arc<dyn ResultStore>,
    queue: Arc<dyn JobQueue>,
    guard: IdempotencyGuard,
    scrubber: Arc<dyn TranscriptScrubber>,
    rate_limit: Arc<RateLimitState>,
    /// In-process workers, when the in-memory queue is in use. Held here so
    /// they live exactly as long as the router that feeds them.
    _workers: Option<WorkerPool>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("store", &"<ResultStore>")
            .field("queue", &"<JobQueue>")
            .field("workers", &self._workers.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Returns the result store.
    #[must_use]
    pub fn result_store(&self) -> &dyn ResultStore {
        self.store.as_ref()
    }

    /// Returns the job queue.
    #[must_use]
    pub fn job_queue(&self) -> &dyn JobQueue {
        self.queue.as_ref()
    }

    /// Returns the idempotency guard.
    #[must_use]
    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// Returns the transcript scrubber.
    #[must_use]
    pub fn scrubber(&self) -> &dyn TranscriptScrubber {
        self.scrubber.as_ref()
    }

    /// Returns the rate limiter state.
    #[must_use]
    pub fn rate_limit(&self) -> &RateLimitState {
        &self.rate_limit
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint handler.
///
/// Returns 200 OK if the service is alive. This is a shallow check
/// that doesn't verify dependencies.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check endpoint handler.
///
/// Returns 200 OK if the service is ready to accept requests. A store read
/// on a synthetic key is sufficient to validate the backend path.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let probe = rehearse_core::RequestId::generate();
    match state.result_store().get(&probe).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some(format!("result store check failed: {e}")),
            }),
        ),
    }
}

// ============================================================================
// Server
// ============================================================================

/// The Rehearse API server.
pub struct Server {
    state: Arc<AppState>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state)
            .finish()
    }
}

impl Server {
    /// Creates a new server with in-memory backends and a no-op evaluator.
    #[must_use]
    pub fn new(config: Config) -> Self {
        ServerBuilder::new().config(config).build()
    }

    /// Creates a new `ServerBuilder`.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Creates the router with all routes and middleware.
    fn create_router(&self) -> Router {
        let state = Arc::clone(&self.state);

        let cors = build_cors_layer(&state.config);
        let auth_layer =
            middleware::from_fn_with_state(Arc::clone(&state), crate::context::auth_middleware);
        let rate_limit_layer = middleware::from_fn_with_state(
            Arc::clone(&state.rate_limit),
            crate::rate_limit::rate_limit_middleware,
        );
        let metrics_layer = middleware::from_fn(crate::metrics::metrics_middleware);

        Router::new()
            // Health, ready, and metrics endpoints (no auth required)
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(crate::metrics::serve_metrics))
            // API routes (auth via RequestContext extractor)
            .nest(
                "/api/v1",
                crate::routes::api_v1_routes()
                    .route_layer(rate_limit_layer)
                    .layer(auth_layer),
            )
            // Middleware (order matters): metrics outermost for timing, then
            // trace, then CORS.
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(metrics_layer)
            .with_state(state)
    }

    /// Returns a router suitable for in-process testing.
    #[must_use]
    pub fn test_router(&self) -> Router {
        self.create_router()
    }

    /// Serves HTTP until ctrl-c.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn serve(self) -> std::io::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.create_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "rehearse-api listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
    }
    tracing::info!("shutdown signal received");
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    let cors_config = &config.cors;
    if cors_config.allowed_origins.is_empty() {
        return CorsLayer::new();
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .max_age(Duration::from_secs(cors_config.max_age_seconds));

    if cors_config.allowed_origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

// ============================================================================
// Server Builder
// ============================================================================

/// Builder wiring the server's collaborators.
///
/// Defaults: in-memory result store, in-memory queue with an in-process
/// worker pool, regex scrubber, no-op evaluator. Supplying an external
/// [`JobQueue`] disables the in-process workers; an external worker fleet
/// consumes that queue instead.
pub struct ServerBuilder {
    config: Config,
    store: Option<Arc<dyn ResultStore>>,
    queue: Option<Arc<dyn JobQueue>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    scrubber: Option<Arc<dyn TranscriptScrubber>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            store: None,
            queue: None,
            evaluator: None,
            scrubber: None,
        }
    }

    /// Sets the full configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Toggles debug mode (header-based auth).
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Sets an explicit result store.
    #[must_use]
    pub fn result_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets an external job queue; in-process workers are not spawned.
    #[must_use]
    pub fn job_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Sets the evaluation collaborator used by in-process workers.
    #[must_use]
    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Sets the transcript scrubber.
    #[must_use]
    pub fn scrubber(mut self, scrubber: Arc<dyn TranscriptScrubber>) -> Self {
        self.scrubber = Some(scrubber);
        self
    }

    /// Builds the server, spawning in-process workers unless an external
    /// queue was supplied.
    #[must_use]
    pub fn build(self) -> Server {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryResultStore::new()));
        let scrubber = self
            .scrubber
            .unwrap_or_else(|| Arc::new(RegexScrubber::new()));
        let rate_limit = Arc::new(RateLimitState::new(self.config.rate_limit.clone()));

        let (queue, workers): (Arc<dyn JobQueue>, Option<WorkerPool>) = match self.queue {
            Some(queue) => (queue, None),
            None => {
                let queue = Arc::new(InMemoryJobQueue::new());
                let evaluator = self
                    .evaluator
                    .unwrap_or_else(|| Arc::new(NoopEvaluator));
                let workers = WorkerPool::spawn(
                    Arc::clone(&queue),
                    Arc::clone(&store),
                    evaluator,
                    self.config.orchestration.worker_count,
                );
                (queue, Some(workers))
            }
        };

        let state = AppState {
            config: self.config,
            store,
            queue,
            guard: IdempotencyGuard::new(),
            scrubber,
            rate_limit,
            _workers: workers,
        };

        Server {
            state: Arc::new(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_defaults_to_memory_backends() {
        let server = ServerBuilder::new().debug(true).build();
        assert!(server.config().debug);
        assert!(server.state._workers.is_some());
    }

    #[test]
    fn external_queue_disables_in_process_workers() {
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
        let server = ServerBuilder::new().debug(true).job_queue(queue).build();
        assert!(server.state._workers.is_none());
    }

    #[test]
    fn cors_layer_disabled_by_default() {
        // No origins configured: the layer is a pass-through.
        let config = Config::default();
        assert!(config.cors.allowed_origins.is_empty());
        let _layer = build_cors_layer(&config);
    }
}
