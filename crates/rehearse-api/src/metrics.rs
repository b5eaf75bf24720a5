//! Metrics middleware and instrumentation for the Rehearse API.
//!
//! Provides Prometheus metrics for:
//! - Request duration and throughput
//! - Evaluation dispatch outcomes (fast path vs queued vs failed)
//! - Rate limit hits

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::server::AppState;

/// API request duration histogram.
pub const API_REQUEST_DURATION: &str = "api_request_duration_seconds";

/// API request counter.
pub const API_REQUEST_TOTAL: &str = "api_request_total";

/// Evaluation dispatch counter, labelled by outcome.
pub const EVALUATIONS_DISPATCHED: &str = "evaluations_dispatched_total";

/// Rate limit hit counter.
pub const RATE_LIMIT_HITS: &str = "rate_limit_hits_total";

const UNMATCHED_ENDPOINT: &str = "unmatched";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes the global metrics recorder with a Prometheus exporter.
///
/// Safe to call multiple times; subsequent calls are no-ops. Returns a handle
/// for rendering metrics, also stored globally for the `/metrics` endpoint.
///
/// # Panics
///
/// Panics if the recorder cannot be installed; the server should not start
/// without metrics.
#[allow(clippy::panic)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|e| panic!("failed to install prometheus recorder: {e}"));

            describe_histogram!(API_REQUEST_DURATION, "Duration of API requests in seconds");
            describe_counter!(API_REQUEST_TOTAL, "Total number of API requests");
            describe_counter!(
                EVALUATIONS_DISPATCHED,
                "Evaluation submissions by dispatch outcome"
            );
            describe_counter!(RATE_LIMIT_HITS, "Requests rejected by rate limiting");

            handle
        })
        .clone()
}

/// Records one rate-limit rejection.
pub fn record_rate_limit_hit(limiter: &'static str) {
    counter!(RATE_LIMIT_HITS, "limiter" => limiter).increment(1);
}

/// Records one evaluation dispatch outcome
/// (`already_complete`/`fast`/`queued`/`failed`).
pub fn record_dispatch(outcome: &'static str) {
    counter!(EVALUATIONS_DISPATCHED, "outcome" => outcome).increment(1);
}

/// Request metrics middleware: duration histogram plus request counter,
/// labelled by matched route and status class.
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let endpoint = endpoint_label(&req);
    let method = req.method().as_str().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    histogram!(
        API_REQUEST_DURATION,
        "endpoint" => endpoint.clone(),
        "method" => method.clone(),
    )
    .record(started.elapsed().as_secs_f64());
    counter!(
        API_REQUEST_TOTAL,
        "endpoint" => endpoint,
        "method" => method,
        "status" => status,
    )
    .increment(1);

    response
}

/// Returns the matched route template, or a fixed label for unmatched paths
/// so cardinality stays bounded.
pub fn endpoint_label(req: &Request<Body>) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_ENDPOINT.to_string(), |p| p.as_str().to_string())
}

/// Serves the Prometheus exposition text.
///
/// Guarded by the optional shared metrics secret: callers provide
/// `X-Metrics-Secret: <secret>` or `Authorization: Bearer <secret>`.
pub async fn serve_metrics(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Response {
    if let Some(secret) = state
        .config
        .metrics_secret
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let presented = req
            .headers()
            .get("x-metrics-secret")
            .and_then(|v| v.to_str().ok())
            .or_else(|| {
                req.headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
            });
        if presented != Some(secret) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let handle = init_metrics();
    handle.render().into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_requests_get_fixed_label() {
        let req = Request::builder()
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(endpoint_label(&req), UNMATCHED_ENDPOINT);
    }
}
