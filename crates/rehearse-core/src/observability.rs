//! Observability infrastructure.
//!
//! Structured logging with consistent spans across the evaluation path.
//! This module provides initialization helpers and span constructors so the
//! API handlers and workers log the same fields for the same operations.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `rehearse_core=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for orchestration operations with standard fields.
#[must_use]
pub fn evaluation_span(operation: &str, request_id: &str) -> Span {
    tracing::info_span!(
        "evaluation",
        op = operation,
        request_id = request_id,
    )
}

/// Creates a span for worker job execution.
#[must_use]
pub fn worker_span(job_id: &str) -> Span {
    tracing::info_span!("worker", job_id = job_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn spans_carry_operation_fields() {
        let span = evaluation_span("submit", "7c9e6679-7425-40de-944b-e07fc1f90ae7");
        assert!(!span.is_disabled() || span.is_none());
    }
}
