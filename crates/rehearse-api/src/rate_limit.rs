//! Fixed-window rate limiting.
//!
//! Two instances of the same pattern guard the evaluation flow:
//!
//! - **Front door**: per-credential, applied as middleware ahead of the
//!   evaluation routes. Counters live behind [`CounterStore`] so a shared
//!   cache can back them across instances.
//! - **Per-user submissions**: per `user:action` subject, process-local,
//!   applied inside the submission handler. A slightly generous effective
//!   limit under horizontal scaling is an accepted tradeoff for this key.
//!
//! Counting is fixed-window: `(subject, window_start, count)`, with the
//! window reset atomically once its age exceeds the period. When the counter
//! backend fails the limiter **logs and allows**: one explicit policy, the
//! same on every instance.
//!
//! ## Response Headers
//!
//! When rate limited, returns:
//! - `429 Too Many Requests` status
//! - `Retry-After` header with seconds until the window resets
//! - `X-RateLimit-Limit` with the configured limit
//! - `X-RateLimit-Remaining` with remaining quota

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Mutex;

use rehearse_core::Result;

use crate::config::RateLimitConfig;
use crate::context::RequestContext;
use crate::error::ApiError;

// ============================================================================
// Counter Storage
// ============================================================================

/// Windowed counter storage.
///
/// `incr` must atomically reset the counter when `window_start` moves to a
/// new window and return the post-increment count; the in-memory
/// implementation serves single-instance deployments and tests, a shared
/// cache implementation serves fleets.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments the counter for `subject` within the given window and
    /// returns the new count.
    async fn incr(&self, subject: &str, window_start: DateTime<Utc>) -> Result<u32>;
}

/// In-memory counter store.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, (DateTime<Utc>, u32)>>,
}

impl MemoryCounterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, subject: &str, window_start: DateTime<Utc>) -> Result<u32> {
        let mut counters = self.counters.lock().await;
        let entry = counters
            .entry(subject.to_string())
            .or_insert((window_start, 0));
        if entry.0 != window_start {
            *entry = (window_start, 0);
        }
        entry.1 = entry.1.saturating_add(1);
        Ok(entry.1)
    }
}

// ============================================================================
// Fixed-Window Limiter
// ============================================================================

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitDecision {
    /// Request is allowed.
    Allowed {
        /// Configured limit.
        limit: u32,
        /// Remaining requests in the current window.
        remaining: u32,
    },
    /// Request is rate limited.
    Limited {
        /// Configured limit.
        limit: u32,
        /// Seconds until the window resets.
        retry_after_secs: u64,
    },
}

/// One fixed-window limiter instance.
pub struct FixedWindowLimiter {
    name: &'static str,
    store: Arc<dyn CounterStore>,
    limit: u32,
    window_seconds: i64,
}

impl std::fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("name", &self.name)
            .field("limit", &self.limit)
            .field("window_seconds", &self.window_seconds)
            .finish_non_exhaustive()
    }
}

impl FixedWindowLimiter {
    /// Creates a limiter over the given counter store.
    #[must_use]
    pub fn new(
        name: &'static str,
        store: Arc<dyn CounterStore>,
        limit: u32,
        window_seconds: u64,
    ) -> Self {
        Self {
            name,
            store,
            limit,
            window_seconds: i64::try_from(window_seconds.max(1)).unwrap_or(60),
        }
    }

    /// Checks the limit for `subject` at the current time.
    pub async fn check(&self, subject: &str) -> LimitDecision {
        self.check_at(subject, Utc::now()).await
    }

    /// Checks the limit for `subject` at an explicit time (tests inject a
    /// clock here).
    pub async fn check_at(&self, subject: &str, now: DateTime<Utc>) -> LimitDecision {
        let window_start = self.window_start(now);

        let count = match self.store.incr(subject, window_start).await {
            Ok(count) => count,
            Err(err) => {
                // Fail open: availability of the flow wins over precision of
                // the quota. The same policy applies on every instance.
                tracing::warn!(
                    limiter = self.name,
                    error = %err,
                    "counter store unavailable; allowing request"
                );
                return LimitDecision::Allowed {
                    limit: self.limit,
                    remaining: 0,
                };
            }
        };

        if count > self.limit {
            let window_end = window_start + Duration::seconds(self.window_seconds);
            let retry_after_secs =
                u64::try_from((window_end - now).num_seconds().max(1)).unwrap_or(1);
            return LimitDecision::Limited {
                limit: self.limit,
                retry_after_secs,
            };
        }

        LimitDecision::Allowed {
            limit: self.limit,
            remaining: self.limit - count,
        }
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let epoch = now.timestamp();
        let start = epoch - epoch.rem_euclid(self.window_seconds);
        Utc.timestamp_opt(start, 0).single().unwrap_or(now)
    }
}

// ============================================================================
// Rate Limiter State
// ============================================================================

/// Rate limiting state shared across all request handlers.
#[derive(Debug)]
pub struct RateLimitState {
    config: RateLimitConfig,
    /// Per-credential front-door limiter; counter storage is pluggable so a
    /// shared cache keeps fleets consistent.
    front_door: FixedWindowLimiter,
    /// Per-user submission limiter; deliberately process-local.
    user_submissions: FixedWindowLimiter,
}

impl RateLimitState {
    /// Creates rate limit state with in-memory counter stores.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryCounterStore::new()))
    }

    /// Creates rate limit state with an explicit front-door counter store.
    #[must_use]
    pub fn with_store(config: RateLimitConfig, front_door_store: Arc<dyn CounterStore>) -> Self {
        let front_door = FixedWindowLimiter::new(
            "front_door",
            front_door_store,
            config.requests_per_window,
            config.window_seconds,
        );
        let user_submissions = FixedWindowLimiter::new(
            "user_submissions",
            Arc::new(MemoryCounterStore::new()),
            config.user_submissions_per_window,
            config.user_window_seconds,
        );
        Self {
            config,
            front_door,
            user_submissions,
        }
    }

    /// Checks the front-door limit for a credential.
    pub async fn check_credential(&self, credential: &str) -> LimitDecision {
        if !self.config.enabled {
            return LimitDecision::Allowed {
                limit: 0,
                remaining: 0,
            };
        }
        self.front_door.check(credential).await
    }

    /// Checks the per-user limit for one action.
    pub async fn check_user_action(&self, user_id: &str, action: &str) -> LimitDecision {
        if !self.config.enabled {
            return LimitDecision::Allowed {
                limit: 0,
                remaining: 0,
            };
        }
        self.user_submissions
            .check(&format!("{user_id}:{action}"))
            .await
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Front-door rate limiting middleware.
///
/// Extracts the credential from the verified request context (injected by the
/// auth middleware) and applies the per-credential fixed window.
pub async fn rate_limit_middleware(
    State(rate_limit): State<Arc<RateLimitState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (credential, request_id) = req.extensions().get::<RequestContext>().map_or_else(
        || ("unknown".to_string(), "-".to_string()),
        |ctx| (ctx.credential.clone(), ctx.request_id.clone()),
    );

    match rate_limit.check_credential(&credential).await {
        LimitDecision::Allowed { limit, remaining } => {
            let mut response = next.run(req).await;
            if limit > 0 {
                add_rate_limit_headers(response.headers_mut(), limit, remaining);
            }
            response
        }
        LimitDecision::Limited {
            limit,
            retry_after_secs,
        } => {
            tracing::warn!(
                request_id = %request_id,
                limit = limit,
                retry_after_secs = retry_after_secs,
                "rate limit exceeded"
            );
            crate::metrics::record_rate_limit_hit("front_door");

            let mut response = ApiError::rate_limited(retry_after_secs)
                .with_request_id(request_id)
                .into_response();
            add_rate_limit_headers(response.headers_mut(), limit, 0);
            response
        }
    }
}

fn add_rate_limit_headers(headers: &mut axum::http::HeaderMap, limit: u32, remaining: u32) {
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert(header::HeaderName::from_static("x-ratelimit-limit"), v);
    }
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert(header::HeaderName::from_static("x-ratelimit-remaining"), v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rehearse_core::Error;

    fn config(limit: u32, window_seconds: u64) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_window: limit,
            window_seconds,
            user_submissions_per_window: 2,
            user_window_seconds: window_seconds,
        }
    }

    #[tokio::test]
    async fn allows_exactly_limit_requests_then_rejects() {
        let state = RateLimitState::new(config(3, 60));

        for _ in 0..3 {
            let decision = state.check_credential("key-1").await;
            assert!(matches!(decision, LimitDecision::Allowed { .. }));
        }

        let decision = state.check_credential("key-1").await;
        let LimitDecision::Limited {
            retry_after_secs, ..
        } = decision
        else {
            panic!("expected limited, got {decision:?}");
        };
        assert!(retry_after_secs > 0);
    }

    #[tokio::test]
    async fn window_elapse_resets_the_counter() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = FixedWindowLimiter::new("test", store, 1, 60);
        let t0 = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 10).unwrap();

        assert!(matches!(
            limiter.check_at("key-1", t0).await,
            LimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at("key-1", t0 + Duration::seconds(5)).await,
            LimitDecision::Limited { .. }
        ));

        // Next window: the counter resets atomically.
        let next_window = t0 + Duration::seconds(60);
        assert!(matches!(
            limiter.check_at("key-1", next_window).await,
            LimitDecision::Allowed { .. }
        ));
    }

    #[tokio::test]
    async fn retry_after_matches_window_remainder() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = FixedWindowLimiter::new("test", store, 1, 60);
        // 10 seconds into the window; 50 remain.
        let t0 = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 10).unwrap();

        limiter.check_at("key-1", t0).await;
        let LimitDecision::Limited {
            retry_after_secs, ..
        } = limiter.check_at("key-1", t0).await
        else {
            panic!("expected limited");
        };
        assert_eq!(retry_after_secs, 50);
    }

    #[tokio::test]
    async fn subjects_are_independent() {
        let state = RateLimitState::new(config(1, 60));
        assert!(matches!(
            state.check_credential("key-1").await,
            LimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            state.check_credential("key-2").await,
            LimitDecision::Allowed { .. }
        ));
    }

    #[tokio::test]
    async fn disabled_config_always_allows() {
        let state = RateLimitState::new(RateLimitConfig {
            enabled: false,
            ..config(1, 60)
        });
        for _ in 0..50 {
            assert!(matches!(
                state.check_credential("key-1").await,
                LimitDecision::Allowed { limit: 0, .. }
            ));
        }
    }

    #[tokio::test]
    async fn user_action_limiter_is_scoped_to_user_and_action() {
        let state = RateLimitState::new(config(100, 60));

        assert!(matches!(
            state.check_user_action("user-1", "evaluate").await,
            LimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            state.check_user_action("user-1", "evaluate").await,
            LimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            state.check_user_action("user-1", "evaluate").await,
            LimitDecision::Limited { .. }
        ));

        // A different user is unaffected.
        assert!(matches!(
            state.check_user_action("user-2", "evaluate").await,
            LimitDecision::Allowed { .. }
        ));
    }

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn incr(&self, _subject: &str, _window_start: DateTime<Utc>) -> Result<u32> {
            Err(Error::storage("cache unreachable"))
        }
    }

    #[tokio::test]
    async fn backend_failure_fails_open() {
        let limiter = FixedWindowLimiter::new("test", Arc::new(BrokenStore), 1, 60);
        for _ in 0..10 {
            assert!(matches!(
                limiter.check("key-1").await,
                LimitDecision::Allowed { .. }
            ));
        }
    }
}
