//! Process-local idempotency claims.
//!
//! The guard suppresses near-simultaneous duplicate submissions (double
//! clicks, client retry storms) from each starting background work within
//! this process. It is deliberately **not** shared across instances: the
//! durable result store is the authoritative cross-instance idempotency
//! check, and a claim that slips through on another instance only costs one
//! redundant job whose identical result write is a no-op.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A short-TTL claim cache keyed by request ID.
///
/// `try_claim` succeeds for a given key at most once per TTL window. Expired
/// entries are evicted opportunistically before each claim attempt.
#[derive(Debug, Default)]
pub struct IdempotencyGuard {
    claims: Mutex<HashMap<String, Instant>>,
}

impl IdempotencyGuard {
    /// Creates an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a claim for `key` unless an unexpired one exists.
    ///
    /// Returns true when this caller now holds the claim.
    pub fn try_claim(&self, key: &str, ttl: Duration) -> bool {
        self.try_claim_at(key, ttl, Instant::now())
    }

    /// Non-mutating check for an unexpired claim.
    pub fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        self.claims
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .is_some_and(|expires_at| *expires_at > now)
    }

    /// Evicts expired entries.
    ///
    /// Runs before every claim attempt; callers may also invoke it from a
    /// timer to bound memory between bursts.
    pub fn cleanup(&self, now: Instant) {
        self.claims
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|_, expires_at| *expires_at > now);
    }

    fn try_claim_at(&self, key: &str, ttl: Duration, now: Instant) -> bool {
        let mut claims = self
            .claims
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        claims.retain(|_, expires_at| *expires_at > now);

        if claims.get(key).is_some_and(|expires_at| *expires_at > now) {
            return false;
        }
        claims.insert(key.to_string(), now + ttl);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_millis(50);

    #[test]
    fn second_claim_within_ttl_is_refused() {
        let guard = IdempotencyGuard::new();
        assert!(guard.try_claim("req-1", TTL));
        assert!(!guard.try_claim("req-1", TTL));
    }

    #[test]
    fn claim_succeeds_again_after_expiry() {
        let guard = IdempotencyGuard::new();
        let start = Instant::now();
        assert!(guard.try_claim_at("req-1", TTL, start));
        assert!(!guard.try_claim_at("req-1", TTL, start + TTL / 2));
        assert!(guard.try_claim_at("req-1", TTL, start + TTL + Duration::from_millis(1)));
    }

    #[test]
    fn distinct_keys_are_independent() {
        let guard = IdempotencyGuard::new();
        assert!(guard.try_claim("req-1", TTL));
        assert!(guard.try_claim("req-2", TTL));
    }

    #[test]
    fn exists_reflects_claim_state() {
        let guard = IdempotencyGuard::new();
        assert!(!guard.exists("req-1"));
        guard.try_claim("req-1", TTL);
        assert!(guard.exists("req-1"));
    }

    #[test]
    fn cleanup_evicts_expired_entries() {
        let guard = IdempotencyGuard::new();
        let start = Instant::now();
        guard.try_claim_at("req-1", TTL, start);
        guard.cleanup(start + TTL + Duration::from_millis(1));
        assert!(!guard.exists("req-1"));
    }
}
