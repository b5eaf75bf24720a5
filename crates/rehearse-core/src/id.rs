//! Strongly-typed identifiers for evaluation entities.
//!
//! Two identifier families exist on the evaluation path:
//!
//! - **Request IDs** are supplied by the caller as UUIDs and reused verbatim
//!   on retry; they identify a logical submission.
//! - **Job IDs** are assigned by the queue as ULIDs; they identify one
//!   dispatch of background work and may differ from the request ID.
//!
//! Keeping them as distinct types prevents mixing them up at compile time.
//!
//! # Example
//!
//! ```rust
//! use rehearse_core::id::{JobId, RequestId};
//!
//! let request: RequestId = "7c9e6679-7425-40de-944b-e07fc1f90ae7".parse().unwrap();
//! let job = JobId::generate();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: RequestId = job;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;
use uuid::Uuid;

use crate::error::{Error, Result};

/// The caller-supplied identifier of a logical evaluation submission.
///
/// Must be a well-formed UUID. Callers are responsible for reusing the same
/// value when retrying a submission; the orchestration layer uses it as the
/// durable idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new random request ID.
    ///
    /// Intended for clients and tests; production callers mint their own
    /// UUIDs so retries can reuse them.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a request ID from a raw UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s).map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid request ID '{s}': {e}"),
        })
    }
}

/// The queue-assigned identifier of one dispatched evaluation job.
///
/// ULIDs are lexicographically sortable by creation time and globally unique
/// without coordination, which keeps job listings naturally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    /// Generates a new unique job ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a job ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = self.0.timestamp_ms();
        chrono::DateTime::from_timestamp_millis(i64::try_from(ms).unwrap_or_default())
            .unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s).map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid job ID '{s}': {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_roundtrip() {
        let id = RequestId::generate();
        let s = id.to_string();
        let parsed: RequestId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn request_id_rejects_non_uuid() {
        let err = "not-a-uuid".parse::<RequestId>().unwrap_err();
        assert!(err.to_string().contains("invalid request ID"));
    }

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::generate();
        let s = id.to_string();
        let parsed: JobId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_ids_sort_by_creation() {
        let a = JobId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = JobId::generate();
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn job_id_serializes_transparent() {
        let id = JobId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
