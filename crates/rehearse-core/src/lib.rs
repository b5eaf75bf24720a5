//! # rehearse-core
//!
//! Evaluation orchestration domain for the Rehearse interview-practice
//! platform.
//!
//! This crate implements the request-to-result path for AI-backed answer
//! evaluations, providing:
//!
//! - **Durable results**: A dual-indexed result store that is the source of
//!   truth for idempotent retries across instances
//! - **Background dispatch**: A job queue abstraction with a bounded
//!   wait-for-completion primitive
//! - **Duplicate suppression**: A process-local idempotency claim cache
//! - **Worker execution**: A worker pool that invokes the evaluation
//!   collaborator and commits results before signalling completion
//!
//! ## Core Concepts
//!
//! - **Request**: A caller-supplied submission, identified by a UUID the
//!   caller reuses on retry
//! - **Job**: A unit of background work created when a request is dispatched,
//!   identified by a queue-assigned ULID
//! - **Result**: The durable evaluation outcome, written exactly once per
//!   request by the worker that completes the job
//!
//! ## Guarantees
//!
//! - **At-least-once**: A request is either durably queued or the caller sees
//!   an error; completed work is never lost
//! - **Idempotent reads**: Retried submissions with the same request ID
//!   observe the first result, never a second evaluation
//! - **Commit ordering**: The result store write happens before a job is
//!   observable as completed

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod error;
pub mod evaluation;
pub mod id;
pub mod idempotency;
pub mod observability;
pub mod queue;
pub mod result_store;
pub mod scrub;
pub mod worker;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::evaluation::{
        CoachingNotes, EvaluationPayload, EvaluationRequest, EvaluationResult, UsageCounters,
    };
    pub use crate::id::{JobId, RequestId};
    pub use crate::idempotency::IdempotencyGuard;
    pub use crate::queue::{InMemoryJobQueue, JobHandle, JobQueue, JobState, WaitOutcome};
    pub use crate::result_store::{MemoryResultStore, ResultStore};
    pub use crate::scrub::{RegexScrubber, TranscriptScrubber};
    pub use crate::worker::{EvaluationOutcome, Evaluator, NoopEvaluator, WorkerPool};
}

pub use error::{Error, Result};
pub use evaluation::{
    CoachingNotes, EvaluationPayload, EvaluationRequest, EvaluationResult, UsageCounters,
};
pub use id::{JobId, RequestId};
