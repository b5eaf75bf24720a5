//! Job queue abstraction for evaluation dispatch.
//!
//! This module provides:
//!
//! - [`JobQueue`]: Trait for enqueueing evaluation jobs to execution backends
//! - [`JobHandle`]: A per-job view supporting point-in-time state reads and a
//!   bounded wait for completion
//! - [`InMemoryJobQueue`]: In-memory queue for tests and single-node runs
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: The producer interface is the same for a broker
//!   (Cloud Tasks, SQS, Redis) or the in-process queue
//! - **Enqueue is the commit point**: `enqueue` returns only after the job is
//!   recorded; a failure is an error the caller must surface, never swallow
//! - **Bounded waits as values**: Waiting for completion yields a
//!   [`WaitOutcome`], so a timeout is an ordinary value on the fast/slow-path
//!   decision, not an error to catch

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, watch};

use crate::error::{Error, Result};
use crate::evaluation::EvaluationRequest;
use crate::id::JobId;

/// Point-in-time lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Recorded but not yet claimed by a worker.
    Waiting,
    /// Claimed by a worker and being processed.
    Active,
    /// The worker committed a result and marked the job done.
    Completed,
    /// The worker reported a terminal failure.
    Failed,
}

impl JobState {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Outcome of a bounded wait for job completion.
///
/// A timeout is not an error: the job keeps running and the caller falls back
/// to polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The job completed within the budget; the result store now has the
    /// committed result.
    Finished,
    /// The budget elapsed first. The job keeps running.
    TimedOut,
    /// The job failed within the budget.
    Failed {
        /// Worker-reported failure reason.
        reason: String,
    },
}

/// Snapshot of a job's state plus its failure reason, if any.
#[derive(Debug, Clone)]
pub struct JobStatus {
    /// Current lifecycle state.
    pub state: JobState,
    /// Present when `state` is [`JobState::Failed`].
    pub failure_reason: Option<String>,
}

impl JobStatus {
    fn waiting() -> Self {
        Self {
            state: JobState::Waiting,
            failure_reason: None,
        }
    }
}

/// A per-job view handed to producers.
///
/// Backed by a watch channel the queue updates on every transition, so state
/// reads are non-blocking and waits are event-driven rather than polled.
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    status: watch::Receiver<JobStatus>,
}

impl JobHandle {
    /// Creates a handle from a status subscription.
    ///
    /// Queue implementations construct one per `job` lookup.
    #[must_use]
    pub fn new(job_id: JobId, status: watch::Receiver<JobStatus>) -> Self {
        Self { job_id, status }
    }

    /// The queue-assigned job ID.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Point-in-time state, non-blocking.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.status.borrow().state
    }

    /// The failure reason, when the job has failed.
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        self.status.borrow().failure_reason.clone()
    }

    /// Waits until the job reaches a terminal state, bounded by `timeout`.
    ///
    /// On [`WaitOutcome::Finished`] the worker's result-store write has
    /// already happened; callers re-read the store by job ID.
    pub async fn wait_until_finished(&mut self, timeout: Duration) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = self.status.borrow().clone();
            match snapshot.state {
                JobState::Completed => return WaitOutcome::Finished,
                JobState::Failed => {
                    return WaitOutcome::Failed {
                        reason: snapshot
                            .failure_reason
                            .unwrap_or_else(|| "unknown failure".to_string()),
                    };
                }
                JobState::Waiting | JobState::Active => {}
            }

            match tokio::time::timeout_at(deadline, self.status.changed()).await {
                Ok(Ok(())) => {}
                // Queue dropped the job without a terminal transition.
                Ok(Err(_)) => {
                    return WaitOutcome::Failed {
                        reason: "job abandoned by queue".to_string(),
                    };
                }
                Err(_) => return WaitOutcome::TimedOut,
            }
        }
    }
}

/// Work queue abstraction for dispatching evaluation jobs.
///
/// Implementations must record the job durably (for the backend's definition
/// of durable) before returning from `enqueue`.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent request handlers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues an evaluation job and returns its queue-assigned ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnqueueFailed`] when the job could not be recorded.
    /// The caller must surface this: an unrecorded job is lost work.
    async fn enqueue(&self, request: EvaluationRequest) -> Result<JobId>;

    /// Looks up a job by ID.
    ///
    /// Returns `None` when the queue has no record of the job (never
    /// enqueued, or already garbage-collected by the backend).
    async fn job(&self, job_id: &JobId) -> Result<Option<JobHandle>>;
}

struct JobRecord {
    request: EvaluationRequest,
    status: watch::Sender<JobStatus>,
}

/// In-memory multi-producer/multi-consumer job queue.
///
/// Durable for the lifetime of the process; production deployments put a
/// broker behind the [`JobQueue`] trait instead. Workers consume through
/// [`InMemoryJobQueue::next_job`] and report through
/// [`InMemoryJobQueue::complete_job`] / [`InMemoryJobQueue::fail_job`].
///
/// Internals use synchronous locks with short critical sections, so a claim
/// has no await points and a worker cancelled mid-shutdown can never strand
/// a popped job.
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    pending: Mutex<VecDeque<JobId>>,
    work_available: Notify,
}

impl std::fmt::Debug for InMemoryJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryJobQueue").finish_non_exhaustive()
    }
}

impl InMemoryJobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Approximate number of jobs not yet claimed by a worker.
    pub fn depth(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Claims the next waiting job, if any.
    ///
    /// The claim atomically transitions the job to [`JobState::Active`], so
    /// no two workers process the same job.
    pub fn try_claim_next(&self) -> Option<(JobId, EvaluationRequest)> {
        let jobs = self
            .jobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let job_id = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()?;
        let record = jobs.get(&job_id)?;
        record.status.send_replace(JobStatus {
            state: JobState::Active,
            failure_reason: None,
        });
        Some((job_id, record.request.clone()))
    }

    /// Waits for and claims the next job.
    pub async fn next_job(&self) -> (JobId, EvaluationRequest) {
        loop {
            if let Some(job) = self.try_claim_next() {
                return job;
            }
            self.work_available.notified().await;
        }
    }

    /// Marks a job completed.
    ///
    /// Workers call this only after the result store write has succeeded;
    /// completion is the signal that the committed result is readable.
    pub fn complete_job(&self, job_id: &JobId) -> Result<()> {
        self.transition(job_id, JobState::Completed, None)
    }

    /// Marks a job failed with a terminal reason.
    pub fn fail_job(&self, job_id: &JobId, reason: impl Into<String>) -> Result<()> {
        self.transition(job_id, JobState::Failed, Some(reason.into()))
    }

    fn transition(
        &self,
        job_id: &JobId,
        state: JobState,
        failure_reason: Option<String>,
    ) -> Result<()> {
        let jobs = self
            .jobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let record = jobs
            .get(job_id)
            .ok_or(Error::JobNotFound { job_id: *job_id })?;
        record.status.send_replace(JobStatus {
            state,
            failure_reason,
        });
        Ok(())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, request: EvaluationRequest) -> Result<JobId> {
        let job_id = JobId::generate();
        let (status_tx, _) = watch::channel(JobStatus::waiting());

        {
            let mut jobs = self
                .jobs
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            jobs.insert(
                job_id,
                JobRecord {
                    request,
                    status: status_tx,
                },
            );
        }
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(job_id);
        self.work_available.notify_one();

        tracing::debug!(job_id = %job_id, "evaluation job enqueued");
        Ok(job_id)
    }

    async fn job(&self, job_id: &JobId) -> Result<Option<JobHandle>> {
        let jobs = self
            .jobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(jobs
            .get(job_id)
            .map(|record| JobHandle::new(*job_id, record.status.subscribe())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::EvaluationPayload;
    use crate::id::RequestId;

    fn request() -> EvaluationRequest {
        EvaluationRequest::new(
            RequestId::generate(),
            EvaluationPayload::Text {
                text: "My approach was to...".to_string(),
            },
            "q-1",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn enqueue_makes_job_visible() {
        let queue = InMemoryJobQueue::new();
        let job_id = queue.enqueue(request()).await.unwrap();

        assert_eq!(queue.depth(), 1);
        let handle = queue.job(&job_id).await.unwrap().unwrap();
        assert_eq!(handle.state(), JobState::Waiting);
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let queue = InMemoryJobQueue::new();
        let job_id = queue.enqueue(request()).await.unwrap();

        let (claimed, _) = queue.try_claim_next().unwrap();
        assert_eq!(claimed, job_id);
        assert!(queue.try_claim_next().is_none());

        let handle = queue.job(&job_id).await.unwrap().unwrap();
        assert_eq!(handle.state(), JobState::Active);
    }

    #[tokio::test]
    async fn wait_observes_completion() {
        let queue = std::sync::Arc::new(InMemoryJobQueue::new());
        let job_id = queue.enqueue(request()).await.unwrap();
        let mut handle = queue.job(&job_id).await.unwrap().unwrap();

        let worker_queue = std::sync::Arc::clone(&queue);
        let worker = tokio::spawn(async move {
            let (claimed, _) = worker_queue.next_job().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            worker_queue.complete_job(&claimed).unwrap();
        });

        let outcome = handle.wait_until_finished(Duration::from_secs(5)).await;
        assert_eq!(outcome, WaitOutcome::Finished);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn wait_times_out_and_job_keeps_running() {
        let queue = InMemoryJobQueue::new();
        let job_id = queue.enqueue(request()).await.unwrap();
        let mut handle = queue.job(&job_id).await.unwrap().unwrap();

        let outcome = handle.wait_until_finished(Duration::from_millis(20)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);

        // Timing out did not cancel or consume the job.
        assert_eq!(queue.depth(), 1);
        assert_eq!(handle.state(), JobState::Waiting);
    }

    #[tokio::test]
    async fn wait_surfaces_failure_reason() {
        let queue = InMemoryJobQueue::new();
        let job_id = queue.enqueue(request()).await.unwrap();
        let mut handle = queue.job(&job_id).await.unwrap().unwrap();

        queue.fail_job(&job_id, "upstream error").unwrap();

        let outcome = handle.wait_until_finished(Duration::from_secs(1)).await;
        assert_eq!(
            outcome,
            WaitOutcome::Failed {
                reason: "upstream error".to_string()
            }
        );
        assert_eq!(handle.failure_reason().as_deref(), Some("upstream error"));
    }

    #[tokio::test]
    async fn unknown_job_lookup_is_none() {
        let queue = InMemoryJobQueue::new();
        assert!(queue.job(&JobId::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transition_on_unknown_job_errors() {
        let queue = InMemoryJobQueue::new();
        let err = queue.complete_job(&JobId::generate()).unwrap_err();
        assert!(matches!(err, Error::JobNotFound { .. }));
    }
}
