//! Worker pool executing evaluation jobs.
//!
//! Workers are the only place the evaluation collaborator (the AI call) is
//! invoked. The commit protocol is fixed: write the result store first, then
//! mark the job completed. A job marked completed without a store write is an
//! inconsistency readers must report, never paper over.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::evaluation::{CoachingNotes, EvaluationRequest, EvaluationResult, UsageCounters};
use crate::queue::InMemoryJobQueue;
use crate::result_store::ResultStore;

/// What the evaluation collaborator produces for one request.
///
/// Timing and identity fields are added by the worker when it builds the
/// durable [`EvaluationResult`].
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    /// Overall score, 0-100.
    pub score: u8,
    /// Narrative feedback.
    pub feedback: String,
    /// Structured coaching fields.
    pub coaching: CoachingNotes,
    /// Upstream resource usage.
    pub usage: UsageCounters,
}

/// The external evaluation collaborator (AI scoring/transcription call).
///
/// Invoked only by workers; the request-facing orchestration layer never
/// calls it directly.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Evaluates one submission.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EvaluationFailed`] (or a transport error) when the
    /// upstream call fails; the worker records the job as failed.
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationOutcome>;
}

/// Evaluator that scores nothing, for wiring and dev runs without an
/// upstream model.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvaluator;

#[async_trait]
impl Evaluator for NoopEvaluator {
    async fn evaluate(&self, _request: &EvaluationRequest) -> Result<EvaluationOutcome> {
        Ok(EvaluationOutcome {
            score: 0,
            feedback: "evaluation backend not configured".to_string(),
            coaching: CoachingNotes::default(),
            usage: UsageCounters::default(),
        })
    }
}

/// A pool of worker tasks consuming the in-process job queue.
///
/// Each worker loops: claim a job, invoke the evaluator, commit the result,
/// mark the job done. Dropping the pool signals shutdown; workers finish
/// their current job and stop. [`WorkerPool::shutdown`] additionally waits
/// for them to exit.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawns `worker_count` workers against the given queue, store, and
    /// evaluator.
    #[must_use]
    pub fn spawn(
        queue: Arc<InMemoryJobQueue>,
        store: Arc<dyn ResultStore>,
        evaluator: Arc<dyn Evaluator>,
        worker_count: usize,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let workers = (0..worker_count.max(1))
            .map(|index| {
                let queue = Arc::clone(&queue);
                let store = Arc::clone(&store);
                let evaluator = Arc::clone(&evaluator);
                let mut shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    tracing::debug!(worker = index, "evaluation worker started");
                    loop {
                        let (job_id, request) = tokio::select! {
                            job = queue.next_job() => job,
                            _ = shutdown_rx.changed() => break,
                        };
                        process_job(&queue, store.as_ref(), evaluator.as_ref(), job_id, request)
                            .await;
                    }
                    tracing::debug!(worker = index, "evaluation worker stopped");
                })
            })
            .collect();

        Self { workers, shutdown }
    }

    /// Signals workers to stop and waits for them to exit.
    ///
    /// In-flight jobs run to completion; only idle workers stop immediately.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn process_job(
    queue: &InMemoryJobQueue,
    store: &dyn ResultStore,
    evaluator: &dyn Evaluator,
    job_id: crate::id::JobId,
    request: EvaluationRequest,
) {
    let started = Instant::now();
    let request_id = request.request_id;

    let outcome = match evaluator.evaluate(&request).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(
                job_id = %job_id,
                request_id = %request_id,
                error = %err,
                "evaluation failed"
            );
            record_failure(queue, &job_id, err.to_string());
            return;
        }
    };

    let result = EvaluationResult {
        request_id,
        job_id,
        score: outcome.score.min(100),
        feedback: outcome.feedback,
        coaching: outcome.coaching,
        processing_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        usage: outcome.usage,
        created_at: Utc::now(),
    };

    // The store write is the commit point. Completion is only signalled once
    // the result is readable, so a synchronous waiter re-reading by job ID
    // always finds it.
    if let Err(err) = store.put(result).await {
        tracing::error!(
            job_id = %job_id,
            request_id = %request_id,
            error = %err,
            "result commit failed; reporting job as failed"
        );
        record_failure(queue, &job_id, format!("result commit failed: {err}"));
        return;
    }

    if let Err(err) = queue.complete_job(&job_id) {
        tracing::error!(job_id = %job_id, error = %err, "failed to mark job completed");
    }
}

fn record_failure(queue: &InMemoryJobQueue, job_id: &crate::id::JobId, reason: String) {
    if let Err(err) = queue.fail_job(job_id, reason) {
        tracing::error!(job_id = %job_id, error = %err, "failed to mark job failed");
    }
}

/// Returns [`Error::EvaluationFailed`] with the given reason.
///
/// Convenience for evaluator implementations mapping upstream errors.
#[must_use]
pub fn evaluation_failed(message: impl Into<String>) -> Error {
    Error::EvaluationFailed {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::EvaluationPayload;
    use crate::id::RequestId;
    use crate::queue::{JobQueue, WaitOutcome};
    use crate::result_store::MemoryResultStore;
    use std::time::Duration;

    struct ScriptedEvaluator {
        score: u8,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl Evaluator for ScriptedEvaluator {
        async fn evaluate(&self, _request: &EvaluationRequest) -> Result<EvaluationOutcome> {
            if let Some(reason) = &self.fail_with {
                return Err(evaluation_failed(reason.clone()));
            }
            Ok(EvaluationOutcome {
                score: self.score,
                feedback: "Good use of concrete metrics".to_string(),
                coaching: CoachingNotes::default(),
                usage: UsageCounters {
                    prompt_tokens: 250,
                    completion_tokens: 120,
                },
            })
        }
    }

    fn request() -> EvaluationRequest {
        EvaluationRequest::new(
            RequestId::generate(),
            EvaluationPayload::Text {
                text: "We cut latency by 40% by...".to_string(),
            },
            "q-impact-2",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn worker_commits_result_before_completion() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let store = Arc::new(MemoryResultStore::new());
        let pool = WorkerPool::spawn(
            Arc::clone(&queue),
            Arc::clone(&store) as Arc<dyn ResultStore>,
            Arc::new(ScriptedEvaluator {
                score: 90,
                fail_with: None,
            }),
            2,
        );

        let submitted = request();
        let request_id = submitted.request_id;
        let job_id = queue.enqueue(submitted).await.unwrap();
        let mut handle = queue.job(&job_id).await.unwrap().unwrap();

        let outcome = handle.wait_until_finished(Duration::from_secs(5)).await;
        assert_eq!(outcome, WaitOutcome::Finished);

        // Completion implies the result is already readable by both indexes.
        let by_job = store.get_by_job(&job_id).await.unwrap().unwrap();
        assert_eq!(by_job.score, 90);
        assert_eq!(by_job.usage.prompt_tokens, 250);
        let by_request = store.get(&request_id).await.unwrap().unwrap();
        assert_eq!(by_request.job_id, job_id);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn worker_records_evaluator_failure() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let store = Arc::new(MemoryResultStore::new());
        let pool = WorkerPool::spawn(
            Arc::clone(&queue),
            Arc::clone(&store) as Arc<dyn ResultStore>,
            Arc::new(ScriptedEvaluator {
                score: 0,
                fail_with: Some("upstream error".to_string()),
            }),
            1,
        );

        let job_id = queue.enqueue(request()).await.unwrap();
        let mut handle = queue.job(&job_id).await.unwrap().unwrap();

        let outcome = handle.wait_until_finished(Duration::from_secs(5)).await;
        assert!(matches!(
            outcome,
            WaitOutcome::Failed { reason } if reason.contains("upstream error")
        ));
        assert!(store.is_empty().await);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn pool_drains_queued_jobs_across_workers() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let store = Arc::new(MemoryResultStore::new());
        let pool = WorkerPool::spawn(
            Arc::clone(&queue),
            Arc::clone(&store) as Arc<dyn ResultStore>,
            Arc::new(ScriptedEvaluator {
                score: 70,
                fail_with: None,
            }),
            4,
        );

        let mut handles = Vec::new();
        for _ in 0..10 {
            let job_id = queue.enqueue(request()).await.unwrap();
            handles.push(queue.job(&job_id).await.unwrap().unwrap());
        }

        for handle in &mut handles {
            let outcome = handle.wait_until_finished(Duration::from_secs(5)).await;
            assert_eq!(outcome, WaitOutcome::Finished);
        }
        assert_eq!(store.len().await, 10);

        pool.shutdown().await;
    }
}
