//! Evaluation submission and status routes.
//!
//! ## Routes
//!
//! - `POST /evaluations` - Submit an answer for evaluation
//! - `GET  /evaluations/:job_id` - Poll a dispatched evaluation
//!
//! ## Submission flow
//!
//! Validate → result-store lookup (authoritative idempotency) → in-process
//! claim → enqueue → bounded synchronous wait. A fast job answers in one
//! round trip; a slow one hands back a pollable job handle. Timeouts on the
//! wait are the normal slow path, not errors.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use rehearse_core::queue::{JobState, WaitOutcome};
use rehearse_core::{
    EvaluationPayload, EvaluationRequest, EvaluationResult, JobId, RequestId,
};

use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::rate_limit::LimitDecision;
use crate::server::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to submit an answer for evaluation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEvaluationRequest {
    /// Caller-minted UUID identifying this logical submission; reused on
    /// retry.
    pub request_id: String,
    /// Inline answer text. Exactly one of `text` / `audioUrl` is required.
    #[serde(default)]
    pub text: Option<String>,
    /// Reference to an uploaded audio answer.
    #[serde(default)]
    pub audio_url: Option<String>,
    /// The question being answered.
    pub question_id: String,
    /// The practicing user, when known to the client.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Free-form submission metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Terminal or in-flight status of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    /// A committed result is available.
    Completed,
    /// Accepted and dispatched; poll for the outcome.
    Queued,
    /// A worker currently holds the job.
    Processing,
    /// The evaluation terminally failed.
    Failed,
}

/// Worker-reported failure details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusError {
    /// Human-readable failure reason.
    pub message: String,
}

/// Response to a submission or a status poll.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResponse {
    /// Current status.
    pub status: EvaluationStatus,
    /// The committed result, when `status` is `completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<EvaluationResult>,
    /// The dispatched job, when the caller must poll.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Where to poll, when the caller must poll.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_url: Option<String>,
    /// Suggested delay before the next poll; zero for terminal statuses.
    pub poll_after_ms: u64,
    /// Failure details, when `status` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StatusError>,
}

impl EvaluationResponse {
    fn completed(result: EvaluationResult) -> Self {
        Self {
            status: EvaluationStatus::Completed,
            result: Some(result),
            job_id: None,
            poll_url: None,
            poll_after_ms: 0,
            error: None,
        }
    }

    fn queued(job_id: JobId, poll_after_ms: u64) -> Self {
        Self {
            status: EvaluationStatus::Queued,
            result: None,
            job_id: Some(job_id),
            poll_url: Some(poll_url(&job_id)),
            poll_after_ms,
            error: None,
        }
    }

    fn processing(poll_after_ms: u64) -> Self {
        Self {
            status: EvaluationStatus::Processing,
            result: None,
            job_id: None,
            poll_url: None,
            poll_after_ms,
            error: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            status: EvaluationStatus::Failed,
            result: None,
            job_id: None,
            poll_url: None,
            poll_after_ms: 0,
            error: Some(StatusError {
                message: message.into(),
            }),
        }
    }
}

fn poll_url(job_id: &JobId) -> String {
    format!("/api/v1/evaluations/{job_id}")
}

// ============================================================================
// Handlers
// ============================================================================

/// Submits an answer for evaluation.
///
/// Returns `200` with the committed result when the submission is already
/// complete or finishes within the synchronous wait budget, `202` with a
/// pollable job handle otherwise.
pub(crate) async fn submit_evaluation(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Json(body): Json<SubmitEvaluationRequest>,
) -> ApiResult<Response> {
    let http_request_id = ctx.request_id.clone();
    let attach = |err: ApiError| err.with_request_id(http_request_id.clone());

    // 1. Validate before any side effect.
    let request_id: RequestId = body
        .request_id
        .parse()
        .map_err(|err: rehearse_core::Error| attach(err.into()))?;
    let payload = parse_payload(&body).map_err(&attach)?;

    let user_id = body.user_id.clone().or_else(|| ctx.user_id.clone());

    // 2. The result store is the authoritative idempotency check: a retried
    // request ID is answered from here across restarts and instances.
    if let Some(result) = state
        .result_store()
        .get(&request_id)
        .await
        .map_err(|err| attach(err.into()))?
    {
        crate::metrics::record_dispatch("already_complete");
        return Ok((StatusCode::OK, Json(EvaluationResponse::completed(result))).into_response());
    }

    // Submission spends worker and upstream-model budget; the per-user window
    // only meters new work, never cached reads.
    if let Some(user) = user_id.as_deref() {
        if let LimitDecision::Limited {
            retry_after_secs, ..
        } = state.rate_limit().check_user_action(user, "evaluate").await
        {
            crate::metrics::record_rate_limit_hit("user_submissions");
            return Err(attach(ApiError::rate_limited(retry_after_secs)));
        }
    }

    // 3. In-process claim: suppresses a concurrent duplicate from also
    // enqueueing. Best-effort only; the store check above is the durable
    // guarantee.
    let claim_ttl = state.config.orchestration.claim_ttl();
    if !state
        .idempotency()
        .try_claim(&request_id.to_string(), claim_ttl)
    {
        let retry_after = claim_ttl.as_secs().max(1);
        return Err(attach(ApiError::conflict_in_progress(retry_after)));
    }

    let request = build_request(request_id, payload, &body, user_id, state.as_ref())
        .map_err(|err| attach(err.into()))?;

    // 4. Enqueue is the commit point for background work. Failure here means
    // the request is lost: surface it loudly, never continue without a job.
    let job_id = match state.job_queue().enqueue(request).await {
        Ok(job_id) => job_id,
        Err(err) => {
            tracing::error!(
                request_id = %request_id,
                error = %err,
                "enqueue failed; evaluation request lost, caller must resubmit"
            );
            crate::metrics::record_dispatch("enqueue_failed");
            return Err(attach(err.into()));
        }
    };

    let Some(mut handle) = state
        .job_queue()
        .job(&job_id)
        .await
        .map_err(|err| attach(err.into()))?
    else {
        return Err(attach(ApiError::internal(format!(
            "job {job_id} vanished immediately after enqueue"
        ))));
    };

    // 5. Bounded synchronous wait: most evaluations finish in a few seconds,
    // so blocking briefly answers the common case in one round trip while the
    // budget bounds the worst case.
    let outcome = handle
        .wait_until_finished(state.config.orchestration.sync_wait())
        .await;

    match outcome {
        WaitOutcome::Finished => {
            // Completion is signalled after the worker's store write, so the
            // result must be readable by job ID now.
            let result = state
                .result_store()
                .get_by_job(&job_id)
                .await
                .map_err(|err| attach(err.into()))?
                .ok_or_else(|| {
                    attach(ApiError::from(rehearse_core::Error::MissingResult { job_id }))
                })?;
            crate::metrics::record_dispatch("fast");
            tracing::info!(request_id = %request_id, job_id = %job_id, "evaluation completed synchronously");
            Ok((StatusCode::OK, Json(EvaluationResponse::completed(result))).into_response())
        }
        WaitOutcome::TimedOut => {
            crate::metrics::record_dispatch("queued");
            tracing::info!(request_id = %request_id, job_id = %job_id, "evaluation still running; returning poll handle");
            Ok((
                StatusCode::ACCEPTED,
                Json(EvaluationResponse::queued(
                    job_id,
                    state.config.orchestration.poll_after_ms,
                )),
            )
                .into_response())
        }
        WaitOutcome::Failed { reason } => {
            crate::metrics::record_dispatch("failed");
            tracing::warn!(request_id = %request_id, job_id = %job_id, reason = %reason, "evaluation failed");
            Ok((StatusCode::OK, Json(EvaluationResponse::failed(reason))).into_response())
        }
    }
}

/// Polls a dispatched evaluation.
///
/// The result store is consulted first and is authoritative: it may be ahead
/// of a queue that already garbage-collected the job record.
pub(crate) async fn evaluation_status(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(job_id): Path<String>,
) -> ApiResult<Json<EvaluationResponse>> {
    let attach = |err: ApiError| err.with_request_id(ctx.request_id.clone());

    let job_id: JobId = job_id
        .parse()
        .map_err(|err: rehearse_core::Error| attach(err.into()))?;

    if let Some(result) = state
        .result_store()
        .get_by_job(&job_id)
        .await
        .map_err(|err| attach(err.into()))?
    {
        return Ok(Json(EvaluationResponse::completed(result)));
    }

    let Some(handle) = state
        .job_queue()
        .job(&job_id)
        .await
        .map_err(|err| attach(err.into()))?
    else {
        return Err(attach(ApiError::not_found(format!(
            "job not found: {job_id}"
        ))));
    };

    let response = match handle.state() {
        JobState::Waiting | JobState::Active => {
            EvaluationResponse::processing(state.config.orchestration.poll_after_ms)
        }
        JobState::Failed => EvaluationResponse::failed(
            handle
                .failure_reason()
                .unwrap_or_else(|| "unknown failure".to_string()),
        ),
        // Completed without a store row: the worker broke the commit
        // protocol. Report the inconsistency, never fabricate a result.
        JobState::Completed => {
            tracing::error!(job_id = %job_id, "job completed but no result is stored");
            EvaluationResponse::failed("result unavailable for completed job")
        }
    };
    Ok(Json(response))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_payload(body: &SubmitEvaluationRequest) -> Result<EvaluationPayload, ApiError> {
    match (body.text.as_deref(), body.audio_url.as_deref()) {
        (Some(text), None) => Ok(EvaluationPayload::Text {
            text: text.to_string(),
        }),
        (None, Some(audio_url)) => Ok(EvaluationPayload::Audio {
            audio_url: audio_url.to_string(),
        }),
        (Some(_), Some(_)) => Err(ApiError::bad_request(
            "provide exactly one of text or audioUrl, not both",
        )),
        (None, None) => Err(ApiError::bad_request(
            "provide exactly one of text or audioUrl",
        )),
    }
}

fn build_request(
    request_id: RequestId,
    payload: EvaluationPayload,
    body: &SubmitEvaluationRequest,
    user_id: Option<String>,
    state: &AppState,
) -> rehearse_core::Result<EvaluationRequest> {
    // Scrub before the payload is copied anywhere durable (the queue included).
    let payload = match payload {
        EvaluationPayload::Text { text } => EvaluationPayload::Text {
            text: state.scrubber().scrub(&text),
        },
        audio @ EvaluationPayload::Audio { .. } => audio,
    };

    let mut request = EvaluationRequest::new(request_id, payload, body.question_id.clone())?
        .with_metadata(body.metadata.clone());
    if let Some(user) = user_id {
        request = request.with_user(user);
    }
    Ok(request)
}

/// Builds the evaluation route tree.
#[must_use]
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/evaluations", post(submit_evaluation))
        .route("/evaluations/:job_id", get(evaluation_status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(text: Option<&str>, audio: Option<&str>) -> SubmitEvaluationRequest {
        SubmitEvaluationRequest {
            request_id: "7c9e6679-7425-40de-944b-e07fc1f90ae7".to_string(),
            text: text.map(str::to_string),
            audio_url: audio.map(str::to_string),
            question_id: "q-1".to_string(),
            user_id: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn payload_requires_exactly_one_source() {
        assert!(parse_payload(&body(Some("answer"), None)).is_ok());
        assert!(parse_payload(&body(None, Some("https://u/a.webm"))).is_ok());
        assert!(parse_payload(&body(Some("answer"), Some("https://u/a.webm"))).is_err());
        assert!(parse_payload(&body(None, None)).is_err());
    }

    #[test]
    fn poll_url_embeds_job_id() {
        let job_id = JobId::generate();
        let url = poll_url(&job_id);
        assert!(url.starts_with("/api/v1/evaluations/"));
        assert!(url.contains(&job_id.to_string()));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_value(EvaluationStatus::Completed).unwrap();
        assert_eq!(json, "completed");
    }

    #[test]
    fn terminal_responses_have_zero_poll_hint() {
        let failed = EvaluationResponse::failed("upstream error");
        assert_eq!(failed.poll_after_ms, 0);
        assert_eq!(failed.error.unwrap().message, "upstream error");
    }
}
