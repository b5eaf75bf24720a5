//! The evaluation data model.
//!
//! [`EvaluationRequest`] is the immutable, validated submission that travels
//! from the HTTP handler through the queue to a worker.
//! [`EvaluationResult`] is the durable outcome committed by the worker,
//! dual-indexed by request ID and job ID.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::{JobId, RequestId};

/// Upper bound on inline answer text, in bytes.
pub const MAX_TEXT_BYTES: usize = 64 * 1024;

/// The content being evaluated: exactly one of inline text or a reference to
/// an uploaded audio artifact.
///
/// Workers match exhaustively on this; adding a variant is a deliberate
/// protocol change, not a payload-key convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EvaluationPayload {
    /// An inline transcript or typed answer.
    #[serde(rename_all = "camelCase")]
    Text {
        /// The answer text. Scrubbed of PII before it is persisted anywhere.
        text: String,
    },
    /// A reference to an audio artifact to transcribe and evaluate.
    #[serde(rename_all = "camelCase")]
    Audio {
        /// Location of the uploaded audio.
        audio_url: String,
    },
}

impl EvaluationPayload {
    /// Returns the inline text, if this is a text payload.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Audio { .. } => None,
        }
    }
}

/// A validated evaluation submission.
///
/// Immutable once accepted: the queue carries a copy of this struct as the
/// job payload, and workers never mutate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    /// Caller-supplied idempotency identity for this logical submission.
    pub request_id: RequestId,
    /// What is being evaluated.
    pub payload: EvaluationPayload,
    /// The interview question being answered.
    pub question_id: String,
    /// The practicing user, when authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Free-form submission metadata (client version, pack ID, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl EvaluationRequest {
    /// Creates a validated request.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `question_id` is empty, the text payload
    /// exceeds [`MAX_TEXT_BYTES`], or an audio reference is blank.
    pub fn new(
        request_id: RequestId,
        payload: EvaluationPayload,
        question_id: impl Into<String>,
    ) -> Result<Self> {
        let question_id = question_id.into();
        if question_id.trim().is_empty() {
            return Err(Error::validation("questionId must not be empty"));
        }

        match &payload {
            EvaluationPayload::Text { text } => {
                if text.trim().is_empty() {
                    return Err(Error::validation("text must not be empty"));
                }
                if text.len() > MAX_TEXT_BYTES {
                    return Err(Error::validation(format!(
                        "text exceeds {MAX_TEXT_BYTES} bytes"
                    )));
                }
            }
            EvaluationPayload::Audio { audio_url } => {
                if audio_url.trim().is_empty() {
                    return Err(Error::validation("audioUrl must not be empty"));
                }
            }
        }

        Ok(Self {
            request_id,
            payload,
            question_id,
            user_id: None,
            metadata: HashMap::new(),
        })
    }

    /// Attaches the submitting user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attaches submission metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Structured coaching produced alongside the numeric score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachingNotes {
    /// What the answer did well.
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Concrete areas to improve.
    #[serde(default)]
    pub improvements: Vec<String>,
    /// An optional reworded model answer fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_phrasing: Option<String>,
}

/// Token accounting for the upstream model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounters {
    /// Tokens sent to the model.
    pub prompt_tokens: u32,
    /// Tokens generated by the model.
    pub completion_tokens: u32,
}

/// The durable outcome of one evaluation.
///
/// Written exactly once per request by the worker that completes the job; all
/// later readers (the synchronous handler, the poll endpoint, duplicate
/// submissions) are read-only consumers. Re-delivered writes with identical
/// content are no-ops at the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// The logical submission this result answers.
    pub request_id: RequestId,
    /// The job whose worker committed this result.
    pub job_id: JobId,
    /// Overall score, 0-100.
    pub score: u8,
    /// Narrative feedback.
    pub feedback: String,
    /// Structured coaching fields.
    #[serde(default)]
    pub coaching: CoachingNotes,
    /// Wall-clock processing duration in milliseconds.
    pub processing_ms: u64,
    /// Upstream resource usage.
    #[serde(default)]
    pub usage: UsageCounters,
    /// When the result was committed.
    pub created_at: DateTime<Utc>,
}

impl EvaluationResult {
    /// Returns true when `other` carries the same evaluation content.
    ///
    /// Timing fields and the committing job are excluded: a duplicate job
    /// that produced the same score and coaching is the same result.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.request_id == other.request_id
            && self.score == other.score
            && self.feedback == other.feedback
            && self.coaching == other.coaching
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_request(text: &str) -> Result<EvaluationRequest> {
        EvaluationRequest::new(
            RequestId::generate(),
            EvaluationPayload::Text {
                text: text.to_string(),
            },
            "q-behavioral-01",
        )
    }

    #[test]
    fn accepts_plain_text_submission() {
        let request = text_request("I led the migration by...").unwrap();
        assert_eq!(request.question_id, "q-behavioral-01");
        assert!(request.user_id.is_none());
    }

    #[test]
    fn rejects_empty_text() {
        let err = text_request("   ").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn rejects_oversized_text() {
        let big = "a".repeat(MAX_TEXT_BYTES + 1);
        let err = text_request(&big).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn rejects_blank_question() {
        let err = EvaluationRequest::new(
            RequestId::generate(),
            EvaluationPayload::Text {
                text: "answer".to_string(),
            },
            "  ",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn rejects_blank_audio_url() {
        let err = EvaluationRequest::new(
            RequestId::generate(),
            EvaluationPayload::Audio {
                audio_url: String::new(),
            },
            "q-1",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn payload_serializes_tagged() {
        let payload = EvaluationPayload::Audio {
            audio_url: "https://uploads.example/answer.webm".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "audio");
        assert_eq!(json["audioUrl"], "https://uploads.example/answer.webm");
    }

    #[test]
    fn same_content_ignores_job_and_timing() {
        let request_id = RequestId::generate();
        let base = EvaluationResult {
            request_id,
            job_id: JobId::generate(),
            score: 85,
            feedback: "Solid structure".to_string(),
            coaching: CoachingNotes::default(),
            processing_ms: 1200,
            usage: UsageCounters::default(),
            created_at: Utc::now(),
        };
        let duplicate = EvaluationResult {
            job_id: JobId::generate(),
            processing_ms: 900,
            ..base.clone()
        };
        assert!(base.same_content(&duplicate));

        let different = EvaluationResult {
            score: 40,
            ..base.clone()
        };
        assert!(!base.same_content(&different));
    }
}
