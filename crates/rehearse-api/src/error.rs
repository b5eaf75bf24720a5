//! API error types and HTTP response mapping.

use axum::Json;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::HeaderName;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use rehearse_core::Error as CoreError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
    /// Optional request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// HTTP API error with stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    request_id: Option<String>,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Returns an error response for authentication failures.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Returns an error response when the Authorization header is missing.
    #[must_use]
    pub fn missing_auth() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "MISSING_AUTH",
            "Authorization header required",
        )
    }

    /// Returns an error response when the bearer token is invalid.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "INVALID_TOKEN",
            "Invalid bearer token",
        )
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns an error response for conflicts.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Returns a 409 Conflict for in-progress idempotent requests with a
    /// Retry-After hint.
    #[must_use]
    pub fn conflict_in_progress(retry_after_secs: u64) -> Self {
        Self::conflict("Request already in progress").with_retry_after(retry_after_secs)
    }

    /// Returns a 429 for rate-limited requests with a Retry-After hint.
    #[must_use]
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Rate limit exceeded",
        )
        .with_retry_after(retry_after_secs)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Returns a 500 for a failed enqueue.
    ///
    /// The one failure mode where the request is lost; the caller must
    /// resubmit with the same request ID.
    pub fn enqueue_failed(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ENQUEUE_FAILED",
            message,
        )
    }

    /// Attaches a request ID for correlation.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attaches a Retry-After header value in seconds.
    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            request_id: None,
            retry_after_secs: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = self.request_id;
        let retry_after_secs = self.retry_after_secs;
        let mut response = (
            self.status,
            Json(ApiErrorBody {
                code: self.code.to_string(),
                message: self.message,
                request_id: request_id.clone(),
            }),
        )
            .into_response();

        if let Some(request_id) = request_id {
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("x-request-id"), value);
            }
        }

        if let Some(secs) = retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("retry-after"), value);
            }
        }

        response
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidId { message } | CoreError::Validation { message } => {
                Self::bad_request(message)
            }
            CoreError::JobNotFound { job_id } => Self::not_found(format!("job not found: {job_id}")),
            CoreError::EnqueueFailed { message, .. } => Self::enqueue_failed(message),
            CoreError::Storage { message, .. } => Self::internal(message),
            CoreError::EvaluationFailed { message } => Self::internal(message),
            CoreError::MissingResult { job_id } => {
                Self::internal(format!("job {job_id} completed without a result"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_in_progress_has_retry_after() {
        let error = ApiError::conflict_in_progress(5);
        assert_eq!(error.status(), StatusCode::CONFLICT);
        assert_eq!(error.code(), "CONFLICT");

        let response = error.into_response();
        let retry_after = response
            .headers()
            .get("retry-after")
            .expect("Retry-After header should be present");
        assert_eq!(retry_after.to_str().unwrap(), "5");
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let error = ApiError::rate_limited(30);
        assert_eq!(error.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("retry-after").unwrap().to_str().unwrap(),
            "30"
        );
    }

    #[test]
    fn validation_core_error_maps_to_400() {
        let error = ApiError::from(rehearse_core::Error::validation("bad payload"));
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert!(error.message().contains("bad payload"));
    }

    #[test]
    fn enqueue_failure_maps_to_500_with_code() {
        let error = ApiError::from(rehearse_core::Error::enqueue("broker unreachable"));
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.code(), "ENQUEUE_FAILED");
    }
}
