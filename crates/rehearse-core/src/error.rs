//! Error types for the evaluation orchestration domain.

use crate::id::JobId;

/// The result type used throughout rehearse-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on the evaluation path.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier failed to parse.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of the parse failure.
        message: String,
    },

    /// The submission payload is malformed.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the violated constraint.
        message: String,
    },

    /// A job was not found in the queue.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The job ID that was not found.
        job_id: JobId,
    },

    /// The queue refused or failed to accept a job.
    ///
    /// This is the one failure mode where at-least-once delivery is not
    /// achieved: the request is lost and the caller must resubmit.
    #[error("enqueue failed: {message}")]
    EnqueueFailed {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A result store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A worker reported the evaluation itself failed.
    #[error("evaluation failed: {message}")]
    EvaluationFailed {
        /// Worker-reported reason.
        message: String,
    },

    /// A job is observable as completed but no result was committed.
    ///
    /// Workers must write the result store before marking completion, so this
    /// indicates a broken worker; readers report it rather than fabricating a
    /// result.
    #[error("job {job_id} completed without a committed result")]
    MissingResult {
        /// The inconsistent job.
        job_id: JobId,
    },
}

impl Error {
    /// Creates a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new enqueue error.
    #[must_use]
    pub fn enqueue(message: impl Into<String>) -> Self {
        Self::EnqueueFailed {
            message: message.into(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn validation_error_display() {
        let err = Error::validation("text exceeds limit");
        assert!(err.to_string().contains("validation failed"));
        assert!(err.to_string().contains("text exceeds limit"));
    }

    #[test]
    fn missing_result_names_job() {
        let job_id = JobId::generate();
        let err = Error::MissingResult { job_id };
        assert!(err.to_string().contains(&job_id.to_string()));
    }

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "backend gone");
        let err = Error::storage_with_source("failed to persist result", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
    }
}
