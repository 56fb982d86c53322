//! Error types for the merge gate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for gate operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Querying the CI build-status source failed.
    #[error("CI query failed: {0}")]
    Ci(String),

    /// A version-control host call failed outside a gated step.
    #[error("VCS operation failed: {0}")]
    Vcs(String),

    /// Posting the validation-request comment failed.
    #[error("failed to comment on PR {number}: {reason}")]
    Comment { number: u64, reason: String },

    /// Waiting for the validation run to start failed.
    #[error("validation run for PR {number} did not start: {reason}")]
    ValidationStart { number: u64, reason: String },

    /// Waiting for the validation result failed.
    #[error("validation result for PR {number} unavailable: {reason}")]
    ValidationResult { number: u64, reason: String },

    /// The merge call failed.
    #[error("failed to merge PR {number}: {reason}")]
    Merge { number: u64, reason: String },

    /// The stability wait exhausted its retry policy.
    #[error("builds not stable after {attempts} sweeps")]
    StabilityTimeout { attempts: u32 },

    /// The operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Ci(_) => ErrorKind::Ci,
            Error::Vcs(_) => ErrorKind::Vcs,
            Error::Comment { .. } => ErrorKind::Comment,
            Error::ValidationStart { .. } => ErrorKind::ValidationStart,
            Error::ValidationResult { .. } => ErrorKind::ValidationResult,
            Error::Merge { .. } => ErrorKind::Merge,
            Error::StabilityTimeout { .. } => ErrorKind::Stability,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
        }
    }

    /// Converts this error into the record kept in gate state.
    pub fn record(&self) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Category of a recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid or unreadable configuration.
    Config,
    /// Build server query failed.
    Ci,
    /// Version-control call failed outside a gated step.
    Vcs,
    /// Validation-request comment failed.
    Comment,
    /// Validation run never started.
    ValidationStart,
    /// Validation outcome could not be read.
    ValidationResult,
    /// Merge failed.
    Merge,
    /// Builds stayed unstable past the retry policy.
    Stability,
    /// Evaluation was cancelled.
    Cancelled,
    /// Local I/O failed.
    Io,
    /// JSON encoding or decoding failed.
    Json,
}

/// Error as stored in gate state and rendered in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

/// Result type alias for gate operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_carries_kind_and_message() {
        let err = Error::Comment {
            number: 42,
            reason: "rate limited".to_string(),
        };
        let record = err.record();

        assert_eq!(record.kind, ErrorKind::Comment);
        assert_eq!(record.message, "failed to comment on PR 42: rate limited");
    }

    #[test]
    fn error_kind_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::ValidationStart).unwrap(),
            "\"validation_start\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::Merge).unwrap(),
            "\"merge\""
        );
    }

    #[test]
    fn stability_timeout_maps_to_stability_kind() {
        let err = Error::StabilityTimeout { attempts: 3 };
        assert_eq!(err.kind(), ErrorKind::Stability);
        assert!(err.to_string().contains("3 sweeps"));
    }
}
