// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for SnapSort

use thiserror::Error;

/// Result type alias for SnapSort operations
pub type Result<T> = std::result::Result<T, SnapsortError>;

/// SnapSort error types
#[derive(Error, Debug)]
pub enum SnapsortError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Classifier returned status {status}: {body}")]
    ClassifierStatus { status: u16, body: String },

    #[error("Malformed classifier response: {0}")]
    MalformedResponse(String),

    #[error("Classification failed after {attempts} attempts: {last}")]
    ClassificationFailed {
        attempts: u32,
        last: Box<SnapsortError>,
    },

    #[error("Cancelled")]
    Cancelled,

    #[error("Job panicked: {0}")]
    JobPanicked(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SnapsortError {
    /// Whether a classifier attempt that failed this way may be retried.
    ///
    /// Transport failures, malformed payloads, 408, 429 and 5xx are transient.
    /// Any other status (bad request, bad credential, unknown model) fails fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(_) | Self::MalformedResponse(_) => true,
            Self::ClassifierStatus { status, .. } => {
                matches!(*status, 408 | 429) || (500..=599).contains(status)
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> SnapsortError {
        SnapsortError::ClassifierStatus {
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn test_transient_statuses_are_retryable() {
        assert!(status(429).is_retryable());
        assert!(status(408).is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(SnapsortError::MalformedResponse("empty".into()).is_retryable());
    }

    #[test]
    fn test_client_errors_fail_fast() {
        assert!(!status(400).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!SnapsortError::Cancelled.is_retryable());
    }
}
