//! Custom error types for okup.

use thiserror::Error;

/// Errors that can occur while driving OKE upgrades.
///
/// Per-target conditions (a poll deadline elapsing, a parent cluster
/// failing) are not errors — they are recorded as outcomes and never abort
/// the run. Everything here either aborts the run before dispatch
/// (`Validation`, `NotFound`, `Report`) or is classified so callers can
/// decide whether to retry (`TransientCloud` vs `FatalCloud`).
#[derive(Error, Debug)]
pub enum OkupError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("No match in report: {0}")]
    NotFound(String),

    #[error("Failed to read report {path}: {detail}")]
    Report { path: String, detail: String },

    #[error("[{operation}] transient cloud error: {detail}")]
    TransientCloud { operation: String, detail: String },

    #[error("[{operation}] cloud error: {detail}")]
    FatalCloud { operation: String, detail: String },

    #[error("Duplicate outcome recorded for {0}")]
    DuplicateOutcome(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OkupError {
    /// Classify a cloud API failure by HTTP status code.
    ///
    /// Rate limiting and server-side errors are worth retrying; everything
    /// else (bad request, auth, missing resource) is not.
    pub fn cloud(operation: &str, status: u16, detail: impl Into<String>) -> Self {
        let operation = operation.to_string();
        let detail = detail.into();

        if status == 429 || (500..600).contains(&status) {
            OkupError::TransientCloud { operation, detail }
        } else {
            OkupError::FatalCloud { operation, detail }
        }
    }

    /// Network-level failures (connect, timeout, TLS) are retryable.
    pub fn network(operation: &str, detail: impl Into<String>) -> Self {
        OkupError::TransientCloud {
            operation: operation.to_string(),
            detail: detail.into(),
        }
    }

    /// Returns true if the caller may retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, OkupError::TransientCloud { .. })
    }
}
