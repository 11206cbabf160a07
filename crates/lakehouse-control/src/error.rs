//! Error types for lakehouse-control.
//!
//! Remote failures (a fetch that rejected, a pipeline step that failed) are
//! not errors at this level: they are recorded as [`ErrorDetail`] on the
//! store or operation they belong to. [`ControlError`] is reserved for
//! misuse of the core's contracts and for configuration problems.
//!
//! [`ErrorDetail`]: crate::types::ErrorDetail

use crate::types::{AttemptId, InstallationId};

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the control core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// A registry was resolved with a key that cannot identify a store.
    #[error("invalid store key: {0:?}")]
    InvalidKey(String),

    /// A caller broke an operation lifecycle contract.
    #[error("contract violation on operation {operation}: {reason}")]
    ContractViolation {
        /// Operation label.
        operation: String,
        /// What was wrong.
        reason: String,
    },

    /// A completion arrived for an operation that already finished.
    #[error("stale completion for operation {operation}: already {status}")]
    StaleCompletion {
        /// Operation label.
        operation: String,
        /// Terminal status the operation is already in.
        status: &'static str,
    },

    /// A report was made against an attempt that has been replaced.
    #[error("report for superseded attempt {actual}, current attempt is {expected}")]
    SupersededAttempt {
        /// Attempt currently being tracked.
        expected: AttemptId,
        /// Attempt the report was made for.
        actual: AttemptId,
    },

    /// The referenced operation does not exist in the current attempt.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// A deployment was triggered while another attempt was still running.
    #[error("deployment already in progress for installation {0}")]
    DeploymentInProgress(InstallationId),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a contract violation error.
    #[must_use]
    pub fn contract(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error signals a programming mistake by the caller rather
    /// than an expected race (stale or superseded reports).
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(self, Self::InvalidKey(_) | Self::ContractViolation { .. })
    }
}
