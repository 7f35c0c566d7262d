//! Error types for the safety layer

use thiserror::Error;

use crate::cancel::CancelReason;
use crate::schema::ValidationError;

/// Boxed error type accepted from wrapped operations.
pub use tower::BoxError;

/// Result type alias for the safety layer
pub type Result<T> = std::result::Result<T, SafetyError>;

/// Main error type for the safety layer
#[derive(Debug, Error)]
pub enum SafetyError {
    /// A response payload did not match its schema
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The logical request was cancelled
    #[error("operation cancelled: {reason}")]
    Cancelled { reason: CancelReason },

    /// The wrapped operation failed; carried verbatim so callers can inspect it
    #[error("operation failed: {0}")]
    Operation(#[source] BoxError),

    /// Configuration could not be loaded or parsed
    #[error("configuration error: {0}")]
    Config(String),
}

impl SafetyError {
    /// Wrap an arbitrary operation failure.
    pub fn operation(error: impl Into<BoxError>) -> Self {
        Self::Operation(error.into())
    }

    /// Build a cancellation error from a reason.
    pub fn cancelled(reason: impl Into<CancelReason>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// True when this error reflects a cancelled request rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Determine if an error is retryable.
///
/// Only operation failures are retried. Cancellation always propagates, a
/// schema mismatch will not fix itself on a second attempt, and configuration
/// problems are caller bugs.
pub fn is_retryable(error: &SafetyError) -> bool {
    matches!(error, SafetyError::Operation(_))
}
