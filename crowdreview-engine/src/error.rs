use thiserror::Error;

use crate::repository::RepositoryError;
use crate::state_machine::TransitionError;

/// Errors surfaced by engine operations.
///
/// An empty worker pool is not an error: assignment returns `None` and the
/// task stays queued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("precondition failed (current: {current}): {message}")]
    PreconditionFailed { current: String, message: String },

    #[error("persistence failure: {0}")]
    Persistence(#[from] RepositoryError),
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn precondition(current: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            current: current.into(),
            message: message.into(),
        }
    }

    /// Persistence failures leave no partial write behind and can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// The task or account status reported with a precondition failure.
    pub fn current_status(&self) -> Option<&str> {
        match self {
            Self::PreconditionFailed { current, .. } => Some(current),
            _ => None,
        }
    }
}

impl From<TransitionError> for EngineError {
    fn from(err: TransitionError) -> Self {
        Self::PreconditionFailed {
            current: err.current_status().to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_keeps_current_status() {
        let err: EngineError = TransitionError::IllegalTransition {
            current: "PENDING".to_string(),
            requested: "APPROVED".to_string(),
        }
        .into();

        assert_eq!(err.current_status(), Some("PENDING"));
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "precondition failed (current: PENDING): cannot move task from PENDING to APPROVED"
        );
    }

    #[test]
    fn test_persistence_is_retryable() {
        let err: EngineError = RepositoryError::storage("save", "disk full").into();
        assert!(err.is_retryable());
        assert_eq!(err.current_status(), None);
    }
}
