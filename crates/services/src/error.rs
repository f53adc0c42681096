//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::{AttemptError, AttemptId, QuizError, QuizId};
use quiz_core::{InvariantViolation, ReviewError};
use storage::repository::StorageError;

/// Errors emitted by `AuthSession` lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    #[error("no user is signed in")]
    NotSignedIn,
}

/// Errors emitted by `QuizService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuizServiceError {
    #[error("quiz {0} not found")]
    NotFound(QuizId),
    #[error("only the creator may edit quiz {0}")]
    NotOwner(QuizId),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `AuthoringService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthoringError {
    #[error("quiz {0} not found")]
    NotFound(QuizId),
    #[error("only the creator may change questions of quiz {0}")]
    NotOwner(QuizId),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuthoringError {
    /// Marks overage when the write was rejected for exceeding the quiz total.
    #[must_use]
    pub fn overage(&self) -> Option<u32> {
        match self {
            AuthoringError::Invariant(v) => v.overage(),
            _ => None,
        }
    }
}

/// Errors emitted by attempt workflows.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("quiz {0} not found")]
    QuizNotFound(QuizId),
    #[error("attempt {0} not found")]
    AttemptNotFound(AttemptId),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    /// Whether the same call may succeed when retried unchanged.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Storage(e) if e.is_transient())
    }
}

/// Errors emitted by `ReviewService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReviewServiceError {
    #[error("attempt {0} not found")]
    AttemptNotFound(AttemptId),
    #[error("attempt {0} is not visible to this user")]
    AccessDenied(AttemptId),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `RecordsService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecordsError {
    #[error("quiz {0} not found")]
    QuizNotFound(QuizId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
