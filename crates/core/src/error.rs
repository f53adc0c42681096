use thiserror::Error;

use crate::allocation::InvariantViolation;
use crate::model::{AttemptError, QuestionError, QuizError};
use crate::review::ReviewError;

/// Any error raised by the domain layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error(transparent)]
    Review(#[from] ReviewError),
}
