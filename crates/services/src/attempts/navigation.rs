use quiz_core::model::{AttemptId, QuizId};

/// Where the presentation layer should go next after an outcome.
///
/// Services only produce intents; routing them is the caller's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationIntent {
    /// The last question was answered.
    AttemptCompleted(AttemptId),
    /// Open the review of a completed attempt.
    ReviewAttempt {
        quiz_id: QuizId,
        attempt_id: AttemptId,
    },
}

impl NavigationIntent {
    /// The attempt this intent refers to.
    #[must_use]
    pub fn attempt_id(&self) -> AttemptId {
        match self {
            NavigationIntent::AttemptCompleted(id) => *id,
            NavigationIntent::ReviewAttempt { attempt_id, .. } => *attempt_id,
        }
    }
}
