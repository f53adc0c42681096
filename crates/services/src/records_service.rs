use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quiz_core::model::{Attempt, AttemptId, QuizId, UserId};
use storage::repository::{AttemptRepository, QuizRepository};

use crate::attempts::NavigationIntent;
use crate::error::RecordsError;

/// One row of a user's attempt history for a quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub attempt_id: AttemptId,
    pub quiz_id: QuizId,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub score: u32,
    pub total_marks: u32,
}

impl AttemptRecord {
    fn from_attempt(attempt: &Attempt, total_marks: u32) -> Self {
        Self {
            attempt_id: attempt.id(),
            quiz_id: attempt.quiz_id(),
            started_at: attempt.started_at(),
            completed_at: attempt.completed_at(),
            score: attempt.score(),
            total_marks,
        }
    }

    /// Intent to open this attempt's review; `None` while it is unfinished.
    #[must_use]
    pub fn review_intent(&self) -> Option<NavigationIntent> {
        self.completed_at.map(|_| NavigationIntent::ReviewAttempt {
            quiz_id: self.quiz_id,
            attempt_id: self.attempt_id,
        })
    }
}

/// Aggregate figures for a user's profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileStats {
    pub quizzes_created: usize,
    /// Every attempt started, finished or not.
    pub attempts_made: usize,
    /// Score summed over completed attempts.
    pub total_achieved: u64,
    /// Quiz totals summed over the same completed attempts.
    pub total_possible: u64,
    /// `total_achieved / total_possible` as a percentage, 0 without data.
    pub average_percent: f64,
}

/// Read-only views over stored attempts.
#[derive(Clone)]
pub struct RecordsService {
    quizzes: Arc<dyn QuizRepository>,
    attempts: Arc<dyn AttemptRepository>,
}

impl RecordsService {
    #[must_use]
    pub fn new(quizzes: Arc<dyn QuizRepository>, attempts: Arc<dyn AttemptRepository>) -> Self {
        Self { quizzes, attempts }
    }

    /// A user's attempts on one quiz, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RecordsError::QuizNotFound` if the quiz does not exist.
    pub async fn attempts_for_user(
        &self,
        quiz_id: QuizId,
        user: &UserId,
    ) -> Result<Vec<AttemptRecord>, RecordsError> {
        let quiz = self
            .quizzes
            .get_quiz(quiz_id)
            .await?
            .ok_or(RecordsError::QuizNotFound(quiz_id))?;
        let attempts = self.attempts.list_attempts_for_user(quiz_id, user).await?;
        Ok(attempts
            .iter()
            .map(|a| AttemptRecord::from_attempt(a, quiz.total_marks()))
            .collect())
    }

    /// Profile figures for `user`. Attempts on quizzes that no longer exist
    /// count as made but not towards the score totals.
    ///
    /// # Errors
    ///
    /// Returns `RecordsError::Storage` if repository access fails.
    pub async fn profile_stats(&self, user: &UserId) -> Result<ProfileStats, RecordsError> {
        let quizzes_created = self
            .quizzes
            .list_quizzes_by_creator(user, u32::MAX)
            .await?
            .len();
        let attempts = self.attempts.list_user_attempts(user).await?;

        let mut totals: HashMap<QuizId, Option<u32>> = HashMap::new();
        let mut total_achieved = 0_u64;
        let mut total_possible = 0_u64;
        for attempt in attempts.iter().filter(|a| a.is_complete()) {
            let total = match totals.get(&attempt.quiz_id()) {
                Some(total) => *total,
                None => {
                    let total = self
                        .quizzes
                        .get_quiz(attempt.quiz_id())
                        .await?
                        .map(|q| q.total_marks());
                    totals.insert(attempt.quiz_id(), total);
                    total
                }
            };
            if let Some(total) = total {
                total_achieved += u64::from(attempt.score());
                total_possible += u64::from(total);
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let average_percent = if total_possible == 0 {
            0.0
        } else {
            total_achieved as f64 * 100.0 / total_possible as f64
        };

        Ok(ProfileStats {
            quizzes_created,
            attempts_made: attempts.len(),
            total_achieved,
            total_possible,
            average_percent,
        })
    }
}
