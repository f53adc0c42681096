use std::sync::Arc;

use quiz_core::model::{Quiz, QuizId, UserId, Visibility};
use quiz_core::QuizConfigurationValidator;
use storage::repository::{BankWrite, QuestionRepository, QuizRepository, StorageError};

use crate::Clock;
use crate::auth::AuthSession;
use crate::authoring_service::{DEFAULT_MAX_RETRIES, commit_with_retry};
use crate::error::QuizServiceError;

/// Creator-facing fields of a quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizDetails {
    pub title: String,
    pub description: String,
    pub total_marks: u32,
    pub visibility: Visibility,
}

/// Orchestrates quiz creation, edits and listings.
#[derive(Clone)]
pub struct QuizService {
    clock: Clock,
    quizzes: Arc<dyn QuizRepository>,
    questions: Arc<dyn QuestionRepository>,
    max_retries: u32,
}

impl QuizService {
    #[must_use]
    pub fn new(
        clock: Clock,
        quizzes: Arc<dyn QuizRepository>,
        questions: Arc<dyn QuestionRepository>,
    ) -> Self {
        Self {
            clock,
            quizzes,
            questions,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Create a quiz owned by the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns `QuizServiceError::Quiz` for a blank title.
    /// Returns `QuizServiceError::Storage` if persistence fails.
    pub async fn create_quiz(
        &self,
        auth: &AuthSession,
        details: QuizDetails,
    ) -> Result<QuizId, QuizServiceError> {
        let creator = auth.require_user()?.clone();
        let quiz = Quiz::new(
            QuizId::new(0),
            details.title,
            details.description,
            details.total_marks,
            details.visibility,
            creator,
            self.clock.now(),
        )?;
        let id = self.quizzes.insert_new_quiz(&quiz).await?;
        tracing::info!(
            quiz_id = %id,
            total_marks = quiz.total_marks(),
            visibility = quiz.visibility().as_str(),
            "quiz created"
        );
        Ok(id)
    }

    /// Apply a creator edit. Lowering `total_marks` below the marks already
    /// allocated to questions is refused.
    ///
    /// # Errors
    ///
    /// Returns `NotOwner` unless the signed-in user created the quiz and
    /// `Invariant(TotalBelowAllocated)` when the new total is too small.
    pub async fn update_quiz(
        &self,
        auth: &AuthSession,
        quiz_id: QuizId,
        details: QuizDetails,
    ) -> Result<Quiz, QuizServiceError> {
        let editor = auth.require_user()?.clone();
        let updated = commit_with_retry(
            self.questions.as_ref(),
            quiz_id,
            self.max_retries,
            |bank| -> Result<(BankWrite, Quiz), QuizServiceError> {
                if !bank.quiz.is_owned_by(&editor) {
                    return Err(QuizServiceError::NotOwner(quiz_id));
                }
                QuizConfigurationValidator::new(&bank.quiz)
                    .check_total(&bank.questions, details.total_marks)?;
                let mut quiz = bank.quiz.clone();
                quiz.edit(
                    details.title.clone(),
                    details.description.clone(),
                    details.total_marks,
                    details.visibility,
                )?;
                Ok((BankWrite::UpdateQuiz(quiz.clone()), quiz))
            },
        )
        .await
        .map_err(|e| match e {
            QuizServiceError::Storage(StorageError::NotFound) => QuizServiceError::NotFound(quiz_id),
            other => other,
        })
        .inspect_err(|e| tracing::warn!(quiz_id = %quiz_id, error = %e, "quiz edit rejected"))?;

        tracing::info!(quiz_id = %quiz_id, "quiz updated");
        Ok(updated)
    }

    /// Fetch a quiz by ID. Returns `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `QuizServiceError::Storage` if repository access fails.
    pub async fn get_quiz(&self, quiz_id: QuizId) -> Result<Option<Quiz>, QuizServiceError> {
        Ok(self.quizzes.get_quiz(quiz_id).await?)
    }

    /// Public quizzes, newest first.
    ///
    /// # Errors
    ///
    /// Returns `QuizServiceError::Storage` if repository access fails.
    pub async fn list_public_quizzes(&self, limit: u32) -> Result<Vec<Quiz>, QuizServiceError> {
        Ok(self
            .quizzes
            .list_quizzes_by_visibility(Visibility::Public, limit)
            .await?)
    }

    /// Quizzes created by `creator`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `QuizServiceError::Storage` if repository access fails.
    pub async fn list_quizzes_by_creator(
        &self,
        creator: &UserId,
        limit: u32,
    ) -> Result<Vec<Quiz>, QuizServiceError> {
        Ok(self.quizzes.list_quizzes_by_creator(creator, limit).await?)
    }
}
