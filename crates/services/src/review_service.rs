use std::sync::Arc;

use quiz_core::model::{AttemptId, QuizId, UserId};
use quiz_core::{ReviewReport, reconcile};
use storage::repository::{AttemptRepository, QuestionRepository, StorageError};

use crate::error::ReviewServiceError;

/// Loads a completed attempt and reconciles it against the question bank.
#[derive(Clone)]
pub struct ReviewService {
    questions: Arc<dyn QuestionRepository>,
    attempts: Arc<dyn AttemptRepository>,
}

impl ReviewService {
    #[must_use]
    pub fn new(
        questions: Arc<dyn QuestionRepository>,
        attempts: Arc<dyn AttemptRepository>,
    ) -> Self {
        Self {
            questions,
            attempts,
        }
    }

    /// Build the review of an attempt for `viewer`, who must be either the
    /// taker or the quiz creator.
    ///
    /// A score that disagrees with the stored answers is reported through
    /// `ReviewReport::warning`, never as an error.
    ///
    /// # Errors
    ///
    /// Returns `AttemptNotFound`, `AccessDenied`, or
    /// `Review(AttemptNotCompleted)` for attempts still in progress.
    pub async fn review_attempt(
        &self,
        viewer: &UserId,
        quiz_id: QuizId,
        attempt_id: AttemptId,
    ) -> Result<ReviewReport, ReviewServiceError> {
        let attempt = self
            .attempts
            .get_attempt(quiz_id, attempt_id)
            .await?
            .ok_or(ReviewServiceError::AttemptNotFound(attempt_id))?;

        let bank = match self.questions.load_bank(quiz_id).await {
            Ok(bank) => Some(bank),
            // The quiz is gone; records alone still carry the review.
            Err(StorageError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        let is_creator = bank.as_ref().is_some_and(|b| b.quiz.is_owned_by(viewer));
        if attempt.user_id() != viewer && !is_creator {
            return Err(ReviewServiceError::AccessDenied(attempt_id));
        }

        let questions = bank.map(|b| b.questions).unwrap_or_default();
        let report = reconcile(&attempt, &questions)?;
        if let Some(warning) = report.warning {
            tracing::warn!(
                attempt_id = %attempt_id,
                recorded = warning.recorded_score,
                recomputed = warning.recomputed_score,
                "stored score disagrees with answer records"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use quiz_core::ReviewError;
    use quiz_core::model::{
        AnswerRecord, Attempt, Question, QuestionDraft, QuestionId, Quiz, Visibility,
    };
    use quiz_core::review::OptionMark;
    use quiz_core::time::fixed_now;
    use serde_json::json;
    use storage::document::attempt_path;
    use storage::repository::{BankWrite, InMemoryRepository, QuizRepository};

    struct Fixture {
        repo: InMemoryRepository,
        service: ReviewService,
        quiz_id: QuizId,
        attempt: Attempt,
    }

    async fn fixture(complete: bool) -> Fixture {
        let repo = InMemoryRepository::new();
        let quiz = Quiz::new(
            QuizId::new(0),
            "Review",
            "",
            10,
            Visibility::Public,
            UserId::new("author"),
            fixed_now(),
        )
        .unwrap();
        let quiz_id = repo.insert_new_quiz(&quiz).await.unwrap();
        let question = Question::from_draft(
            QuestionId::new(1),
            quiz_id,
            QuestionDraft::multiple_choice("pick", ["a", "b", "c"], [0, 2], 4),
        )
        .unwrap();
        repo.commit_bank_write(quiz_id, 0, BankWrite::InsertQuestion(question))
            .await
            .unwrap();

        let attempt = Attempt::begin(
            AttemptId::generate(),
            quiz_id,
            UserId::new("taker"),
            vec![QuestionId::new(1)],
            fixed_now(),
        )
        .unwrap();
        repo.create_attempt(&attempt).await.unwrap();
        if complete {
            let record = AnswerRecord {
                question_id: QuestionId::new(1),
                selected_indices: [0, 2].into_iter().collect(),
                text_answer: None,
                earned_marks: 4,
                correct_indices_snapshot: [0, 2].into_iter().collect(),
            };
            repo.upsert_answer(quiz_id, attempt.id(), &record, Some(fixed_now()))
                .await
                .unwrap();
        }

        let service = ReviewService::new(Arc::new(repo.clone()), Arc::new(repo.clone()));
        Fixture {
            repo,
            service,
            quiz_id,
            attempt,
        }
    }

    #[tokio::test]
    async fn in_progress_attempt_is_not_reviewable() {
        let f = fixture(false).await;
        let err = f
            .service
            .review_attempt(&UserId::new("taker"), f.quiz_id, f.attempt.id())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReviewServiceError::Review(ReviewError::AttemptNotCompleted(_))
        ));
    }

    #[tokio::test]
    async fn taker_and_creator_may_review_others_may_not() {
        let f = fixture(true).await;
        let report = f
            .service
            .review_attempt(&UserId::new("taker"), f.quiz_id, f.attempt.id())
            .await
            .unwrap();
        assert_eq!(report.score, 4);
        assert_eq!(report.questions[0].options[0].mark, OptionMark::CorrectSelected);

        assert!(
            f.service
                .review_attempt(&UserId::new("author"), f.quiz_id, f.attempt.id())
                .await
                .is_ok()
        );
        let err = f
            .service
            .review_attempt(&UserId::new("someone"), f.quiz_id, f.attempt.id())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewServiceError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn tampered_score_surfaces_as_warning() {
        let f = fixture(true).await;
        let path = attempt_path(f.quiz_id, f.attempt.id());
        let mut doc = f.repo.get_raw(&path).unwrap().unwrap();
        doc["score"] = json!(9);
        f.repo.put_raw(&path, doc).unwrap();

        let report = f
            .service
            .review_attempt(&UserId::new("taker"), f.quiz_id, f.attempt.id())
            .await
            .unwrap();
        let warning = report.warning.expect("warning");
        assert_eq!(warning.recorded_score, 9);
        assert_eq!(warning.recomputed_score, 4);
        assert_eq!(report.score, 4);
    }
}
