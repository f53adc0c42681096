use std::sync::Arc;

use quiz_core::model::{Question, QuestionDraft, QuestionId, QuizId, UserId};
use quiz_core::{QuizConfigurationValidator, allocated_marks};
use storage::repository::{BankWrite, QuestionBank, QuestionRepository, StorageError};

use crate::auth::AuthSession;
use crate::error::AuthoringError;

/// Conflicts tolerated before a bank write gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Runs read, plan and conditional write against a quiz's question bank,
/// reloading and re-planning whenever another writer moved the revision.
///
/// `plan` sees a consistent bank and decides the write; it runs again on
/// every retry, so validation always uses fresh data. Exhausting the retries
/// surfaces `StorageError::Conflict`.
pub(crate) async fn commit_with_retry<T, E>(
    questions: &dyn QuestionRepository,
    quiz_id: QuizId,
    max_retries: u32,
    mut plan: impl FnMut(&QuestionBank) -> Result<(BankWrite, T), E> + Send,
) -> Result<T, E>
where
    E: From<StorageError>,
{
    let mut conflicts = 0;
    loop {
        let bank = questions.load_bank(quiz_id).await?;
        let (write, outcome) = plan(&bank)?;
        match questions
            .commit_bank_write(quiz_id, bank.revision, write)
            .await
        {
            Ok(revision) => {
                tracing::debug!(quiz_id = %quiz_id, revision, "bank write applied");
                return Ok(outcome);
            }
            Err(StorageError::Conflict) if conflicts < max_retries => {
                conflicts += 1;
                tracing::warn!(
                    quiz_id = %quiz_id,
                    attempt = conflicts,
                    "question bank changed concurrently; retrying"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Mark allocation of a quiz at one revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub allocated: u32,
    pub total_marks: u32,
}

impl Allocation {
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.total_marks.saturating_sub(self.allocated)
    }
}

/// Question writes for quiz creators. Every write is validated against the
/// mark allocation and committed atomically with respect to other writers.
#[derive(Clone)]
pub struct AuthoringService {
    questions: Arc<dyn QuestionRepository>,
    max_retries: u32,
}

impl AuthoringService {
    #[must_use]
    pub fn new(questions: Arc<dyn QuestionRepository>) -> Self {
        Self {
            questions,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Validate and store a new question.
    ///
    /// # Errors
    ///
    /// Returns `AuthoringError::Invariant` if the question is malformed or
    /// would exceed the quiz total, `NotOwner` unless `auth` is the creator.
    pub async fn add_question(
        &self,
        auth: &AuthSession,
        quiz_id: QuizId,
        draft: QuestionDraft,
    ) -> Result<Question, AuthoringError> {
        let editor = auth.require_user()?.clone();
        let question = self
            .commit(quiz_id, |bank| {
                ensure_owner(bank, &editor)?;
                let question = QuizConfigurationValidator::new(&bank.quiz).add_question(
                    allocated_marks(&bank.questions),
                    bank.next_question_id(),
                    draft.clone(),
                )?;
                Ok((BankWrite::InsertQuestion(question.clone()), question))
            })
            .await
            .inspect_err(|e| log_rejected(quiz_id, "add", e))?;

        tracing::info!(
            quiz_id = %quiz_id,
            question_id = %question.id(),
            marks = question.marks(),
            "question added"
        );
        Ok(question)
    }

    /// Replace an existing question. The allocation is re-checked with the
    /// old question's marks left out.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_question`], plus `Invariant(UnknownQuestion)`.
    pub async fn edit_question(
        &self,
        auth: &AuthSession,
        quiz_id: QuizId,
        question_id: QuestionId,
        draft: QuestionDraft,
    ) -> Result<Question, AuthoringError> {
        let editor = auth.require_user()?.clone();
        let question = self
            .commit(quiz_id, |bank| {
                ensure_owner(bank, &editor)?;
                let question = QuizConfigurationValidator::new(&bank.quiz).edit_question(
                    &bank.questions,
                    question_id,
                    draft.clone(),
                )?;
                Ok((BankWrite::ReplaceQuestion(question.clone()), question))
            })
            .await
            .inspect_err(|e| log_rejected(quiz_id, "edit", e))?;

        tracing::info!(quiz_id = %quiz_id, question_id = %question_id, "question edited");
        Ok(question)
    }

    /// Delete a question. Attempts that already answered it keep their records.
    /// Returns the marks still allocated afterwards.
    ///
    /// # Errors
    ///
    /// Returns `Invariant(UnknownQuestion)` if the question does not exist.
    pub async fn remove_question(
        &self,
        auth: &AuthSession,
        quiz_id: QuizId,
        question_id: QuestionId,
    ) -> Result<u32, AuthoringError> {
        let editor = auth.require_user()?.clone();
        let remaining = self
            .commit(quiz_id, |bank| {
                ensure_owner(bank, &editor)?;
                let remaining = QuizConfigurationValidator::new(&bank.quiz)
                    .remove_question(&bank.questions, question_id)?;
                Ok((BankWrite::RemoveQuestion(question_id), remaining))
            })
            .await
            .inspect_err(|e| log_rejected(quiz_id, "remove", e))?;

        tracing::info!(quiz_id = %quiz_id, question_id = %question_id, "question removed");
        Ok(remaining)
    }

    /// Questions of a quiz in retrieval order.
    ///
    /// # Errors
    ///
    /// Returns `AuthoringError::NotFound` if the quiz does not exist.
    pub async fn list_questions(&self, quiz_id: QuizId) -> Result<Vec<Question>, AuthoringError> {
        Ok(self.load(quiz_id).await?.questions)
    }

    /// Current mark allocation, derived from the stored questions.
    ///
    /// # Errors
    ///
    /// Returns `AuthoringError::NotFound` if the quiz does not exist.
    pub async fn allocation(&self, quiz_id: QuizId) -> Result<Allocation, AuthoringError> {
        let bank = self.load(quiz_id).await?;
        Ok(Allocation {
            allocated: allocated_marks(&bank.questions),
            total_marks: bank.quiz.total_marks(),
        })
    }

    async fn load(&self, quiz_id: QuizId) -> Result<QuestionBank, AuthoringError> {
        self.questions
            .load_bank(quiz_id)
            .await
            .map_err(|e| not_found_as(e, quiz_id))
    }

    async fn commit<T>(
        &self,
        quiz_id: QuizId,
        plan: impl FnMut(&QuestionBank) -> Result<(BankWrite, T), AuthoringError> + Send,
    ) -> Result<T, AuthoringError> {
        commit_with_retry(self.questions.as_ref(), quiz_id, self.max_retries, plan)
            .await
            .map_err(|e| match e {
                AuthoringError::Storage(inner) => not_found_as(inner, quiz_id),
                other => other,
            })
    }
}

fn ensure_owner(bank: &QuestionBank, editor: &UserId) -> Result<(), AuthoringError> {
    if bank.quiz.is_owned_by(editor) {
        Ok(())
    } else {
        Err(AuthoringError::NotOwner(bank.quiz.id()))
    }
}

fn not_found_as(e: StorageError, quiz_id: QuizId) -> AuthoringError {
    match e {
        StorageError::NotFound => AuthoringError::NotFound(quiz_id),
        other => AuthoringError::Storage(other),
    }
}

fn log_rejected(quiz_id: QuizId, operation: &str, e: &AuthoringError) {
    tracing::warn!(quiz_id = %quiz_id, operation, error = %e, "question write rejected");
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use quiz_core::InvariantViolation;
    use quiz_core::model::{Quiz, Visibility};
    use quiz_core::time::fixed_now;
    use std::sync::atomic::{AtomicU32, Ordering};
    use storage::repository::{InMemoryRepository, QuizRepository};

    async fn quiz_with_total(repo: &InMemoryRepository, total_marks: u32) -> QuizId {
        let quiz = Quiz::new(
            QuizId::new(0),
            "Allocation",
            "",
            total_marks,
            Visibility::Public,
            UserId::new("author"),
            fixed_now(),
        )
        .unwrap();
        repo.insert_new_quiz(&quiz).await.unwrap()
    }

    fn author() -> AuthSession {
        AuthSession::signed_in(UserId::new("author"))
    }

    fn draft(marks: u32) -> QuestionDraft {
        QuestionDraft::single_choice("pick", ["a", "b"], 0, marks)
    }

    #[tokio::test]
    async fn second_question_over_total_is_rejected_with_overage() {
        let repo = InMemoryRepository::new();
        let quiz_id = quiz_with_total(&repo, 10).await;
        let service = AuthoringService::new(Arc::new(repo));

        service.add_question(&author(), quiz_id, draft(6)).await.unwrap();
        let err = service
            .add_question(&author(), quiz_id, draft(5))
            .await
            .unwrap_err();

        assert_eq!(err.overage(), Some(1));
        let allocation = service.allocation(quiz_id).await.unwrap();
        assert_eq!(allocation.allocated, 6);
        assert_eq!(allocation.remaining(), 4);
    }

    #[tokio::test]
    async fn only_creator_may_add_questions() {
        let repo = InMemoryRepository::new();
        let quiz_id = quiz_with_total(&repo, 10).await;
        let service = AuthoringService::new(Arc::new(repo));

        let stranger = AuthSession::signed_in(UserId::new("stranger"));
        let err = service
            .add_question(&stranger, quiz_id, draft(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthoringError::NotOwner(id) if id == quiz_id));

        let err = service
            .add_question(&AuthSession::anonymous(), quiz_id, draft(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthoringError::Auth(_)));
    }

    #[tokio::test]
    async fn edit_rechecks_allocation_without_old_marks() {
        let repo = InMemoryRepository::new();
        let quiz_id = quiz_with_total(&repo, 10).await;
        let service = AuthoringService::new(Arc::new(repo));

        let q1 = service.add_question(&author(), quiz_id, draft(6)).await.unwrap();
        service.add_question(&author(), quiz_id, draft(4)).await.unwrap();

        // 6 -> 5 fits, 6 -> 7 does not.
        service
            .edit_question(&author(), quiz_id, q1.id(), draft(5))
            .await
            .unwrap();
        let err = service
            .edit_question(&author(), quiz_id, q1.id(), draft(7))
            .await
            .unwrap_err();
        assert_eq!(err.overage(), Some(1));

        let err = service
            .edit_question(&author(), quiz_id, QuestionId::new(99), draft(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthoringError::Invariant(InvariantViolation::UnknownQuestion(_))
        ));
    }

    #[tokio::test]
    async fn remove_frees_marks() {
        let repo = InMemoryRepository::new();
        let quiz_id = quiz_with_total(&repo, 10).await;
        let service = AuthoringService::new(Arc::new(repo));

        let q1 = service.add_question(&author(), quiz_id, draft(6)).await.unwrap();
        let remaining = service
            .remove_question(&author(), quiz_id, q1.id())
            .await
            .unwrap();
        assert_eq!(remaining, 0);
        service.add_question(&author(), quiz_id, draft(10)).await.unwrap();
        assert_eq!(service.list_questions(quiz_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_quiz_is_not_found() {
        let service = AuthoringService::new(Arc::new(InMemoryRepository::new()));
        let err = service
            .add_question(&author(), QuizId::new(42), draft(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthoringError::NotFound(_)));
    }

    /// Lets a competing writer commit right after each `load_bank`.
    struct RacingRepository {
        inner: InMemoryRepository,
        races_left: AtomicU32,
    }

    #[async_trait]
    impl QuestionRepository for RacingRepository {
        async fn load_bank(&self, quiz_id: QuizId) -> Result<QuestionBank, StorageError> {
            let bank = self.inner.load_bank(quiz_id).await?;
            if self.races_left.load(Ordering::SeqCst) > 0 {
                self.races_left.fetch_sub(1, Ordering::SeqCst);
                let rival = QuizConfigurationValidator::new(&bank.quiz)
                    .add_question(
                        allocated_marks(&bank.questions),
                        bank.next_question_id(),
                        draft(3),
                    )
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                self.inner
                    .commit_bank_write(quiz_id, bank.revision, BankWrite::InsertQuestion(rival))
                    .await?;
            }
            Ok(bank)
        }

        async fn commit_bank_write(
            &self,
            quiz_id: QuizId,
            expected_revision: u64,
            write: BankWrite,
        ) -> Result<u64, StorageError> {
            self.inner
                .commit_bank_write(quiz_id, expected_revision, write)
                .await
        }
    }

    #[tokio::test]
    async fn concurrent_writer_forces_revalidation() {
        let inner = InMemoryRepository::new();
        let quiz_id = quiz_with_total(&inner, 10).await;
        let repo = RacingRepository {
            inner: inner.clone(),
            races_left: AtomicU32::new(1),
        };
        let service = AuthoringService::new(Arc::new(repo));

        // Alone this would fit; after the rival's 3 marks it must not.
        let err = service
            .add_question(&author(), quiz_id, draft(8))
            .await
            .unwrap_err();
        assert_eq!(err.overage(), Some(1));
        assert_eq!(allocated_marks(&inner.load_bank(quiz_id).await.unwrap().questions), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = InMemoryRepository::new();
        let quiz_id = quiz_with_total(&inner, 100).await;
        let repo = RacingRepository {
            inner: inner.clone(),
            races_left: AtomicU32::new(10),
        };
        let service = AuthoringService::new(Arc::new(repo)).with_max_retries(2);

        let err = service
            .add_question(&author(), quiz_id, draft(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthoringError::Storage(StorageError::Conflict)));
    }
}
