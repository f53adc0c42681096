use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quiz_core::model::{AnswerRecord, Attempt, AttemptId, QuestionId, QuizId};
use quiz_core::{AccessPolicy, AttemptSession, PendingAnswer, VisibilityPolicy};
use storage::repository::{AnswerWrite, AttemptRepository, QuestionRepository, StorageError};

use super::navigation::NavigationIntent;
use crate::Clock;
use crate::auth::AuthSession;
use crate::error::SessionError;

/// Result of one persisted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub record: AnswerRecord,
    /// Whether the store already held an answer for this question, i.e. an
    /// earlier call succeeded but its result never reached us.
    pub already_stored: bool,
    pub is_complete: bool,
    pub score: u32,
    pub intent: Option<NavigationIntent>,
}

/// Orchestrates attempt start, persisted answering and resume.
///
/// Every answer is written to the store before the session accepts it, so a
/// session never runs ahead of what is durable.
#[derive(Clone)]
pub struct AttemptLoopService {
    clock: Clock,
    questions: Arc<dyn QuestionRepository>,
    attempts: Arc<dyn AttemptRepository>,
    policy: Arc<dyn AccessPolicy>,
}

impl AttemptLoopService {
    #[must_use]
    pub fn new(
        clock: Clock,
        questions: Arc<dyn QuestionRepository>,
        attempts: Arc<dyn AttemptRepository>,
    ) -> Self {
        Self {
            clock,
            questions,
            attempts,
            policy: Arc::new(VisibilityPolicy::new()),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Start an attempt for the signed-in user and persist it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Auth` when nobody is signed in,
    /// `SessionError::Attempt` for access or empty-quiz failures and
    /// `SessionError::Storage` if persistence fails.
    pub async fn start_attempt(
        &self,
        auth: &AuthSession,
        quiz_id: QuizId,
    ) -> Result<AttemptSession, SessionError> {
        let user = auth.require_user()?.clone();
        let bank = self
            .questions
            .load_bank(quiz_id)
            .await
            .map_err(|e| match e {
                StorageError::NotFound => SessionError::QuizNotFound(quiz_id),
                other => SessionError::Storage(other),
            })?;

        let mut session = AttemptSession::new(AttemptId::generate());
        let attempt = session.start(
            &bank.quiz,
            bank.questions,
            user,
            self.policy.as_ref(),
            self.clock.now(),
        )?;
        self.attempts.create_attempt(attempt).await?;

        tracing::info!(
            quiz_id = %quiz_id,
            attempt_id = %session.id(),
            questions = session.questions().len(),
            "attempt started"
        );
        Ok(session)
    }

    /// Score, persist and apply one answer.
    ///
    /// Safe to call again with the same question after a transient store
    /// failure: the store keeps the first record for a question, and the
    /// session only advances once the write is confirmed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Attempt` for state or addressing errors and
    /// `SessionError::Storage` if the write fails; the session is left
    /// unchanged in both cases.
    pub async fn submit_answer(
        &self,
        session: &mut AttemptSession,
        question_id: QuestionId,
        selected_indices: BTreeSet<usize>,
        text_answer: Option<String>,
    ) -> Result<SubmissionOutcome, SessionError> {
        let mut pending = session.begin_submission(question_id, selected_indices, text_answer)?;
        let now = self.clock.now();
        let completed_at = if pending.completes() {
            let started_at = session.attempt().map_or(now, Attempt::started_at);
            Some(now.max(started_at))
        } else {
            None
        };

        let stored = self
            .attempts
            .upsert_answer(
                pending.quiz_id(),
                pending.attempt_id(),
                pending.record(),
                completed_at,
            )
            .await;
        let write = match stored {
            Ok(write) => write,
            Err(e) => {
                tracing::warn!(
                    attempt_id = %pending.attempt_id(),
                    question_id = %question_id,
                    error = %e,
                    transient = e.is_transient(),
                    "answer write failed"
                );
                session.abort(pending);
                return Err(e.into());
            }
        };

        let mut committed_at = now;
        if write == AnswerWrite::AlreadyPresent {
            tracing::debug!(
                attempt_id = %pending.attempt_id(),
                question_id = %question_id,
                "answer already stored; keeping stored record"
            );
            match self.stored_answer(&pending).await {
                Ok((stored, completed_at)) => {
                    if let Err(e) = pending.adopt_stored(stored) {
                        session.abort(pending);
                        return Err(e.into());
                    }
                    committed_at = completed_at.unwrap_or(now);
                }
                Err(e) => {
                    session.abort(pending);
                    return Err(e);
                }
            }
        }
        let record = session.commit(pending, committed_at)?.clone();

        let is_complete = session.is_complete();
        let score = session.attempt().map_or(0, Attempt::score);
        let intent = is_complete.then(|| NavigationIntent::AttemptCompleted(session.id()));
        if is_complete {
            tracing::info!(attempt_id = %session.id(), score, "attempt completed");
        }

        Ok(SubmissionOutcome {
            record,
            already_stored: write == AnswerWrite::AlreadyPresent,
            is_complete,
            score,
            intent,
        })
    }

    /// The record the store kept for a pending question, with the stored
    /// completion time.
    async fn stored_answer(
        &self,
        pending: &PendingAnswer,
    ) -> Result<(AnswerRecord, Option<DateTime<Utc>>), SessionError> {
        let question_id = pending.record().question_id;
        let stored = self
            .attempts
            .get_attempt(pending.quiz_id(), pending.attempt_id())
            .await?
            .ok_or(SessionError::AttemptNotFound(pending.attempt_id()))?;
        let record = stored
            .answer_for(question_id)
            .cloned()
            .ok_or(SessionError::Storage(StorageError::NotFound))?;
        Ok((record, stored.completed_at()))
    }

    /// Rebuild a session from the store, e.g. after a crash or when a
    /// submission outcome is unknown. The stored answers are authoritative.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AttemptNotFound` if the attempt does not exist
    /// and `SessionError::Attempt` if an unanswered question was deleted.
    pub async fn resume_attempt(
        &self,
        quiz_id: QuizId,
        attempt_id: AttemptId,
    ) -> Result<AttemptSession, SessionError> {
        let attempt = self
            .attempts
            .get_attempt(quiz_id, attempt_id)
            .await?
            .ok_or(SessionError::AttemptNotFound(attempt_id))?;
        let bank = self.questions.load_bank(quiz_id).await?;
        let session = AttemptSession::resume(attempt, &bank.questions)?;
        tracing::info!(
            attempt_id = %attempt_id,
            answered = session.attempt().map_or(0, |a| a.answers().len()),
            "attempt resumed"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use quiz_core::model::{
        AttemptError, AttemptState, Question, QuestionDraft, Quiz, UserId, Visibility,
    };
    use quiz_core::time::{fixed_clock, fixed_now};
    use std::sync::atomic::{AtomicU32, Ordering};
    use storage::repository::{BankWrite, InMemoryRepository, QuizRepository};

    async fn seeded(repo: &InMemoryRepository, visibility: Visibility) -> (QuizId, Vec<Question>) {
        let quiz = Quiz::new(
            QuizId::new(0),
            "Lifetimes",
            "",
            10,
            visibility,
            UserId::new("author"),
            fixed_now(),
        )
        .unwrap();
        let quiz_id = repo.insert_new_quiz(&quiz).await.unwrap();
        let drafts = [
            QuestionDraft::single_choice("one", ["a", "b"], 0, 2),
            QuestionDraft::multiple_choice("two", ["a", "b", "c"], [0, 2], 3),
            QuestionDraft::open_answer("three", 5),
        ];
        let mut questions = Vec::new();
        for (i, draft) in drafts.into_iter().enumerate() {
            let question =
                Question::from_draft(QuestionId::new(i as u64 + 1), quiz_id, draft).unwrap();
            repo.commit_bank_write(quiz_id, i as u64, BankWrite::InsertQuestion(question.clone()))
                .await
                .unwrap();
            questions.push(question);
        }
        (quiz_id, questions)
    }

    fn taker() -> AuthSession {
        AuthSession::signed_in(UserId::new("taker"))
    }

    fn set(indices: &[usize]) -> BTreeSet<usize> {
        indices.iter().copied().collect()
    }

    #[tokio::test]
    async fn full_run_persists_score_and_completion() {
        let repo = InMemoryRepository::new();
        let (quiz_id, questions) = seeded(&repo, Visibility::Public).await;
        let service =
            AttemptLoopService::new(fixed_clock(), Arc::new(repo.clone()), Arc::new(repo.clone()));

        let mut session = service.start_attempt(&taker(), quiz_id).await.unwrap();
        let first = service
            .submit_answer(&mut session, questions[0].id(), set(&[0]), None)
            .await
            .unwrap();
        assert_eq!(first.record.earned_marks, 2);
        assert!(first.intent.is_none());

        service
            .submit_answer(&mut session, questions[1].id(), set(&[0, 1, 2]), None)
            .await
            .unwrap();
        let last = service
            .submit_answer(&mut session, questions[2].id(), set(&[]), Some("free text".into()))
            .await
            .unwrap();
        assert!(last.is_complete);
        assert_eq!(last.score, 2);
        assert_eq!(
            last.intent,
            Some(NavigationIntent::AttemptCompleted(session.id()))
        );

        let stored = repo.get_attempt(quiz_id, session.id()).await.unwrap().unwrap();
        assert_eq!(stored.score(), 2);
        assert_eq!(stored.completed_at(), Some(fixed_now()));
        assert_eq!(stored.answers()[2].text_answer.as_deref(), Some("free text"));

        let err = service
            .submit_answer(&mut session, questions[0].id(), set(&[0]), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Attempt(AttemptError::InvalidState {
                state: AttemptState::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn private_quiz_is_refused_to_strangers() {
        let repo = InMemoryRepository::new();
        let (quiz_id, _) = seeded(&repo, Visibility::Private).await;
        let service =
            AttemptLoopService::new(fixed_clock(), Arc::new(repo.clone()), Arc::new(repo));

        let err = service.start_attempt(&taker(), quiz_id).await.unwrap_err();
        assert!(matches!(err, SessionError::Attempt(AttemptError::AccessDenied)));

        let author = AuthSession::signed_in(UserId::new("author"));
        assert!(service.start_attempt(&author, quiz_id).await.is_ok());
    }

    #[tokio::test]
    async fn snapshot_ignores_questions_added_after_start() {
        let repo = InMemoryRepository::new();
        let (quiz_id, _) = seeded(&repo, Visibility::Public).await;
        let service =
            AttemptLoopService::new(fixed_clock(), Arc::new(repo.clone()), Arc::new(repo.clone()));
        let session = service.start_attempt(&taker(), quiz_id).await.unwrap();

        let late = Question::from_draft(
            QuestionId::new(4),
            quiz_id,
            QuestionDraft::single_choice("late", ["a", "b"], 0, 1),
        )
        .unwrap();
        repo.commit_bank_write(quiz_id, 3, BankWrite::InsertQuestion(late))
            .await
            .unwrap();

        let resumed = service
            .resume_attempt(quiz_id, session.id())
            .await
            .unwrap();
        assert_eq!(resumed.questions().len(), 3);
        assert_eq!(
            resumed.attempt().unwrap().question_snapshot(),
            session.attempt().unwrap().question_snapshot()
        );
    }

    /// Fails the first `failures` answer writes, optionally after applying them.
    struct FlakyAttempts {
        inner: InMemoryRepository,
        failures: AtomicU32,
        apply_before_failing: bool,
    }

    #[async_trait]
    impl AttemptRepository for FlakyAttempts {
        async fn create_attempt(&self, attempt: &Attempt) -> Result<(), StorageError> {
            self.inner.create_attempt(attempt).await
        }

        async fn get_attempt(
            &self,
            quiz_id: QuizId,
            attempt_id: AttemptId,
        ) -> Result<Option<Attempt>, StorageError> {
            self.inner.get_attempt(quiz_id, attempt_id).await
        }

        async fn upsert_answer(
            &self,
            quiz_id: QuizId,
            attempt_id: AttemptId,
            record: &AnswerRecord,
            completed_at: Option<DateTime<Utc>>,
        ) -> Result<AnswerWrite, StorageError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                if self.apply_before_failing {
                    self.inner
                        .upsert_answer(quiz_id, attempt_id, record, completed_at)
                        .await?;
                }
                return Err(StorageError::Connection("timeout".into()));
            }
            self.inner
                .upsert_answer(quiz_id, attempt_id, record, completed_at)
                .await
        }

        async fn list_attempts_for_user(
            &self,
            quiz_id: QuizId,
            user: &UserId,
        ) -> Result<Vec<Attempt>, StorageError> {
            self.inner.list_attempts_for_user(quiz_id, user).await
        }

        async fn list_user_attempts(&self, user: &UserId) -> Result<Vec<Attempt>, StorageError> {
            self.inner.list_user_attempts(user).await
        }
    }

    #[tokio::test]
    async fn retry_after_lost_acknowledgement_yields_one_record() {
        let repo = InMemoryRepository::new();
        let (quiz_id, questions) = seeded(&repo, Visibility::Public).await;
        let flaky = FlakyAttempts {
            inner: repo.clone(),
            failures: AtomicU32::new(1),
            apply_before_failing: true,
        };
        let service = AttemptLoopService::new(fixed_clock(), Arc::new(repo.clone()), Arc::new(flaky));

        let mut session = service.start_attempt(&taker(), quiz_id).await.unwrap();
        let err = service
            .submit_answer(&mut session, questions[0].id(), set(&[0]), None)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(session.pending_question(), None);
        assert!(session.attempt().unwrap().answers().is_empty());

        let retry = service
            .submit_answer(&mut session, questions[0].id(), set(&[0]), None)
            .await
            .unwrap();
        assert!(retry.already_stored);
        assert_eq!(retry.score, 2);

        let stored = repo.get_attempt(quiz_id, session.id()).await.unwrap().unwrap();
        assert_eq!(stored.answers().len(), 1);
        assert_eq!(stored.score(), 2);
    }

    #[tokio::test]
    async fn retry_with_different_selection_follows_the_store() {
        let repo = InMemoryRepository::new();
        let (quiz_id, questions) = seeded(&repo, Visibility::Public).await;
        let flaky = FlakyAttempts {
            inner: repo.clone(),
            failures: AtomicU32::new(1),
            apply_before_failing: true,
        };
        let service = AttemptLoopService::new(fixed_clock(), Arc::new(repo.clone()), Arc::new(flaky));

        let mut session = service.start_attempt(&taker(), quiz_id).await.unwrap();
        service
            .submit_answer(&mut session, questions[0].id(), set(&[1]), None)
            .await
            .unwrap_err();

        let retry = service
            .submit_answer(&mut session, questions[0].id(), set(&[0]), None)
            .await
            .unwrap();
        assert!(retry.already_stored);
        assert_eq!(retry.record.selected_indices, set(&[1]));
        assert_eq!(retry.record.earned_marks, 0);
        assert_eq!(retry.score, 0);

        let stored = repo.get_attempt(quiz_id, session.id()).await.unwrap().unwrap();
        assert_eq!(stored.score(), retry.score);
        assert_eq!(stored.answers(), session.attempt().unwrap().answers());
    }

    #[tokio::test]
    async fn failed_write_leaves_session_unchanged() {
        let repo = InMemoryRepository::new();
        let (quiz_id, questions) = seeded(&repo, Visibility::Public).await;
        let flaky = FlakyAttempts {
            inner: repo.clone(),
            failures: AtomicU32::new(1),
            apply_before_failing: false,
        };
        let service = AttemptLoopService::new(fixed_clock(), Arc::new(repo.clone()), Arc::new(flaky));

        let mut session = service.start_attempt(&taker(), quiz_id).await.unwrap();
        service
            .submit_answer(&mut session, questions[0].id(), set(&[1]), None)
            .await
            .unwrap_err();
        assert_eq!(session.current_question().map(Question::id), Some(questions[0].id()));

        let ok = service
            .submit_answer(&mut session, questions[0].id(), set(&[1]), None)
            .await
            .unwrap();
        assert!(!ok.already_stored);
        assert_eq!(ok.record.earned_marks, 0);
    }

    #[tokio::test]
    async fn resume_continues_from_stored_answers() {
        let repo = InMemoryRepository::new();
        let (quiz_id, questions) = seeded(&repo, Visibility::Public).await;
        let clock = fixed_clock();
        let service =
            AttemptLoopService::new(clock, Arc::new(repo.clone()), Arc::new(repo.clone()));

        let mut session = service.start_attempt(&taker(), quiz_id).await.unwrap();
        service
            .submit_answer(&mut session, questions[0].id(), set(&[0]), None)
            .await
            .unwrap();
        let attempt_id = session.id();
        drop(session);

        let later = service.with_clock(clock.advanced(Duration::minutes(5)));
        let mut resumed = later.resume_attempt(quiz_id, attempt_id).await.unwrap();
        assert_eq!(
            resumed.current_question().map(Question::id),
            Some(questions[1].id())
        );
        later
            .submit_answer(&mut resumed, questions[1].id(), set(&[0, 2]), None)
            .await
            .unwrap();
        let done = later
            .submit_answer(&mut resumed, questions[2].id(), set(&[]), None)
            .await
            .unwrap();
        assert!(done.is_complete);
        assert_eq!(done.score, 5);

        let stored = repo.get_attempt(quiz_id, attempt_id).await.unwrap().unwrap();
        assert_eq!(
            stored.completed_at(),
            Some(fixed_now() + Duration::minutes(5))
        );
    }
}
