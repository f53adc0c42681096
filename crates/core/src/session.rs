//! State machine for one taker's run through one quiz.
//!
//! `Created → InProgress → Completed`. There is no way back and no cancelled
//! state: an abandoned attempt simply stays `InProgress`.
//!
//! Submissions are two-phase so the caller can persist an answer before the
//! session accepts it: [`AttemptSession::begin_submission`] scores the answer
//! and locks the session, [`AttemptSession::commit`] applies it once the store
//! write succeeded and [`AttemptSession::abort`] releases the lock when it did
//! not. While a submission is pending every other submission is refused.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};

use crate::model::{
    AnswerRecord, Attempt, AttemptError, AttemptId, AttemptState, Question, QuestionId, Quiz,
    QuizId, UserId, Visibility,
};
use crate::scoring::{self, CandidateAnswer};

//
// ─── ACCESS POLICY ─────────────────────────────────────────────────────────────
//

/// Decides whether a user may attempt a quiz.
pub trait AccessPolicy: Send + Sync {
    fn may_attempt(&self, quiz: &Quiz, user: &UserId) -> bool;
}

/// Visibility-based policy: public quizzes are open to everyone, private ones
/// to their creator only, invite-only ones to the creator and invited users.
#[derive(Debug, Clone, Default)]
pub struct VisibilityPolicy {
    invited: HashSet<UserId>,
}

impl VisibilityPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_invited(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
        self.invited.extend(users);
        self
    }
}

impl AccessPolicy for VisibilityPolicy {
    fn may_attempt(&self, quiz: &Quiz, user: &UserId) -> bool {
        match quiz.visibility() {
            Visibility::Public => true,
            Visibility::InviteOnly => quiz.is_owned_by(user) || self.invited.contains(user),
            Visibility::Private => quiz.is_owned_by(user),
        }
    }
}

//
// ─── PENDING ANSWER ────────────────────────────────────────────────────────────
//

/// A scored answer waiting to be persisted. Consumed by `commit` or `abort`.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pending answer must be committed or aborted"]
pub struct PendingAnswer {
    attempt_id: AttemptId,
    quiz_id: QuizId,
    record: AnswerRecord,
    completes: bool,
}

impl PendingAnswer {
    #[must_use]
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn record(&self) -> &AnswerRecord {
        &self.record
    }

    /// Whether committing this answer completes the attempt.
    #[must_use]
    pub fn completes(&self) -> bool {
        self.completes
    }

    /// Swaps the freshly scored record for the one the store already holds
    /// for this question. The store keeps its first record, so the session
    /// must commit that one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPersistedState` if `stored` answers another question.
    pub fn adopt_stored(&mut self, stored: AnswerRecord) -> Result<(), AttemptError> {
        if stored.question_id != self.record.question_id {
            return Err(AttemptError::InvalidPersistedState(format!(
                "stored answer is for question {}, expected {}",
                stored.question_id, self.record.question_id
            )));
        }
        self.record = stored;
        Ok(())
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// Owns one attempt and the questions frozen at its start.
#[derive(Debug)]
pub struct AttemptSession {
    id: AttemptId,
    state: AttemptState,
    questions: Vec<Question>,
    attempt: Option<Attempt>,
    pending: Option<QuestionId>,
}

impl AttemptSession {
    /// A session that has not been started yet.
    #[must_use]
    pub fn new(id: AttemptId) -> Self {
        Self {
            id,
            state: AttemptState::Created,
            questions: Vec::new(),
            attempt: None,
            pending: None,
        }
    }

    /// Rebuilds a session from a persisted attempt, e.g. after a crash or a
    /// timed-out submission. `bank` must still contain every unanswered
    /// snapshot question; answered ones may have been deleted since.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::MissingQuestion` if an unanswered question is
    /// no longer available.
    pub fn resume(attempt: Attempt, bank: &[Question]) -> Result<Self, AttemptError> {
        let mut questions = Vec::with_capacity(attempt.question_snapshot().len());
        for &id in attempt.question_snapshot() {
            match bank.iter().find(|q| q.id() == id) {
                Some(q) => questions.push(q.clone()),
                None if attempt.answer_for(id).is_some() => {}
                None => return Err(AttemptError::MissingQuestion(id)),
            }
        }
        let state = if attempt.is_complete() {
            AttemptState::Completed
        } else {
            AttemptState::InProgress
        };
        Ok(Self {
            id: attempt.id(),
            state,
            questions,
            attempt: Some(attempt),
            pending: None,
        })
    }

    /// Starts the attempt: checks access, freezes the question bank in
    /// retrieval order and stamps `started_at`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the session is `Created`, `AccessDenied`
    /// if the policy refuses the user and `NoQuestions` for an empty bank.
    pub fn start(
        &mut self,
        quiz: &Quiz,
        bank: Vec<Question>,
        user_id: UserId,
        policy: &dyn AccessPolicy,
        now: DateTime<Utc>,
    ) -> Result<&Attempt, AttemptError> {
        if self.state != AttemptState::Created {
            return Err(AttemptError::InvalidState {
                state: self.state,
                operation: "start",
            });
        }
        if !policy.may_attempt(quiz, &user_id) {
            return Err(AttemptError::AccessDenied);
        }

        let bank: Vec<Question> = bank
            .into_iter()
            .filter(|q| q.quiz_id() == quiz.id())
            .collect();
        let snapshot = bank.iter().map(Question::id).collect();
        let attempt = Attempt::begin(self.id, quiz.id(), user_id, snapshot, now)?;

        self.questions = bank;
        self.state = AttemptState::InProgress;
        Ok(self.attempt.insert(attempt))
    }

    /// Scores an answer and reserves the session for it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless in progress, `SubmissionInProgress` if
    /// another answer is pending, `UnknownQuestion` / `DuplicateAnswer` for
    /// addressing errors.
    pub fn begin_submission(
        &mut self,
        question_id: QuestionId,
        selected_indices: BTreeSet<usize>,
        text_answer: Option<String>,
    ) -> Result<PendingAnswer, AttemptError> {
        let attempt = self.in_progress("submit an answer")?;
        if let Some(pending) = self.pending {
            return Err(AttemptError::SubmissionInProgress(pending));
        }
        attempt.check_answerable(question_id)?;
        let question = self
            .question(question_id)
            .ok_or(AttemptError::MissingQuestion(question_id))?;

        let candidate = CandidateAnswer {
            selected_indices,
            text_answer: text_answer.filter(|_| !question.kind().is_choice()),
        };
        let earned_marks = scoring::score(question, &candidate);
        let record = AnswerRecord {
            question_id,
            selected_indices: candidate.selected_indices,
            text_answer: candidate.text_answer,
            earned_marks,
            correct_indices_snapshot: question.correct_indices().clone(),
        };
        let completes = attempt.remaining() == 1;
        let quiz_id = attempt.quiz_id();

        self.pending = Some(question_id);
        Ok(PendingAnswer {
            attempt_id: self.id,
            quiz_id,
            record,
            completes,
        })
    }

    /// Applies a pending answer once it is durable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `pending` does not belong to this session's
    /// outstanding submission.
    pub fn commit(
        &mut self,
        pending: PendingAnswer,
        at: DateTime<Utc>,
    ) -> Result<&AnswerRecord, AttemptError> {
        self.take_pending(&pending, "commit")?;
        let question_id = pending.record.question_id;
        let attempt = self
            .attempt
            .as_mut()
            .ok_or(AttemptError::InvalidState {
                state: self.state,
                operation: "commit",
            })?;
        if attempt.record_answer(pending.record, at)? {
            self.state = AttemptState::Completed;
        }
        attempt
            .answer_for(question_id)
            .ok_or(AttemptError::UnknownQuestion(question_id))
    }

    /// Drops a pending answer that could not be persisted so it can be retried.
    pub fn abort(&mut self, pending: PendingAnswer) {
        // A foreign pending answer leaves the session untouched.
        let _ = self.take_pending(&pending, "abort");
    }

    /// Scores and applies an answer in one step, for callers without a store.
    ///
    /// # Errors
    ///
    /// Same as [`AttemptSession::begin_submission`].
    pub fn submit_answer(
        &mut self,
        question_id: QuestionId,
        selected_indices: BTreeSet<usize>,
        text_answer: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<&AnswerRecord, AttemptError> {
        let pending = self.begin_submission(question_id, selected_indices, text_answer)?;
        self.commit(pending, now)
    }

    /// First snapshot question without an answer, `None` once completed.
    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        let attempt = self.attempt.as_ref()?;
        let next = attempt.next_unanswered()?;
        self.question(next)
    }

    #[must_use]
    pub fn id(&self) -> AttemptId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> AttemptState {
        self.state
    }

    #[must_use]
    pub fn attempt(&self) -> Option<&Attempt> {
        self.attempt.as_ref()
    }

    /// Questions frozen at start, in snapshot order.
    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == AttemptState::Completed
    }

    #[must_use]
    pub fn pending_question(&self) -> Option<QuestionId> {
        self.pending
    }

    fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id() == id)
    }

    fn in_progress(&self, operation: &'static str) -> Result<&Attempt, AttemptError> {
        match (&self.state, &self.attempt) {
            (AttemptState::InProgress, Some(attempt)) => Ok(attempt),
            _ => Err(AttemptError::InvalidState {
                state: self.state,
                operation,
            }),
        }
    }

    fn take_pending(
        &mut self,
        pending: &PendingAnswer,
        operation: &'static str,
    ) -> Result<(), AttemptError> {
        if pending.attempt_id != self.id || self.pending != Some(pending.record.question_id) {
            return Err(AttemptError::InvalidState {
                state: self.state,
                operation,
            });
        }
        self.pending = None;
        Ok(())
    }
}
