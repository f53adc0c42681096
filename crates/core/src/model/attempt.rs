use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::ids::{AttemptId, QuestionId, QuizId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Lifecycle state of an attempt session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptState {
    Created,
    InProgress,
    Completed,
}

impl AttemptState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptState::Created => "created",
            AttemptState::InProgress => "in_progress",
            AttemptState::Completed => "completed",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("cannot {operation} while attempt is {}", .state.as_str())]
    InvalidState {
        state: AttemptState,
        operation: &'static str,
    },

    #[error("question {0} is not part of this attempt")]
    UnknownQuestion(QuestionId),

    #[error("question {0} has already been answered")]
    DuplicateAnswer(QuestionId),

    #[error("a submission for question {0} is still in flight")]
    SubmissionInProgress(QuestionId),

    #[error("quiz has no questions to attempt")]
    NoQuestions,

    #[error("user is not allowed to attempt this quiz")]
    AccessDenied,

    #[error("question {0} from the snapshot is missing from the question bank")]
    MissingQuestion(QuestionId),

    #[error("invalid persisted attempt: {0}")]
    InvalidPersistedState(String),
}

//
// ─── ANSWER RECORD ─────────────────────────────────────────────────────────────
//

/// The scored response to one question. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    pub selected_indices: BTreeSet<usize>,
    pub text_answer: Option<String>,
    pub earned_marks: u32,
    /// Correct set of the question when this answer was scored.
    pub correct_indices_snapshot: BTreeSet<usize>,
}

//
// ─── ATTEMPT ───────────────────────────────────────────────────────────────────
//

/// One taker's run through one quiz.
///
/// `score` is only ever moved by [`Attempt::record_answer`], so for attempts
/// built in-process it always equals the sum of `earned_marks`. Rehydrated
/// attempts keep whatever score the store holds; the review reconciler is what
/// cross-checks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    id: AttemptId,
    quiz_id: QuizId,
    user_id: UserId,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    question_snapshot: Vec<QuestionId>,
    answers: Vec<AnswerRecord>,
    score: u32,
}

impl Attempt {
    /// Begins an attempt over a frozen list of question ids.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::NoQuestions` for an empty snapshot and
    /// `InvalidPersistedState` if it repeats an id.
    pub fn begin(
        id: AttemptId,
        quiz_id: QuizId,
        user_id: UserId,
        question_snapshot: Vec<QuestionId>,
        started_at: DateTime<Utc>,
    ) -> Result<Self, AttemptError> {
        if question_snapshot.is_empty() {
            return Err(AttemptError::NoQuestions);
        }
        ensure_unique(&question_snapshot, "question snapshot")?;
        Ok(Self {
            id,
            quiz_id,
            user_id,
            started_at,
            completed_at: None,
            question_snapshot,
            answers: Vec::new(),
            score: 0,
        })
    }

    /// Rehydrates an attempt from storage.
    ///
    /// Structural invariants (unique answers, answers within the snapshot,
    /// completion matching the answered set) are enforced; the stored score is
    /// kept as-is.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::InvalidPersistedState` if the stored attempt is
    /// structurally inconsistent.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: AttemptId,
        quiz_id: QuizId,
        user_id: UserId,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        question_snapshot: Vec<QuestionId>,
        answers: Vec<AnswerRecord>,
        score: u32,
    ) -> Result<Self, AttemptError> {
        ensure_unique(&question_snapshot, "question snapshot")?;
        let answered: Vec<QuestionId> = answers.iter().map(|a| a.question_id).collect();
        ensure_unique(&answered, "answers")?;
        if let Some(stray) = answered.iter().find(|id| !question_snapshot.contains(id)) {
            return Err(AttemptError::InvalidPersistedState(format!(
                "answer for question {stray} outside the snapshot"
            )));
        }

        let all_answered = !question_snapshot.is_empty() && answered.len() == question_snapshot.len();
        match completed_at {
            Some(done) if done < started_at => {
                return Err(AttemptError::InvalidPersistedState(
                    "completed_at is before started_at".into(),
                ));
            }
            Some(_) if !all_answered => {
                return Err(AttemptError::InvalidPersistedState(
                    "completed with unanswered questions".into(),
                ));
            }
            None if all_answered => {
                return Err(AttemptError::InvalidPersistedState(
                    "all questions answered but not completed".into(),
                ));
            }
            _ => {}
        }

        Ok(Self {
            id,
            quiz_id,
            user_id,
            started_at,
            completed_at,
            question_snapshot,
            answers,
            score,
        })
    }

    /// Appends a scored answer, completing the attempt on the last one.
    ///
    /// Returns `true` when this answer completed the attempt.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already completed, `UnknownQuestion` if the
    /// question is outside the snapshot and `DuplicateAnswer` if it was
    /// answered before.
    pub fn record_answer(
        &mut self,
        record: AnswerRecord,
        at: DateTime<Utc>,
    ) -> Result<bool, AttemptError> {
        self.check_answerable(record.question_id)?;

        self.score = self.score.saturating_add(record.earned_marks);
        self.answers.push(record);

        if self.answers.len() == self.question_snapshot.len() {
            self.completed_at = Some(at.max(self.started_at));
            return Ok(true);
        }
        Ok(false)
    }

    /// Checks that `question_id` can still be answered.
    ///
    /// # Errors
    ///
    /// Same as [`Attempt::record_answer`].
    pub fn check_answerable(&self, question_id: QuestionId) -> Result<(), AttemptError> {
        if self.is_complete() {
            return Err(AttemptError::InvalidState {
                state: AttemptState::Completed,
                operation: "submit an answer",
            });
        }
        if !self.question_snapshot.contains(&question_id) {
            return Err(AttemptError::UnknownQuestion(question_id));
        }
        if self.answer_for(question_id).is_some() {
            return Err(AttemptError::DuplicateAnswer(question_id));
        }
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> AttemptId {
        self.id
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn question_snapshot(&self) -> &[QuestionId] {
        &self.question_snapshot
    }

    #[must_use]
    pub fn answers(&self) -> &[AnswerRecord] {
        &self.answers
    }

    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    #[must_use]
    pub fn answer_for(&self, question_id: QuestionId) -> Option<&AnswerRecord> {
        self.answers.iter().find(|a| a.question_id == question_id)
    }

    /// First snapshot question without an answer.
    #[must_use]
    pub fn next_unanswered(&self) -> Option<QuestionId> {
        self.question_snapshot
            .iter()
            .copied()
            .find(|id| self.answer_for(*id).is_none())
    }

    /// Number of snapshot questions still unanswered.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.question_snapshot.len().saturating_sub(self.answers.len())
    }

    /// Sum of `earned_marks` across the recorded answers.
    #[must_use]
    pub fn earned_total(&self) -> u32 {
        self.answers
            .iter()
            .fold(0_u32, |acc, a| acc.saturating_add(a.earned_marks))
    }
}

fn ensure_unique(ids: &[QuestionId], what: &str) -> Result<(), AttemptError> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(*id) {
            return Err(AttemptError::InvalidPersistedState(format!(
                "question {id} repeated in {what}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn record(id: u64, earned: u32) -> AnswerRecord {
        AnswerRecord {
            question_id: QuestionId::new(id),
            selected_indices: BTreeSet::from([0]),
            text_answer: None,
            earned_marks: earned,
            correct_indices_snapshot: BTreeSet::from([0]),
        }
    }

    fn attempt(questions: &[u64]) -> Attempt {
        Attempt::begin(
            AttemptId::generate(),
            QuizId::new(1),
            UserId::new("taker"),
            questions.iter().copied().map(QuestionId::new).collect(),
            fixed_now(),
        )
        .unwrap()
    }

    #[test]
    fn empty_snapshot_is_rejected() {
        let err = Attempt::begin(
            AttemptId::generate(),
            QuizId::new(1),
            UserId::new("taker"),
            Vec::new(),
            fixed_now(),
        )
        .unwrap_err();
        assert_eq!(err, AttemptError::NoQuestions);
    }

    #[test]
    fn score_tracks_earned_marks() {
        let mut a = attempt(&[1, 2]);
        assert!(!a.record_answer(record(1, 3), fixed_now()).unwrap());
        assert!(a.record_answer(record(2, 0), fixed_now()).unwrap());
        assert_eq!(a.score(), 3);
        assert_eq!(a.score(), a.earned_total());
        assert_eq!(a.completed_at(), Some(fixed_now()));
    }

    #[test]
    fn duplicate_and_unknown_answers_are_rejected() {
        let mut a = attempt(&[1, 2]);
        a.record_answer(record(1, 1), fixed_now()).unwrap();
        assert_eq!(
            a.record_answer(record(1, 1), fixed_now()).unwrap_err(),
            AttemptError::DuplicateAnswer(QuestionId::new(1))
        );
        assert_eq!(
            a.record_answer(record(7, 1), fixed_now()).unwrap_err(),
            AttemptError::UnknownQuestion(QuestionId::new(7))
        );
        assert_eq!(a.answers().len(), 1);
        assert_eq!(a.score(), 1);
    }

    #[test]
    fn completion_never_precedes_start() {
        let mut a = attempt(&[1]);
        let earlier = fixed_now() - chrono::Duration::hours(1);
        a.record_answer(record(1, 1), earlier).unwrap();
        assert_eq!(a.completed_at(), Some(fixed_now()));
    }

    #[test]
    fn persisted_completion_must_match_answers() {
        let err = Attempt::from_persisted(
            AttemptId::generate(),
            QuizId::new(1),
            UserId::new("taker"),
            fixed_now(),
            Some(fixed_now()),
            vec![QuestionId::new(1), QuestionId::new(2)],
            vec![record(1, 1)],
            1,
        )
        .unwrap_err();
        assert!(matches!(err, AttemptError::InvalidPersistedState(_)));
    }

    #[test]
    fn persisted_score_is_kept_verbatim() {
        let a = Attempt::from_persisted(
            AttemptId::generate(),
            QuizId::new(1),
            UserId::new("taker"),
            fixed_now(),
            Some(fixed_now()),
            vec![QuestionId::new(1)],
            vec![record(1, 2)],
            5,
        )
        .unwrap();
        assert_eq!(a.score(), 5);
        assert_eq!(a.earned_total(), 2);
    }

    #[test]
    fn next_unanswered_follows_snapshot_order() {
        let mut a = attempt(&[3, 1, 2]);
        assert_eq!(a.next_unanswered(), Some(QuestionId::new(3)));
        a.record_answer(record(1, 0), fixed_now()).unwrap();
        assert_eq!(a.next_unanswered(), Some(QuestionId::new(3)));
        assert_eq!(a.remaining(), 2);
    }
}
