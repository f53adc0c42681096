//! Mark-allocation rules applied to every question write.
//!
//! The sum of `marks` over a quiz's questions must never exceed the quiz's
//! `total_marks`. The allocated amount is always derived from the question
//! list it is given; callers are responsible for reading that list and
//! writing the result atomically (see the storage revision check).

use thiserror::Error;

use crate::model::{Question, QuestionDraft, QuestionError, QuestionId, Quiz};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// A rejected question write.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvariantViolation {
    #[error(transparent)]
    Question(#[from] QuestionError),

    #[error(
        "allocating {marks} marks on top of {allocated} exceeds the quiz total of {total_marks} by {overage}"
    )]
    MarksExceeded {
        allocated: u32,
        marks: u32,
        total_marks: u32,
        overage: u32,
    },

    #[error("total marks {total_marks} is below the {allocated} marks already allocated")]
    TotalBelowAllocated { total_marks: u32, allocated: u32 },

    #[error("question {0} is not part of this quiz")]
    UnknownQuestion(QuestionId),
}

impl InvariantViolation {
    /// Overage for a marks violation, `None` for every other kind.
    #[must_use]
    pub fn overage(&self) -> Option<u32> {
        match self {
            InvariantViolation::MarksExceeded { overage, .. } => Some(*overage),
            _ => None,
        }
    }
}

/// Sum of marks across `questions`, saturating at `u32::MAX`.
#[must_use]
pub fn allocated_marks(questions: &[Question]) -> u32 {
    let total: u64 = questions.iter().map(|q| u64::from(q.marks())).sum();
    u32::try_from(total).unwrap_or(u32::MAX)
}

/// Validates question writes for one quiz.
#[derive(Debug, Clone, Copy)]
pub struct QuizConfigurationValidator<'a> {
    quiz: &'a Quiz,
}

impl<'a> QuizConfigurationValidator<'a> {
    #[must_use]
    pub fn new(quiz: &'a Quiz) -> Self {
        Self { quiz }
    }

    /// Validates a new question given the marks already allocated.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation::Question` for shape errors and
    /// `InvariantViolation::MarksExceeded` when the quiz total would be passed.
    pub fn add_question(
        &self,
        allocated_so_far: u32,
        id: QuestionId,
        draft: QuestionDraft,
    ) -> Result<Question, InvariantViolation> {
        let question = Question::from_draft(id, self.quiz.id(), draft)?;
        self.check_allocation(allocated_so_far, question.marks())?;
        Ok(question)
    }

    /// Validates a replacement for an existing question. The allocation is
    /// recomputed from `existing` with the edited question left out.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation::UnknownQuestion` if `id` is not in
    /// `existing`, otherwise the same errors as [`Self::add_question`].
    pub fn edit_question(
        &self,
        existing: &[Question],
        id: QuestionId,
        draft: QuestionDraft,
    ) -> Result<Question, InvariantViolation> {
        if !existing.iter().any(|q| q.id() == id) {
            return Err(InvariantViolation::UnknownQuestion(id));
        }
        let others = sum_excluding(existing, id);
        self.add_question(others, id, draft)
    }

    /// Validates removing a question and returns the remaining allocation.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation::UnknownQuestion` if `id` is not in
    /// `existing`, or `MarksExceeded` if the remaining questions still break
    /// the quiz total.
    pub fn remove_question(
        &self,
        existing: &[Question],
        id: QuestionId,
    ) -> Result<u32, InvariantViolation> {
        if !existing.iter().any(|q| q.id() == id) {
            return Err(InvariantViolation::UnknownQuestion(id));
        }
        let remaining = sum_excluding(existing, id);
        self.check_allocation(remaining, 0)?;
        Ok(remaining)
    }

    /// Validates a new `total_marks` for the quiz against its current questions.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation::TotalBelowAllocated` if the questions
    /// already allocate more than `total_marks`.
    pub fn check_total(
        &self,
        existing: &[Question],
        total_marks: u32,
    ) -> Result<(), InvariantViolation> {
        let allocated = allocated_marks(existing);
        if allocated > total_marks {
            return Err(InvariantViolation::TotalBelowAllocated {
                total_marks,
                allocated,
            });
        }
        Ok(())
    }

    fn check_allocation(&self, allocated: u32, marks: u32) -> Result<(), InvariantViolation> {
        let total_marks = self.quiz.total_marks();
        let requested = u64::from(allocated) + u64::from(marks);
        if requested > u64::from(total_marks) {
            let overage = u32::try_from(requested - u64::from(total_marks)).unwrap_or(u32::MAX);
            return Err(InvariantViolation::MarksExceeded {
                allocated,
                marks,
                total_marks,
                overage,
            });
        }
        Ok(())
    }
}

fn sum_excluding(existing: &[Question], id: QuestionId) -> u32 {
    let total: u64 = existing
        .iter()
        .filter(|q| q.id() != id)
        .map(|q| u64::from(q.marks()))
        .sum();
    u32::try_from(total).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QuizId, UserId, Visibility};
    use crate::time::fixed_now;

    fn quiz(total: u32) -> Quiz {
        Quiz::new(
            QuizId::new(1),
            "Marks",
            "",
            total,
            Visibility::Public,
            UserId::new("author"),
            fixed_now(),
        )
        .unwrap()
    }

    fn draft(marks: u32) -> QuestionDraft {
        QuestionDraft::single_choice("q", ["a", "b"], 0, marks)
    }

    #[test]
    fn accepts_then_rejects_with_overage() {
        let quiz = quiz(10);
        let validator = QuizConfigurationValidator::new(&quiz);

        let q1 = validator
            .add_question(0, QuestionId::new(1), draft(6))
            .unwrap();
        let allocated = allocated_marks(std::slice::from_ref(&q1));
        assert_eq!(allocated, 6);

        let err = validator
            .add_question(allocated, QuestionId::new(2), draft(5))
            .unwrap_err();
        assert_eq!(err.overage(), Some(1));
        assert_eq!(
            err,
            InvariantViolation::MarksExceeded {
                allocated: 6,
                marks: 5,
                total_marks: 10,
                overage: 1
            }
        );
    }

    #[test]
    fn exact_fill_is_allowed() {
        let quiz = quiz(10);
        let validator = QuizConfigurationValidator::new(&quiz);
        assert!(validator.add_question(6, QuestionId::new(2), draft(4)).is_ok());
    }

    #[test]
    fn shape_errors_win_over_allocation() {
        let quiz = quiz(1);
        let validator = QuizConfigurationValidator::new(&quiz);
        let err = validator
            .add_question(
                1,
                QuestionId::new(1),
                QuestionDraft::multiple_choice("q", ["a", "b"], [5], 3),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            InvariantViolation::Question(QuestionError::CorrectIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn edit_recomputes_without_the_edited_question() {
        let quiz = quiz(10);
        let validator = QuizConfigurationValidator::new(&quiz);
        let q1 = validator.add_question(0, QuestionId::new(1), draft(6)).unwrap();
        let q2 = validator.add_question(6, QuestionId::new(2), draft(4)).unwrap();
        let existing = vec![q1, q2];

        let edited = validator
            .edit_question(&existing, QuestionId::new(1), draft(5))
            .unwrap();
        assert_eq!(edited.marks(), 5);

        let err = validator
            .edit_question(&existing, QuestionId::new(1), draft(7))
            .unwrap_err();
        assert_eq!(err.overage(), Some(1));
    }

    #[test]
    fn edit_of_missing_question_is_rejected() {
        let quiz = quiz(10);
        let validator = QuizConfigurationValidator::new(&quiz);
        assert_eq!(
            validator
                .edit_question(&[], QuestionId::new(3), draft(1))
                .unwrap_err(),
            InvariantViolation::UnknownQuestion(QuestionId::new(3))
        );
    }

    #[test]
    fn remove_returns_remaining_allocation() {
        let quiz = quiz(10);
        let validator = QuizConfigurationValidator::new(&quiz);
        let q1 = validator.add_question(0, QuestionId::new(1), draft(6)).unwrap();
        let q2 = validator.add_question(6, QuestionId::new(2), draft(3)).unwrap();
        let remaining = validator
            .remove_question(&[q1, q2], QuestionId::new(1))
            .unwrap();
        assert_eq!(remaining, 3);
    }

    #[test]
    fn lowering_total_below_allocation_is_rejected() {
        let quiz = quiz(10);
        let validator = QuizConfigurationValidator::new(&quiz);
        let q1 = validator.add_question(0, QuestionId::new(1), draft(8)).unwrap();
        assert_eq!(
            validator.check_total(&[q1.clone()], 5).unwrap_err(),
            InvariantViolation::TotalBelowAllocated {
                total_marks: 5,
                allocated: 8
            }
        );
        assert!(validator.check_total(&[q1], 8).is_ok());
    }

    #[test]
    fn sequence_of_adds_never_passes_total() {
        let quiz = quiz(10);
        let validator = QuizConfigurationValidator::new(&quiz);
        let mut accepted: Vec<Question> = Vec::new();
        for (i, marks) in [3, 4, 5, 2, 1, 9, 1].into_iter().enumerate() {
            let before = allocated_marks(&accepted);
            let id = QuestionId::new(i as u64 + 1);
            match validator.add_question(before, id, draft(marks)) {
                Ok(q) => accepted.push(q),
                Err(_) => assert_eq!(allocated_marks(&accepted), before),
            }
            assert!(allocated_marks(&accepted) <= quiz.total_marks());
        }
        assert_eq!(allocated_marks(&accepted), 10);
    }
}
