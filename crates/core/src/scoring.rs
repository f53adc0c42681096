//! Earned-marks rule for a single answer.

use std::collections::BTreeSet;

use crate::model::{Question, QuestionType};

/// What a taker submitted for one question.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateAnswer {
    pub selected_indices: BTreeSet<usize>,
    pub text_answer: Option<String>,
}

impl CandidateAnswer {
    #[must_use]
    pub fn selection(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            selected_indices: indices.into_iter().collect(),
            text_answer: None,
        }
    }

    #[must_use]
    pub fn text(answer: impl Into<String>) -> Self {
        Self {
            selected_indices: BTreeSet::new(),
            text_answer: Some(answer.into()),
        }
    }
}

/// Marks earned by `candidate` on `question`.
///
/// Choice questions award the full marks only when the selected set equals the
/// correct set; anything else, including indices past the last option, earns
/// zero. Open answers always earn zero here since they are graded by hand.
#[must_use]
pub fn score(question: &Question, candidate: &CandidateAnswer) -> u32 {
    match question.kind() {
        QuestionType::SingleChoice | QuestionType::MultipleChoice => {
            if candidate.selected_indices == *question.correct_indices() {
                question.marks()
            } else {
                0
            }
        }
        QuestionType::OpenAnswer => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QuestionDraft, QuestionId, QuizId};

    fn question(draft: QuestionDraft) -> Question {
        Question::from_draft(QuestionId::new(1), QuizId::new(1), draft).unwrap()
    }

    #[test]
    fn exact_set_earns_full_marks() {
        let q = question(QuestionDraft::multiple_choice(
            "primes",
            ["2", "4", "5"],
            [0, 2],
            4,
        ));
        assert_eq!(score(&q, &CandidateAnswer::selection([2, 0])), 4);
    }

    #[test]
    fn superset_earns_nothing() {
        let q = question(QuestionDraft::multiple_choice(
            "primes",
            ["2", "4", "5"],
            [0, 2],
            4,
        ));
        assert_eq!(score(&q, &CandidateAnswer::selection([0, 1, 2])), 0);
    }

    #[test]
    fn subset_earns_nothing() {
        let q = question(QuestionDraft::multiple_choice(
            "primes",
            ["2", "4", "5"],
            [0, 2],
            4,
        ));
        assert_eq!(score(&q, &CandidateAnswer::selection([0])), 0);
        assert_eq!(score(&q, &CandidateAnswer::default()), 0);
    }

    #[test]
    fn out_of_range_selection_is_just_wrong() {
        let q = question(QuestionDraft::single_choice("pick", ["a", "b"], 1, 2));
        assert_eq!(score(&q, &CandidateAnswer::selection([9])), 0);
        assert_eq!(score(&q, &CandidateAnswer::selection([1, 9])), 0);
        assert_eq!(score(&q, &CandidateAnswer::selection([1])), 2);
    }

    #[test]
    fn open_answer_scores_zero() {
        let q = question(QuestionDraft::open_answer("explain borrowing", 5));
        assert_eq!(score(&q, &CandidateAnswer::text("it is a loan")), 0);
    }
}
