//! Post-hoc review of a completed attempt.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::model::{AnswerRecord, Attempt, AttemptId, MAX_OPTIONS, Question, QuestionId, QuizId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReviewError {
    #[error("attempt {0} has not been completed")]
    AttemptNotCompleted(AttemptId),
}

//
// ─── REPORT ────────────────────────────────────────────────────────────────────
//

/// How a single option reads in the review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionMark {
    CorrectSelected,
    CorrectUnselected,
    IncorrectSelected,
    /// Incorrect and not selected.
    Neutral,
}

impl OptionMark {
    #[must_use]
    pub fn classify(correct: bool, selected: bool) -> Self {
        match (correct, selected) {
            (true, true) => OptionMark::CorrectSelected,
            (true, false) => OptionMark::CorrectUnselected,
            (false, true) => OptionMark::IncorrectSelected,
            (false, false) => OptionMark::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionReview {
    pub index: usize,
    /// Option text from the question bank; `None` when the question was
    /// deleted or shrunk after the attempt.
    pub text: Option<String>,
    pub mark: OptionMark,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionReview {
    pub question_id: QuestionId,
    pub text: Option<String>,
    pub marks: Option<u32>,
    pub earned_marks: u32,
    pub text_answer: Option<String>,
    pub answered: bool,
    pub options: Vec<OptionReview>,
}

/// Stored score disagrees with the recorded answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DataIntegrityWarning {
    pub recorded_score: u32,
    pub recomputed_score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewReport {
    pub attempt_id: AttemptId,
    pub quiz_id: QuizId,
    /// Score recomputed from the answer records.
    pub score: u32,
    pub questions: Vec<QuestionReview>,
    pub warning: Option<DataIntegrityWarning>,
}

impl ReviewReport {
    #[must_use]
    pub fn has_warning(&self) -> bool {
        self.warning.is_some()
    }
}

//
// ─── RECONCILE ─────────────────────────────────────────────────────────────────
//

/// Builds the review for a completed attempt.
///
/// Option correctness comes from each record's `correct_indices_snapshot`,
/// so edits made to the question bank after the attempt do not change the
/// review. The bank only contributes display text.
///
/// # Errors
///
/// Returns `ReviewError::AttemptNotCompleted` if the attempt is still open.
pub fn reconcile(attempt: &Attempt, bank: &[Question]) -> Result<ReviewReport, ReviewError> {
    if attempt.completed_at().is_none() {
        return Err(ReviewError::AttemptNotCompleted(attempt.id()));
    }

    let questions = attempt
        .question_snapshot()
        .iter()
        .map(|&id| {
            let live = bank.iter().find(|q| q.id() == id);
            review_question(id, live, attempt.answer_for(id))
        })
        .collect();

    let recomputed = attempt.earned_total();
    let warning = (recomputed != attempt.score()).then_some(DataIntegrityWarning {
        recorded_score: attempt.score(),
        recomputed_score: recomputed,
    });

    Ok(ReviewReport {
        attempt_id: attempt.id(),
        quiz_id: attempt.quiz_id(),
        score: recomputed,
        questions,
        warning,
    })
}

fn review_question(
    id: QuestionId,
    live: Option<&Question>,
    record: Option<&AnswerRecord>,
) -> QuestionReview {
    let empty = BTreeSet::new();
    let (selected, correct) = match record {
        Some(r) => (&r.selected_indices, &r.correct_indices_snapshot),
        None => (&empty, &empty),
    };

    // Cover every option still on the question plus any index the record
    // mentions, so nothing the taker saw disappears from the review. Indices
    // past any possible option are listed individually, never as a range.
    let option_count = live.map_or(0, |q| q.options().len());
    let dense = selected
        .iter()
        .chain(correct.iter())
        .filter(|&&i| i < MAX_OPTIONS)
        .map(|&i| i + 1)
        .fold(option_count, usize::max);
    let indices: BTreeSet<usize> = (0..dense)
        .chain(selected.iter().chain(correct.iter()).copied())
        .collect();
    let options = indices
        .into_iter()
        .map(|index| OptionReview {
            index,
            text: live.and_then(|q| q.options().get(index).cloned()),
            mark: OptionMark::classify(correct.contains(&index), selected.contains(&index)),
        })
        .collect();

    QuestionReview {
        question_id: id,
        text: live.map(|q| q.text().to_owned()),
        marks: live.map(Question::marks),
        earned_marks: record.map_or(0, |r| r.earned_marks),
        text_answer: record.and_then(|r| r.text_answer.clone()),
        answered: record.is_some(),
        options,
    }
}
