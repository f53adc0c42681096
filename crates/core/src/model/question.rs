use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{QuestionId, QuizId};

/// Smallest number of options a choice question may carry.
pub const MIN_OPTIONS: usize = 2;
/// Largest number of options a choice question may carry.
pub const MAX_OPTIONS: usize = 4;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Shape violations of a single question, independent of its quiz.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("unknown question type: {0}")]
    UnknownType(String),

    #[error("question text cannot be empty")]
    EmptyText,

    #[error("choice questions need between 2 and 4 options, got {count}")]
    OptionCount { count: usize },

    #[error("option {index} is blank")]
    BlankOption { index: usize },

    #[error("open answer questions cannot carry options or correct answers")]
    OpenAnswerWithOptions,

    #[error("choice questions need at least one correct option")]
    NoCorrectOption,

    #[error("correct index {index} is outside the {options} options")]
    CorrectIndexOutOfRange { index: usize, options: usize },

    #[error("single choice questions need exactly one correct option, got {count}")]
    SingleChoiceCorrectCount { count: usize },

    #[error("question marks must be > 0")]
    ZeroMarks,
}

//
// ─── QUESTION TYPE ─────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    OpenAnswer,
}

impl QuestionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::SingleChoice => "single_choice",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::OpenAnswer => "open_answer",
        }
    }

    /// Parses the stored representation.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::UnknownType` for anything outside the three variants.
    pub fn parse(raw: &str) -> Result<Self, QuestionError> {
        match raw {
            "single_choice" => Ok(QuestionType::SingleChoice),
            "multiple_choice" => Ok(QuestionType::MultipleChoice),
            "open_answer" => Ok(QuestionType::OpenAnswer),
            other => Err(QuestionError::UnknownType(other.to_owned())),
        }
    }

    #[must_use]
    pub fn is_choice(self) -> bool {
        !matches!(self, QuestionType::OpenAnswer)
    }
}

//
// ─── DRAFT ─────────────────────────────────────────────────────────────────────
//

/// Author input for a question before it is validated against its quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionDraft {
    pub text: String,
    pub kind: QuestionType,
    pub options: Vec<String>,
    pub correct_indices: BTreeSet<usize>,
    pub marks: u32,
}

impl QuestionDraft {
    /// Single choice question with one correct option.
    #[must_use]
    pub fn single_choice(
        text: impl Into<String>,
        options: impl IntoIterator<Item = impl Into<String>>,
        correct: usize,
        marks: u32,
    ) -> Self {
        Self {
            text: text.into(),
            kind: QuestionType::SingleChoice,
            options: options.into_iter().map(Into::into).collect(),
            correct_indices: BTreeSet::from([correct]),
            marks,
        }
    }

    #[must_use]
    pub fn multiple_choice(
        text: impl Into<String>,
        options: impl IntoIterator<Item = impl Into<String>>,
        correct: impl IntoIterator<Item = usize>,
        marks: u32,
    ) -> Self {
        Self {
            text: text.into(),
            kind: QuestionType::MultipleChoice,
            options: options.into_iter().map(Into::into).collect(),
            correct_indices: correct.into_iter().collect(),
            marks,
        }
    }

    #[must_use]
    pub fn open_answer(text: impl Into<String>, marks: u32) -> Self {
        Self {
            text: text.into(),
            kind: QuestionType::OpenAnswer,
            options: Vec::new(),
            correct_indices: BTreeSet::new(),
            marks,
        }
    }

    /// Checks the question's own shape, in a fixed order: text, options,
    /// correct indices, marks. The allocation check against the quiz comes
    /// after this and is not part of it.
    ///
    /// # Errors
    ///
    /// Returns the first `QuestionError` encountered.
    pub fn check_shape(&self) -> Result<(), QuestionError> {
        if self.text.trim().is_empty() {
            return Err(QuestionError::EmptyText);
        }

        if self.kind.is_choice() {
            let count = self.options.len();
            if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&count) {
                return Err(QuestionError::OptionCount { count });
            }
            if let Some(index) = self.options.iter().position(|o| o.trim().is_empty()) {
                return Err(QuestionError::BlankOption { index });
            }
            if self.correct_indices.is_empty() {
                return Err(QuestionError::NoCorrectOption);
            }
            if let Some(&index) = self.correct_indices.iter().find(|&&i| i >= count) {
                return Err(QuestionError::CorrectIndexOutOfRange {
                    index,
                    options: count,
                });
            }
            if self.kind == QuestionType::SingleChoice && self.correct_indices.len() != 1 {
                return Err(QuestionError::SingleChoiceCorrectCount {
                    count: self.correct_indices.len(),
                });
            }
        } else if !self.options.is_empty() || !self.correct_indices.is_empty() {
            return Err(QuestionError::OpenAnswerWithOptions);
        }

        if self.marks == 0 {
            return Err(QuestionError::ZeroMarks);
        }

        Ok(())
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// A validated question belonging to one quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    id: QuestionId,
    quiz_id: QuizId,
    text: String,
    kind: QuestionType,
    options: Vec<String>,
    correct_indices: BTreeSet<usize>,
    marks: u32,
}

impl Question {
    /// Builds a question from a draft after checking its shape.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the draft is malformed.
    pub fn from_draft(
        id: QuestionId,
        quiz_id: QuizId,
        draft: QuestionDraft,
    ) -> Result<Self, QuestionError> {
        draft.check_shape()?;
        Ok(Self {
            id,
            quiz_id,
            text: draft.text.trim().to_owned(),
            kind: draft.kind,
            options: draft.options.into_iter().map(|o| o.trim().to_owned()).collect(),
            correct_indices: draft.correct_indices,
            marks: draft.marks,
        })
    }

    /// Rehydrates a stored question, re-running the shape checks.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the stored document is malformed.
    pub fn from_persisted(
        id: QuestionId,
        quiz_id: QuizId,
        text: String,
        kind: QuestionType,
        options: Vec<String>,
        correct_indices: BTreeSet<usize>,
        marks: u32,
    ) -> Result<Self, QuestionError> {
        Self::from_draft(
            id,
            quiz_id,
            QuestionDraft {
                text,
                kind,
                options,
                correct_indices,
                marks,
            },
        )
    }

    /// The editable part of the question.
    #[must_use]
    pub fn to_draft(&self) -> QuestionDraft {
        QuestionDraft {
            text: self.text.clone(),
            kind: self.kind,
            options: self.options.clone(),
            correct_indices: self.correct_indices.clone(),
            marks: self.marks,
        }
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn kind(&self) -> QuestionType {
        self.kind
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn correct_indices(&self) -> &BTreeSet<usize> {
        &self.correct_indices
    }

    #[must_use]
    pub fn marks(&self) -> u32 {
        self.marks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_choice_draft_is_valid() {
        let draft = QuestionDraft::single_choice("2 + 2?", ["3", "4"], 1, 2);
        assert!(draft.check_shape().is_ok());
    }

    #[test]
    fn rejects_too_many_options() {
        let draft = QuestionDraft::multiple_choice("pick", ["a", "b", "c", "d", "e"], [0], 1);
        assert_eq!(
            draft.check_shape().unwrap_err(),
            QuestionError::OptionCount { count: 5 }
        );
    }

    #[test]
    fn rejects_single_option() {
        let draft = QuestionDraft::single_choice("pick", ["a"], 0, 1);
        assert_eq!(
            draft.check_shape().unwrap_err(),
            QuestionError::OptionCount { count: 1 }
        );
    }

    #[test]
    fn rejects_correct_index_out_of_range() {
        let draft = QuestionDraft::multiple_choice("pick", ["a", "b"], [0, 2], 1);
        assert_eq!(
            draft.check_shape().unwrap_err(),
            QuestionError::CorrectIndexOutOfRange {
                index: 2,
                options: 2
            }
        );
    }

    #[test]
    fn rejects_missing_correct_option() {
        let draft = QuestionDraft::multiple_choice("pick", ["a", "b"], std::iter::empty(), 1);
        assert_eq!(
            draft.check_shape().unwrap_err(),
            QuestionError::NoCorrectOption
        );
    }

    #[test]
    fn single_choice_needs_exactly_one_correct() {
        let mut draft = QuestionDraft::single_choice("pick", ["a", "b", "c"], 0, 1);
        draft.correct_indices.insert(2);
        assert_eq!(
            draft.check_shape().unwrap_err(),
            QuestionError::SingleChoiceCorrectCount { count: 2 }
        );
    }

    #[test]
    fn option_checks_run_before_marks() {
        let draft = QuestionDraft::multiple_choice("pick", ["a"], [0], 0);
        assert!(matches!(
            draft.check_shape(),
            Err(QuestionError::OptionCount { .. })
        ));
    }

    #[test]
    fn rejects_zero_marks() {
        let draft = QuestionDraft::open_answer("explain ownership", 0);
        assert_eq!(draft.check_shape().unwrap_err(), QuestionError::ZeroMarks);
    }

    #[test]
    fn open_answer_cannot_have_options() {
        let mut draft = QuestionDraft::open_answer("explain", 3);
        draft.options.push("a".into());
        assert_eq!(
            draft.check_shape().unwrap_err(),
            QuestionError::OpenAnswerWithOptions
        );
    }

    #[test]
    fn question_type_parse_rejects_unknown() {
        assert_eq!(
            QuestionType::parse("true_false").unwrap_err(),
            QuestionError::UnknownType("true_false".into())
        );
        assert_eq!(
            QuestionType::parse("open_answer").unwrap(),
            QuestionType::OpenAnswer
        );
    }
}
