//! Typed documents as they sit in the store.
//!
//! Paths and field names follow the document layout shared with other
//! clients:
//!
//! - `quizzes/{quizId}`
//! - `quizzes/{quizId}/questions/{questionId}`
//! - `quizzes/{quizId}/attempts/{attemptId}`
//!
//! Every document is converted into its domain type through the domain
//! constructors, so malformed documents are rejected when they are read
//! rather than wherever a field happens to be used.

use chrono::{DateTime, Utc};
use quiz_core::model::{
    AnswerRecord, Attempt, AttemptId, Question, QuestionId, QuestionType, Quiz, QuizId, UserId,
    Visibility,
};
use serde::{Deserialize, Serialize};

use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

#[must_use]
pub fn quiz_path(quiz_id: QuizId) -> String {
    format!("quizzes/{quiz_id}")
}

#[must_use]
pub fn questions_prefix(quiz_id: QuizId) -> String {
    format!("quizzes/{quiz_id}/questions/")
}

#[must_use]
pub fn question_path(quiz_id: QuizId, question_id: QuestionId) -> String {
    format!("quizzes/{quiz_id}/questions/{question_id}")
}

#[must_use]
pub fn attempts_prefix(quiz_id: QuizId) -> String {
    format!("quizzes/{quiz_id}/attempts/")
}

#[must_use]
pub fn attempt_path(quiz_id: QuizId, attempt_id: AttemptId) -> String {
    format!("quizzes/{quiz_id}/attempts/{attempt_id}")
}

//
// ─── QUIZ ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizDocument {
    pub title: String,
    pub description: String,
    pub total_marks: u32,
    pub visibility: Visibility,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl QuizDocument {
    #[must_use]
    pub fn from_quiz(quiz: &Quiz) -> Self {
        Self {
            title: quiz.title().to_owned(),
            description: quiz.description().to_owned(),
            total_marks: quiz.total_marks(),
            visibility: quiz.visibility(),
            creator_id: quiz.creator_id().clone(),
            created_at: quiz.created_at(),
        }
    }

    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the document fails validation.
    pub fn into_quiz(self, id: QuizId) -> Result<Quiz, StorageError> {
        Quiz::new(
            id,
            self.title,
            self.description,
            self.total_marks,
            self.visibility,
            self.creator_id,
            self.created_at,
        )
        .map_err(ser)
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDocument {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub options: Vec<String>,
    pub correct_indices: Vec<usize>,
    pub marks: u32,
}

impl QuestionDocument {
    #[must_use]
    pub fn from_question(question: &Question) -> Self {
        Self {
            text: question.text().to_owned(),
            kind: question.kind(),
            options: question.options().to_vec(),
            correct_indices: question.correct_indices().iter().copied().collect(),
            marks: question.marks(),
        }
    }

    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the document fails validation.
    pub fn into_question(self, id: QuestionId, quiz_id: QuizId) -> Result<Question, StorageError> {
        Question::from_persisted(
            id,
            quiz_id,
            self.text,
            self.kind,
            self.options,
            self.correct_indices.into_iter().collect(),
            self.marks,
        )
        .map_err(ser)
    }
}

//
// ─── ATTEMPT ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerDocument {
    pub question_id: QuestionId,
    pub selected_indices: Vec<usize>,
    pub text_answer: Option<String>,
    pub earned_marks: u32,
    /// Correct set captured when the answer was scored.
    pub correct_indices: Vec<usize>,
}

impl AnswerDocument {
    #[must_use]
    pub fn from_record(record: &AnswerRecord) -> Self {
        Self {
            question_id: record.question_id,
            selected_indices: record.selected_indices.iter().copied().collect(),
            text_answer: record.text_answer.clone(),
            earned_marks: record.earned_marks,
            correct_indices: record.correct_indices_snapshot.iter().copied().collect(),
        }
    }

    #[must_use]
    pub fn into_record(self) -> AnswerRecord {
        AnswerRecord {
            question_id: self.question_id,
            selected_indices: self.selected_indices.into_iter().collect(),
            text_answer: self.text_answer,
            earned_marks: self.earned_marks,
            correct_indices_snapshot: self.correct_indices.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptDocument {
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub score: u32,
    pub question_snapshot: Vec<QuestionId>,
    pub answers: Vec<AnswerDocument>,
}

impl AttemptDocument {
    #[must_use]
    pub fn from_attempt(attempt: &Attempt) -> Self {
        Self {
            user_id: attempt.user_id().clone(),
            started_at: attempt.started_at(),
            completed_at: attempt.completed_at(),
            score: attempt.score(),
            question_snapshot: attempt.question_snapshot().to_vec(),
            answers: attempt.answers().iter().map(AnswerDocument::from_record).collect(),
        }
    }

    /// Inserts `record` unless an answer for the same question is already
    /// stored, then recomputes the score and sets `completedAt` at most once.
    ///
    /// Returns `true` if the record was new.
    pub fn apply_answer(
        &mut self,
        record: &AnswerRecord,
        completed_at: Option<DateTime<Utc>>,
    ) -> bool {
        let inserted = if self
            .answers
            .iter()
            .any(|a| a.question_id == record.question_id)
        {
            false
        } else {
            self.answers.push(AnswerDocument::from_record(record));
            true
        };

        self.score = self
            .answers
            .iter()
            .fold(0_u32, |acc, a| acc.saturating_add(a.earned_marks));
        if self.completed_at.is_none() {
            self.completed_at = completed_at;
        }
        inserted
    }

    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the document fails validation.
    pub fn into_attempt(self, id: AttemptId, quiz_id: QuizId) -> Result<Attempt, StorageError> {
        Attempt::from_persisted(
            id,
            quiz_id,
            self.user_id,
            self.started_at,
            self.completed_at,
            self.question_snapshot,
            self.answers.into_iter().map(AnswerDocument::into_record).collect(),
            self.score,
        )
        .map_err(ser)
    }
}
