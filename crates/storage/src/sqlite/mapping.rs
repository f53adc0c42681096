use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use quiz_core::model::{
    AnswerRecord, Attempt, AttemptId, Question, QuestionId, QuestionType, Quiz, QuizId, UserId,
    Visibility,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

/// `SQLITE_BUSY` and its extended codes: another connection holds the lock.
pub(crate) fn is_busy(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db)
            if db.code().is_some_and(|code| code.parse::<i32>().is_ok_and(|c| (c & 0xff) == 5))
    )
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn quiz_id_to_i64(id: QuizId) -> Result<i64, StorageError> {
    i64::try_from(id.value()).map_err(|_| StorageError::Serialization("quiz_id overflow".into()))
}

pub(crate) fn quiz_id_from_i64(v: i64) -> Result<QuizId, StorageError> {
    Ok(QuizId::new(i64_to_u64("quiz_id", v)?))
}

pub(crate) fn question_id_to_i64(id: QuestionId) -> Result<i64, StorageError> {
    i64::try_from(id.value())
        .map_err(|_| StorageError::Serialization("question_id overflow".into()))
}

pub(crate) fn question_id_from_i64(v: i64) -> Result<QuestionId, StorageError> {
    Ok(QuestionId::new(i64_to_u64("question_id", v)?))
}

pub(crate) fn revision_from_i64(v: i64) -> Result<u64, StorageError> {
    i64_to_u64("question_revision", v)
}

pub(crate) fn revision_to_i64(v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization("question_revision overflow".into()))
}

/// Index sets and option lists are stored as JSON arrays in TEXT columns.
pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

pub(crate) fn from_json<T: DeserializeOwned>(
    field: &'static str,
    raw: &str,
) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Serialization(format!("{field}: {e}")))
}

pub(crate) fn map_quiz_row(row: &SqliteRow) -> Result<Quiz, StorageError> {
    let visibility: String = row.try_get("visibility").map_err(ser)?;
    let creator: String = row.try_get("creator_id").map_err(ser)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(ser)?;

    Quiz::new(
        quiz_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<String, _>("description").map_err(ser)?,
        i64_to_u32("total_marks", row.try_get::<i64, _>("total_marks").map_err(ser)?)?,
        Visibility::parse(&visibility).map_err(ser)?,
        UserId::new(creator),
        created_at,
    )
    .map_err(ser)
}

pub(crate) fn map_question_row(row: &SqliteRow) -> Result<Question, StorageError> {
    let kind: String = row.try_get("kind").map_err(ser)?;
    let options: String = row.try_get("options").map_err(ser)?;
    let correct: String = row.try_get("correct_indices").map_err(ser)?;

    Question::from_persisted(
        question_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        quiz_id_from_i64(row.try_get::<i64, _>("quiz_id").map_err(ser)?)?,
        row.try_get::<String, _>("text").map_err(ser)?,
        QuestionType::parse(&kind).map_err(ser)?,
        from_json::<Vec<String>>("options", &options)?,
        from_json::<BTreeSet<usize>>("correct_indices", &correct)?,
        i64_to_u32("marks", row.try_get::<i64, _>("marks").map_err(ser)?)?,
    )
    .map_err(ser)
}

pub(crate) fn map_answer_row(row: &SqliteRow) -> Result<AnswerRecord, StorageError> {
    let selected: String = row.try_get("selected_indices").map_err(ser)?;
    let correct: String = row.try_get("correct_indices").map_err(ser)?;

    Ok(AnswerRecord {
        question_id: question_id_from_i64(row.try_get::<i64, _>("question_id").map_err(ser)?)?,
        selected_indices: from_json("selected_indices", &selected)?,
        text_answer: row.try_get("text_answer").map_err(ser)?,
        earned_marks: i64_to_u32(
            "earned_marks",
            row.try_get::<i64, _>("earned_marks").map_err(ser)?,
        )?,
        correct_indices_snapshot: from_json("correct_indices", &correct)?,
    })
}

/// Builds an attempt from its row plus its answer rows in insertion order.
pub(crate) fn map_attempt_row(
    row: &SqliteRow,
    answers: Vec<AnswerRecord>,
) -> Result<Attempt, StorageError> {
    let id: String = row.try_get("id").map_err(ser)?;
    let user: String = row.try_get("user_id").map_err(ser)?;
    let snapshot: String = row.try_get("question_snapshot").map_err(ser)?;

    Attempt::from_persisted(
        id.parse::<AttemptId>().map_err(ser)?,
        quiz_id_from_i64(row.try_get::<i64, _>("quiz_id").map_err(ser)?)?,
        UserId::new(user),
        row.try_get("started_at").map_err(ser)?,
        row.try_get("completed_at").map_err(ser)?,
        from_json("question_snapshot", &snapshot)?,
        answers,
        i64_to_u32("score", row.try_get::<i64, _>("score").map_err(ser)?)?,
    )
    .map_err(ser)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_ids_are_rejected() {
        assert!(matches!(
            quiz_id_from_i64(-1),
            Err(StorageError::Serialization(_))
        ));
        assert_eq!(question_id_from_i64(7).unwrap(), QuestionId::new(7));
    }

    #[test]
    fn json_columns_round_trip_index_sets() {
        let set: BTreeSet<usize> = [2, 0].into_iter().collect();
        let raw = to_json(&set).unwrap();
        assert_eq!(raw, "[0,2]");
        let back: BTreeSet<usize> = from_json("correct_indices", &raw).unwrap();
        assert_eq!(back, set);
        assert!(from_json::<BTreeSet<usize>>("correct_indices", "[-1]").is_err());
    }
}
