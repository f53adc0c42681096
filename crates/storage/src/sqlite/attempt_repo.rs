use chrono::{DateTime, Utc};
use quiz_core::model::{AnswerRecord, Attempt, AttemptId, QuizId, UserId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::SqliteRepository;
use super::mapping::{
    conn, map_answer_row, map_attempt_row, question_id_to_i64, quiz_id_to_i64, ser, to_json,
};
use crate::repository::{AnswerWrite, AttemptRepository, StorageError};

const ATTEMPT_COLUMNS: &str =
    "id, quiz_id, user_id, started_at, completed_at, score, question_snapshot";

async fn insert_answer(
    db: &mut SqliteConnection,
    attempt_id: &str,
    record: &AnswerRecord,
) -> Result<bool, StorageError> {
    let res = sqlx::query(
        r"
        INSERT INTO attempt_answers (
            attempt_id, question_id, selected_indices, text_answer, earned_marks, correct_indices
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(attempt_id, question_id) DO NOTHING
        ",
    )
    .bind(attempt_id)
    .bind(question_id_to_i64(record.question_id)?)
    .bind(to_json(&record.selected_indices)?)
    .bind(record.text_answer.clone())
    .bind(i64::from(record.earned_marks))
    .bind(to_json(&record.correct_indices_snapshot)?)
    .execute(&mut *db)
    .await
    .map_err(conn)?;
    Ok(res.rows_affected() > 0)
}

async fn load_answers(
    db: &mut SqliteConnection,
    attempt_id: &str,
) -> Result<Vec<AnswerRecord>, StorageError> {
    let rows = sqlx::query(
        r"
        SELECT question_id, selected_indices, text_answer, earned_marks, correct_indices
        FROM attempt_answers
        WHERE attempt_id = ?1
        ORDER BY rowid ASC
        ",
    )
    .bind(attempt_id)
    .fetch_all(&mut *db)
    .await
    .map_err(conn)?;

    rows.iter().map(map_answer_row).collect()
}

async fn hydrate(
    db: &mut SqliteConnection,
    rows: Vec<SqliteRow>,
) -> Result<Vec<Attempt>, StorageError> {
    let mut attempts = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.try_get("id").map_err(ser)?;
        let answers = load_answers(db, &id).await?;
        attempts.push(map_attempt_row(&row, answers)?);
    }
    Ok(attempts)
}

#[async_trait::async_trait]
impl AttemptRepository for SqliteRepository {
    async fn create_attempt(&self, attempt: &Attempt) -> Result<(), StorageError> {
        let id = attempt.id().to_string();
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let res = sqlx::query(
            r"
            INSERT INTO attempts (id, quiz_id, user_id, started_at, completed_at, score, question_snapshot)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO NOTHING
            ",
        )
        .bind(id.as_str())
        .bind(quiz_id_to_i64(attempt.quiz_id())?)
        .bind(attempt.user_id().as_str().to_owned())
        .bind(attempt.started_at())
        .bind(attempt.completed_at())
        .bind(i64::from(attempt.score()))
        .bind(to_json(attempt.question_snapshot())?)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        if res.rows_affected() > 0 {
            for record in attempt.answers() {
                insert_answer(&mut tx, &id, record).await?;
            }
        }
        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_attempt(
        &self,
        quiz_id: QuizId,
        attempt_id: AttemptId,
    ) -> Result<Option<Attempt>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let row = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE id = ?1 AND quiz_id = ?2"
        ))
        .bind(attempt_id.to_string())
        .bind(quiz_id_to_i64(quiz_id)?)
        .fetch_optional(&mut *tx)
        .await
        .map_err(conn)?;

        let attempt = match row {
            Some(row) => hydrate(&mut tx, vec![row]).await?.pop(),
            None => None,
        };
        tx.commit().await.map_err(conn)?;
        Ok(attempt)
    }

    async fn upsert_answer(
        &self,
        quiz_id: QuizId,
        attempt_id: AttemptId,
        record: &AnswerRecord,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<AnswerWrite, StorageError> {
        let id = attempt_id.to_string();
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let exists = sqlx::query("SELECT 1 FROM attempts WHERE id = ?1 AND quiz_id = ?2")
            .bind(id.as_str())
            .bind(quiz_id_to_i64(quiz_id)?)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;
        if exists.is_none() {
            return Err(StorageError::NotFound);
        }

        let inserted = insert_answer(&mut tx, &id, record).await?;

        sqlx::query(
            r"
            UPDATE attempts
            SET score = (
                    SELECT COALESCE(SUM(earned_marks), 0)
                    FROM attempt_answers WHERE attempt_id = ?1
                ),
                completed_at = COALESCE(completed_at, ?2)
            WHERE id = ?1
            ",
        )
        .bind(id.as_str())
        .bind(completed_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(if inserted {
            AnswerWrite::Inserted
        } else {
            AnswerWrite::AlreadyPresent
        })
    }

    async fn list_attempts_for_user(
        &self,
        quiz_id: QuizId,
        user: &UserId,
    ) -> Result<Vec<Attempt>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let rows = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts
             WHERE quiz_id = ?1 AND user_id = ?2
             ORDER BY started_at DESC"
        ))
        .bind(quiz_id_to_i64(quiz_id)?)
        .bind(user.as_str().to_owned())
        .fetch_all(&mut *tx)
        .await
        .map_err(conn)?;

        let attempts = hydrate(&mut tx, rows).await?;
        tx.commit().await.map_err(conn)?;
        Ok(attempts)
    }

    async fn list_user_attempts(&self, user: &UserId) -> Result<Vec<Attempt>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let rows = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts
             WHERE user_id = ?1
             ORDER BY started_at DESC"
        ))
        .bind(user.as_str().to_owned())
        .fetch_all(&mut *tx)
        .await
        .map_err(conn)?;

        let attempts = hydrate(&mut tx, rows).await?;
        tx.commit().await.map_err(conn)?;
        Ok(attempts)
    }
}
