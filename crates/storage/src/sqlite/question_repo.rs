use quiz_core::model::{Question, QuizId};
use sqlx::{Row, Sqlite, Transaction};

use super::SqliteRepository;
use super::mapping::{
    conn, is_busy, map_question_row, map_quiz_row, question_id_from_i64, question_id_to_i64,
    quiz_id_to_i64, revision_from_i64, revision_to_i64, ser, to_json,
};
use crate::repository::{BankWrite, QuestionBank, QuestionRepository, StorageError};

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

async fn write_question(
    tx: &mut Transaction<'_, Sqlite>,
    question: &Question,
    replace: bool,
) -> Result<(), StorageError> {
    let sql = if replace {
        r"
        UPDATE questions
        SET text = ?3, kind = ?4, options = ?5, correct_indices = ?6, marks = ?7
        WHERE id = ?1 AND quiz_id = ?2
        "
    } else {
        r"
        INSERT INTO questions (id, quiz_id, text, kind, options, correct_indices, marks)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "
    };

    let res = sqlx::query(sql)
        .bind(question_id_to_i64(question.id())?)
        .bind(quiz_id_to_i64(question.quiz_id())?)
        .bind(question.text().to_owned())
        .bind(question.kind().as_str())
        .bind(to_json(question.options())?)
        .bind(to_json(question.correct_indices())?)
        .bind(i64::from(question.marks()))
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Conflict
            } else {
                conn(e)
            }
        })?;

    if replace && res.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

#[async_trait::async_trait]
impl QuestionRepository for SqliteRepository {
    async fn load_bank(&self, quiz_id: QuizId) -> Result<QuestionBank, StorageError> {
        let id = quiz_id_to_i64(quiz_id)?;
        // One read transaction so the revision matches the rows returned.
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let quiz_row = sqlx::query(
            r"
            SELECT id, title, description, total_marks, visibility, creator_id, created_at,
                   question_revision, last_question_id
            FROM quizzes WHERE id = ?1
            ",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        let rows = sqlx::query(
            r"
            SELECT id, quiz_id, text, kind, options, correct_indices, marks
            FROM questions
            WHERE quiz_id = ?1
            ORDER BY id ASC
            ",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;

        let quiz = map_quiz_row(&quiz_row)?;
        let revision =
            revision_from_i64(quiz_row.try_get::<i64, _>("question_revision").map_err(ser)?)?;
        let last_question_id =
            question_id_from_i64(quiz_row.try_get::<i64, _>("last_question_id").map_err(ser)?)?
                .value();
        let questions = rows
            .iter()
            .map(map_question_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QuestionBank {
            quiz,
            questions,
            revision,
            last_question_id,
        })
    }

    async fn commit_bank_write(
        &self,
        quiz_id: QuizId,
        expected_revision: u64,
        write: BankWrite,
    ) -> Result<u64, StorageError> {
        let id = quiz_id_to_i64(quiz_id)?;
        let expected = revision_to_i64(expected_revision)?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        // Claim the revision first; this also takes the write lock.
        let claimed = sqlx::query(
            r"
            UPDATE quizzes
            SET question_revision = question_revision + 1
            WHERE id = ?1 AND question_revision = ?2
            ",
        )
        .bind(id)
        .bind(expected)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            // Another writer kept the bank past the busy timeout.
            if is_busy(&e) {
                StorageError::Conflict
            } else {
                conn(e)
            }
        })?;

        if claimed.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM quizzes WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(conn)?;
            return Err(if exists.is_some() {
                StorageError::Conflict
            } else {
                StorageError::NotFound
            });
        }

        match &write {
            BankWrite::InsertQuestion(question) => {
                write_question(&mut tx, question, false).await?;
                sqlx::query(
                    r"
                    UPDATE quizzes
                    SET last_question_id = MAX(last_question_id, ?2)
                    WHERE id = ?1
                    ",
                )
                .bind(id)
                .bind(question_id_to_i64(question.id())?)
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            }
            BankWrite::ReplaceQuestion(question) => {
                write_question(&mut tx, question, true).await?;
            }
            BankWrite::RemoveQuestion(question_id) => {
                let res = sqlx::query("DELETE FROM questions WHERE id = ?1 AND quiz_id = ?2")
                    .bind(question_id_to_i64(*question_id)?)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(conn)?;
                if res.rows_affected() == 0 {
                    return Err(StorageError::NotFound);
                }
            }
            BankWrite::UpdateQuiz(quiz) => {
                sqlx::query(
                    r"
                    UPDATE quizzes
                    SET title = ?2, description = ?3, total_marks = ?4, visibility = ?5
                    WHERE id = ?1
                    ",
                )
                .bind(id)
                .bind(quiz.title().to_owned())
                .bind(quiz.description().to_owned())
                .bind(i64::from(quiz.total_marks()))
                .bind(quiz.visibility().as_str())
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            }
        }

        tx.commit().await.map_err(conn)?;
        tracing::debug!(quiz_id = %quiz_id, revision = expected_revision + 1, "bank write committed");
        Ok(expected_revision + 1)
    }
}
