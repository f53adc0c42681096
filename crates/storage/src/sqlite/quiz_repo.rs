use quiz_core::model::{Quiz, QuizId, UserId, Visibility};

use super::SqliteRepository;
use super::mapping::{conn, map_quiz_row, quiz_id_from_i64, quiz_id_to_i64};
use crate::repository::{QuizRepository, StorageError};

#[async_trait::async_trait]
impl QuizRepository for SqliteRepository {
    async fn insert_new_quiz(&self, quiz: &Quiz) -> Result<QuizId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO quizzes (title, description, total_marks, visibility, creator_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(quiz.title().to_owned())
        .bind(quiz.description().to_owned())
        .bind(i64::from(quiz.total_marks()))
        .bind(quiz.visibility().as_str())
        .bind(quiz.creator_id().as_str().to_owned())
        .bind(quiz.created_at())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        quiz_id_from_i64(res.last_insert_rowid())
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Option<Quiz>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, title, description, total_marks, visibility, creator_id, created_at
            FROM quizzes WHERE id = ?1
            ",
        )
        .bind(quiz_id_to_i64(id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_quiz_row).transpose()
    }

    async fn list_quizzes_by_visibility(
        &self,
        visibility: Visibility,
        limit: u32,
    ) -> Result<Vec<Quiz>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, title, description, total_marks, visibility, creator_id, created_at
            FROM quizzes
            WHERE visibility = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            ",
        )
        .bind(visibility.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_quiz_row).collect()
    }

    async fn list_quizzes_by_creator(
        &self,
        creator: &UserId,
        limit: u32,
    ) -> Result<Vec<Quiz>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, title, description, total_marks, visibility, creator_id, created_at
            FROM quizzes
            WHERE creator_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            ",
        )
        .bind(creator.as_str().to_owned())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_quiz_row).collect()
    }
}
