use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the schema migrations that have not been applied yet.
///
/// Version 1 creates quizzes, questions, attempts and their answers.
/// Version 2 adds the per-quiz question id high-water mark.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS quizzes (
                    id INTEGER PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    total_marks INTEGER NOT NULL CHECK (total_marks >= 0),
                    visibility TEXT NOT NULL
                        CHECK (visibility IN ('public', 'invite_only', 'private')),
                    creator_id TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    question_revision INTEGER NOT NULL DEFAULT 0
                        CHECK (question_revision >= 0)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS questions (
                    id INTEGER NOT NULL,
                    quiz_id INTEGER NOT NULL,
                    text TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    options TEXT NOT NULL,
                    correct_indices TEXT NOT NULL,
                    marks INTEGER NOT NULL CHECK (marks > 0),
                    PRIMARY KEY (id, quiz_id),
                    FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS attempts (
                    id TEXT PRIMARY KEY,
                    quiz_id INTEGER NOT NULL,
                    user_id TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    completed_at TEXT,
                    score INTEGER NOT NULL CHECK (score >= 0),
                    question_snapshot TEXT NOT NULL,
                    FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        // No foreign key to questions: answers outlive deleted questions.
        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS attempt_answers (
                    attempt_id TEXT NOT NULL,
                    question_id INTEGER NOT NULL,
                    selected_indices TEXT NOT NULL,
                    text_answer TEXT,
                    earned_marks INTEGER NOT NULL CHECK (earned_marks >= 0),
                    correct_indices TEXT NOT NULL,
                    PRIMARY KEY (attempt_id, question_id),
                    FOREIGN KEY (attempt_id) REFERENCES attempts(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_quizzes_visibility_created
                    ON quizzes (visibility, created_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_quizzes_creator_created
                    ON quizzes (creator_id, created_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_attempts_user_started
                    ON attempts (user_id, started_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_attempts_quiz_user
                    ON attempts (quiz_id, user_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied schema migration");
    }

    if !is_applied(pool, 2).await? {
        let mut tx = pool.begin().await?;

        // Question ids only move forward, even across deletions.
        sqlx::query(
            r"
                ALTER TABLE quizzes
                ADD COLUMN last_question_id INTEGER NOT NULL DEFAULT 0
                    CHECK (last_question_id >= 0);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                UPDATE quizzes
                SET last_question_id = COALESCE(
                    (SELECT MAX(id) FROM questions WHERE questions.quiz_id = quizzes.id),
                    0
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(2_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 2, "applied schema migration");
    }

    Ok(())
}
