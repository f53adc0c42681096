use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quiz_core::model::{
    AnswerRecord, Attempt, AttemptId, Question, QuestionId, Quiz, QuizId, UserId, Visibility,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::document::{
    AttemptDocument, QuestionDocument, QuizDocument, attempt_path, attempts_prefix,
    question_path, questions_prefix, quiz_path,
};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// The question bank moved since it was read; reload and retry.
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Whether retrying the same call with the same keys may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Connection(_))
    }
}

//
// ─── QUESTION BANK ─────────────────────────────────────────────────────────────
//

/// A quiz together with its questions, read at one revision.
#[derive(Debug, Clone)]
pub struct QuestionBank {
    pub quiz: Quiz,
    /// Questions in retrieval order (ascending id).
    pub questions: Vec<Question>,
    pub revision: u64,
    /// Highest question id ever stored for this quiz, deleted ones included.
    pub last_question_id: u64,
}

impl QuestionBank {
    /// Id to use for the next inserted question.
    ///
    /// Ids are never handed out twice: attempts and answer records keep
    /// referring to a question id after the question is deleted.
    #[must_use]
    pub fn next_question_id(&self) -> QuestionId {
        let highest = self
            .questions
            .iter()
            .map(|q| q.id().value())
            .fold(self.last_question_id, u64::max);
        QuestionId::new(highest).next()
    }
}

/// A write that can change a quiz's mark allocation.
#[derive(Debug, Clone)]
pub enum BankWrite {
    InsertQuestion(Question),
    ReplaceQuestion(Question),
    RemoveQuestion(QuestionId),
    UpdateQuiz(Quiz),
}

/// Outcome of an answer upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerWrite {
    Inserted,
    /// A record for this question was already stored and was kept.
    AlreadyPresent,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait QuizRepository: Send + Sync {
    /// Persist a new quiz and return its store-assigned id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the quiz cannot be stored.
    async fn insert_new_quiz(&self, quiz: &Quiz) -> Result<QuizId, StorageError>;

    /// Fetch a quiz by ID. Returns `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend or decoding failures.
    async fn get_quiz(&self, id: QuizId) -> Result<Option<Quiz>, StorageError>;

    /// List quizzes with the given visibility, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend or decoding failures.
    async fn list_quizzes_by_visibility(
        &self,
        visibility: Visibility,
        limit: u32,
    ) -> Result<Vec<Quiz>, StorageError>;

    /// List quizzes created by `creator`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend or decoding failures.
    async fn list_quizzes_by_creator(
        &self,
        creator: &UserId,
        limit: u32,
    ) -> Result<Vec<Quiz>, StorageError>;
}

#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Read the quiz, its questions and the bank revision in one snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the quiz does not exist.
    async fn load_bank(&self, quiz_id: QuizId) -> Result<QuestionBank, StorageError>;

    /// Apply `write` only if the bank is still at `expected_revision`.
    /// Returns the new revision.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another writer got there first and
    /// `StorageError::NotFound` if the quiz or the addressed question is gone.
    async fn commit_bank_write(
        &self,
        quiz_id: QuizId,
        expected_revision: u64,
        write: BankWrite,
    ) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Persist a freshly started attempt. Creating the same attempt twice is
    /// a no-op so that a timed-out create can be retried.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the attempt cannot be stored.
    async fn create_attempt(&self, attempt: &Attempt) -> Result<(), StorageError>;

    /// Fetch an attempt. Returns `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend or decoding failures.
    async fn get_attempt(
        &self,
        quiz_id: QuizId,
        attempt_id: AttemptId,
    ) -> Result<Option<Attempt>, StorageError>;

    /// Store an answer keyed by `(attempt_id, question_id)`, recompute the
    /// score and set `completed_at` if given and not set yet, atomically.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the attempt does not exist.
    async fn upsert_answer(
        &self,
        quiz_id: QuizId,
        attempt_id: AttemptId,
        record: &AnswerRecord,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<AnswerWrite, StorageError>;

    /// Attempts by `user` on one quiz, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend or decoding failures.
    async fn list_attempts_for_user(
        &self,
        quiz_id: QuizId,
        user: &UserId,
    ) -> Result<Vec<Attempt>, StorageError>;

    /// Attempts by `user` across all quizzes, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend or decoding failures.
    async fn list_user_attempts(&self, user: &UserId) -> Result<Vec<Attempt>, StorageError>;
}

//
// ─── IN-MEMORY DOCUMENT STORE ──────────────────────────────────────────────────
//

#[derive(Default)]
struct DocumentState {
    docs: BTreeMap<String, serde_json::Value>,
    banks: HashMap<QuizId, BankCounters>,
    next_quiz_id: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct BankCounters {
    revision: u64,
    last_question_id: u64,
}

impl DocumentState {
    fn read<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StorageError> {
        self.docs
            .get(path)
            .map(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| StorageError::Serialization(format!("{path}: {e}")))
            })
            .transpose()
    }

    fn write<T: Serialize>(&mut self, path: String, doc: &T) -> Result<(), StorageError> {
        let value =
            serde_json::to_value(doc).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.docs.insert(path, value);
        Ok(())
    }

    /// Direct children of a collection prefix, as `(id, value)` pairs.
    fn children<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a serde_json::Value)> + 'a {
        self.docs
            .range(prefix.to_owned()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .filter_map(move |(k, v)| {
                let id = &k[prefix.len()..];
                (!id.contains('/')).then_some((id, v))
            })
    }

    fn quizzes(&self) -> Result<Vec<Quiz>, StorageError> {
        let mut out = Vec::new();
        for (key, value) in self.docs.iter() {
            let Some(raw_id) = key.strip_prefix("quizzes/") else {
                continue;
            };
            if raw_id.contains('/') {
                continue;
            }
            let id: QuizId = raw_id
                .parse()
                .map_err(|e| StorageError::Serialization(format!("{key}: {e}")))?;
            let doc: QuizDocument = serde_json::from_value(value.clone())
                .map_err(|e| StorageError::Serialization(format!("{key}: {e}")))?;
            out.push(doc.into_quiz(id)?);
        }
        out.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(b.id().cmp(&a.id())));
        Ok(out)
    }

    fn questions(&self, quiz_id: QuizId) -> Result<Vec<Question>, StorageError> {
        let prefix = questions_prefix(quiz_id);
        let mut out = Vec::new();
        for (raw_id, value) in self.children(&prefix) {
            let id: QuestionId = raw_id.parse().map_err(|e| {
                StorageError::Serialization(format!("{prefix}{raw_id}: {e}"))
            })?;
            let doc: QuestionDocument = serde_json::from_value(value.clone())
                .map_err(|e| StorageError::Serialization(format!("{prefix}{raw_id}: {e}")))?;
            out.push(doc.into_question(id, quiz_id)?);
        }
        out.sort_by_key(Question::id);
        Ok(out)
    }

    fn attempts(&self, quiz_id: QuizId) -> Result<Vec<Attempt>, StorageError> {
        let prefix = attempts_prefix(quiz_id);
        let mut out = Vec::new();
        for (raw_id, value) in self.children(&prefix) {
            let id: AttemptId = raw_id.parse().map_err(|e| {
                StorageError::Serialization(format!("{prefix}{raw_id}: {e}"))
            })?;
            let doc: AttemptDocument = serde_json::from_value(value.clone())
                .map_err(|e| StorageError::Serialization(format!("{prefix}{raw_id}: {e}")))?;
            out.push(doc.into_attempt(id, quiz_id)?);
        }
        Ok(out)
    }
}

/// Document-store repository kept in memory, for tests and prototyping.
///
/// Documents are stored as JSON values under their store paths and decoded
/// through the typed schemas on every read, like a remote document store.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<DocumentState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, DocumentState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Overwrites a raw document. Used to simulate foreign or corrupt writes.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn put_raw(&self, path: &str, value: serde_json::Value) -> Result<(), StorageError> {
        self.lock()?.docs.insert(path.to_owned(), value);
        Ok(())
    }

    /// Reads a raw document.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn get_raw(&self, path: &str) -> Result<Option<serde_json::Value>, StorageError> {
        Ok(self.lock()?.docs.get(path).cloned())
    }
}

fn newest_first(mut attempts: Vec<Attempt>) -> Vec<Attempt> {
    attempts.sort_by(|a, b| b.started_at().cmp(&a.started_at()));
    attempts
}

fn take_limit(quizzes: impl Iterator<Item = Quiz>, limit: u32) -> Vec<Quiz> {
    quizzes
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .collect()
}

#[async_trait]
impl QuizRepository for InMemoryRepository {
    async fn insert_new_quiz(&self, quiz: &Quiz) -> Result<QuizId, StorageError> {
        let mut guard = self.lock()?;
        guard.next_quiz_id += 1;
        let id = QuizId::new(guard.next_quiz_id);
        guard.write(quiz_path(id), &QuizDocument::from_quiz(quiz))?;
        guard.banks.insert(id, BankCounters::default());
        Ok(id)
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Option<Quiz>, StorageError> {
        let guard = self.lock()?;
        guard
            .read::<QuizDocument>(&quiz_path(id))?
            .map(|doc| doc.into_quiz(id))
            .transpose()
    }

    async fn list_quizzes_by_visibility(
        &self,
        visibility: Visibility,
        limit: u32,
    ) -> Result<Vec<Quiz>, StorageError> {
        let quizzes = self.lock()?.quizzes()?;
        Ok(take_limit(
            quizzes.into_iter().filter(|q| q.visibility() == visibility),
            limit,
        ))
    }

    async fn list_quizzes_by_creator(
        &self,
        creator: &UserId,
        limit: u32,
    ) -> Result<Vec<Quiz>, StorageError> {
        let quizzes = self.lock()?.quizzes()?;
        Ok(take_limit(
            quizzes.into_iter().filter(|q| q.is_owned_by(creator)),
            limit,
        ))
    }
}

#[async_trait]
impl QuestionRepository for InMemoryRepository {
    async fn load_bank(&self, quiz_id: QuizId) -> Result<QuestionBank, StorageError> {
        let guard = self.lock()?;
        let quiz = guard
            .read::<QuizDocument>(&quiz_path(quiz_id))?
            .ok_or(StorageError::NotFound)?
            .into_quiz(quiz_id)?;
        let questions = guard.questions(quiz_id)?;
        let counters = guard.banks.get(&quiz_id).copied().unwrap_or_default();
        Ok(QuestionBank {
            quiz,
            questions,
            revision: counters.revision,
            last_question_id: counters.last_question_id,
        })
    }

    async fn commit_bank_write(
        &self,
        quiz_id: QuizId,
        expected_revision: u64,
        write: BankWrite,
    ) -> Result<u64, StorageError> {
        let mut guard = self.lock()?;
        if !guard.docs.contains_key(&quiz_path(quiz_id)) {
            return Err(StorageError::NotFound);
        }
        let mut counters = guard.banks.get(&quiz_id).copied().unwrap_or_default();
        if counters.revision != expected_revision {
            return Err(StorageError::Conflict);
        }

        match write {
            BankWrite::InsertQuestion(question) => {
                let path = question_path(quiz_id, question.id());
                if guard.docs.contains_key(&path) {
                    return Err(StorageError::Conflict);
                }
                guard.write(path, &QuestionDocument::from_question(&question))?;
                counters.last_question_id = counters.last_question_id.max(question.id().value());
            }
            BankWrite::ReplaceQuestion(question) => {
                let path = question_path(quiz_id, question.id());
                if !guard.docs.contains_key(&path) {
                    return Err(StorageError::NotFound);
                }
                guard.write(path, &QuestionDocument::from_question(&question))?;
            }
            BankWrite::RemoveQuestion(question_id) => {
                if guard
                    .docs
                    .remove(&question_path(quiz_id, question_id))
                    .is_none()
                {
                    return Err(StorageError::NotFound);
                }
            }
            BankWrite::UpdateQuiz(quiz) => {
                guard.write(quiz_path(quiz_id), &QuizDocument::from_quiz(&quiz))?;
            }
        }

        counters.revision += 1;
        guard.banks.insert(quiz_id, counters);
        Ok(counters.revision)
    }
}

#[async_trait]
impl AttemptRepository for InMemoryRepository {
    async fn create_attempt(&self, attempt: &Attempt) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let path = attempt_path(attempt.quiz_id(), attempt.id());
        if guard.docs.contains_key(&path) {
            return Ok(());
        }
        guard.write(path, &AttemptDocument::from_attempt(attempt))
    }

    async fn get_attempt(
        &self,
        quiz_id: QuizId,
        attempt_id: AttemptId,
    ) -> Result<Option<Attempt>, StorageError> {
        let guard = self.lock()?;
        guard
            .read::<AttemptDocument>(&attempt_path(quiz_id, attempt_id))?
            .map(|doc| doc.into_attempt(attempt_id, quiz_id))
            .transpose()
    }

    async fn upsert_answer(
        &self,
        quiz_id: QuizId,
        attempt_id: AttemptId,
        record: &AnswerRecord,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<AnswerWrite, StorageError> {
        let mut guard = self.lock()?;
        let path = attempt_path(quiz_id, attempt_id);
        let mut doc: AttemptDocument = guard.read(&path)?.ok_or(StorageError::NotFound)?;
        let inserted = doc.apply_answer(record, completed_at);
        guard.write(path, &doc)?;
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
        let attempts = self.lock()?.attempts(quiz_id)?;
        Ok(newest_first(
            attempts
                .into_iter()
                .filter(|a| a.user_id() == user)
                .collect(),
        ))
    }

    async fn list_user_attempts(&self, user: &UserId) -> Result<Vec<Attempt>, StorageError> {
        let guard = self.lock()?;
        let mut out = Vec::new();
        for quiz in guard.quizzes()? {
            out.extend(
                guard
                    .attempts(quiz.id())?
                    .into_iter()
                    .filter(|a| a.user_id() == user),
            );
        }
        Ok(newest_first(out))
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub quizzes: Arc<dyn QuizRepository>,
    pub questions: Arc<dyn QuestionRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            quizzes: Arc::new(repo.clone()),
            questions: Arc::new(repo.clone()),
            attempts: Arc::new(repo),
        }
    }
}
