#![forbid(unsafe_code)]

pub mod document;
pub mod repository;
pub mod sqlite;

pub use repository::{
    AnswerWrite, AttemptRepository, BankWrite, InMemoryRepository, QuestionBank,
    QuestionRepository, QuizRepository, Storage, StorageError,
};
