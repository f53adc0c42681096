mod attempt;
mod ids;
mod question;
mod quiz;

pub use ids::{AttemptId, ParseIdError, QuestionId, QuizId, UserId};

pub use attempt::{AnswerRecord, Attempt, AttemptError, AttemptState};
pub use question::{MAX_OPTIONS, MIN_OPTIONS, Question, QuestionDraft, QuestionError, QuestionType};
pub use quiz::{Quiz, QuizError, Visibility};
