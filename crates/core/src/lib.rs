#![forbid(unsafe_code)]

pub mod allocation;
pub mod error;
pub mod model;
pub mod review;
pub mod scoring;
pub mod session;
pub mod time;

pub use allocation::{InvariantViolation, QuizConfigurationValidator, allocated_marks};
pub use error::Error;
pub use review::{DataIntegrityWarning, ReviewError, ReviewReport, reconcile};
pub use scoring::{CandidateAnswer, score};
pub use session::{AccessPolicy, AttemptSession, PendingAnswer, VisibilityPolicy};
pub use time::Clock;
