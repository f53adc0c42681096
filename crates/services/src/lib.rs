#![forbid(unsafe_code)]

pub mod attempts;
pub mod auth;
pub mod authoring_service;
pub mod error;
pub mod quiz_service;
pub mod records_service;
pub mod review_service;

pub use quiz_core::Clock;

pub use attempts::{AttemptLoopService, NavigationIntent, SubmissionOutcome};
pub use auth::{AuthSession, IdentityListener};
pub use authoring_service::{Allocation, AuthoringService};
pub use error::{
    AuthError, AuthoringError, QuizServiceError, RecordsError, ReviewServiceError, SessionError,
};
pub use quiz_service::{QuizDetails, QuizService};
pub use records_service::{AttemptRecord, ProfileStats, RecordsService};
pub use review_service::ReviewService;
