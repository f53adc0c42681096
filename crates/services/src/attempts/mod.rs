mod navigation;
mod workflow;

// Public API of the attempt subsystem.
pub use crate::error::SessionError;
pub use navigation::NavigationIntent;
pub use workflow::{AttemptLoopService, SubmissionOutcome};
