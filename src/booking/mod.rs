pub mod classify;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use classify::{MarkupClassifier, Outcome, PageSnapshot, SubmissionClassifier, SubmissionResult};
pub use error::{BookingError, ErrorClass};
pub use orchestrator::{BookingOrchestrator, BookingPhase, BookingSettings, SubmitOutcome};
pub use state::{apply, Action, Effect, Input, Rejection, Transition};
