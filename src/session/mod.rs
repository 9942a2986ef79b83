pub mod controller;
pub mod state;

pub use controller::{AttemptContext, PracticeController, SessionSnapshot};
pub use state::{SessionEffect, SessionEvent, SessionState, Transition, VerificationSession};
