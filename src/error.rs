use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Errors surfaced to the interactive caller of a practice session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PracticeError {
    #[error("target sentence is empty after normalization")]
    EmptyTarget,

    #[error("cannot {command} while session is {state:?}")]
    InvalidTransition {
        state: SessionState,
        command: &'static str,
    },
}

/// Why a single delivery attempt to the logging endpoint failed.
///
/// Every variant is recoverable: the queue keeps the entry and retries later.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("network error: {0}")]
    Network(String),

    #[error("logging endpoint answered {0}")]
    Status(u16),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to encode attempt record: {0}")]
    Encode(#[from] serde_json::Error),
}
