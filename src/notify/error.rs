use thiserror::Error;

use crate::notify::stream::Phase;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("event source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("acknowledgment store failure: {0}")]
    AckStore(String),
    #[error("invalid state: expected {expected:?}, found {actual:?}")]
    InvalidState { expected: Phase, actual: Phase },
    #[error("notification stream terminated")]
    Terminated,
}

impl NotifyError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        NotifyError::SourceUnavailable(err.to_string())
    }

    pub fn malformed(err: impl std::fmt::Display) -> Self {
        NotifyError::MalformedEvent(err.to_string())
    }

    pub fn ack_store(err: impl std::fmt::Display) -> Self {
        NotifyError::AckStore(err.to_string())
    }

    /// Errors that only invalidate the event being processed.
    pub fn is_skippable(&self) -> bool {
        matches!(self, NotifyError::MalformedEvent(_))
    }
}
