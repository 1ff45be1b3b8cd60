//! Poll error types.

use thiserror::Error;

use super::model::PollStatus;
use super::store::StoreError;

/// Broad error category, used to pick transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range input. Safe to fix and resend.
    Validation,
    /// Request conflicts with current state. Re-read state before retrying.
    Conflict,
    /// Unknown identifier. Do not retry with the same id.
    NotFound,
    /// Caller's role may not perform the action.
    Forbidden,
    /// Infrastructure failure.
    Unavailable,
}

/// Domain error surfaced by the lifecycle manager, the vote aggregator and
/// the actions built on them.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("{0}")]
    Validation(String),

    #[error("Cannot start poll. Another poll is currently active. Please end it first.")]
    ActivePollExists,

    #[error("Poll is not active")]
    NotActive,

    #[error("Poll has expired")]
    Expired,

    #[error("Student has already voted")]
    AlreadyVoted,

    #[error("Poll not found")]
    PollNotFound,

    #[error("Poll is not in draft status")]
    NotDraft,

    #[error("Option not found in poll")]
    OptionNotFound,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session has been kicked")]
    SessionKicked,

    #[error("{0}")]
    Forbidden(String),

    /// Detail stays in the source chain for logs; callers only see the generic text.
    #[error("Service temporarily unavailable")]
    StoreUnavailable(#[source] StoreError),
}

impl PollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PollError::Validation(_) => ErrorKind::Validation,
            PollError::ActivePollExists
            | PollError::NotActive
            | PollError::Expired
            | PollError::AlreadyVoted => ErrorKind::Conflict,
            PollError::PollNotFound
            | PollError::NotDraft
            | PollError::OptionNotFound
            | PollError::SessionNotFound
            | PollError::SessionKicked => ErrorKind::NotFound,
            PollError::Forbidden(_) => ErrorKind::Forbidden,
            PollError::StoreUnavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PollError::Validation(_) => "VALIDATION_ERROR",
            PollError::ActivePollExists => "ACTIVE_POLL_EXISTS",
            PollError::NotActive => "POLL_NOT_ACTIVE",
            PollError::Expired => "POLL_EXPIRED",
            PollError::AlreadyVoted => "ALREADY_VOTED",
            PollError::PollNotFound => "POLL_NOT_FOUND",
            PollError::NotDraft => "POLL_NOT_DRAFT",
            PollError::OptionNotFound => "OPTION_NOT_FOUND",
            PollError::SessionNotFound => "SESSION_NOT_FOUND",
            PollError::SessionKicked => "SESSION_KICKED",
            PollError::Forbidden(_) => "FORBIDDEN",
            PollError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        PollError::Forbidden(message.into())
    }
}

impl From<StoreError> for PollError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateVote => PollError::AlreadyVoted,
            StoreError::PollNotFound => PollError::PollNotFound,
            StoreError::OptionNotFound => PollError::OptionNotFound,
            StoreError::SessionNotFound => PollError::SessionNotFound,
            StoreError::ActivePollExists => PollError::ActivePollExists,
            StoreError::StatusMismatch {
                expected: PollStatus::Draft,
                ..
            } => PollError::NotDraft,
            StoreError::StatusMismatch { .. } => PollError::NotActive,
            other @ StoreError::Unavailable(_) => PollError::StoreUnavailable(other),
        }
    }
}

/// Result type for poll operations
pub type PollResult<T> = std::result::Result<T, PollError>;
