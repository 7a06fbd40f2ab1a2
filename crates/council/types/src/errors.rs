//! Error types for the Council layer

use crate::{SessionId, SessionStatus};

/// Errors surfaced by engine operations
///
/// Only caller-input problems reach the caller. Failures inside a running
/// session become terminal session state instead of errors.
#[derive(Debug, thiserror::Error)]
pub enum CouncilError {
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid transition for {session}: {from} -> {to}")]
    InvalidTransition {
        session: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("External call failed: {0}")]
    External(#[from] ExternalError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for council operations
pub type CouncilResult<T> = Result<T, CouncilError>;

/// Failures of calls to external collaborators (narrative generation,
/// semantic index)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExternalError {
    #[error("call timed out after {0} ms")]
    Timeout(u64),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for external calls
pub type ExternalResult<T> = Result<T, ExternalError>;
