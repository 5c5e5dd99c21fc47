use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;

/// Stable, adapter-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    ProtectedRoom,
    DuplicateRoom,
    ConfigurationError,
    ConstraintViolation,
    DelegationDepthExceeded,
    InvocationFailure,
    AlreadyResolved,
    ValidationError,
    ProposalClosed,
    StorageError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ProtectedRoom => "PROTECTED_ROOM",
            ErrorCode::DuplicateRoom => "DUPLICATE_ROOM",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::ConstraintViolation => "CONSTRAINT_VIOLATION",
            ErrorCode::DelegationDepthExceeded => "DELEGATION_DEPTH_EXCEEDED",
            ErrorCode::InvocationFailure => "INVOCATION_FAILURE",
            ErrorCode::AlreadyResolved => "ALREADY_RESOLVED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ProposalClosed => "PROPOSAL_CLOSED",
            ErrorCode::StorageError => "STORAGE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from repository operations (used by trait definitions in conclave-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors related to room operations.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room '{0}' not found")]
    NotFound(String),

    #[error("bot '{0}' not found")]
    BotNotFound(String),

    #[error("message '{0}' not found")]
    MessageNotFound(String),

    #[error("room '{0}' already exists")]
    Duplicate(String),

    #[error("room '{room_id}' is protected: {action}")]
    Protected { room_id: String, action: String },

    #[error("invalid room name: {0}")]
    InvalidName(String),

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

impl RoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::NotFound(_) | RoomError::BotNotFound(_) | RoomError::MessageNotFound(_) => {
                ErrorCode::NotFound
            }
            RoomError::Duplicate(_) => ErrorCode::DuplicateRoom,
            RoomError::Protected { .. } => ErrorCode::ProtectedRoom,
            RoomError::InvalidName(_) => ErrorCode::ValidationError,
            RoomError::Storage(_) => ErrorCode::StorageError,
        }
    }
}

/// Errors related to role cards and proposals.
#[derive(Debug, Error)]
pub enum RoleCardError {
    /// No layer, built-in included, defines the bot.
    #[error("no role card defined for bot '{0}'")]
    Configuration(String),

    #[error("invalid role card: {0}")]
    Invalid(String),

    #[error("proposal '{0}' not found")]
    ProposalNotFound(String),

    #[error("proposal '{id}' is already {status}")]
    ProposalClosed { id: String, status: String },

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

impl RoleCardError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RoleCardError::Configuration(_) => ErrorCode::ConfigurationError,
            RoleCardError::Invalid(_) => ErrorCode::ValidationError,
            RoleCardError::ProposalNotFound(_) => ErrorCode::NotFound,
            RoleCardError::ProposalClosed { .. } => ErrorCode::ProposalClosed,
            RoleCardError::Storage(_) => ErrorCode::StorageError,
        }
    }
}

/// Errors related to escalation records.
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("escalation '{0}' not found")]
    NotFound(String),

    #[error("escalation '{0}' is already resolved")]
    AlreadyResolved(String),

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

impl EscalationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EscalationError::NotFound(_) => ErrorCode::NotFound,
            EscalationError::AlreadyResolved(_) => ErrorCode::AlreadyResolved,
            EscalationError::Storage(_) => ErrorCode::StorageError,
        }
    }
}

/// Failures of the opaque model-invocation or tool collaborators.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("invocation timed out after {0}s")]
    Timeout(u64),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("bot '{0}' is offline")]
    Offline(String),

    #[error("no invoker configured")]
    Unavailable,

    #[error("unknown tool '{0}'")]
    UnknownTool(String),
}

/// Conditions produced while dispatching a message.
///
/// Everything except `Room` is recovered by the Dispatcher into a room
/// system message; only room errors reach the caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("action denied: {reason}")]
    ConstraintViolation { reason: String, ban_id: String },

    #[error("delegation depth {depth} exceeds maximum {max}")]
    DelegationDepthExceeded { depth: u32, max: u32 },

    #[error("invocation failed: {0}")]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    Configuration(#[from] RoleCardError),

    #[error("dispatch cancelled")]
    Cancelled,

    #[error(transparent)]
    Room(#[from] RoomError),
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::ConstraintViolation { .. } => ErrorCode::ConstraintViolation,
            DispatchError::DelegationDepthExceeded { .. } => ErrorCode::DelegationDepthExceeded,
            DispatchError::Invocation(_) | DispatchError::Cancelled => ErrorCode::InvocationFailure,
            DispatchError::Configuration(e) => e.code(),
            DispatchError::Room(e) => e.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(RoomError::NotFound("x".into()).code().as_str(), "NOT_FOUND");
        assert_eq!(
            RoomError::Protected {
                room_id: "general".into(),
                action: "delete".into()
            }
            .code()
            .as_str(),
            "PROTECTED_ROOM"
        );
        assert_eq!(RoomError::Duplicate("launch".into()).code().as_str(), "DUPLICATE_ROOM");
        assert_eq!(
            RoleCardError::Configuration("ghost".into()).code().as_str(),
            "CONFIGURATION_ERROR"
        );
        assert_eq!(
            EscalationError::AlreadyResolved("e".into()).code().as_str(),
            "ALREADY_RESOLVED"
        );
        assert_eq!(
            DispatchError::DelegationDepthExceeded { depth: 5, max: 4 }
                .code()
                .as_str(),
            "DELEGATION_DEPTH_EXCEEDED"
        );
    }

    #[test]
    fn test_code_serializes_screaming() {
        let json = serde_json::to_string(&ErrorCode::ConstraintViolation).unwrap();
        assert_eq!(json, "\"CONSTRAINT_VIOLATION\"");
    }
}
