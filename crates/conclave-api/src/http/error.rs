//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use conclave_types::error::{DispatchError, ErrorCode, EscalationError, RoleCardError, RoomError};

use super::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Room(RoomError),
    RoleCard(RoleCardError),
    Escalation(EscalationError),
    Dispatch(DispatchError),
    /// Malformed request input.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<RoomError> for AppError {
    fn from(e: RoomError) -> Self {
        AppError::Room(e)
    }
}

impl From<RoleCardError> for AppError {
    fn from(e: RoleCardError) -> Self {
        AppError::RoleCard(e)
    }
}

impl From<EscalationError> for AppError {
    fn from(e: EscalationError) -> Self {
        AppError::Escalation(e)
    }
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        AppError::Dispatch(e)
    }
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Room(e) => e.code(),
            AppError::RoleCard(e) => e.code(),
            AppError::Escalation(e) => e.code(),
            AppError::Dispatch(e) => e.code(),
            AppError::Validation(_) => ErrorCode::ValidationError,
            AppError::Internal(_) => ErrorCode::StorageError,
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Room(e) => e.to_string(),
            AppError::RoleCard(e) => e.to_string(),
            AppError::Escalation(e) => e.to_string(),
            AppError::Dispatch(e) => e.to_string(),
            AppError::Validation(msg) | AppError::Internal(msg) => msg.clone(),
        }
    }
}

/// HTTP status for a stable error code.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::ProtectedRoom | ErrorCode::ConstraintViolation => StatusCode::FORBIDDEN,
        ErrorCode::DuplicateRoom | ErrorCode::AlreadyResolved | ErrorCode::ProposalClosed => {
            StatusCode::CONFLICT
        }
        ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
        ErrorCode::ConfigurationError | ErrorCode::DelegationDepthExceeded => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorCode::InvocationFailure => StatusCode::BAD_GATEWAY,
        ErrorCode::StorageError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        if status_for(code).is_server_error() {
            tracing::error!(code = %code, error = %self.message(), "request failed");
        }
        ApiResponse::error(code, &self.message(), uuid::Uuid::now_v7().to_string(), 0).into_response()
    }
}
