use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::{session_store::SessionError, users::UserStoreError};

#[derive(Debug)]
pub enum AuthError {
    /// Identity asserted, but no matching user and provisioning is disabled
    Unauthorized,

    /// No session cookie, or the session it names is gone
    SessionNotFound,

    /// Malformed request input
    InvalidRequest(String),

    /// Internal error during authentication
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn with_type(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorDetail {
                error_type: error_type.into(),
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match &self {
            AuthError::Unauthorized => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "unauthorized",
                "Unauthorized",
            ),
            AuthError::SessionNotFound => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "session_not_found",
                "Session not found",
            ),
            AuthError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request",
                msg.as_str(),
            ),
            AuthError::Internal(msg) => {
                tracing::error!(error = %msg, "Authentication failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "internal_error",
                    "Internal error during authentication",
                )
            }
        };

        let body = ErrorResponse::with_type(error_type, code, message);
        (status, Json(body)).into_response()
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Unauthorized => write!(f, "Unauthorized"),
            AuthError::SessionNotFound => write!(f, "Session not found"),
            AuthError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            AuthError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<SessionError> for AuthError {
    fn from(e: SessionError) -> Self {
        AuthError::Internal(format!("Session store error: {}", e))
    }
}

impl From<UserStoreError> for AuthError {
    fn from(e: UserStoreError) -> Self {
        AuthError::Internal(format!("User store error: {}", e))
    }
}

#[cfg(feature = "emulator")]
impl From<crate::emulator::EmulatorError> for AuthError {
    fn from(e: crate::emulator::EmulatorError) -> Self {
        AuthError::Internal(format!("Emulator state error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_is_403() {
        let response = AuthError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_session_not_found_is_401() {
        let response = AuthError::SessionNotFound.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_internal_error_hides_detail_from_client() {
        let response = AuthError::Internal("db password rejected".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_store_errors_become_internal() {
        let err: AuthError = UserStoreError::NotFound.into();
        assert!(matches!(err, AuthError::Internal(ref m) if m.contains("User store")));
    }
}
