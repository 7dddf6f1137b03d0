//! API error types and responses

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth::{CredentialError, RegistrationError};
use crate::ingest::IngestError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::Unauthenticated(_) => "UNAUTHENTICATED",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Unavailable(_) => "UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::InvalidRequest(msg)
            | ApiError::Unauthenticated(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Unavailable(msg) => (self.status(), self.code(), msg.clone()),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                (self.status(), self.code(), "internal error".to_string())
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::InvalidToken(msg) => ApiError::Unauthenticated(msg),
            CredentialError::Registration(err) => err.into(),
            CredentialError::Signing(msg) => ApiError::Internal(msg),
            other => ApiError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<RegistrationError> for ApiError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::Storage(e) => ApiError::Unavailable(e.to_string()),
            other => ApiError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::BatchTooLarge { .. } => ApiError::InvalidRequest(err.to_string()),
            IngestError::Unavailable(e) => ApiError::Unavailable(e.to_string()),
            IngestError::Serialization(msg) => ApiError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::storage::StorageError;

    #[test]
    fn test_credential_error_mapping() {
        assert_eq!(ApiError::from(CredentialError::AdminNotAllowed).code(), "INVALID_REQUEST");
        assert_eq!(ApiError::from(CredentialError::RefreshCodeMismatch).code(), "INVALID_REQUEST");
        assert_eq!(
            ApiError::from(CredentialError::InvalidToken("expired".into())).code(),
            "UNAUTHENTICATED"
        );
        assert_eq!(
            ApiError::from(CredentialError::Registration(RegistrationError::Storage(
                StorageError::Closed
            )))
            .code(),
            "UNAVAILABLE"
        );
    }

    #[test]
    fn test_ingest_error_mapping() {
        let err = ApiError::from(IngestError::BatchTooLarge { size: 101 });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ApiError::from(IngestError::Unavailable(BrokerError::Closed));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
