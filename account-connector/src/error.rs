//! Connector error types

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Coarse classification handed to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request is wrong: unknown account, bad code, malformed input
    Validation,
    /// A domain rule blocked a well-formed request
    Business,
    /// Infrastructure failed: store, provider transport, serialization
    System,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Business => "business",
            ErrorKind::System => "system",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    /// No such account, or no pending challenge of the expected kind.
    ///
    /// Expired checkpoints, wrong checkpoint types and unknown account ids all
    /// surface as this same error so callers cannot tell which ids exist.
    #[error("Account not found")]
    AccountNotFound,

    #[error("Invalid code or expired checkpoint")]
    InvalidOrExpiredCheckpoint,

    #[error("Account validation failed")]
    ValidationFailed,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Business rule violated: {0}")]
    Business(String),

    #[error("Provider error: {0}")]
    Provider(account_connector_core::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Username already exists")]
    UsernameTaken,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConnectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectError::AccountNotFound
            | ConnectError::InvalidOrExpiredCheckpoint
            | ConnectError::ValidationFailed
            | ConnectError::Validation(_)
            | ConnectError::UsernameTaken
            | ConnectError::NotAuthenticated => ErrorKind::Validation,
            ConnectError::Business(_) => ErrorKind::Business,
            ConnectError::Provider(_)
            | ConnectError::Storage(_)
            | ConnectError::Serialization(_)
            | ConnectError::Internal(_) => ErrorKind::System,
        }
    }
}

// Provider sentinels become engine vocabulary here, so the engine never
// matches on provider errors itself.
impl From<account_connector_core::Error> for ConnectError {
    fn from(err: account_connector_core::Error) -> Self {
        use account_connector_core::Error as ProviderError;

        match err {
            ProviderError::AccountNotFound => ConnectError::AccountNotFound,
            ProviderError::InvalidOrExpiredCheckpoint => ConnectError::InvalidOrExpiredCheckpoint,
            other => ConnectError::Provider(other),
        }
    }
}

impl From<rusqlite::Error> for ConnectError {
    fn from(err: rusqlite::Error) -> Self {
        ConnectError::Storage(err.to_string())
    }
}

impl IntoResponse for ConnectError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, reason) = match &self {
            ConnectError::AccountNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ConnectError::InvalidOrExpiredCheckpoint => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            ConnectError::NotAuthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            ConnectError::ValidationFailed => (
                StatusCode::BAD_REQUEST,
                "Account validation failed, please retry".to_string(),
            ),
            ConnectError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ConnectError::UsernameTaken => (StatusCode::CONFLICT, self.to_string()),
            ConnectError::Business(msg) => {
                tracing::warn!("Business rule violated: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Operation not allowed".to_string(),
                )
            }
            ConnectError::Provider(err) => {
                tracing::error!(error = %err, "Provider call failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Provider error".to_string(),
                )
            }
            ConnectError::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ConnectError::Serialization(err) => {
                tracing::error!("Serialization error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ConnectError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let mut body = json!({ "success": false, "kind": kind.as_str(), "reason": reason });
        if matches!(self, ConnectError::InvalidOrExpiredCheckpoint) {
            body["type"] = json!("invalid_or_expired_checkpoint");
        }
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_connector_core::Error as ProviderError;

    #[test]
    fn test_provider_sentinels_are_translated() {
        assert!(matches!(
            ConnectError::from(ProviderError::AccountNotFound),
            ConnectError::AccountNotFound
        ));
        assert!(matches!(
            ConnectError::from(ProviderError::InvalidOrExpiredCheckpoint),
            ConnectError::InvalidOrExpiredCheckpoint
        ));
        assert!(matches!(
            ConnectError::from(ProviderError::Api {
                status: 502,
                body: "bad gateway".to_string()
            }),
            ConnectError::Provider(_)
        ));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ConnectError::AccountNotFound.kind(), ErrorKind::Validation);
        assert_eq!(
            ConnectError::InvalidOrExpiredCheckpoint.kind(),
            ErrorKind::Validation
        );
        assert_eq!(ConnectError::ValidationFailed.kind(), ErrorKind::Validation);
        assert_eq!(ConnectError::UsernameTaken.kind(), ErrorKind::Validation);
        assert_eq!(
            ConnectError::Business("x".into()).kind(),
            ErrorKind::Business
        );
        assert_eq!(ConnectError::Storage("x".into()).kind(), ErrorKind::System);
        assert_eq!(
            ConnectError::Provider(ProviderError::Transport("refused".into())).kind(),
            ErrorKind::System
        );
    }

    #[test]
    fn test_status_codes() {
        let status = |err: ConnectError| err.into_response().status();

        assert_eq!(status(ConnectError::AccountNotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status(ConnectError::InvalidOrExpiredCheckpoint),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(ConnectError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(ConnectError::UsernameTaken), StatusCode::CONFLICT);
        assert_eq!(
            status(ConnectError::Business("no".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(ConnectError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
