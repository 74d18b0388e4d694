//! Error types for the provider boundary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Account not found on provider")]
    AccountNotFound,

    #[error("Invalid code or expired checkpoint")]
    InvalidOrExpiredCheckpoint,

    #[error("Provider API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the remote side reported the account as absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::AccountNotFound)
    }
}
