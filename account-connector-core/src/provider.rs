//! Contract with the remote account automation API
//!
//! The provider performs the actual third-party login. This module describes
//! the requests and responses the connection engine exchanges with it, and
//! the [`ProviderClient`] trait implemented by the HTTP client (production)
//! and by mocks (testing).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Checkpoint, Result};

/// Error `type` the provider uses when an authentication intent is no longer valid
pub const AUTHENTICATION_INTENT_ERROR: &str = "errors/authentication_intent_error";

/// Source status reported once an account is usable
pub const SOURCE_STATUS_OK: &str = "OK";

/// Third-party network an account belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Linkedin,
    Instagram,
    Whatsapp,
    Telegram,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Linkedin => "LINKEDIN",
            Provider::Instagram => "INSTAGRAM",
            Provider::Whatsapp => "WHATSAPP",
            Provider::Telegram => "TELEGRAM",
        }
    }

    /// Parse a provider name, ignoring case
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LINKEDIN" => Some(Provider::Linkedin),
            "INSTAGRAM" => Some(Provider::Instagram),
            "WHATSAPP" => Some(Provider::Whatsapp),
            "TELEGRAM" => Some(Provider::Telegram),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the member proves their identity to the provider
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username and password login
    Password { username: String, password: String },
    /// A session token already obtained from the network, plus the user agent it belongs to
    AccessToken {
        access_token: String,
        user_agent: Option<String>,
    },
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Credentials::AccessToken { user_agent, .. } => f
                .debug_struct("AccessToken")
                .field("user_agent", user_agent)
                .finish_non_exhaustive(),
        }
    }
}

/// Body of `POST /api/v1/accounts`
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectRequest {
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl ConnectRequest {
    pub fn new(provider: Provider, credentials: &Credentials) -> Self {
        match credentials {
            Credentials::Password { username, password } => Self {
                provider,
                username: Some(username.clone()),
                password: Some(password.clone()),
                access_token: None,
                user_agent: None,
            },
            Credentials::AccessToken {
                access_token,
                user_agent,
            } => Self {
                provider,
                username: None,
                password: None,
                access_token: Some(access_token.clone()),
                user_agent: user_agent.clone(),
            },
        }
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("provider", &self.provider)
            .field("username", &self.username)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// Response to a connect call
///
/// Either the account is ready (`checkpoint` is `None`) or the provider
/// raised a challenge; never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    #[serde(default)]
    pub object: Option<String>,

    pub account_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,

    /// HTTP status of the provider response, kept for diagnostics
    #[serde(skip)]
    pub status: u16,

    /// Raw provider response body, kept for diagnostics
    #[serde(skip)]
    pub raw_body: String,
}

/// Body of `POST /api/v1/accounts/checkpoint`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SolveCheckpointRequest {
    pub provider: Provider,
    pub account_id: String,
    pub code: String,
}

/// Raw response to a solve call, success and error shapes combined
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolveCheckpointResponse {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,

    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl SolveCheckpointResponse {
    /// The provider's structured "authentication intent expired" error
    pub fn is_authentication_intent_error(&self) -> bool {
        self.error_type.as_deref() == Some(AUTHENTICATION_INTENT_ERROR)
    }
}

/// Result of submitting a checkpoint answer
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    /// The account passed the challenge
    Solved { account_id: String },
    /// The provider accepted the answer but raised another challenge
    NextCheckpoint(Checkpoint),
}

/// One connection source of a remote account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSource {
    pub id: String,
    pub status: String,
}

impl AccountSource {
    pub fn is_ok(&self) -> bool {
        self.status == SOURCE_STATUS_OK
    }
}

/// A remote account with its per-source status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAccount {
    pub id: String,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub account_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub sources: Vec<AccountSource>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl RemoteAccount {
    /// True once any source reports the account as usable
    pub fn is_validated(&self) -> bool {
        self.sources.iter().any(AccountSource::is_ok)
    }
}

/// Page of remote accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountList {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub items: Vec<RemoteAccount>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Client for the remote automation API
///
/// Implementations translate transport failures and status codes into
/// [`crate::Error`]; callers never see raw HTTP statuses.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Start connecting an account
    async fn connect(&self, request: &ConnectRequest) -> Result<ConnectResponse>;

    /// Submit the answer to a pending checkpoint
    ///
    /// Fails with [`crate::Error::InvalidOrExpiredCheckpoint`] when the code
    /// is rejected or the authentication intent has expired.
    async fn solve_checkpoint(&self, request: &SolveCheckpointRequest) -> Result<SolveOutcome>;

    /// Fetch the current status of an account
    ///
    /// With a `timeout` the call is a long poll: the provider holds the
    /// request open until the status changes or the timeout elapses.
    async fn get_status(&self, account_id: &str, timeout: Option<Duration>)
        -> Result<RemoteAccount>;

    /// Delete an account on the provider side
    async fn delete_account(&self, account_id: &str) -> Result<()>;

    /// List every account known to the provider
    async fn list_accounts(&self) -> Result<AccountList>;
}

#[async_trait]
impl<P: ProviderClient + ?Sized> ProviderClient for Arc<P> {
    async fn connect(&self, request: &ConnectRequest) -> Result<ConnectResponse> {
        (**self).connect(request).await
    }

    async fn solve_checkpoint(&self, request: &SolveCheckpointRequest) -> Result<SolveOutcome> {
        (**self).solve_checkpoint(request).await
    }

    async fn get_status(
        &self,
        account_id: &str,
        timeout: Option<Duration>,
    ) -> Result<RemoteAccount> {
        (**self).get_status(account_id, timeout).await
    }

    async fn delete_account(&self, account_id: &str) -> Result<()> {
        (**self).delete_account(account_id).await
    }

    async fn list_accounts(&self) -> Result<AccountList> {
        (**self).list_accounts().await
    }
}
