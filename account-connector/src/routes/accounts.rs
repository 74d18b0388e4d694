//! Linked account endpoints

use std::sync::Arc;
use std::time::Duration;

use account_connector_core::{Checkpoint, Credentials, Provider, ProviderClient};
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::auth::CurrentUser;
use crate::engine::ConnectOutcome;
use crate::error::ConnectError;
use crate::state::AppState;
use crate::store::{Account, AccountStore};

/// Connect with a username and password
const TYPE_CREDENTIALS: &str = "credentials";
/// Connect with a session cookie taken from the member's browser
const TYPE_COOKIE: &str = "cookie";

#[derive(Deserialize)]
pub struct ConnectAccountRequest {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(rename = "type")]
    pub connect_type: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl ConnectAccountRequest {
    fn provider(&self) -> Result<Provider, ConnectError> {
        match self.provider.as_deref() {
            None | Some("") => Ok(Provider::Linkedin),
            Some(name) => Provider::from_str(name).ok_or_else(|| {
                ConnectError::Validation(format!("Unsupported provider: {}", name))
            }),
        }
    }

    fn credentials(self) -> Result<Credentials, ConnectError> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        match self.connect_type.as_str() {
            TYPE_CREDENTIALS => match (non_empty(self.username), non_empty(self.password)) {
                (Some(username), Some(password)) => {
                    Ok(Credentials::Password { username, password })
                }
                _ => Err(ConnectError::Validation(
                    "username and password are required".to_string(),
                )),
            },
            TYPE_COOKIE => match non_empty(self.access_token) {
                Some(access_token) => Ok(Credentials::AccessToken {
                    access_token,
                    user_agent: non_empty(self.user_agent),
                }),
                None => Err(ConnectError::Validation(
                    "access_token is required".to_string(),
                )),
            },
            other => Err(ConnectError::Validation(format!(
                "Unsupported connection type: {}",
                other
            ))),
        }
    }
}

#[derive(Deserialize)]
pub struct SolveCheckpointBody {
    pub account_id: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct WaitForValidationBody {
    pub account_id: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
pub struct DisconnectBody {
    pub account_id: String,
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub success: bool,
    pub account: Account,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_linked: bool,
}

impl From<ConnectOutcome> for AccountResponse {
    fn from(outcome: ConnectOutcome) -> Self {
        let (account, checkpoint, already_linked) = match outcome {
            ConnectOutcome::Connected(account) => (account, None, false),
            ConnectOutcome::CheckpointRequired {
                account,
                checkpoint,
            } => (account, Some(checkpoint), false),
            ConnectOutcome::AlreadyLinked(account) => (account, None, true),
        };

        Self {
            success: true,
            account,
            checkpoint,
            already_linked,
        }
    }
}

#[derive(Serialize)]
pub struct ListAccountsResponse {
    pub success: bool,
    pub accounts: Vec<Account>,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

fn required(field: &str, value: &str) -> Result<(), ConnectError> {
    if value.trim().is_empty() {
        return Err(ConnectError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// GET /api/v1/accounts
pub async fn list_accounts<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ListAccountsResponse>, ConnectError>
where
    S: AccountStore,
    P: ProviderClient + 'static,
{
    let accounts = state.engine.list_user_accounts(user.id).await?;

    Ok(Json(ListAccountsResponse {
        success: true,
        accounts,
    }))
}

/// POST /api/v1/accounts/connect
pub async fn connect_account<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ConnectAccountRequest>,
) -> Result<Json<AccountResponse>, ConnectError>
where
    S: AccountStore,
    P: ProviderClient + 'static,
{
    let provider = req.provider()?;
    let credentials = req.credentials()?;

    let outcome = state
        .engine
        .connect_account(user.id, provider, credentials)
        .await?;

    Ok(Json(outcome.into()))
}

/// POST /api/v1/accounts/checkpoint
pub async fn solve_checkpoint<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<SolveCheckpointBody>,
) -> Result<Json<AccountResponse>, ConnectError>
where
    S: AccountStore,
    P: ProviderClient + 'static,
{
    required("account_id", &req.account_id)?;
    required("code", &req.code)?;

    let outcome = state
        .engine
        .solve_checkpoint(user.id, &req.account_id, req.code.trim())
        .await?;

    Ok(Json(outcome.into()))
}

/// POST /api/v1/accounts/checkpoint/wait
///
/// Holds the request open until the member approves the login on their
/// device or the timeout elapses.
pub async fn wait_for_validation<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<WaitForValidationBody>,
) -> Result<Json<AccountResponse>, ConnectError>
where
    S: AccountStore,
    P: ProviderClient + 'static,
{
    required("account_id", &req.account_id)?;

    let account = state
        .engine
        .wait_for_account_validation(
            user.id,
            &req.account_id,
            req.timeout_secs.map(Duration::from_secs),
        )
        .await?;

    Ok(Json(ConnectOutcome::Connected(account).into()))
}

/// DELETE /api/v1/accounts
pub async fn disconnect_account<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<DisconnectBody>,
) -> Result<Json<SuccessResponse>, ConnectError>
where
    S: AccountStore,
    P: ProviderClient + 'static,
{
    required("account_id", &req.account_id)?;

    state
        .engine
        .disconnect_linked_account(user.id, &req.account_id)
        .await?;

    Ok(Json(SuccessResponse { success: true }))
}
