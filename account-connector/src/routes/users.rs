//! Local user endpoints

use std::sync::Arc;

use account_connector_core::ProviderClient;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::auth::CurrentUser;
use crate::crypto::hash_password;
use crate::error::ConnectError;
use crate::state::AppState;
use crate::store::{AccountStore, User, UserId};

const MIN_PASSWORD_LENGTH: usize = 6;
/// bcrypt ignores input past 72 bytes
const MAX_PASSWORD_LENGTH: usize = 72;
const MAX_USERNAME_LENGTH: usize = 64;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct UserView {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            created_at: user.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct UserResponse {
    pub success: bool,
    pub user: UserView,
}

/// POST /api/v1/users
pub async fn register<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ConnectError>
where
    S: AccountStore,
    P: ProviderClient + 'static,
{
    let username = req.username.trim();
    if username.is_empty() {
        return Err(ConnectError::Validation("username is required".to_string()));
    }
    if username.len() > MAX_USERNAME_LENGTH {
        return Err(ConnectError::Validation("username is too long".to_string()));
    }
    if req.password.len() < MIN_PASSWORD_LENGTH {
        return Err(ConnectError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if req.password.len() > MAX_PASSWORD_LENGTH {
        return Err(ConnectError::Validation(format!(
            "password must be at most {} bytes",
            MAX_PASSWORD_LENGTH
        )));
    }

    let cost = state.password_cost;
    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password, cost))
        .await
        .map_err(|e| ConnectError::Internal(e.to_string()))?
        .map_err(|e| ConnectError::Internal(e.to_string()))?;

    let user = state.create_user(username, password_hash).await?;
    tracing::info!(user_id = %user.id, "Registered user");

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            success: true,
            user: user.into(),
        }),
    ))
}

/// GET /api/v1/users/me
pub async fn current_user(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse {
        success: true,
        user: user.into(),
    })
}
