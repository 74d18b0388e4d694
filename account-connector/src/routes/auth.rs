//! Caller identity
//!
//! Authentication happens upstream. The gateway forwards the authenticated
//! user id in a trusted header, and requests without a known user are
//! rejected here.

use std::sync::Arc;

use account_connector_core::ProviderClient;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ConnectError;
use crate::state::AppState;
use crate::store::{AccountStore, User, UserId};

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated local user
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl<S, P> FromRequestParts<Arc<AppState<S, P>>> for CurrentUser
where
    S: AccountStore,
    P: ProviderClient + 'static,
{
    type Rejection = ConnectError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S, P>>,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(UserId)
            .ok_or(ConnectError::NotAuthenticated)?;

        match state.find_user(user_id).await? {
            Some(user) => Ok(CurrentUser(user)),
            None => Err(ConnectError::NotAuthenticated),
        }
    }
}
