//! HTTP routes for the connector

mod accounts;
mod auth;
mod health;
mod users;

pub use auth::{CurrentUser, USER_ID_HEADER};

use std::sync::Arc;

use account_connector_core::ProviderClient;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::store::AccountStore;

/// Create the router with all routes
pub fn create_router<S, P>(state: Arc<AppState<S, P>>) -> Router
where
    S: AccountStore,
    P: ProviderClient + 'static,
{
    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/users", post(users::register))
        .route("/api/v1/users/me", get(users::current_user))
        .route(
            "/api/v1/accounts",
            get(accounts::list_accounts)
                .delete(accounts::disconnect_account),
        )
        .route("/api/v1/accounts/connect", post(accounts::connect_account))
        .route(
            "/api/v1/accounts/checkpoint",
            post(accounts::solve_checkpoint),
        )
        .route(
            "/api/v1/accounts/checkpoint/wait",
            post(accounts::wait_for_validation),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
