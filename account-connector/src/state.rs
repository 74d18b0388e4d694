//! Connector state management

use account_connector_core::ProviderClient;

use crate::crypto::BCRYPT_COST;
use crate::engine::ConnectionEngine;
use crate::error::ConnectError;
use crate::store::{AccountStore, StoreTransaction, User, UserId};

/// Connector application state
pub struct AppState<S, P> {
    pub engine: ConnectionEngine<S, P>,
    /// bcrypt cost for new passwords
    pub password_cost: u32,
}

impl<S, P> AppState<S, P>
where
    S: AccountStore,
    P: ProviderClient + 'static,
{
    pub fn new(engine: ConnectionEngine<S, P>) -> Self {
        Self {
            engine,
            password_cost: BCRYPT_COST,
        }
    }

    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    /// Look up a local user
    pub async fn find_user(&self, user_id: UserId) -> Result<Option<User>, ConnectError> {
        self.engine
            .unit_of_work()
            .read(move |tx| tx.get_user(user_id))
            .await
    }

    /// Create a local user; `password_hash` is already hashed
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: String,
    ) -> Result<User, ConnectError> {
        let username = username.to_string();
        self.engine
            .unit_of_work()
            .run(move |tx| {
                if tx.get_user_by_username(&username)?.is_some() {
                    return Err(ConnectError::UsernameTaken);
                }
                tx.create_user(&username, &password_hash)
            })
            .await
    }
}
