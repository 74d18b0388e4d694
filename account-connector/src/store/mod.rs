//! Storage abstractions for the connector
//!
//! All access goes through a [`StoreTransaction`]. Write transactions are
//! short and synchronous; per-account serialization across provider calls
//! is the [`UnitOfWork`]'s job.

pub mod memory;
pub mod models;
pub mod sqlite;
pub mod unit_of_work;

pub use memory::{InMemoryStore, InMemoryTransaction};
pub use models::*;
pub use sqlite::{SqliteStore, SqliteTransaction};
pub use unit_of_work::{AccountLock, UnitOfWork};

use account_connector_core::{CheckpointType, Provider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ConnectError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, ConnectError>;

/// Shared handle to a store
#[async_trait]
pub trait AccountStore: Send + Sync + 'static {
    type Transaction: StoreTransaction;

    /// Begin a write transaction
    async fn begin(&self) -> StoreResult<Self::Transaction>;

    /// Begin a transaction for reads only; it is always rolled back
    async fn begin_read(&self) -> StoreResult<Self::Transaction>;
}

/// Store operations bound to one open transaction
///
/// Dropping a transaction without committing rolls it back.
pub trait StoreTransaction: Send + 'static {
    /// Create a local user; the password arrives already hashed
    fn create_user(&mut self, username: &str, password_hash: &str) -> StoreResult<User>;

    /// Get a user by ID
    fn get_user(&mut self, user_id: UserId) -> StoreResult<Option<User>>;

    fn get_user_by_username(&mut self, username: &str) -> StoreResult<Option<User>>;

    /// Create an account and, if given, its first history row in one write
    fn create_account(&mut self, account: NewAccount) -> StoreResult<Account>;

    /// Get a user's live account for a provider
    fn get_by_user_and_provider(
        &mut self,
        user_id: UserId,
        provider: Provider,
    ) -> StoreResult<Option<Account>>;

    /// Get a user's live account by the provider's account id
    fn get_by_user_and_external_id(
        &mut self,
        user_id: UserId,
        external_account_id: &str,
    ) -> StoreResult<Option<Account>>;

    /// Locking variant of [`Self::get_by_user_and_provider`]
    ///
    /// Callers hold the slot's [`AccountLock`], which excludes every other
    /// engine writer of this account. Backends shared with writers outside
    /// the engine should override this with a real row lock.
    fn get_by_user_and_provider_for_update(
        &mut self,
        user_id: UserId,
        provider: Provider,
    ) -> StoreResult<Option<Account>> {
        self.get_by_user_and_provider(user_id, provider)
    }

    /// Locking variant of [`Self::get_by_user_and_external_id`]
    fn get_by_user_and_external_id_for_update(
        &mut self,
        user_id: UserId,
        external_account_id: &str,
    ) -> StoreResult<Option<Account>> {
        self.get_by_user_and_external_id(user_id, external_account_id)
    }

    /// Join an account to its most recent history row of `checkpoint` that
    /// has not expired at `now`
    ///
    /// `None` covers an unknown account, a checkpoint of another type and an
    /// expired checkpoint alike.
    fn get_with_status(
        &mut self,
        user_id: UserId,
        external_account_id: &str,
        checkpoint: CheckpointType,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AccountWithStatus>>;

    /// Persist an account's status; bumps `updated_at`
    fn update_account(&mut self, account: &Account) -> StoreResult<()>;

    /// Append a history row superseding the previous ones
    fn append_history(
        &mut self,
        account_id: AccountId,
        history: NewStatusHistory,
    ) -> StoreResult<StatusHistory>;

    /// Soft-delete an account together with its history
    fn delete_account(&mut self, account_id: AccountId) -> StoreResult<()>;

    /// List a user's live accounts, oldest first
    fn list_by_user(&mut self, user_id: UserId) -> StoreResult<Vec<Account>>;

    fn commit(self) -> StoreResult<()>;

    fn rollback(self) -> StoreResult<()>;
}
