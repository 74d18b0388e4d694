//! Transaction-scoped execution of store operations

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use account_connector_core::Provider;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{AccountStore, StoreResult, StoreTransaction, UserId};
use crate::error::ConnectError;

/// One live account exists per user and provider, so the pair names the row
type SlotKey = (UserId, Provider);

/// Exclusive hold on one account slot, released on drop
///
/// Writers take it before their locking reads and keep it across the
/// provider call, so operations on the same account serialize while other
/// accounts proceed.
pub struct AccountLock {
    _guard: OwnedMutexGuard<()>,
}

#[derive(Default)]
struct AccountLocks {
    slots: StdMutex<HashMap<SlotKey, Weak<Mutex<()>>>>,
}

impl AccountLocks {
    fn slot(&self, key: SlotKey) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(&key).and_then(Weak::upgrade) {
            return slot;
        }

        // Slots nobody holds or waits on are dropped here
        slots.retain(|_, slot| slot.strong_count() > 0);
        let slot = Arc::new(Mutex::new(()));
        slots.insert(key, Arc::downgrade(&slot));
        slot
    }
}

/// Runs blocks of store operations as all-or-nothing units
///
/// A block receives the transaction-bound store as its argument. It commits
/// when the block returns `Ok` and rolls back on any `Err`, business errors
/// included. Blocks are synchronous, so a transaction never stays open
/// across a provider call; writers that span one hold an [`AccountLock`]
/// instead.
pub struct UnitOfWork<S> {
    store: Arc<S>,
    locks: Arc<AccountLocks>,
}

impl<S> Clone for UnitOfWork<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<S: AccountStore> UnitOfWork<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: Arc::default(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Wait for exclusive use of a user's account slot for `provider`
    pub async fn lock_account(&self, user_id: UserId, provider: Provider) -> AccountLock {
        let slot = self.locks.slot((user_id, provider));
        AccountLock {
            _guard: slot.lock_owned().await,
        }
    }

    /// Run a block in one write transaction
    pub async fn run<T, F>(&self, f: F) -> Result<T, ConnectError>
    where
        F: FnOnce(&mut S::Transaction) -> StoreResult<T> + Send,
    {
        let mut tx = self.store.begin().await?;
        let result = f(&mut tx);
        finish(tx, result)
    }

    /// Run a block against a read transaction
    ///
    /// Takes no account lock, so it may observe an operation between its
    /// steps. Anything the block writes is discarded.
    pub async fn read<T, F>(&self, f: F) -> Result<T, ConnectError>
    where
        F: FnOnce(&mut S::Transaction) -> StoreResult<T> + Send,
    {
        let mut tx = self.store.begin_read().await?;
        let result = f(&mut tx);
        if let Err(rollback_err) = tx.rollback() {
            tracing::error!(error = %rollback_err, "Failed to close read transaction");
        }
        result
    }
}

fn finish<Tx: StoreTransaction, T>(
    tx: Tx,
    result: Result<T, ConnectError>,
) -> Result<T, ConnectError> {
    match result {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::error!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}
