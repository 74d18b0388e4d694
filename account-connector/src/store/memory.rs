//! In-memory storage implementation

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use account_connector_core::{CheckpointType, Provider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    Account, AccountId, AccountStatus, AccountStore, AccountWithStatus, NewAccount,
    NewStatusHistory, StatusHistory, StoreResult, StoreTransaction, User, UserId,
};
use crate::error::ConnectError;

#[derive(Debug, Clone)]
struct AccountRow {
    id: AccountId,
    user_id: UserId,
    provider: Provider,
    external_account_id: String,
    current_status: AccountStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct HistoryRow {
    history: StatusHistory,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<u64, User>,
    accounts: BTreeMap<u64, AccountRow>,
    histories: BTreeMap<u64, HistoryRow>,
    next_user_id: u64,
    next_account_id: u64,
    next_history_id: u64,
}

impl MemoryState {
    fn live_accounts(&self) -> impl Iterator<Item = &AccountRow> {
        self.accounts.values().filter(|row| row.deleted_at.is_none())
    }

    fn live_history(&self, account_id: AccountId) -> Vec<StatusHistory> {
        self.histories
            .values()
            .filter(|row| row.deleted_at.is_none() && row.history.account_id == account_id)
            .map(|row| row.history.clone())
            .collect()
    }

    fn to_account(&self, row: &AccountRow) -> Account {
        Account {
            id: row.id,
            user_id: row.user_id,
            provider: row.provider,
            external_account_id: row.external_account_id.clone(),
            current_status: row.current_status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            history: self.live_history(row.id),
        }
    }

    fn insert_history(&mut self, account_id: AccountId, new: NewStatusHistory) -> StatusHistory {
        self.next_history_id += 1;
        let history = StatusHistory {
            id: self.next_history_id,
            account_id,
            checkpoint: new.checkpoint,
            checkpoint_metadata: new.checkpoint_metadata,
            metadata_version: new.metadata_version,
            checkpoint_expires_at: new.checkpoint_expires_at,
            status: new.status,
            created_at: Utc::now(),
        };
        self.histories.insert(
            history.id,
            HistoryRow {
                history: history.clone(),
                deleted_at: None,
            },
        );
        history
    }
}

/// In-memory account store
///
/// A write transaction works on a private copy of the state while holding
/// the writer lock; commit publishes the copy, anything else discards it.
/// Readers copy the last published state and never touch the writer lock.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    published: Arc<RwLock<Arc<MemoryState>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> StoreResult<InMemoryTransaction> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = MemoryState::clone(&guard);
        Ok(InMemoryTransaction {
            writer: Some(Writer {
                guard,
                published: Arc::clone(&self.published),
            }),
            working,
        })
    }

    async fn begin_read(&self) -> StoreResult<InMemoryTransaction> {
        let snapshot = self
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(InMemoryTransaction {
            writer: None,
            working: MemoryState::clone(&snapshot),
        })
    }
}

struct Writer {
    guard: OwnedMutexGuard<MemoryState>,
    published: Arc<RwLock<Arc<MemoryState>>>,
}

/// Open transaction on an [`InMemoryStore`]
///
/// Read transactions work on a snapshot and hold no lock.
pub struct InMemoryTransaction {
    writer: Option<Writer>,
    working: MemoryState,
}

impl StoreTransaction for InMemoryTransaction {
    fn create_user(&mut self, username: &str, password_hash: &str) -> StoreResult<User> {
        if self.working.users.values().any(|u| u.username == username) {
            return Err(ConnectError::Storage(format!(
                "user {} already exists",
                username
            )));
        }
        self.working.next_user_id += 1;
        let user = User {
            id: UserId(self.working.next_user_id),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        self.working.users.insert(user.id.0, user.clone());
        Ok(user)
    }

    fn get_user(&mut self, user_id: UserId) -> StoreResult<Option<User>> {
        Ok(self.working.users.get(&user_id.0).cloned())
    }

    fn get_user_by_username(&mut self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    fn create_account(&mut self, account: NewAccount) -> StoreResult<Account> {
        if !self.working.users.contains_key(&account.user_id.0) {
            return Err(ConnectError::Storage(format!(
                "user {} does not exist",
                account.user_id
            )));
        }
        let duplicate = self
            .working
            .live_accounts()
            .any(|row| row.user_id == account.user_id && row.provider == account.provider);
        if duplicate {
            return Err(ConnectError::Storage(format!(
                "user {} already has a {} account",
                account.user_id, account.provider
            )));
        }

        self.working.next_account_id += 1;
        let now = Utc::now();
        let row = AccountRow {
            id: AccountId(self.working.next_account_id),
            user_id: account.user_id,
            provider: account.provider,
            external_account_id: account.external_account_id,
            current_status: account.status,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.working.accounts.insert(row.id.0, row.clone());

        if let Some(history) = account.history {
            self.working.insert_history(row.id, history);
        }

        Ok(self.working.to_account(&row))
    }

    fn get_by_user_and_provider(
        &mut self,
        user_id: UserId,
        provider: Provider,
    ) -> StoreResult<Option<Account>> {
        Ok(self
            .working
            .live_accounts()
            .find(|row| row.user_id == user_id && row.provider == provider)
            .map(|row| self.working.to_account(row)))
    }

    fn get_by_user_and_external_id(
        &mut self,
        user_id: UserId,
        external_account_id: &str,
    ) -> StoreResult<Option<Account>> {
        Ok(self
            .working
            .live_accounts()
            .find(|row| {
                row.user_id == user_id && row.external_account_id == external_account_id
            })
            .map(|row| self.working.to_account(row)))
    }

    fn get_with_status(
        &mut self,
        user_id: UserId,
        external_account_id: &str,
        checkpoint: CheckpointType,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AccountWithStatus>> {
        let found = self.get_by_user_and_external_id(user_id, external_account_id)?;
        let Some(account) = found else {
            return Ok(None);
        };

        let latest = account
            .history
            .iter()
            .filter(|h| h.checkpoint == checkpoint && !h.is_expired(now))
            .max_by_key(|h| (h.created_at, h.id))
            .cloned();

        Ok(latest.map(|latest| AccountWithStatus { account, latest }))
    }

    fn update_account(&mut self, account: &Account) -> StoreResult<()> {
        let row = self
            .working
            .accounts
            .get_mut(&account.id.0)
            .filter(|row| row.deleted_at.is_none())
            .ok_or(ConnectError::AccountNotFound)?;
        row.current_status = account.current_status;
        row.updated_at = Utc::now();
        Ok(())
    }

    fn append_history(
        &mut self,
        account_id: AccountId,
        history: NewStatusHistory,
    ) -> StoreResult<StatusHistory> {
        let live = self
            .working
            .accounts
            .get(&account_id.0)
            .is_some_and(|row| row.deleted_at.is_none());
        if !live {
            return Err(ConnectError::AccountNotFound);
        }
        Ok(self.working.insert_history(account_id, history))
    }

    fn delete_account(&mut self, account_id: AccountId) -> StoreResult<()> {
        let now = Utc::now();
        if let Some(row) = self.working.accounts.get_mut(&account_id.0) {
            row.deleted_at.get_or_insert(now);
        }
        for row in self.working.histories.values_mut() {
            if row.history.account_id == account_id {
                row.deleted_at.get_or_insert(now);
            }
        }
        Ok(())
    }

    fn list_by_user(&mut self, user_id: UserId) -> StoreResult<Vec<Account>> {
        Ok(self
            .working
            .live_accounts()
            .filter(|row| row.user_id == user_id)
            .map(|row| self.working.to_account(row))
            .collect())
    }

    fn commit(self) -> StoreResult<()> {
        let Some(Writer {
            mut guard,
            published,
        }) = self.writer
        else {
            return Err(ConnectError::Internal(
                "cannot commit a read transaction".to_string(),
            ));
        };

        let snapshot = Arc::new(self.working.clone());
        *published.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        *guard = self.working;
        Ok(())
    }

    fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}
