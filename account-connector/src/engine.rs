//! Connection engine
//!
//! Drives a linked account through `UNCONNECTED -> PENDING -> OK` and back to
//! `UNCONNECTED` on disconnect. A writer holds the account's [`AccountLock`]
//! from its first read until the provider has answered and the result is
//! persisted, so operations on one account serialize while other accounts
//! and all reads proceed. Store transactions stay short and never span a
//! provider call. Dropping an operation's future aborts the provider call
//! and releases the lock with nothing written.

use std::sync::Arc;
use std::time::Duration;

use account_connector_core::{
    Checkpoint, CheckpointType, ConnectRequest, Credentials, Provider, ProviderClient,
    SolveCheckpointRequest, SolveOutcome,
};
use chrono::Utc;

use crate::error::ConnectError;
use crate::store::{
    Account, AccountLock, AccountStatus, AccountStore, NewAccount, NewStatusHistory, StoreResult,
    StoreTransaction, UnitOfWork, UserId, CHECKPOINT_METADATA_VERSION,
};

/// How long a provider checkpoint stays answerable
pub const DEFAULT_CHECKPOINT_TTL: Duration = Duration::from_secs(270);

/// Long-poll timeout used when the caller gives none
pub const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(300);

/// Result of connecting an account or answering one of its checkpoints
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// The account is usable
    Connected(Account),
    /// The provider raised a challenge; the account is `PENDING`
    CheckpointRequired {
        account: Account,
        checkpoint: Checkpoint,
    },
    /// The user already has an account for this provider; nothing was sent
    AlreadyLinked(Account),
}

impl ConnectOutcome {
    pub fn account(&self) -> &Account {
        match self {
            ConnectOutcome::Connected(account)
            | ConnectOutcome::AlreadyLinked(account)
            | ConnectOutcome::CheckpointRequired { account, .. } => account,
        }
    }

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            ConnectOutcome::CheckpointRequired { checkpoint, .. } => Some(checkpoint),
            _ => None,
        }
    }

    pub fn into_account(self) -> Account {
        match self {
            ConnectOutcome::Connected(account)
            | ConnectOutcome::AlreadyLinked(account)
            | ConnectOutcome::CheckpointRequired { account, .. } => account,
        }
    }
}

/// The account-linking state machine
pub struct ConnectionEngine<S, P> {
    uow: UnitOfWork<S>,
    provider: Arc<P>,
    checkpoint_ttl: Duration,
    long_poll_timeout: Duration,
}

impl<S, P> Clone for ConnectionEngine<S, P> {
    fn clone(&self) -> Self {
        Self {
            uow: self.uow.clone(),
            provider: Arc::clone(&self.provider),
            checkpoint_ttl: self.checkpoint_ttl,
            long_poll_timeout: self.long_poll_timeout,
        }
    }
}

impl<S, P> ConnectionEngine<S, P>
where
    S: AccountStore,
    P: ProviderClient + 'static,
{
    pub fn new(store: Arc<S>, provider: Arc<P>) -> Self {
        Self {
            uow: UnitOfWork::new(store),
            provider,
            checkpoint_ttl: DEFAULT_CHECKPOINT_TTL,
            long_poll_timeout: DEFAULT_LONG_POLL_TIMEOUT,
        }
    }

    pub fn with_checkpoint_ttl(mut self, ttl: Duration) -> Self {
        self.checkpoint_ttl = ttl;
        self
    }

    pub fn with_long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.long_poll_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        self.uow.store()
    }

    pub fn unit_of_work(&self) -> &UnitOfWork<S> {
        &self.uow
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// List a user's linked accounts with their status history
    ///
    /// Takes no account lock, so it may observe an operation in progress.
    pub async fn list_user_accounts(&self, user_id: UserId) -> Result<Vec<Account>, ConnectError> {
        self.uow.read(move |tx| tx.list_by_user(user_id)).await
    }

    /// Link a provider account to a user
    ///
    /// A user already holding an account for `provider` gets it back as
    /// [`ConnectOutcome::AlreadyLinked`] without the provider being called.
    pub async fn connect_account(
        &self,
        user_id: UserId,
        provider: Provider,
        credentials: Credentials,
    ) -> Result<ConnectOutcome, ConnectError> {
        let _lock = self.uow.lock_account(user_id, provider).await;

        let existing = self
            .uow
            .run(move |tx| tx.get_by_user_and_provider_for_update(user_id, provider))
            .await?;
        if let Some(existing) = existing {
            tracing::info!(
                user_id = %user_id,
                account_id = %existing.external_account_id,
                provider = %provider,
                "Account already linked"
            );
            return Ok(ConnectOutcome::AlreadyLinked(existing));
        }

        let response = self
            .provider
            .connect(&ConnectRequest::new(provider, &credentials))
            .await?;

        let Some(checkpoint) = response.checkpoint else {
            let new_account = NewAccount {
                user_id,
                provider,
                external_account_id: response.account_id,
                status: AccountStatus::Ok,
                history: None,
            };
            let account = self
                .uow
                .run(move |tx| tx.create_account(new_account))
                .await?;
            tracing::info!(
                user_id = %user_id,
                account_id = %account.external_account_id,
                provider = %provider,
                "Account connected"
            );
            return Ok(ConnectOutcome::Connected(account));
        };

        let new_account = NewAccount {
            user_id,
            provider,
            external_account_id: response.account_id,
            status: AccountStatus::Pending,
            history: Some(pending_history(&checkpoint, self.checkpoint_ttl)?),
        };
        let account = self
            .uow
            .run(move |tx| tx.create_account(new_account))
            .await?;
        tracing::info!(
            user_id = %user_id,
            account_id = %account.external_account_id,
            provider = %provider,
            checkpoint = %checkpoint.checkpoint_type,
            "Checkpoint required"
        );

        Ok(ConnectOutcome::CheckpointRequired {
            account,
            checkpoint,
        })
    }

    /// Answer the pending checkpoint of an account
    ///
    /// Solving an account that is already `OK` returns it unchanged without
    /// contacting the provider. The account is marked `OK` only after the
    /// provider confirms; a rejected code leaves it `PENDING`. A checkpoint
    /// past its local expiry is reported as not found without a provider
    /// call, the same as an unknown account.
    pub async fn solve_checkpoint(
        &self,
        user_id: UserId,
        external_account_id: &str,
        code: &str,
    ) -> Result<ConnectOutcome, ConnectError> {
        let (_lock, account) = self
            .lock_existing(user_id, external_account_id)
            .await?
            .ok_or(ConnectError::AccountNotFound)?;

        if account.is_ok() {
            tracing::debug!(
                user_id = %user_id,
                account_id = %external_account_id,
                "Account already validated"
            );
            return Ok(ConnectOutcome::Connected(account));
        }

        let now = Utc::now();
        if account.latest_history().is_some_and(|h| h.is_expired(now)) {
            tracing::info!(
                user_id = %user_id,
                account_id = %external_account_id,
                "Checkpoint expired"
            );
            return Err(ConnectError::AccountNotFound);
        }

        let provider = account.provider;
        let request = SolveCheckpointRequest {
            provider,
            account_id: external_account_id.to_string(),
            code: code.to_string(),
        };
        let outcome = self.provider.solve_checkpoint(&request).await?;

        let lookup_id = external_account_id.to_string();
        match outcome {
            SolveOutcome::Solved { .. } => {
                let account = self
                    .uow
                    .run(move |tx| {
                        let mut account = locked_account(tx, user_id, &lookup_id, provider)?
                            .ok_or(ConnectError::AccountNotFound)?;
                        account.current_status = AccountStatus::Ok;
                        tx.update_account(&account)?;
                        tx.get_by_user_and_external_id(user_id, &lookup_id)?
                            .ok_or(ConnectError::AccountNotFound)
                    })
                    .await?;

                tracing::info!(
                    user_id = %user_id,
                    account_id = %external_account_id,
                    provider = %provider,
                    "Checkpoint solved"
                );
                Ok(ConnectOutcome::Connected(account))
            }
            SolveOutcome::NextCheckpoint(checkpoint) => {
                let history = pending_history(&checkpoint, self.checkpoint_ttl)?;
                let account = self
                    .uow
                    .run(move |tx| {
                        let account = locked_account(tx, user_id, &lookup_id, provider)?
                            .ok_or(ConnectError::AccountNotFound)?;
                        tx.append_history(account.id, history)?;
                        tx.get_by_user_and_external_id(user_id, &lookup_id)?
                            .ok_or(ConnectError::AccountNotFound)
                    })
                    .await?;

                tracing::info!(
                    user_id = %user_id,
                    account_id = %external_account_id,
                    checkpoint = %checkpoint.checkpoint_type,
                    "Another checkpoint required"
                );
                Ok(ConnectOutcome::CheckpointRequired {
                    account,
                    checkpoint,
                })
            }
        }
    }

    /// Wait for a checkpoint that the member resolves on their own device
    ///
    /// Only accounts with an unexpired out-of-band checkpoint qualify;
    /// anything else is reported as not found. The provider holds the status
    /// request open for up to `timeout` (the configured default when `None` or
    /// zero). No lock is held during the wait.
    pub async fn wait_for_account_validation(
        &self,
        user_id: UserId,
        external_account_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Account, ConnectError> {
        let lookup_id = external_account_id.to_string();
        let pending = self
            .uow
            .read(move |tx| {
                let now = Utc::now();
                for checkpoint in CheckpointType::ALL
                    .into_iter()
                    .filter(CheckpointType::resolves_out_of_band)
                {
                    if let Some(found) = tx.get_with_status(user_id, &lookup_id, checkpoint, now)? {
                        return Ok(found);
                    }
                }
                Err(ConnectError::AccountNotFound)
            })
            .await?;

        if pending.account.is_ok() {
            return Ok(pending.account);
        }

        let timeout = timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.long_poll_timeout);

        tracing::debug!(
            user_id = %user_id,
            account_id = %external_account_id,
            checkpoint = %pending.latest.checkpoint,
            timeout_secs = timeout.as_secs(),
            "Waiting for out-of-band validation"
        );

        let remote = self
            .provider
            .get_status(external_account_id, Some(timeout))
            .await?;

        if !remote.is_validated() {
            tracing::warn!(
                user_id = %user_id,
                account_id = %external_account_id,
                "Account validation failed"
            );
            return Err(ConnectError::ValidationFailed);
        }

        let provider = pending.account.provider;
        let _lock = self.uow.lock_account(user_id, provider).await;
        let lookup_id = external_account_id.to_string();
        let account = self
            .uow
            .run(move |tx| {
                let mut account = locked_account(tx, user_id, &lookup_id, provider)?
                    .ok_or(ConnectError::AccountNotFound)?;
                if account.is_ok() {
                    return Ok(account);
                }

                account.current_status = AccountStatus::Ok;
                tx.update_account(&account)?;
                tx.get_by_user_and_external_id(user_id, &lookup_id)?
                    .ok_or(ConnectError::AccountNotFound)
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            account_id = %external_account_id,
            provider = %provider,
            "Account validated"
        );

        Ok(account)
    }

    /// Unlink an account locally and on the provider
    ///
    /// Disconnecting an account that is not linked succeeds without a
    /// provider call. A provider that no longer knows the account counts as
    /// deleted. Any other provider failure leaves both sides unchanged.
    pub async fn disconnect_linked_account(
        &self,
        user_id: UserId,
        external_account_id: &str,
    ) -> Result<(), ConnectError> {
        let Some((_lock, account)) = self.lock_existing(user_id, external_account_id).await? else {
            tracing::debug!(
                user_id = %user_id,
                account_id = %external_account_id,
                "Account not linked, nothing to disconnect"
            );
            return Ok(());
        };

        match self.provider.delete_account(external_account_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    user_id = %user_id,
                    account_id = %external_account_id,
                    "Account already gone on provider"
                );
            }
            Err(e) => return Err(e.into()),
        }

        let account_id = account.id;
        self.uow.run(move |tx| tx.delete_account(account_id)).await?;
        tracing::info!(
            user_id = %user_id,
            account_id = %external_account_id,
            provider = %account.provider,
            "Account disconnected"
        );

        Ok(())
    }

    /// Find a user's account by the provider's id and lock its slot
    ///
    /// The account is read again under the lock; `None` if it is gone by
    /// then or never existed.
    async fn lock_existing(
        &self,
        user_id: UserId,
        external_account_id: &str,
    ) -> Result<Option<(AccountLock, Account)>, ConnectError> {
        let lookup_id = external_account_id.to_string();
        let provider = self
            .uow
            .read(move |tx| {
                Ok(tx
                    .get_by_user_and_external_id(user_id, &lookup_id)?
                    .map(|account| account.provider))
            })
            .await?;
        let Some(provider) = provider else {
            return Ok(None);
        };

        let lock = self.uow.lock_account(user_id, provider).await;
        let lookup_id = external_account_id.to_string();
        let account = self
            .uow
            .run(move |tx| locked_account(tx, user_id, &lookup_id, provider))
            .await?;

        Ok(account.map(|account| (lock, account)))
    }
}

/// Read an account under its slot lock; the caller holds the lock for `provider`
fn locked_account<T: StoreTransaction>(
    tx: &mut T,
    user_id: UserId,
    external_account_id: &str,
    provider: Provider,
) -> StoreResult<Option<Account>> {
    Ok(tx
        .get_by_user_and_external_id_for_update(user_id, external_account_id)?
        .filter(|account| account.provider == provider))
}

fn pending_history(
    checkpoint: &Checkpoint,
    ttl: Duration,
) -> Result<NewStatusHistory, ConnectError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| ConnectError::Internal(format!("checkpoint ttl out of range: {}", e)))?;

    Ok(NewStatusHistory {
        checkpoint: checkpoint.checkpoint_type,
        checkpoint_metadata: serde_json::to_string(checkpoint)?,
        metadata_version: CHECKPOINT_METADATA_VERSION,
        checkpoint_expires_at: Utc::now() + ttl,
        status: AccountStatus::Pending,
    })
}
