//! Common test utilities for connector integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use account_connector::store::{
    AccountStatus, NewAccount, NewStatusHistory, UserId, CHECKPOINT_METADATA_VERSION,
};
use account_connector::{
    routes, AccountStore, AppState, ConnectionEngine, InMemoryStore, StoreTransaction,
};
use account_connector_core::{
    AccountList, AccountSource, Checkpoint, CheckpointType, ConnectRequest, ConnectResponse,
    Error as ProviderError, Provider, ProviderClient, RemoteAccount, Result as ProviderResult,
    SolveCheckpointRequest, SolveOutcome,
};
use async_trait::async_trait;
use axum_test::TestServer;
use chrono::Utc;

/// What the mock answers to a checkpoint code
#[derive(Debug, Clone)]
pub enum SolveBehavior {
    Accept,
    Reject,
    NextCheckpoint(Checkpoint),
    Fail,
}

/// What the mock answers to a remote delete
#[derive(Debug, Clone, Copy)]
pub enum DeleteBehavior {
    Deleted,
    NotFound,
    Fail,
}

/// What the mock answers to a status request
#[derive(Debug, Clone)]
pub enum StatusBehavior {
    Sources(Vec<&'static str>),
    NotFound,
}

/// Scriptable provider that records every call
pub struct MockProvider {
    account_id: String,
    checkpoint: Option<Checkpoint>,
    connect_fails: bool,
    solve: SolveBehavior,
    status: StatusBehavior,
    delete: DeleteBehavior,
    delay: Duration,

    pub connect_calls: AtomicUsize,
    pub solve_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    /// Timeout passed to the last status request
    pub last_status_timeout: Mutex<Option<Duration>>,
    /// Requests received by `connect`
    pub connect_requests: Mutex<Vec<ConnectRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            account_id: "acc-1".to_string(),
            checkpoint: None,
            connect_fails: false,
            solve: SolveBehavior::Accept,
            status: StatusBehavior::Sources(vec!["OK"]),
            delete: DeleteBehavior::Deleted,
            delay: Duration::ZERO,
            connect_calls: AtomicUsize::new(0),
            solve_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            last_status_timeout: Mutex::new(None),
            connect_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_account_id(mut self, account_id: &str) -> Self {
        self.account_id = account_id.to_string();
        self
    }

    pub fn with_checkpoint(mut self, checkpoint_type: CheckpointType) -> Self {
        self.checkpoint = Some(Checkpoint::new(checkpoint_type));
        self
    }

    pub fn with_connect_failure(mut self) -> Self {
        self.connect_fails = true;
        self
    }

    pub fn with_solve(mut self, solve: SolveBehavior) -> Self {
        self.solve = solve;
        self
    }

    pub fn with_status(mut self, status: StatusBehavior) -> Self {
        self.status = status;
        self
    }

    pub fn with_delete(mut self, delete: DeleteBehavior) -> Self {
        self.delete = delete;
        self
    }

    /// Delay solve and status answers, to hold the provider call open
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn solve_calls(&self) -> usize {
        self.solve_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

fn provider_failure() -> ProviderError {
    ProviderError::Api {
        status: 500,
        body: "internal error".to_string(),
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    async fn connect(&self, request: &ConnectRequest) -> ProviderResult<ConnectResponse> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connect_requests.lock().unwrap().push(request.clone());

        if self.connect_fails {
            return Err(provider_failure());
        }

        Ok(ConnectResponse {
            object: Some("AccountCreated".to_string()),
            account_id: self.account_id.clone(),
            checkpoint: self.checkpoint.clone(),
            status: 201,
            raw_body: String::new(),
        })
    }

    async fn solve_checkpoint(
        &self,
        request: &SolveCheckpointRequest,
    ) -> ProviderResult<SolveOutcome> {
        self.solve_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        match &self.solve {
            SolveBehavior::Accept => Ok(SolveOutcome::Solved {
                account_id: request.account_id.clone(),
            }),
            SolveBehavior::Reject => Err(ProviderError::InvalidOrExpiredCheckpoint),
            SolveBehavior::NextCheckpoint(checkpoint) => {
                Ok(SolveOutcome::NextCheckpoint(checkpoint.clone()))
            }
            SolveBehavior::Fail => Err(provider_failure()),
        }
    }

    async fn get_status(
        &self,
        account_id: &str,
        timeout: Option<Duration>,
    ) -> ProviderResult<RemoteAccount> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_status_timeout.lock().unwrap() = timeout;
        self.pause().await;

        match &self.status {
            StatusBehavior::Sources(statuses) => Ok(RemoteAccount {
                id: account_id.to_string(),
                object: Some("Account".to_string()),
                name: None,
                account_type: Some("LINKEDIN".to_string()),
                created_at: None,
                sources: statuses
                    .iter()
                    .enumerate()
                    .map(|(i, status)| AccountSource {
                        id: format!("{}_{}", account_id, i),
                        status: status.to_string(),
                    })
                    .collect(),
                groups: Vec::new(),
            }),
            StatusBehavior::NotFound => Err(ProviderError::AccountNotFound),
        }
    }

    async fn delete_account(&self, _account_id: &str) -> ProviderResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        match self.delete {
            DeleteBehavior::Deleted => Ok(()),
            DeleteBehavior::NotFound => Err(ProviderError::AccountNotFound),
            DeleteBehavior::Fail => Err(provider_failure()),
        }
    }

    async fn list_accounts(&self) -> ProviderResult<AccountList> {
        Ok(AccountList {
            object: Some("AccountList".to_string()),
            items: Vec::new(),
            cursor: None,
        })
    }
}

pub type TestEngine<S = InMemoryStore> = ConnectionEngine<S, MockProvider>;

/// Create an engine over a fresh in-memory store
pub fn create_test_engine(provider: MockProvider) -> (TestEngine, Arc<MockProvider>) {
    let provider = Arc::new(provider);
    let engine = ConnectionEngine::new(Arc::new(InMemoryStore::new()), Arc::clone(&provider));
    (engine, provider)
}

/// Create a local user directly in the store
pub async fn create_user<S: AccountStore>(store: &S, username: &str) -> UserId {
    let mut tx = store.begin().await.unwrap();
    let user = tx.create_user(username, "hash").unwrap();
    tx.commit().unwrap();
    user.id
}

/// Insert a `PENDING` account whose latest checkpoint expires in `expires_in_secs`
pub async fn seed_pending_account<S: AccountStore>(
    store: &S,
    user_id: UserId,
    provider: Provider,
    account_id: &str,
    checkpoint_type: CheckpointType,
    expires_in_secs: i64,
) {
    let checkpoint = Checkpoint::new(checkpoint_type);
    let mut tx = store.begin().await.unwrap();
    tx.create_account(NewAccount {
        user_id,
        provider,
        external_account_id: account_id.to_string(),
        status: AccountStatus::Pending,
        history: Some(NewStatusHistory {
            checkpoint: checkpoint_type,
            checkpoint_metadata: serde_json::to_string(&checkpoint).unwrap(),
            metadata_version: CHECKPOINT_METADATA_VERSION,
            checkpoint_expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            status: AccountStatus::Pending,
        }),
    })
    .unwrap();
    tx.commit().unwrap();
}

/// Read an account straight from the store
pub async fn load_account<S: AccountStore>(
    store: &S,
    user_id: UserId,
    account_id: &str,
) -> Option<account_connector::store::Account> {
    let mut tx = store.begin_read().await.unwrap();
    tx.get_by_user_and_external_id(user_id, account_id).unwrap()
}

/// Create a test server over the mock provider, with one user already registered
pub async fn create_test_server(
    provider: MockProvider,
) -> (TestServer, UserId, Arc<MockProvider>) {
    let (engine, provider) = create_test_engine(provider);
    let user_id = create_user(engine.store().as_ref(), "alice").await;

    let state = AppState::new(engine).with_password_cost(4);
    let app = routes::create_router(Arc::new(state));
    let server = TestServer::new(app).expect("Failed to create test server");

    (server, user_id, provider)
}
