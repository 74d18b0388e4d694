//! SQLite-based storage implementation

use std::sync::Arc;

use account_connector_core::{CheckpointType, Provider};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    Account, AccountId, AccountStatus, AccountStore, AccountWithStatus, NewAccount,
    NewStatusHistory, StatusHistory, StoreResult, StoreTransaction, User, UserId,
};
use crate::error::ConnectError;

/// Current schema version
const SCHEMA_VERSION: i32 = 2;

const USER_COLUMNS: &str = "id, username, password_hash, created_at";

const ACCOUNT_COLUMNS: &str =
    "id, user_id, provider, account_id, current_status, created_at, updated_at";

const HISTORY_COLUMNS: &str = "id, account_id, checkpoint, checkpoint_metadata, metadata_version, \
     checkpoint_expires_at, status, created_at";

/// SQLite-based account store
///
/// File databases run in WAL mode with a second connection for reads, so
/// readers never queue behind the writer.
pub struct SqliteStore {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path
    pub fn open(path: &str) -> Result<Self, ConnectError> {
        let writer = Connection::open(path)?;
        writer.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(&writer)?;

        let reader = Connection::open(path)?;
        reader.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
        })
    }

    /// Open a private in-memory database
    ///
    /// An in-memory database lives in one connection, which reads share.
    pub fn open_in_memory() -> Result<Self, ConnectError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;

        let conn = Arc::new(Mutex::new(conn));
        Ok(Self {
            writer: Arc::clone(&conn),
            reader: conn,
        })
    }

    fn init(conn: &Connection) -> Result<(), ConnectError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::migrate(conn)
    }

    /// Run database migrations
    fn migrate(conn: &Connection) -> Result<(), ConnectError> {
        let current_version = Self::get_schema_version(conn)?;

        if current_version < SCHEMA_VERSION {
            tracing::info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );

            if current_version < 1 {
                Self::migrate_v1(conn)?;
            }

            if current_version < 2 {
                Self::migrate_v2(conn)?;
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;

            tracing::info!("Database migrations complete");
        }

        Ok(())
    }

    /// Get current schema version (0 if no schema exists)
    fn get_schema_version(conn: &Connection) -> Result<i32, ConnectError> {
        let table_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            return Ok(0);
        }

        Ok(conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0).map(|v| v.unwrap_or(0))
        })?)
    }

    /// Migration to version 1: initial schema
    fn migrate_v1(conn: &Connection) -> Result<(), ConnectError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            -- Local users, owned by the authentication layer
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            -- Linked third-party accounts
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                provider TEXT NOT NULL,
                account_id TEXT NOT NULL,
                current_status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_accounts_user_provider
                ON accounts(user_id, provider) WHERE deleted_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_accounts_user_account
                ON accounts(user_id, account_id);

            -- Append-only checkpoint history
            CREATE TABLE IF NOT EXISTS account_status_histories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                checkpoint TEXT NOT NULL,
                checkpoint_metadata TEXT NOT NULL,
                metadata_version INTEGER NOT NULL,
                checkpoint_expires_at TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_histories_account
                ON account_status_histories(account_id);
            "#,
        )?;

        Ok(())
    }

    /// Migration to version 2: users sign up with a password
    fn migrate_v2(conn: &Connection) -> Result<(), ConnectError> {
        conn.execute_batch(
            "ALTER TABLE users ADD COLUMN password_hash TEXT NOT NULL DEFAULT '';",
        )?;

        Ok(())
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    type Transaction = SqliteTransaction;

    async fn begin(&self) -> StoreResult<SqliteTransaction> {
        let conn = Arc::clone(&self.writer).lock_owned().await;
        // IMMEDIATE takes the write lock now instead of at the first write
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(SqliteTransaction {
            conn,
            finished: false,
        })
    }

    async fn begin_read(&self) -> StoreResult<SqliteTransaction> {
        let conn = Arc::clone(&self.reader).lock_owned().await;
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(SqliteTransaction {
            conn,
            finished: false,
        })
    }
}

/// Open transaction on a [`SqliteStore`]
pub struct SqliteTransaction {
    conn: OwnedMutexGuard<Connection>,
    finished: bool,
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "Failed to roll back abandoned transaction");
            }
        }
    }
}

/// Timestamps are stored in one fixed-width UTC format so they compare as text
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp {}: {}", raw, e)))
}

fn parse_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<AccountStatus> {
    let raw: String = row.get(idx)?;
    AccountStatus::from_str(&raw)
        .ok_or_else(|| conversion_error(idx, format!("bad status {}", raw)))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get::<_, i64>(0)? as u64),
        username: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: parse_ts(row, 3)?,
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let provider: String = row.get(2)?;
    Ok(Account {
        id: AccountId(row.get::<_, i64>(0)? as u64),
        user_id: UserId(row.get::<_, i64>(1)? as u64),
        provider: Provider::from_str(&provider)
            .ok_or_else(|| conversion_error(2, format!("bad provider {}", provider)))?,
        external_account_id: row.get(3)?,
        current_status: parse_status(row, 4)?,
        created_at: parse_ts(row, 5)?,
        updated_at: parse_ts(row, 6)?,
        history: Vec::new(),
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<StatusHistory> {
    let checkpoint: String = row.get(2)?;
    Ok(StatusHistory {
        id: row.get::<_, i64>(0)? as u64,
        account_id: AccountId(row.get::<_, i64>(1)? as u64),
        checkpoint: CheckpointType::from_str(&checkpoint)
            .ok_or_else(|| conversion_error(2, format!("bad checkpoint {}", checkpoint)))?,
        checkpoint_metadata: row.get(3)?,
        metadata_version: row.get(4)?,
        checkpoint_expires_at: parse_ts(row, 5)?,
        status: parse_status(row, 6)?,
        created_at: parse_ts(row, 7)?,
    })
}

impl SqliteTransaction {
    fn load_history(&self, account_id: AccountId) -> StoreResult<Vec<StatusHistory>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM account_status_histories \
             WHERE account_id = ?1 AND deleted_at IS NULL ORDER BY created_at, id",
            HISTORY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![account_id.0 as i64], history_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn with_history(&self, account: Option<Account>) -> StoreResult<Option<Account>> {
        match account {
            Some(mut account) => {
                account.history = self.load_history(account.id)?;
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    fn insert_history(
        &self,
        account_id: AccountId,
        history: NewStatusHistory,
    ) -> StoreResult<StatusHistory> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO account_status_histories \
             (account_id, checkpoint, checkpoint_metadata, metadata_version, \
              checkpoint_expires_at, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                account_id.0 as i64,
                history.checkpoint.as_str(),
                history.checkpoint_metadata,
                history.metadata_version,
                ts(history.checkpoint_expires_at),
                history.status.as_str(),
                ts(now),
            ],
        )?;

        Ok(StatusHistory {
            id: self.conn.last_insert_rowid() as u64,
            account_id,
            checkpoint: history.checkpoint,
            checkpoint_metadata: history.checkpoint_metadata,
            metadata_version: history.metadata_version,
            checkpoint_expires_at: history.checkpoint_expires_at,
            status: history.status,
            created_at: now,
        })
    }
}

impl StoreTransaction for SqliteTransaction {
    fn create_user(&mut self, username: &str, password_hash: &str) -> StoreResult<User> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
            params![username, password_hash, ts(now)],
        )?;

        Ok(User {
            id: UserId(self.conn.last_insert_rowid() as u64),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
        })
    }

    fn get_user(&mut self, user_id: UserId) -> StoreResult<Option<User>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![user_id.0 as i64],
                user_from_row,
            )
            .optional()?)
    }

    fn get_user_by_username(&mut self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                params![username],
                user_from_row,
            )
            .optional()?)
    }

    fn create_account(&mut self, account: NewAccount) -> StoreResult<Account> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO accounts \
             (user_id, provider, account_id, current_status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                account.user_id.0 as i64,
                account.provider.as_str(),
                account.external_account_id,
                account.status.as_str(),
                ts(now),
            ],
        )?;
        let id = AccountId(self.conn.last_insert_rowid() as u64);

        let history = match account.history {
            Some(history) => vec![self.insert_history(id, history)?],
            None => Vec::new(),
        };

        Ok(Account {
            id,
            user_id: account.user_id,
            provider: account.provider,
            external_account_id: account.external_account_id,
            current_status: account.status,
            created_at: now,
            updated_at: now,
            history,
        })
    }

    fn get_by_user_and_provider(
        &mut self,
        user_id: UserId,
        provider: Provider,
    ) -> StoreResult<Option<Account>> {
        let account = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM accounts \
                     WHERE user_id = ?1 AND provider = ?2 AND deleted_at IS NULL",
                    ACCOUNT_COLUMNS
                ),
                params![user_id.0 as i64, provider.as_str()],
                account_from_row,
            )
            .optional()?;
        self.with_history(account)
    }

    fn get_by_user_and_external_id(
        &mut self,
        user_id: UserId,
        external_account_id: &str,
    ) -> StoreResult<Option<Account>> {
        let account = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM accounts \
                     WHERE user_id = ?1 AND account_id = ?2 AND deleted_at IS NULL \
                     ORDER BY id DESC LIMIT 1",
                    ACCOUNT_COLUMNS
                ),
                params![user_id.0 as i64, external_account_id],
                account_from_row,
            )
            .optional()?;
        self.with_history(account)
    }

    fn get_with_status(
        &mut self,
        user_id: UserId,
        external_account_id: &str,
        checkpoint: CheckpointType,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AccountWithStatus>> {
        let Some(account) = self.get_by_user_and_external_id(user_id, external_account_id)? else {
            return Ok(None);
        };

        let latest = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM account_status_histories \
                     WHERE account_id = ?1 AND checkpoint = ?2 \
                       AND checkpoint_expires_at > ?3 AND deleted_at IS NULL \
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    HISTORY_COLUMNS
                ),
                params![account.id.0 as i64, checkpoint.as_str(), ts(now)],
                history_from_row,
            )
            .optional()?;

        Ok(latest.map(|latest| AccountWithStatus { account, latest }))
    }

    fn update_account(&mut self, account: &Account) -> StoreResult<()> {
        let updated = self.conn.execute(
            "UPDATE accounts SET current_status = ?1, updated_at = ?2 \
             WHERE id = ?3 AND deleted_at IS NULL",
            params![
                account.current_status.as_str(),
                ts(Utc::now()),
                account.id.0 as i64
            ],
        )?;

        if updated == 0 {
            return Err(ConnectError::AccountNotFound);
        }
        Ok(())
    }

    fn append_history(
        &mut self,
        account_id: AccountId,
        history: NewStatusHistory,
    ) -> StoreResult<StatusHistory> {
        let live: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?1 AND deleted_at IS NULL)",
            params![account_id.0 as i64],
            |row| row.get(0),
        )?;
        if !live {
            return Err(ConnectError::AccountNotFound);
        }
        self.insert_history(account_id, history)
    }

    fn delete_account(&mut self, account_id: AccountId) -> StoreResult<()> {
        let now = ts(Utc::now());
        self.conn.execute(
            "UPDATE account_status_histories SET deleted_at = ?1 \
             WHERE account_id = ?2 AND deleted_at IS NULL",
            params![now, account_id.0 as i64],
        )?;
        self.conn.execute(
            "UPDATE accounts SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![now, account_id.0 as i64],
        )?;
        Ok(())
    }

    fn list_by_user(&mut self, user_id: UserId) -> StoreResult<Vec<Account>> {
        let accounts = {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM accounts WHERE user_id = ?1 AND deleted_at IS NULL \
                 ORDER BY created_at, id",
                ACCOUNT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![user_id.0 as i64], account_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        accounts
            .into_iter()
            .map(|mut account| {
                account.history = self.load_history(account.id)?;
                Ok(account)
            })
            .collect()
    }

    // A failed COMMIT leaves `finished` unset so drop rolls back.
    fn commit(mut self) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self) -> StoreResult<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}
