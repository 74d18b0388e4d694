//! Data models for connector storage

use account_connector_core::{CheckpointType, Provider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the envelope `checkpoint_metadata` is written in
pub const CHECKPOINT_METADATA_VERSION: u32 = 1;

/// Local status of a linked account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// Waiting for a checkpoint to be resolved
    Pending,
    /// Usable
    Ok,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "PENDING",
            AccountStatus::Ok => "OK",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(AccountStatus::Pending),
            "OK" => Some(AccountStatus::Ok),
            _ => None,
        }
    }
}

/// Unique user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local identifier of a linked account row (not the provider's id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

/// A local user
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// bcrypt hash
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A third-party account linked to a user
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub provider: Provider,
    /// Identifier assigned by the provider
    #[serde(rename = "account_id")]
    pub external_account_id: String,
    pub current_status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Status history, oldest first
    #[serde(rename = "status_history")]
    pub history: Vec<StatusHistory>,
}

impl Account {
    pub fn is_ok(&self) -> bool {
        self.current_status == AccountStatus::Ok
    }

    /// The history row that supersedes all others
    pub fn latest_history(&self) -> Option<&StatusHistory> {
        self.history.iter().max_by_key(|h| (h.created_at, h.id))
    }
}

/// One entry of an account's append-only status history
#[derive(Debug, Clone, Serialize)]
pub struct StatusHistory {
    pub id: u64,
    pub account_id: AccountId,
    pub checkpoint: CheckpointType,
    /// Provider checkpoint payload, stored verbatim as JSON
    pub checkpoint_metadata: String,
    pub metadata_version: u32,
    pub checkpoint_expires_at: DateTime<Utc>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

impl StatusHistory {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.checkpoint_expires_at <= now
    }
}

/// A history row to append
#[derive(Debug, Clone)]
pub struct NewStatusHistory {
    pub checkpoint: CheckpointType,
    pub checkpoint_metadata: String,
    pub metadata_version: u32,
    pub checkpoint_expires_at: DateTime<Utc>,
    pub status: AccountStatus,
}

/// An account to create, optionally with its first history row
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: UserId,
    pub provider: Provider,
    pub external_account_id: String,
    pub status: AccountStatus,
    pub history: Option<NewStatusHistory>,
}

/// An account joined to its latest unexpired history row of one checkpoint type
#[derive(Debug, Clone)]
pub struct AccountWithStatus {
    pub account: Account,
    pub latest: StatusHistory,
}
