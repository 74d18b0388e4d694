//! Account Connector
//!
//! Links third-party social accounts to local users through a remote
//! automation provider, walking each account through the provider's
//! checkpoints until it is usable.

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod provider_client;
pub mod routes;
pub mod state;
pub mod store;

pub use config::{Config, ConfigError, ProviderConfig};
pub use engine::{ConnectOutcome, ConnectionEngine};
pub use error::{ConnectError, ErrorKind};
pub use provider_client::HttpProviderClient;
pub use state::AppState;
pub use store::{AccountStore, InMemoryStore, SqliteStore, StoreTransaction, UnitOfWork};
