//! Account Connector Core Library
//!
//! Describes the contract with the remote automation API that performs
//! third-party logins on behalf of local users:
//! - Connecting an account may raise a checkpoint (one-time code, in-app approval, ...)
//! - Checkpoints are answered with a code or resolved out of band
//! - Remote accounts report per-source status once usable

pub mod checkpoint;
pub mod error;
pub mod provider;

pub use checkpoint::{Checkpoint, CheckpointType};
pub use error::Error;
pub use provider::{
    AccountList, AccountSource, ConnectRequest, ConnectResponse, Credentials, Provider,
    ProviderClient, RemoteAccount, SolveCheckpointRequest, SolveCheckpointResponse, SolveOutcome,
};

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, Error>;
