//! Peer errors

use invsys_core::ContainerId;
use invsys_inventory::{SnapshotError, TransactionError};
use invsys_net::SyncError;
use thiserror::Error;

/// Save system errors
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Version mismatch: save version {0}, current version {1}")]
    VersionMismatch(u32, u32),

    #[error("Save slot not found: {0}")]
    SlotNotFound(String),
}

/// Errors surfaced by an inventory peer
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("transaction failed: {0}")]
    Transaction(#[from] TransactionError),

    #[error("synchronization failed: {0}")]
    Sync(#[from] SyncError),

    #[error("save failed: {0}")]
    Save(#[from] SaveError),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("container {0} is not known here")]
    UnknownContainer(ContainerId),

    #[error("container {0} already exists")]
    DuplicateContainer(ContainerId),

    #[error("snapshot of container {container} is invalid: {source}")]
    InvalidSnapshot {
        container: ContainerId,
        #[source]
        source: SnapshotError,
    },

    #[error("this side is not authoritative for container {0}")]
    NotAuthoritative(ContainerId),

    #[error("container {0} cannot be dissolved into itself")]
    SelfTransfer(ContainerId),
}

/// Result type for peer operations
pub type PeerResult<T> = Result<T, PeerError>;
