//! Network layer errors

use invsys_core::{ContainerId, PeerId};
use invsys_inventory::DeltaError;
use thiserror::Error;

/// Packet encoding errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to encode packet: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode packet: {0}")]
    Decode(#[source] bincode::Error),

    #[error("protocol mismatch: expected {expected}, got {found}")]
    ProtocolMismatch { expected: u16, found: u16 },
}

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no route to {0}")]
    UnknownPeer(PeerId),

    #[error("{0} disconnected")]
    Disconnected(PeerId),

    #[error("transport closed")]
    Closed,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Replica synchronization errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no snapshot for container {container} after {attempts} requests")]
    ResyncTimeout { container: ContainerId, attempts: u32 },

    #[error("container {0} is not replicated here")]
    UnknownContainer(ContainerId),

    #[error("delta rejected: {0}")]
    Delta(#[from] DeltaError),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type for synchronization
pub type SyncResult<T> = Result<T, SyncError>;
