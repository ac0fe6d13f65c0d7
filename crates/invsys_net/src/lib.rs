//! # invsys_net - Replication and Authority
//!
//! Keeps inventory containers consistent between simulation sides that talk
//! over an unreliable, possibly reordering and duplicating link.
//!
//! # Features
//!
//! - Versioned delta replication with gap buffering and snapshot resync
//! - Bounded resync retries with a stale state instead of endless waiting
//! - Explicit authority handover handshake (one committing side at a time)
//! - Speculative transactions on observed containers with reconciliation
//! - Loopback and fault-injecting transports for in-process simulation
//!
//! # Example
//!
//! ```ignore
//! use invsys_net::prelude::*;
//!
//! let hub = LoopbackHub::new();
//! let mut channel = MessageChannel::new(hub.connect(PeerId(1)));
//! let mut replicas = ReplicaSynchronizer::new(PeerId(1), SyncConfig::default());
//!
//! replicas.subscribe(chest, PeerId::HOST, Instant::now());
//! for (to, message) in replicas.take_outgoing() {
//!     channel.send(to, message)?;
//! }
//! ```

pub mod authority;
pub mod config;
pub mod error;
pub mod speculative;
pub mod sync;
pub mod transport;
pub mod wire;

pub mod prelude {
    pub use crate::authority::{AuthorityResolver, AuthorityState, Handover, ResolverEvent};
    pub use crate::config::SyncConfig;
    pub use crate::error::{SyncError, SyncResult, TransportError, TransportResult, WireError};
    pub use crate::speculative::{
        ReplicaSource, RevertReason, SlotView, SpeculationOutcome, SpeculativeOverlay,
    };
    pub use crate::sync::{ReplicaStatus, ReplicaSynchronizer, ReplicationPublisher, SyncEvent, SyncStats};
    pub use crate::transport::{
        FaultConfig, FaultyTransport, LoopbackHub, LoopbackTransport, MessageChannel, Transport,
        TransportStats,
    };
    pub use crate::wire::{NetMessage, Packet, PROTOCOL_VERSION};
}

pub use prelude::*;
