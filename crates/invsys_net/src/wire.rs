//! Wire protocol
//!
//! Every datagram is one bincode-encoded [`Packet`]: protocol version, sender,
//! and a single [`NetMessage`].

use crate::error::WireError;
use invsys_core::{ContainerId, PeerId, RequestId, Version};
use invsys_inventory::{AppliedDelta, ContainerDelta, ContainerSnapshot, Transaction, TransactionError};
use serde::{Deserialize, Serialize};

/// Protocol version spoken by this build
pub const PROTOCOL_VERSION: u16 = 1;

/// Messages exchanged between simulation sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetMessage {
    /// Start observing a container; answered with a snapshot
    Subscribe { container: ContainerId },

    /// Stop observing a container
    Unsubscribe { container: ContainerId },

    /// Committed changes of one container
    Delta(ContainerDelta),

    /// Full state of one container
    Snapshot(ContainerSnapshot),

    /// Ask the authority for a fresh snapshot
    ResyncRequest {
        container: ContainerId,
        have: Option<Version>,
    },

    /// Ask the authority to run a transaction
    TransactionRequest {
        request: RequestId,
        transaction: Transaction,
    },

    /// Authority's verdict on a requested transaction
    TransactionResult {
        request: RequestId,
        outcome: Result<AppliedDelta, TransactionError>,
    },

    /// Ask the current authority to hand a container over
    AuthorityRequest { container: ContainerId },

    /// Authority stopped committing and hands over its latest state
    AuthorityGrant {
        container: ContainerId,
        snapshot: ContainerSnapshot,
        observers: Vec<PeerId>,
    },

    /// New authority installed the granted snapshot
    AuthorityAck {
        container: ContainerId,
        version: Version,
    },

    /// `authority` is now authoritative for `container`
    AuthorityChanged {
        container: ContainerId,
        authority: PeerId,
        version: Version,
    },

    /// The container no longer exists
    ContainerDissolved { container: ContainerId },
}

impl NetMessage {
    /// Container the message is about, if any
    pub fn container(&self) -> Option<ContainerId> {
        match self {
            Self::Subscribe { container }
            | Self::Unsubscribe { container }
            | Self::ResyncRequest { container, .. }
            | Self::AuthorityRequest { container }
            | Self::AuthorityGrant { container, .. }
            | Self::AuthorityAck { container, .. }
            | Self::AuthorityChanged { container, .. }
            | Self::ContainerDissolved { container } => Some(*container),
            Self::Delta(delta) => Some(delta.container),
            Self::Snapshot(snapshot) => Some(snapshot.container),
            Self::TransactionRequest { transaction, .. } => Some(transaction.origin),
            Self::TransactionResult { .. } => None,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "Subscribe",
            Self::Unsubscribe { .. } => "Unsubscribe",
            Self::Delta(_) => "Delta",
            Self::Snapshot(_) => "Snapshot",
            Self::ResyncRequest { .. } => "ResyncRequest",
            Self::TransactionRequest { .. } => "TransactionRequest",
            Self::TransactionResult { .. } => "TransactionResult",
            Self::AuthorityRequest { .. } => "AuthorityRequest",
            Self::AuthorityGrant { .. } => "AuthorityGrant",
            Self::AuthorityAck { .. } => "AuthorityAck",
            Self::AuthorityChanged { .. } => "AuthorityChanged",
            Self::ContainerDissolved { .. } => "ContainerDissolved",
        }
    }
}

/// One datagram on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Protocol version of the sender
    pub protocol: u16,
    /// Sending side
    pub from: PeerId,
    /// Payload
    pub message: NetMessage,
}

impl Packet {
    /// Wrap a message sent by `from`
    pub fn new(from: PeerId, message: NetMessage) -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            from,
            message,
        }
    }

    /// Encode to bytes
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(WireError::Encode)
    }

    /// Decode from bytes, rejecting other protocol versions
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let packet: Packet = bincode::deserialize(bytes).map_err(WireError::Decode)?;
        if packet.protocol != PROTOCOL_VERSION {
            return Err(WireError::ProtocolMismatch {
                expected: PROTOCOL_VERSION,
                found: packet.protocol,
            });
        }
        Ok(packet)
    }
}
