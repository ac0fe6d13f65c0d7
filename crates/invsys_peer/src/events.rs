//! Notifications for gameplay, UI and save systems

use crossbeam_channel::{unbounded, Receiver, Sender};
use invsys_core::{ContainerId, OwnerKind, PeerId, RequestId, Version};
use invsys_inventory::{AppliedDelta, TransactionError};
use invsys_net::RevertReason;

/// Something collaborators of a peer may want to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A container was created here (spawn, drop, import)
    ContainerSpawned {
        container: ContainerId,
        kind: OwnerKind,
    },
    /// A container was dissolved, here or by its authority
    ContainerDissolved { container: ContainerId },
    /// A transaction was committed on this side
    TransactionCommitted(AppliedDelta),
    /// A transaction was refused, locally or by the authority
    TransactionRejected {
        request: Option<RequestId>,
        error: TransactionError,
    },
    /// The authority applied a speculated transaction as predicted
    SpeculationConfirmed { request: RequestId },
    /// A speculated transaction was rolled back
    SpeculationReverted {
        request: RequestId,
        reason: RevertReason,
    },
    /// Authoritative changes landed on a replica
    ReplicaUpdated {
        container: ContainerId,
        version: Version,
    },
    /// A replica fell behind and asked for a snapshot
    ResyncRequested { container: ContainerId },
    /// A replica gave up waiting; it shows last known state
    ResyncTimeout { container: ContainerId },
    /// A stale replica caught up again
    ResyncRecovered {
        container: ContainerId,
        version: Version,
    },
    /// This side may now commit to the container
    AuthorityGained { container: ContainerId },
    /// This side handed the container to `to`
    AuthorityLost { container: ContainerId, to: PeerId },
    /// The container moved between two other sides
    AuthorityChanged {
        container: ContainerId,
        authority: PeerId,
    },
    /// A requested handover did not happen
    AuthorityRefused {
        container: ContainerId,
        authority: PeerId,
    },
}

/// Event channel owned by the peer
///
/// Handed out receivers share one queue: each event is delivered once.
pub(crate) struct EventQueue {
    sender: Sender<PeerEvent>,
    receiver: Receiver<PeerEvent>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub(crate) fn emit(&self, event: PeerEvent) {
        log::trace!("event: {:?}", event);
        // The queue owns a receiver, so the channel never disconnects
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> Receiver<PeerEvent> {
        self.receiver.clone()
    }

    pub(crate) fn drain(&self) -> Vec<PeerEvent> {
        self.receiver.try_iter().collect()
    }
}
