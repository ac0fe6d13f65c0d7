//! Replication deltas
//!
//! A [`ContainerDelta`] lists the slots of one container that changed value
//! between `version - 1` and `version`. Applying a container's deltas in
//! version order to its version-zero state reproduces its exact contents.

use crate::item::ItemStack;
use crate::transaction::TransactionId;
use invsys_core::{ContainerId, Version};
use serde::{Deserialize, Serialize};

/// New contents of one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotChange {
    /// Slot index
    pub index: u32,
    /// New contents, `None` when emptied
    pub stack: Option<ItemStack>,
}

/// Changes committed to one container at one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDelta {
    /// Container the changes belong to
    pub container: ContainerId,
    /// Version reached after applying the changes
    pub version: Version,
    /// Changed slots in index order
    pub changes: Vec<SlotChange>,
}

impl ContainerDelta {
    /// Compute the delta between two slot sequences
    ///
    /// Missing trailing slots on either side count as empty.
    pub fn diff(
        container: ContainerId,
        version: Version,
        before: &[Option<ItemStack>],
        after: &[Option<ItemStack>],
    ) -> Self {
        let len = before.len().max(after.len());
        let changes = (0..len)
            .filter_map(|i| {
                let old = before.get(i).and_then(Option::as_ref);
                let new = after.get(i).and_then(Option::as_ref);
                (old != new).then(|| SlotChange {
                    index: i as u32,
                    stack: new.cloned(),
                })
            })
            .collect();
        Self {
            container,
            version,
            changes,
        }
    }

    /// Check if no slot changed
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Look up the change of one slot
    pub fn change_at(&self, index: u32) -> Option<&SlotChange> {
        self.changes.iter().find(|c| c.index == index)
    }
}

/// Everything one committed transaction changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDelta {
    /// Transaction that produced the changes
    pub transaction: TransactionId,
    /// One delta per touched container, ordered by container id
    pub deltas: Vec<ContainerDelta>,
}

impl AppliedDelta {
    /// Delta of one container
    pub fn for_container(&self, container: ContainerId) -> Option<&ContainerDelta> {
        self.deltas.iter().find(|d| d.container == container)
    }

    /// Containers touched by the transaction
    pub fn containers(&self) -> impl Iterator<Item = ContainerId> + '_ {
        self.deltas.iter().map(|d| d.container)
    }

    /// Total number of changed slots
    pub fn changed_slots(&self) -> usize {
        self.deltas.iter().map(|d| d.changes.len()).sum()
    }
}
