//! Transactions - ordered batches of slot operations
//!
//! A transaction either lands completely or not at all. It exists only while
//! it is validated and applied; nothing about it is persisted.

use crate::item::ItemStack;
use invsys_core::{ContainerId, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Create a new unique transaction ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Address of one slot: (container, index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    /// Container holding the slot
    pub container: ContainerId,
    /// Slot index
    pub index: u32,
}

impl SlotRef {
    /// Create a slot reference
    pub const fn new(container: ContainerId, index: u32) -> Self {
        Self { container, index }
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.container, self.index)
    }
}

/// One step of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Relocate the whole source stack
    Move { from: SlotRef, to: SlotRef },
    /// Relocate the whole source stack onto a stack of the same type
    Merge { from: SlotRef, to: SlotRef },
    /// Move part of a stack, leaving the rest behind
    Split {
        from: SlotRef,
        to: SlotRef,
        quantity: u32,
    },
    /// Relocate `quantity` items (all when `None`), typically across containers
    Transfer {
        from: SlotRef,
        to: SlotRef,
        quantity: Option<u32>,
    },
    /// Exchange the contents of two slots
    Swap { a: SlotRef, b: SlotRef },
    /// Bring new items into a container
    Insert {
        container: ContainerId,
        stack: ItemStack,
    },
    /// Destroy items
    Remove { from: SlotRef, quantity: u32 },
}

/// Operation classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Move,
    Merge,
    Split,
    Transfer,
    Swap,
    Insert,
    Remove,
}

impl Operation {
    /// Classify this operation
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Move { .. } => OperationKind::Move,
            Self::Merge { .. } => OperationKind::Merge,
            Self::Split { .. } => OperationKind::Split,
            Self::Transfer { .. } => OperationKind::Transfer,
            Self::Swap { .. } => OperationKind::Swap,
            Self::Insert { .. } => OperationKind::Insert,
            Self::Remove { .. } => OperationKind::Remove,
        }
    }

    /// Slots this operation addresses by index
    pub fn slots(&self) -> Vec<SlotRef> {
        match self {
            Self::Move { from, to } | Self::Merge { from, to } => vec![*from, *to],
            Self::Split { from, to, .. } | Self::Transfer { from, to, .. } => vec![*from, *to],
            Self::Swap { a, b } => vec![*a, *b],
            Self::Insert { .. } => Vec::new(),
            Self::Remove { from, .. } => vec![*from],
        }
    }

    /// Containers this operation touches
    pub fn containers(&self) -> Vec<ContainerId> {
        match self {
            Self::Insert { container, .. } => vec![*container],
            other => other.slots().into_iter().map(|s| s.container).collect(),
        }
    }
}

/// How many containers a transaction spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionScope {
    /// Everything happens inside one container
    Individual,
    /// Items cross between two or more containers
    CrossContainer,
}

/// An ordered batch of operations applied all-or-nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier
    pub id: TransactionId,
    /// Container the request originated from
    pub origin: ContainerId,
    /// Operations, applied in order
    pub operations: Vec<Operation>,
    /// Versions the requester's view was built on
    #[serde(default)]
    pub expected_versions: BTreeMap<ContainerId, Version>,
}

impl Transaction {
    /// Create an empty transaction originating from `origin`
    pub fn new(origin: ContainerId) -> Self {
        Self {
            id: TransactionId::new(),
            origin,
            operations: Vec::new(),
            expected_versions: BTreeMap::new(),
        }
    }

    /// Start building a transaction
    pub fn builder(origin: ContainerId) -> TransactionBuilder {
        TransactionBuilder::new(origin)
    }

    /// Containers the operations or expected versions reference, in lock order
    ///
    /// `origin` only names the requester; an origin nothing refers to is not
    /// locked and its version stays put.
    pub fn containers(&self) -> Vec<ContainerId> {
        let mut set: BTreeSet<ContainerId> = BTreeSet::new();
        set.extend(self.operations.iter().flat_map(Operation::containers));
        set.extend(self.expected_versions.keys().copied());
        set.into_iter().collect()
    }

    /// Classify the transaction by the containers its operations touch
    pub fn scope(&self) -> TransactionScope {
        let touched: BTreeSet<ContainerId> = self
            .operations
            .iter()
            .flat_map(Operation::containers)
            .collect();
        if touched.len() > 1 {
            TransactionScope::CrossContainer
        } else {
            TransactionScope::Individual
        }
    }

    /// Check if the transaction holds no operations
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Fluent construction of a [`Transaction`]
#[derive(Debug)]
pub struct TransactionBuilder {
    transaction: Transaction,
}

impl TransactionBuilder {
    /// Start an empty transaction
    pub fn new(origin: ContainerId) -> Self {
        Self {
            transaction: Transaction::new(origin),
        }
    }

    /// Add an arbitrary operation
    pub fn op(mut self, operation: Operation) -> Self {
        self.transaction.operations.push(operation);
        self
    }

    /// Move a whole stack
    pub fn move_stack(self, from: SlotRef, to: SlotRef) -> Self {
        self.op(Operation::Move { from, to })
    }

    /// Merge a whole stack onto another
    pub fn merge(self, from: SlotRef, to: SlotRef) -> Self {
        self.op(Operation::Merge { from, to })
    }

    /// Split part of a stack off
    pub fn split(self, from: SlotRef, to: SlotRef, quantity: u32) -> Self {
        self.op(Operation::Split { from, to, quantity })
    }

    /// Transfer items, all of them when `quantity` is `None`
    pub fn transfer(self, from: SlotRef, to: SlotRef, quantity: Option<u32>) -> Self {
        self.op(Operation::Transfer { from, to, quantity })
    }

    /// Swap two slots
    pub fn swap(self, a: SlotRef, b: SlotRef) -> Self {
        self.op(Operation::Swap { a, b })
    }

    /// Insert new items
    pub fn insert(self, container: ContainerId, stack: ItemStack) -> Self {
        self.op(Operation::Insert { container, stack })
    }

    /// Destroy items
    pub fn remove(self, from: SlotRef, quantity: u32) -> Self {
        self.op(Operation::Remove { from, quantity })
    }

    /// Require a container to still be at `version` at commit time
    pub fn expect_version(mut self, container: ContainerId, version: Version) -> Self {
        self.transaction.expected_versions.insert(container, version);
        self
    }

    /// Finish building
    pub fn build(self) -> Transaction {
        self.transaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_ids_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn test_scope() {
        let bag = ContainerId::from_u128(1);
        let chest = ContainerId::from_u128(2);

        let local = Transaction::builder(bag)
            .move_stack(SlotRef::new(bag, 0), SlotRef::new(bag, 1))
            .build();
        assert_eq!(local.scope(), TransactionScope::Individual);
        assert_eq!(local.containers(), vec![bag]);

        let cross = Transaction::builder(bag)
            .transfer(SlotRef::new(chest, 0), SlotRef::new(bag, 0), None)
            .build();
        assert_eq!(cross.scope(), TransactionScope::CrossContainer);
        assert_eq!(cross.containers(), vec![bag, chest]);
    }

    #[test]
    fn test_untouched_origin_is_not_locked() {
        let bag = ContainerId::from_u128(1);
        let chest = ContainerId::from_u128(2);
        let tx = Transaction::builder(bag)
            .swap(SlotRef::new(chest, 0), SlotRef::new(chest, 1))
            .build();
        assert_eq!(tx.containers(), vec![chest]);

        let pinned = Transaction::builder(bag)
            .swap(SlotRef::new(chest, 0), SlotRef::new(chest, 1))
            .expect_version(bag, Version::new(2))
            .build();
        assert_eq!(pinned.containers(), vec![bag, chest]);
    }

    #[test]
    fn test_builder_expected_versions() {
        let bag = ContainerId::from_u128(1);
        let tx = Transaction::builder(bag)
            .insert(bag, ItemStack::new("coin", 5))
            .expect_version(bag, Version::new(4))
            .build();
        assert_eq!(tx.expected_versions.get(&bag), Some(&Version::new(4)));
        assert_eq!(tx.operations[0].kind(), OperationKind::Insert);
    }
}
