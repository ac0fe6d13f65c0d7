//! Error types for catalogs, deltas and transactions

use crate::item::ItemTypeId;
use crate::transaction::SlotRef;
use invsys_core::{ContainerId, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a transaction was rejected
///
/// Every variant leaves the touched containers exactly as they were, so the
/// caller may adjust the transaction and resubmit.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransactionError {
    #[error("transaction has no operations")]
    EmptyTransaction,

    #[error("unknown container {0}")]
    UnknownContainer(ContainerId),

    #[error("slot {index} is out of range for container {container}")]
    InvalidSlotIndex { container: ContainerId, index: u32 },

    #[error("unknown item type '{0}'")]
    UnknownItemType(ItemTypeId),

    #[error("cannot put {incoming} into {slot} holding {present}")]
    TypeMismatch {
        slot: SlotRef,
        present: ItemTypeId,
        incoming: ItemTypeId,
    },

    #[error("container {0} has no room left")]
    CapacityExceeded(ContainerId),

    #[error("invalid quantity {requested} (stack holds {available})")]
    InvalidQuantity { requested: u32, available: u32 },

    #[error("slot {0} is empty")]
    EmptySlot(SlotRef),

    #[error("container {container} is at {actual}, transaction expected {expected}")]
    StaleState {
        container: ContainerId,
        expected: Version,
        actual: Version,
    },

    #[error("this side is not authoritative for container {0}")]
    AuthorityDenied(ContainerId),
}

impl TransactionError {
    /// Whether resubmitting the same transaction later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleState { .. })
    }
}

/// Result type for transaction operations
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors building or installing the item catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("item '{0}' is defined twice")]
    DuplicateItem(ItemTypeId),

    #[error("item '{0}' has a max stack of zero")]
    InvalidMaxStack(ItemTypeId),

    #[error("item '{0}' has an invalid weight")]
    InvalidWeight(ItemTypeId),

    #[error("item catalog already installed")]
    AlreadyInstalled,

    #[error("item catalog not installed")]
    NotInstalled,

    #[error("failed to parse item catalog: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors applying a replicated delta or snapshot to a local copy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    #[error("delta for {delta} applied to container {container}")]
    WrongContainer {
        container: ContainerId,
        delta: ContainerId,
    },

    #[error("container {container} is at {local}, delta is {delta}")]
    VersionGap {
        container: ContainerId,
        local: Version,
        delta: Version,
    },

    #[error("slot {index} is out of range for container {container}")]
    SlotOutOfRange { container: ContainerId, index: u32 },

    #[error("container {container} claims {capacity} slots, limit is {limit}")]
    CapacityOutOfRange {
        container: ContainerId,
        capacity: u32,
        limit: u32,
    },
}

/// Why a snapshot cannot be installed as an owned container
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Bounds(#[from] DeltaError),

    #[error("slot {index} holds unknown item type '{item}'")]
    UnknownItemType { index: u32, item: ItemTypeId },

    #[error("slot {index} holds {quantity} of '{item}', stack limit is {max_stack}")]
    OverfullStack {
        index: u32,
        item: ItemTypeId,
        quantity: u32,
        max_stack: u32,
    },

    #[error("slot {index} holds an empty stack")]
    EmptyStack { index: u32 },
}
