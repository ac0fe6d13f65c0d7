//! # invsys_inventory - Items, Containers and Transactions
//!
//! The mutable core of the inventory system.
//!
//! # Features
//!
//! - Read-only item catalog, optionally installed process-wide
//! - Fixed or unbounded containers of slots holding item stacks
//! - Consistent container snapshots and per-version replication deltas
//! - All-or-nothing transactions (move, merge, split, transfer, swap,
//!   insert, remove) with stack spill-over
//! - Ordered per-container locking for transactions spanning containers
//! - Optimistic concurrency through container versions
//!
//! # Example
//!
//! ```ignore
//! use invsys_inventory::prelude::*;
//!
//! let table = ItemTable::builder()
//!     .item(ItemDefinition::new("potion", "Potion").with_max_stack(10))
//!     .build()?;
//! let engine = TransactionEngine::new(Arc::new(table));
//!
//! let store = ContainerStore::new();
//! let bag = ContainerId::new();
//! store.insert(InventoryContainer::new(bag, owner, Capacity::Fixed(8)));
//!
//! let tx = Transaction::builder(bag)
//!     .insert(bag, ItemStack::new("potion", 12))
//!     .build();
//! let applied = engine.apply(&store, &tx, &AllowAll)?;
//! ```

pub mod catalog;
pub mod container;
pub mod delta;
pub mod engine;
pub mod error;
pub mod item;
pub mod store;
pub mod transaction;

pub mod prelude {
    pub use crate::catalog::{ItemTable, ItemTableBuilder};
    pub use crate::container::{Capacity, ContainerSnapshot, InventoryContainer, Slot};
    pub use crate::delta::{AppliedDelta, ContainerDelta, SlotChange};
    pub use crate::engine::{AllowAll, AuthorityGate, PreparedTransaction, TransactionEngine};
    pub use crate::error::{
        CatalogError, DeltaError, SnapshotError, TransactionError, TransactionResult,
    };
    pub use crate::item::{ItemCategory, ItemDefinition, ItemStack, ItemTypeId};
    pub use crate::store::{ContainerStore, SharedContainer};
    pub use crate::transaction::{
        Operation, OperationKind, SlotRef, Transaction, TransactionBuilder, TransactionId,
        TransactionScope,
    };
}

pub use prelude::*;
