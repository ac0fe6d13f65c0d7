//! Container store
//!
//! Each container sits behind its own mutex so transactions on unrelated
//! containers never contend. Transactions spanning several containers lock
//! them in ascending [`ContainerId`] order.

use crate::container::{ContainerSnapshot, InventoryContainer};
use crate::error::{TransactionError, TransactionResult};
use invsys_core::ContainerId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handle to one container
pub type SharedContainer = Arc<Mutex<InventoryContainer>>;

/// All containers known to one side
#[derive(Default)]
pub struct ContainerStore {
    containers: RwLock<HashMap<ContainerId, SharedContainer>>,
}

impl ContainerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a container, replacing any previous one with the same id
    pub fn insert(&self, container: InventoryContainer) -> Option<SharedContainer> {
        let id = container.id();
        self.containers
            .write()
            .insert(id, Arc::new(Mutex::new(container)))
    }

    /// Remove a container
    pub fn remove(&self, id: ContainerId) -> Option<InventoryContainer> {
        let shared = self.containers.write().remove(&id)?;
        let container = shared.lock().clone();
        Some(container)
    }

    /// Check if a container exists
    pub fn contains(&self, id: ContainerId) -> bool {
        self.containers.read().contains_key(&id)
    }

    /// Get the shared handle of a container
    pub fn get(&self, id: ContainerId) -> Option<SharedContainer> {
        self.containers.read().get(&id).cloned()
    }

    /// Read a container under its lock
    pub fn read<R>(&self, id: ContainerId, f: impl FnOnce(&InventoryContainer) -> R) -> Option<R> {
        let shared = self.get(id)?;
        let guard = shared.lock();
        Some(f(&guard))
    }

    /// Mutate a container under its lock
    pub fn update<R>(
        &self,
        id: ContainerId,
        f: impl FnOnce(&mut InventoryContainer) -> R,
    ) -> Option<R> {
        let shared = self.get(id)?;
        let mut guard = shared.lock();
        Some(f(&mut guard))
    }

    /// Consistent snapshot of a container
    pub fn snapshot(&self, id: ContainerId) -> Option<ContainerSnapshot> {
        self.read(id, InventoryContainer::snapshot)
    }

    /// Owned copy of a container
    pub fn clone_container(&self, id: ContainerId) -> Option<InventoryContainer> {
        self.read(id, Clone::clone)
    }

    /// All container ids, sorted
    pub fn ids(&self) -> Vec<ContainerId> {
        let mut ids: Vec<_> = self.containers.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of containers
    pub fn len(&self) -> usize {
        self.containers.read().len()
    }

    /// Check if the store holds no containers
    pub fn is_empty(&self) -> bool {
        self.containers.read().is_empty()
    }

    /// Resolve the handles of `ids` in lock order
    ///
    /// `ids` must already be sorted and free of duplicates.
    pub(crate) fn handles(&self, ids: &[ContainerId]) -> TransactionResult<Vec<SharedContainer>> {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        let map = self.containers.read();
        ids.iter()
            .map(|id| map.get(id).cloned().ok_or(TransactionError::UnknownContainer(*id)))
            .collect()
    }
}
