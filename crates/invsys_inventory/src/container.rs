//! Inventory containers
//!
//! A container is an ordered run of slots belonging to one owner. Outside this
//! crate it can only be read: every mutation goes through the transaction
//! engine, or through [`InventoryContainer::apply_delta`] and
//! [`InventoryContainer::restore`] when a replica follows its authority.

use crate::catalog::ItemTable;
use crate::delta::ContainerDelta;
use crate::engine::DEFAULT_UNBOUNDED_SLOT_LIMIT;
use crate::error::DeltaError;
use crate::item::ItemStack;
use invsys_core::{ContainerId, OwnerRef, Version};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Number of slots a container offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capacity {
    /// Exactly this many slots, all present from creation
    Fixed(u32),
    /// Slots materialize as they are filled
    Unbounded,
}

impl Capacity {
    /// Highest slot count, with `unbounded_limit` standing in for unbounded
    pub fn slot_limit(&self, unbounded_limit: u32) -> u32 {
        match self {
            Self::Fixed(n) => *n,
            Self::Unbounded => unbounded_limit,
        }
    }
}

/// One storage cell, read out of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot<'a> {
    /// Stable index within the container
    pub index: u32,
    /// Contents, `None` when empty
    pub stack: Option<&'a ItemStack>,
}

impl Slot<'_> {
    /// Check if the slot holds nothing
    pub fn is_empty(&self) -> bool {
        self.stack.is_none()
    }
}

/// Complete state of a container at one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    /// Container this describes
    pub container: ContainerId,
    /// Slot capacity
    pub capacity: Capacity,
    /// Version the state was read at
    pub version: Version,
    /// Slot contents in index order
    pub slots: Vec<Option<ItemStack>>,
}

impl ContainerSnapshot {
    /// Check that every filled slot fits the capacity
    ///
    /// `unbounded_limit` caps unbounded containers and the size of fixed ones,
    /// so a snapshot off the wire cannot make a replica allocate without bound.
    pub fn check_bounds(&self, unbounded_limit: u32) -> Result<(), DeltaError> {
        if let Capacity::Fixed(n) = self.capacity {
            if n > unbounded_limit {
                return Err(DeltaError::CapacityOutOfRange {
                    container: self.container,
                    capacity: n,
                    limit: unbounded_limit,
                });
            }
        }
        let limit = self.capacity.slot_limit(unbounded_limit) as usize;
        match self.slots.iter().enumerate().skip(limit).find(|(_, s)| s.is_some()) {
            Some((index, _)) => Err(DeltaError::SlotOutOfRange {
                container: self.container,
                index: index as u32,
            }),
            None => Ok(()),
        }
    }

    /// Total quantity of every stack
    pub fn total_quantity(&self) -> u64 {
        self.slots
            .iter()
            .flatten()
            .map(|stack| u64::from(stack.quantity))
            .sum()
    }
}

/// The mutable inventory state of one owner
#[derive(Debug, Clone)]
pub struct InventoryContainer {
    id: ContainerId,
    owner: OwnerRef,
    capacity: Capacity,
    slots: Vec<Option<ItemStack>>,
    version: Version,
    unbounded_limit: u32,
}

impl InventoryContainer {
    /// Create an empty container at version zero
    pub fn new(id: ContainerId, owner: OwnerRef, capacity: Capacity) -> Self {
        let slots = match capacity {
            Capacity::Fixed(n) => vec![None; n as usize],
            Capacity::Unbounded => Vec::new(),
        };
        Self {
            id,
            owner,
            capacity,
            slots,
            version: Version::ZERO,
            unbounded_limit: DEFAULT_UNBOUNDED_SLOT_LIMIT,
        }
    }

    /// Rebuild a container from a snapshot
    ///
    /// The snapshot must fit [`ContainerSnapshot::check_bounds`]; the rebuilt
    /// container keeps `unbounded_limit` for later deltas.
    pub fn from_snapshot(
        snapshot: ContainerSnapshot,
        owner: OwnerRef,
        unbounded_limit: u32,
    ) -> Result<Self, DeltaError> {
        snapshot.check_bounds(unbounded_limit)?;
        let mut container = Self::new(snapshot.container, owner, snapshot.capacity)
            .with_unbounded_limit(unbounded_limit);
        container.load_slots(snapshot.slots);
        container.version = snapshot.version;
        Ok(container)
    }

    /// Cap the slots an unbounded container may grow to through deltas
    pub fn with_unbounded_limit(mut self, limit: u32) -> Self {
        self.unbounded_limit = limit;
        self
    }

    /// Highest slot count this container accepts
    pub fn slot_limit(&self) -> u32 {
        self.capacity.slot_limit(self.unbounded_limit)
    }

    /// Container id
    pub fn id(&self) -> ContainerId {
        self.id
    }

    /// Weak reference to the owning actor
    pub fn owner(&self) -> OwnerRef {
        self.owner
    }

    /// Re-point the container at a different owner
    pub fn set_owner(&mut self, owner: OwnerRef) {
        self.owner = owner;
    }

    /// Slot capacity
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Version of the last committed mutation
    pub fn version(&self) -> Version {
        self.version
    }

    /// Number of materialized slots
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Read one slot
    ///
    /// Unbounded containers report every index past the last filled slot as
    /// empty rather than missing.
    pub fn try_get_slot(&self, index: u32) -> Option<Slot<'_>> {
        match (self.slots.get(index as usize), self.capacity) {
            (Some(stack), _) => Some(Slot {
                index,
                stack: stack.as_ref(),
            }),
            (None, Capacity::Unbounded) => Some(Slot { index, stack: None }),
            (None, Capacity::Fixed(_)) => None,
        }
    }

    /// Contents of one slot, `None` when empty or out of range
    pub fn stack(&self, index: u32) -> Option<&ItemStack> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    /// All materialized slots in index order
    pub fn slots(&self) -> &[Option<ItemStack>] {
        &self.slots
    }

    /// Iterate over occupied slots
    pub fn items(&self) -> impl Iterator<Item = (u32, &ItemStack)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|stack| (i as u32, stack)))
    }

    /// Check if no slot holds anything
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Total quantity of one item type
    pub fn count_item(&self, item: &str) -> u64 {
        self.items()
            .filter(|(_, stack)| stack.item.as_str() == item)
            .map(|(_, stack)| u64::from(stack.quantity))
            .sum()
    }

    /// Total quantity of every stack
    pub fn total_quantity(&self) -> u64 {
        self.items().map(|(_, stack)| u64::from(stack.quantity)).sum()
    }

    /// Carried weight according to `table`. Unknown item types weigh nothing.
    pub fn weight(&self, table: &ItemTable) -> f32 {
        self.items()
            .map(|(_, stack)| {
                table
                    .get(stack.item.as_str())
                    .map_or(0.0, |def| def.weight * stack.quantity as f32)
            })
            .sum()
    }

    /// Consistent copy of the full state
    pub fn snapshot(&self) -> ContainerSnapshot {
        ContainerSnapshot {
            container: self.id,
            capacity: self.capacity,
            version: self.version,
            slots: self.slots.clone(),
        }
    }

    /// Apply an authoritative delta to this copy
    ///
    /// The copy must sit exactly one version behind the delta.
    pub fn apply_delta(&mut self, delta: &ContainerDelta) -> Result<(), DeltaError> {
        if delta.container != self.id {
            return Err(DeltaError::WrongContainer {
                container: self.id,
                delta: delta.container,
            });
        }
        if !self.version.is_followed_by(delta.version) {
            return Err(DeltaError::VersionGap {
                container: self.id,
                local: self.version,
                delta: delta.version,
            });
        }
        let limit = self.slot_limit();
        if let Some(change) = delta.changes.iter().find(|c| c.index >= limit) {
            return Err(DeltaError::SlotOutOfRange {
                container: self.id,
                index: change.index,
            });
        }

        for change in &delta.changes {
            let index = change.index as usize;
            if index >= self.slots.len() {
                self.slots.resize(index + 1, None);
            }
            self.slots[index] = change.stack.clone();
        }
        self.trim();
        self.version = delta.version;
        Ok(())
    }

    /// Replace the whole state with a snapshot of the same container
    pub fn restore(&mut self, snapshot: ContainerSnapshot) -> Result<(), DeltaError> {
        if snapshot.container != self.id {
            return Err(DeltaError::WrongContainer {
                container: self.id,
                delta: snapshot.container,
            });
        }
        snapshot.check_bounds(self.unbounded_limit)?;
        self.capacity = snapshot.capacity;
        self.load_slots(snapshot.slots);
        self.version = snapshot.version;
        Ok(())
    }

    /// Human readable listing of the contents
    pub fn describe(&self) -> String {
        let mut out = format!(
            "container {} ({:?}, {}, {} slots)",
            self.id,
            self.capacity,
            self.version,
            self.slots.len()
        );
        for (index, stack) in self.items() {
            let _ = write!(out, "\n  [{}] {}", index, stack);
        }
        if self.is_empty() {
            out.push_str("\n  (empty)");
        }
        out
    }

    /// Land a committed result: new slot contents and the next version
    pub(crate) fn commit_slots(&mut self, slots: Vec<Option<ItemStack>>, version: Version) {
        self.load_slots(slots);
        self.version = version;
    }

    fn load_slots(&mut self, slots: Vec<Option<ItemStack>>) {
        self.slots = slots.into_iter().map(|s| s.and_then(ItemStack::normalized)).collect();
        if let Capacity::Fixed(n) = self.capacity {
            self.slots.resize(n as usize, None);
        }
        self.trim();
    }

    // Unbounded containers keep no trailing empty slots, so equal contents
    // always compare equal.
    fn trim(&mut self) {
        if self.capacity == Capacity::Unbounded {
            while matches!(self.slots.last(), Some(None)) {
                self.slots.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::SlotChange;
    use invsys_core::Handle;

    fn fixed(n: u32) -> InventoryContainer {
        InventoryContainer::new(ContainerId::from_u128(1), Handle::null(), Capacity::Fixed(n))
    }

    #[test]
    fn test_new_container() {
        let c = fixed(4);
        assert_eq!(c.slot_count(), 4);
        assert_eq!(c.version(), Version::ZERO);
        assert!(c.is_empty());
        assert!(c.try_get_slot(3).unwrap().is_empty());
        assert!(c.try_get_slot(4).is_none());
    }

    #[test]
    fn test_unbounded_slots() {
        let c = InventoryContainer::new(ContainerId::new(), Handle::null(), Capacity::Unbounded);
        assert_eq!(c.slot_count(), 0);
        assert!(c.try_get_slot(1000).unwrap().is_empty());
    }

    #[test]
    fn test_apply_delta_in_order() {
        let mut c = fixed(2);
        let delta = ContainerDelta {
            container: c.id(),
            version: Version::new(1),
            changes: vec![SlotChange {
                index: 1,
                stack: Some(ItemStack::new("sword", 1)),
            }],
        };
        c.apply_delta(&delta).unwrap();
        assert_eq!(c.version(), Version::new(1));
        assert_eq!(c.stack(1), Some(&ItemStack::new("sword", 1)));

        // Same delta again is a gap error, not a double apply
        assert!(matches!(c.apply_delta(&delta), Err(DeltaError::VersionGap { .. })));
    }

    #[test]
    fn test_apply_delta_rejects_out_of_range() {
        let mut c = fixed(2);
        let delta = ContainerDelta {
            container: c.id(),
            version: Version::new(1),
            changes: vec![SlotChange {
                index: 5,
                stack: None,
            }],
        };
        assert!(matches!(c.apply_delta(&delta), Err(DeltaError::SlotOutOfRange { .. })));
        assert_eq!(c.version(), Version::ZERO);
    }

    #[test]
    fn test_unbounded_delta_respects_limit() {
        let mut c = InventoryContainer::new(ContainerId::new(), Handle::null(), Capacity::Unbounded)
            .with_unbounded_limit(8);
        let delta = ContainerDelta {
            container: c.id(),
            version: Version::new(1),
            changes: vec![SlotChange {
                index: 20_000_000,
                stack: Some(ItemStack::new("ore", 1)),
            }],
        };
        assert!(matches!(
            c.apply_delta(&delta),
            Err(DeltaError::SlotOutOfRange { index: 20_000_000, .. })
        ));
        assert_eq!(c.slot_count(), 0);
        assert_eq!(c.version(), Version::ZERO);
    }

    #[test]
    fn test_snapshot_bounds() {
        let id = ContainerId::from_u128(3);
        let overfull = ContainerSnapshot {
            container: id,
            capacity: Capacity::Fixed(1),
            version: Version::new(2),
            slots: vec![Some(ItemStack::new("ore", 5)), Some(ItemStack::new("ore", 4))],
        };
        assert!(matches!(
            InventoryContainer::from_snapshot(overfull.clone(), Handle::null(), 16),
            Err(DeltaError::SlotOutOfRange { index: 1, .. })
        ));
        let mut c = fixed(1);
        c.unbounded_limit = 16;
        assert!(c.restore(ContainerSnapshot { container: c.id(), ..overfull }).is_err());
        assert_eq!(c.version(), Version::ZERO);

        let huge = ContainerSnapshot {
            container: id,
            capacity: Capacity::Fixed(u32::MAX),
            version: Version::new(1),
            slots: Vec::new(),
        };
        assert!(matches!(
            huge.check_bounds(16),
            Err(DeltaError::CapacityOutOfRange { .. })
        ));

        let trailing_empty = ContainerSnapshot {
            container: id,
            capacity: Capacity::Unbounded,
            version: Version::new(1),
            slots: vec![Some(ItemStack::new("ore", 1)), None, None],
        };
        let rebuilt = InventoryContainer::from_snapshot(trailing_empty, Handle::null(), 2).unwrap();
        assert_eq!(rebuilt.slot_count(), 1);
        assert_eq!(rebuilt.slot_limit(), 2);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut c = fixed(3);
        c.commit_slots(vec![Some(ItemStack::new("potion", 4)), None, None], Version::new(7));
        let snap = c.snapshot();

        let mut other = fixed(3);
        other.restore(snap.clone()).unwrap();
        assert_eq!(other.snapshot(), snap);
        assert_eq!(snap.total_quantity(), 4);
    }

    #[test]
    fn test_weight_and_describe() {
        let table = ItemTable::builder()
            .item(crate::item::ItemDefinition::new("ore", "Ore").with_max_stack(50).with_weight(2.0))
            .build()
            .unwrap();
        let mut c = fixed(2);
        c.commit_slots(vec![Some(ItemStack::new("ore", 3)), None], Version::new(1));
        assert_eq!(c.weight(&table), 6.0);
        assert!(c.describe().contains("[0] ore x3"));
        assert!(fixed(1).describe().contains("(empty)"));
    }
}
