//! Transaction engine
//!
//! Validation runs in three passes, and the first failure aborts the whole
//! transaction without touching any container:
//!
//! 1. every addressed slot index exists within its container's capacity
//! 2. the operations are staged in order on copies of the slots, which checks
//!    item types, stack limits, split quantities and free space
//! 3. this side must be allowed to commit to every touched container, and
//!    every container must still be at the version the transaction expects
//!
//! Commit then writes the staged slots back, bumps each touched container's
//! version by exactly one and reports what changed as an [`AppliedDelta`].

use crate::catalog::ItemTable;
use crate::container::{Capacity, ContainerSnapshot, InventoryContainer};
use crate::delta::{AppliedDelta, ContainerDelta};
use crate::error::{SnapshotError, TransactionError, TransactionResult};
use crate::item::ItemStack;
use crate::store::ContainerStore;
use crate::transaction::{Operation, SlotRef, Transaction, TransactionId};
use invsys_core::{ContainerId, Version};
use parking_lot::MutexGuard;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default number of slots an unbounded container may grow to
pub const DEFAULT_UNBOUNDED_SLOT_LIMIT: u32 = 4096;

/// Decides whether this side may commit mutations to a container
pub trait AuthorityGate {
    /// Check if committing to `container` is allowed
    fn may_commit(&self, container: ContainerId) -> bool;
}

/// Gate that allows everything (single-process use, scratch stores)
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AuthorityGate for AllowAll {
    fn may_commit(&self, _container: ContainerId) -> bool {
        true
    }
}

impl<F> AuthorityGate for F
where
    F: Fn(ContainerId) -> bool,
{
    fn may_commit(&self, container: ContainerId) -> bool {
        self(container)
    }
}

/// A validated transaction waiting to be committed
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    id: TransactionId,
    base_versions: BTreeMap<ContainerId, Version>,
    staged: BTreeMap<ContainerId, Vec<Option<ItemStack>>>,
}

impl PreparedTransaction {
    /// Transaction this was prepared from
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Versions the staged result was computed against
    pub fn base_versions(&self) -> &BTreeMap<ContainerId, Version> {
        &self.base_versions
    }

    /// Slot contents one container will have after commit
    pub fn preview(&self, container: ContainerId) -> Option<&[Option<ItemStack>]> {
        self.staged.get(&container).map(Vec::as_slice)
    }
}

/// Validates and applies transactions against a [`ContainerStore`]
#[derive(Debug, Clone)]
pub struct TransactionEngine {
    catalog: Arc<ItemTable>,
    unbounded_slot_limit: u32,
}

impl TransactionEngine {
    /// Create an engine using `catalog` for stack limits
    pub fn new(catalog: Arc<ItemTable>) -> Self {
        Self {
            catalog,
            unbounded_slot_limit: DEFAULT_UNBOUNDED_SLOT_LIMIT,
        }
    }

    /// Cap the number of slots an unbounded container may grow to
    pub fn with_unbounded_slot_limit(mut self, limit: u32) -> Self {
        self.unbounded_slot_limit = limit;
        self
    }

    /// The item catalog in use
    pub fn catalog(&self) -> &Arc<ItemTable> {
        &self.catalog
    }

    /// Slots an unbounded container may grow to
    pub fn unbounded_slot_limit(&self) -> u32 {
        self.unbounded_slot_limit
    }

    /// Check that a snapshot describes a container this engine could have built
    ///
    /// Every stack must name a catalog item and hold between one and that
    /// item's max stack, and every filled slot must fit the capacity.
    pub fn validate_snapshot(&self, snapshot: &ContainerSnapshot) -> Result<(), SnapshotError> {
        snapshot.check_bounds(self.unbounded_slot_limit)?;
        for (index, stack) in snapshot.slots.iter().enumerate() {
            let Some(stack) = stack else {
                continue;
            };
            let index = index as u32;
            let Some(max_stack) = self.catalog.max_stack(stack.item.as_str()) else {
                return Err(SnapshotError::UnknownItemType {
                    index,
                    item: stack.item.clone(),
                });
            };
            if stack.quantity == 0 {
                return Err(SnapshotError::EmptyStack { index });
            }
            if stack.quantity > max_stack {
                return Err(SnapshotError::OverfullStack {
                    index,
                    item: stack.item.clone(),
                    quantity: stack.quantity,
                    max_stack,
                });
            }
        }
        Ok(())
    }

    /// Validate and commit in one step
    pub fn apply(
        &self,
        store: &ContainerStore,
        transaction: &Transaction,
        gate: &dyn AuthorityGate,
    ) -> TransactionResult<AppliedDelta> {
        let result = self.lock_and_apply(store, transaction, gate);
        match &result {
            Ok(applied) => log::debug!(
                "Committed {} ({} containers, {} slots changed)",
                transaction.id,
                applied.deltas.len(),
                applied.changed_slots()
            ),
            Err(err) => log::debug!("Rejected {}: {}", transaction.id, err),
        }
        result
    }

    /// Validate against the current state without mutating anything
    pub fn prepare(
        &self,
        store: &ContainerStore,
        transaction: &Transaction,
        gate: &dyn AuthorityGate,
    ) -> TransactionResult<PreparedTransaction> {
        let ids = Self::lock_set(transaction)?;
        let handles = store.handles(&ids)?;
        let guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();
        let views: BTreeMap<_, _> = guards.iter().map(|g| (g.id(), &**g)).collect();
        self.validate(&views, transaction, gate)
    }

    /// Land a prepared transaction
    ///
    /// Fails with `StaleState` if any container moved on since `prepare`.
    pub fn commit(
        &self,
        store: &ContainerStore,
        prepared: PreparedTransaction,
    ) -> TransactionResult<AppliedDelta> {
        let ids: Vec<_> = prepared.base_versions.keys().copied().collect();
        let handles = store.handles(&ids)?;
        let mut guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();
        for guard in &guards {
            let expected = prepared.base_versions[&guard.id()];
            if guard.version() != expected {
                log::debug!("Prepared {} went stale on {}", prepared.id, guard.id());
                return Err(TransactionError::StaleState {
                    container: guard.id(),
                    expected,
                    actual: guard.version(),
                });
            }
        }
        let applied = Self::land(&mut guards, prepared);
        log::debug!("Committed prepared {}", applied.transaction);
        Ok(applied)
    }

    fn lock_and_apply(
        &self,
        store: &ContainerStore,
        transaction: &Transaction,
        gate: &dyn AuthorityGate,
    ) -> TransactionResult<AppliedDelta> {
        let ids = Self::lock_set(transaction)?;
        let handles = store.handles(&ids)?;
        // Sorted ids give every transaction the same lock order
        let mut guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();
        let prepared = {
            let views: BTreeMap<_, _> = guards.iter().map(|g| (g.id(), &**g)).collect();
            self.validate(&views, transaction, gate)?
        };
        Ok(Self::land(&mut guards, prepared))
    }

    fn lock_set(transaction: &Transaction) -> TransactionResult<Vec<ContainerId>> {
        if transaction.is_empty() {
            return Err(TransactionError::EmptyTransaction);
        }
        Ok(transaction.containers())
    }

    fn validate(
        &self,
        views: &BTreeMap<ContainerId, &InventoryContainer>,
        transaction: &Transaction,
        gate: &dyn AuthorityGate,
    ) -> TransactionResult<PreparedTransaction> {
        for op in &transaction.operations {
            for slot in op.slots() {
                let container = views
                    .get(&slot.container)
                    .ok_or(TransactionError::UnknownContainer(slot.container))?;
                if slot.index >= container.capacity().slot_limit(self.unbounded_slot_limit) {
                    return Err(TransactionError::InvalidSlotIndex {
                        container: slot.container,
                        index: slot.index,
                    });
                }
            }
        }

        let mut staging = Staging {
            catalog: &self.catalog,
            unbounded_slot_limit: self.unbounded_slot_limit,
            capacities: views.iter().map(|(id, c)| (*id, c.capacity())).collect(),
            slots: views.iter().map(|(id, c)| (*id, c.slots().to_vec())).collect(),
        };
        for op in &transaction.operations {
            staging.run(op)?;
        }

        for (id, container) in views {
            if !gate.may_commit(*id) {
                return Err(TransactionError::AuthorityDenied(*id));
            }
            if let Some(expected) = transaction.expected_versions.get(id) {
                if container.version() != *expected {
                    return Err(TransactionError::StaleState {
                        container: *id,
                        expected: *expected,
                        actual: container.version(),
                    });
                }
            }
        }

        Ok(PreparedTransaction {
            id: transaction.id,
            base_versions: views.iter().map(|(id, c)| (*id, c.version())).collect(),
            staged: staging.slots,
        })
    }

    fn land(
        guards: &mut [MutexGuard<'_, InventoryContainer>],
        mut prepared: PreparedTransaction,
    ) -> AppliedDelta {
        let mut deltas = Vec::with_capacity(guards.len());
        for guard in guards.iter_mut() {
            let id = guard.id();
            let Some(slots) = prepared.staged.remove(&id) else {
                continue;
            };
            let version = guard.version().next();
            deltas.push(ContainerDelta::diff(id, version, guard.slots(), &slots));
            guard.commit_slots(slots, version);
        }
        AppliedDelta {
            transaction: prepared.id,
            deltas,
        }
    }
}

/// Working copies of the touched containers' slots
struct Staging<'a> {
    catalog: &'a ItemTable,
    unbounded_slot_limit: u32,
    capacities: BTreeMap<ContainerId, Capacity>,
    slots: BTreeMap<ContainerId, Vec<Option<ItemStack>>>,
}

impl Staging<'_> {
    fn run(&mut self, op: &Operation) -> TransactionResult<()> {
        match op {
            Operation::Move { from, to } | Operation::Merge { from, to } => {
                if from == to {
                    return Ok(());
                }
                let stack = self.take(*from)?;
                self.place(stack, *to)
            }
            Operation::Split { from, to, quantity } => {
                let part = {
                    let slot = self.slot_mut(*from)?;
                    let stack = slot.as_mut().ok_or(TransactionError::EmptySlot(*from))?;
                    let available = stack.quantity;
                    stack.split(*quantity).ok_or(TransactionError::InvalidQuantity {
                        requested: *quantity,
                        available,
                    })?
                };
                self.place(part, *to)
            }
            Operation::Transfer { from, to, quantity } => {
                let available = self.peek(*from)?.quantity;
                let wanted = quantity.unwrap_or(available);
                if wanted == 0 || wanted > available {
                    return Err(TransactionError::InvalidQuantity {
                        requested: wanted,
                        available,
                    });
                }
                if from == to {
                    return Ok(());
                }
                let moving = if wanted == available {
                    self.take(*from)?
                } else {
                    let slot = self.slot_mut(*from)?;
                    match slot.as_mut().and_then(|s| s.split(wanted)) {
                        Some(part) => part,
                        None => return Err(TransactionError::EmptySlot(*from)),
                    }
                };
                self.place(moving, *to)
            }
            Operation::Swap { a, b } => {
                if a == b {
                    return Ok(());
                }
                let first = self.slot_mut(*a)?.take();
                let second = std::mem::replace(self.slot_mut(*b)?, first);
                *self.slot_mut(*a)? = second;
                Ok(())
            }
            Operation::Insert { container, stack } => self.insert(*container, stack),
            Operation::Remove { from, quantity } => {
                let slot = self.slot_mut(*from)?;
                let stack = slot.as_mut().ok_or(TransactionError::EmptySlot(*from))?;
                if *quantity == 0 || *quantity > stack.quantity {
                    return Err(TransactionError::InvalidQuantity {
                        requested: *quantity,
                        available: stack.quantity,
                    });
                }
                stack.quantity -= quantity;
                if stack.is_empty() {
                    *slot = None;
                }
                Ok(())
            }
        }
    }

    fn max_stack(&self, stack: &ItemStack) -> TransactionResult<u32> {
        self.catalog
            .max_stack(stack.item.as_str())
            .ok_or_else(|| TransactionError::UnknownItemType(stack.item.clone()))
    }

    fn limit(&self, container: ContainerId) -> usize {
        self.capacities
            .get(&container)
            .map_or(0, |c| c.slot_limit(self.unbounded_slot_limit) as usize)
    }

    fn slot_mut(&mut self, slot: SlotRef) -> TransactionResult<&mut Option<ItemStack>> {
        let limit = self.limit(slot.container);
        let slots = self
            .slots
            .get_mut(&slot.container)
            .ok_or(TransactionError::UnknownContainer(slot.container))?;
        let index = slot.index as usize;
        if index >= limit {
            return Err(TransactionError::InvalidSlotIndex {
                container: slot.container,
                index: slot.index,
            });
        }
        if index >= slots.len() {
            slots.resize(index + 1, None);
        }
        Ok(&mut slots[index])
    }

    fn peek(&mut self, slot: SlotRef) -> TransactionResult<&ItemStack> {
        self.slot_mut(slot)?
            .as_ref()
            .ok_or(TransactionError::EmptySlot(slot))
    }

    fn take(&mut self, slot: SlotRef) -> TransactionResult<ItemStack> {
        self.slot_mut(slot)?
            .take()
            .ok_or(TransactionError::EmptySlot(slot))
    }

    fn first_empty(&self, container: ContainerId) -> Option<u32> {
        let slots = self.slots.get(&container)?;
        let limit = self.limit(container);
        slots
            .iter()
            .position(Option::is_none)
            .or_else(|| (slots.len() < limit).then_some(slots.len()))
            .map(|i| i as u32)
    }

    /// Put `stack` into `to`, merging with a same-type stack there and
    /// spilling whatever does not fit into the lowest empty slots.
    fn place(&mut self, stack: ItemStack, to: SlotRef) -> TransactionResult<()> {
        let max = self.max_stack(&stack)?;
        let item = stack.item;
        let mut remaining = stack.quantity;

        let dest = self.slot_mut(to)?;
        match dest {
            Some(present) if present.item != item => {
                return Err(TransactionError::TypeMismatch {
                    slot: to,
                    present: present.item.clone(),
                    incoming: item,
                });
            }
            Some(present) => remaining = present.add(remaining, max),
            None => {
                let placed = remaining.min(max);
                *dest = Some(ItemStack::new(item.clone(), placed));
                remaining -= placed;
            }
        }

        while remaining > 0 {
            let index = self
                .first_empty(to.container)
                .ok_or(TransactionError::CapacityExceeded(to.container))?;
            let placed = remaining.min(max);
            *self.slot_mut(SlotRef::new(to.container, index))? =
                Some(ItemStack::new(item.clone(), placed));
            remaining -= placed;
        }
        Ok(())
    }

    fn insert(&mut self, container: ContainerId, stack: &ItemStack) -> TransactionResult<()> {
        let max = self.max_stack(stack)?;
        if stack.quantity == 0 {
            return Err(TransactionError::InvalidQuantity {
                requested: 0,
                available: 0,
            });
        }
        let mut remaining = stack.quantity;

        let slots = self
            .slots
            .get_mut(&container)
            .ok_or(TransactionError::UnknownContainer(container))?;
        for present in slots.iter_mut().flatten() {
            if remaining == 0 {
                break;
            }
            if present.item == stack.item {
                remaining = present.add(remaining, max);
            }
        }

        while remaining > 0 {
            let index = self
                .first_empty(container)
                .ok_or(TransactionError::CapacityExceeded(container))?;
            let placed = remaining.min(max);
            *self.slot_mut(SlotRef::new(container, index))? =
                Some(ItemStack::new(stack.item.clone(), placed));
            remaining -= placed;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeltaError;
    use crate::item::{ItemDefinition, ItemTypeId};
    use invsys_core::Handle;

    fn engine() -> TransactionEngine {
        let table = ItemTable::builder()
            .item(ItemDefinition::new("sword", "Sword"))
            .item(ItemDefinition::new("potion", "Potion").with_max_stack(10))
            .item(ItemDefinition::new("arrow", "Arrow").with_max_stack(50))
            .build()
            .unwrap();
        TransactionEngine::new(Arc::new(table))
    }

    fn store_with(id: ContainerId, capacity: Capacity, slots: Vec<Option<ItemStack>>) -> ContainerStore {
        let store = ContainerStore::new();
        let mut container = InventoryContainer::new(id, Handle::null(), capacity);
        container.commit_slots(slots, Version::ZERO);
        store.insert(container);
        store
    }

    #[test]
    fn test_move_to_empty_slot() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(bag, Capacity::Fixed(2), vec![Some(ItemStack::new("sword", 1)), None]);
        let tx = Transaction::builder(bag)
            .move_stack(SlotRef::new(bag, 0), SlotRef::new(bag, 1))
            .build();

        let applied = engine().apply(&store, &tx, &AllowAll).unwrap();
        let snap = store.snapshot(bag).unwrap();
        assert_eq!(snap.slots, vec![None, Some(ItemStack::new("sword", 1))]);
        assert_eq!(snap.version, Version::new(1));
        assert_eq!(applied.deltas[0].changes.len(), 2);
    }

    #[test]
    fn test_merge_spills_into_vacated_slot() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(
            bag,
            Capacity::Fixed(2),
            vec![Some(ItemStack::new("potion", 8)), Some(ItemStack::new("potion", 5))],
        );
        let tx = Transaction::builder(bag)
            .merge(SlotRef::new(bag, 1), SlotRef::new(bag, 0))
            .build();

        engine().apply(&store, &tx, &AllowAll).unwrap();
        let snap = store.snapshot(bag).unwrap();
        assert_eq!(
            snap.slots,
            vec![Some(ItemStack::new("potion", 10)), Some(ItemStack::new("potion", 3))]
        );
    }

    #[test]
    fn test_type_mismatch_is_atomic() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(
            bag,
            Capacity::Fixed(3),
            vec![Some(ItemStack::new("potion", 2)), Some(ItemStack::new("sword", 1)), None],
        );
        let before = store.snapshot(bag).unwrap();
        let tx = Transaction::builder(bag)
            .move_stack(SlotRef::new(bag, 0), SlotRef::new(bag, 2))
            .move_stack(SlotRef::new(bag, 1), SlotRef::new(bag, 2))
            .build();

        let err = engine().apply(&store, &tx, &AllowAll).unwrap_err();
        assert!(matches!(err, TransactionError::TypeMismatch { .. }));
        assert_eq!(store.snapshot(bag).unwrap(), before);
    }

    #[test]
    fn test_invalid_index_checked_first() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(bag, Capacity::Fixed(2), vec![None, None]);
        // Slot 0 is empty too, but the bad index is reported first
        let tx = Transaction::builder(bag)
            .move_stack(SlotRef::new(bag, 0), SlotRef::new(bag, 9))
            .build();
        let err = engine().apply(&store, &tx, &AllowAll).unwrap_err();
        assert_eq!(err, TransactionError::InvalidSlotIndex { container: bag, index: 9 });
    }

    #[test]
    fn test_split_quantity_rules() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(bag, Capacity::Fixed(2), vec![Some(ItemStack::new("arrow", 20)), None]);
        let eng = engine();

        for bad in [0, 20, 25] {
            let tx = Transaction::builder(bag)
                .split(SlotRef::new(bag, 0), SlotRef::new(bag, 1), bad)
                .build();
            assert!(matches!(
                eng.apply(&store, &tx, &AllowAll),
                Err(TransactionError::InvalidQuantity { .. })
            ));
        }

        let tx = Transaction::builder(bag)
            .split(SlotRef::new(bag, 0), SlotRef::new(bag, 1), 7)
            .build();
        eng.apply(&store, &tx, &AllowAll).unwrap();
        let snap = store.snapshot(bag).unwrap();
        assert_eq!(snap.slots[0], Some(ItemStack::new("arrow", 13)));
        assert_eq!(snap.slots[1], Some(ItemStack::new("arrow", 7)));
    }

    #[test]
    fn test_insert_fills_then_fails_when_full() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(bag, Capacity::Fixed(2), vec![Some(ItemStack::new("potion", 6)), None]);
        let eng = engine();

        let tx = Transaction::builder(bag).insert(bag, ItemStack::new("potion", 12)).build();
        eng.apply(&store, &tx, &AllowAll).unwrap();
        assert_eq!(store.read(bag, |c| c.count_item("potion")), Some(18));

        let tx = Transaction::builder(bag).insert(bag, ItemStack::new("potion", 3)).build();
        assert_eq!(
            eng.apply(&store, &tx, &AllowAll),
            Err(TransactionError::CapacityExceeded(bag))
        );
        assert_eq!(store.read(bag, |c| c.count_item("potion")), Some(18));
    }

    #[test]
    fn test_unknown_item_type() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(bag, Capacity::Unbounded, Vec::new());
        let tx = Transaction::builder(bag).insert(bag, ItemStack::new("dragon", 1)).build();
        assert!(matches!(
            engine().apply(&store, &tx, &AllowAll),
            Err(TransactionError::UnknownItemType(_))
        ));
    }

    #[test]
    fn test_unbounded_grows_and_trims() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(bag, Capacity::Unbounded, Vec::new());
        let eng = engine().with_unbounded_slot_limit(3);

        let tx = Transaction::builder(bag).insert(bag, ItemStack::new("sword", 3)).build();
        eng.apply(&store, &tx, &AllowAll).unwrap();
        assert_eq!(store.read(bag, |c| c.slot_count()), Some(3));

        let tx = Transaction::builder(bag).insert(bag, ItemStack::new("sword", 1)).build();
        assert_eq!(
            eng.apply(&store, &tx, &AllowAll),
            Err(TransactionError::CapacityExceeded(bag))
        );

        let tx = Transaction::builder(bag).remove(SlotRef::new(bag, 2), 1).build();
        eng.apply(&store, &tx, &AllowAll).unwrap();
        assert_eq!(store.read(bag, |c| c.slot_count()), Some(2));
    }

    #[test]
    fn test_authority_denied() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(bag, Capacity::Fixed(1), vec![Some(ItemStack::new("sword", 1))]);
        let tx = Transaction::builder(bag).remove(SlotRef::new(bag, 0), 1).build();
        let deny = |_: ContainerId| false;
        assert_eq!(
            engine().apply(&store, &tx, &deny),
            Err(TransactionError::AuthorityDenied(bag))
        );
    }

    #[test]
    fn test_expected_version_mismatch() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(bag, Capacity::Fixed(1), vec![Some(ItemStack::new("sword", 1))]);
        let tx = Transaction::builder(bag)
            .remove(SlotRef::new(bag, 0), 1)
            .expect_version(bag, Version::new(3))
            .build();
        let err = engine().apply(&store, &tx, &AllowAll).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_prepare_then_commit_detects_stale() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(bag, Capacity::Fixed(2), vec![Some(ItemStack::new("arrow", 10)), None]);
        let eng = engine();

        let first = Transaction::builder(bag)
            .split(SlotRef::new(bag, 0), SlotRef::new(bag, 1), 4)
            .build();
        let prepared = eng.prepare(&store, &first, &AllowAll).unwrap();
        assert_eq!(prepared.preview(bag).unwrap()[1], Some(ItemStack::new("arrow", 4)));
        assert_eq!(store.read(bag, |c| c.version()), Some(Version::ZERO));

        let other = Transaction::builder(bag).remove(SlotRef::new(bag, 0), 1).build();
        eng.apply(&store, &other, &AllowAll).unwrap();

        assert!(matches!(
            eng.commit(&store, prepared),
            Err(TransactionError::StaleState { .. })
        ));
    }

    #[test]
    fn test_noop_still_bumps_version_with_empty_delta() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(bag, Capacity::Fixed(2), vec![Some(ItemStack::new("sword", 1)), None]);
        let tx = Transaction::builder(bag)
            .swap(SlotRef::new(bag, 0), SlotRef::new(bag, 1))
            .swap(SlotRef::new(bag, 0), SlotRef::new(bag, 1))
            .build();
        let applied = engine().apply(&store, &tx, &AllowAll).unwrap();
        assert!(applied.deltas[0].is_empty());
        assert_eq!(applied.deltas[0].version, Version::new(1));
    }

    #[test]
    fn test_empty_transaction() {
        let bag = ContainerId::from_u128(1);
        let store = store_with(bag, Capacity::Fixed(1), vec![None]);
        let tx = Transaction::new(bag);
        assert_eq!(
            engine().apply(&store, &tx, &AllowAll),
            Err(TransactionError::EmptyTransaction)
        );
    }

    #[test]
    fn test_validate_snapshot() {
        let bag = ContainerId::from_u128(1);
        let eng = engine();
        let snap = |capacity, slots| ContainerSnapshot {
            container: bag,
            capacity,
            version: Version::new(3),
            slots,
        };

        let good = snap(Capacity::Fixed(2), vec![Some(ItemStack::new("potion", 10)), None]);
        assert_eq!(eng.validate_snapshot(&good), Ok(()));

        let overfull = snap(Capacity::Fixed(2), vec![None, Some(ItemStack::new("potion", 11))]);
        assert_eq!(
            eng.validate_snapshot(&overfull),
            Err(SnapshotError::OverfullStack {
                index: 1,
                item: ItemTypeId::new("potion"),
                quantity: 11,
                max_stack: 10,
            })
        );

        let ghost = snap(Capacity::Unbounded, vec![Some(ItemStack::new("ghost", 1))]);
        assert!(matches!(
            eng.validate_snapshot(&ghost),
            Err(SnapshotError::UnknownItemType { index: 0, .. })
        ));

        let hollow = snap(Capacity::Unbounded, vec![Some(ItemStack::new("sword", 0))]);
        assert_eq!(eng.validate_snapshot(&hollow), Err(SnapshotError::EmptyStack { index: 0 }));

        let crowded = snap(
            Capacity::Fixed(1),
            vec![Some(ItemStack::new("arrow", 5)), Some(ItemStack::new("arrow", 4))],
        );
        assert!(matches!(
            eng.validate_snapshot(&crowded),
            Err(SnapshotError::Bounds(DeltaError::SlotOutOfRange { index: 1, .. }))
        ));
        assert_eq!(eng.unbounded_slot_limit(), DEFAULT_UNBOUNDED_SLOT_LIMIT);
    }
}
