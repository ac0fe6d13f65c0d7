//! Speculative transactions on observed containers
//!
//! An observing side may run a transaction against its replicas before the
//! authority has answered. The predicted slot values live in an overlay on
//! top of the replicas; the replicas themselves only ever change through
//! authoritative deltas and snapshots.
//!
//! The last authoritative delta wins. A speculation is confirmed once the
//! authority has applied it (or the replicas show exactly the predicted
//! values past the versions it was built on). It is reverted together with
//! every later speculation built on the same containers when the authority
//! rejects it, when an authoritative change writes something else to a
//! predicted slot, or when it stays unresolved for too long.

use crate::config::SyncConfig;
use crate::sync::ReplicaSynchronizer;
use invsys_core::{ContainerId, Handle, RequestId, Version};
use invsys_inventory::{
    AllowAll, AppliedDelta, ContainerDelta, ContainerStore, DeltaError, InventoryContainer,
    ItemStack, SlotRef, Transaction, TransactionEngine, TransactionError, TransactionResult,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Read access to the authoritative state known on this side
pub trait ReplicaSource {
    /// Last known state of a container
    fn replica_container(&self, container: ContainerId) -> Option<&InventoryContainer>;

    /// Version of the last known state
    fn replica_version(&self, container: ContainerId) -> Option<Version> {
        self.replica_container(container).map(InventoryContainer::version)
    }
}

impl ReplicaSource for ReplicaSynchronizer {
    fn replica_container(&self, container: ContainerId) -> Option<&InventoryContainer> {
        self.replica(container)
    }
}

/// One slot as shown to gameplay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotView {
    /// Authoritative content
    Confirmed(Option<ItemStack>),
    /// Predicted content of a pending speculation
    Speculative(Option<ItemStack>),
}

impl SlotView {
    /// Content regardless of provenance
    pub fn stack(&self) -> Option<&ItemStack> {
        match self {
            Self::Confirmed(stack) | Self::Speculative(stack) => stack.as_ref(),
        }
    }

    /// Check if the content is a prediction
    pub fn is_speculative(&self) -> bool {
        matches!(self, Self::Speculative(_))
    }
}

/// Why a speculation was thrown away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    /// The authority refused the transaction
    Rejected(TransactionError),
    /// The authority wrote something else to a predicted slot
    Conflict,
    /// Built on top of a speculation that was reverted
    Cascade(RequestId),
    /// No resolution in time
    Timeout,
}

/// Resolution of one speculation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeculationOutcome {
    Confirmed(RequestId),
    Reverted {
        request: RequestId,
        reason: RevertReason,
    },
}

struct PendingSpeculation {
    request: RequestId,
    base_versions: BTreeMap<ContainerId, Version>,
    predicted: BTreeMap<SlotRef, Option<ItemStack>>,
    acknowledged: Option<BTreeMap<ContainerId, Version>>,
    submitted: Instant,
}

impl PendingSpeculation {
    fn touches(&self, container: ContainerId) -> bool {
        self.base_versions.contains_key(&container)
    }

    fn settled(&self, source: &dyn ReplicaSource) -> bool {
        if let Some(acked) = &self.acknowledged {
            let reached = acked
                .iter()
                .all(|(id, v)| source.replica_version(*id).is_some_and(|have| have >= *v));
            if reached {
                return true;
            }
        }
        let moved_on = self
            .base_versions
            .iter()
            .all(|(id, base)| source.replica_version(*id).is_some_and(|have| have > *base));
        moved_on
            && self.predicted.iter().all(|(slot, stack)| {
                source
                    .replica_container(slot.container)
                    .map(|c| c.stack(slot.index))
                    == Some(stack.as_ref())
            })
    }
}

/// Pending speculations and the overlay they form
pub struct SpeculativeOverlay {
    engine: TransactionEngine,
    config: SyncConfig,
    pending: Vec<PendingSpeculation>,
}

impl SpeculativeOverlay {
    /// Create an empty overlay; `engine` predicts outcomes
    pub fn new(engine: TransactionEngine, config: SyncConfig) -> Self {
        Self {
            engine,
            config,
            pending: Vec::new(),
        }
    }

    /// Run a transaction against the replicas plus earlier predictions
    ///
    /// Nothing is recorded when the transaction already fails here.
    pub fn speculate(
        &mut self,
        request: RequestId,
        transaction: &Transaction,
        source: &dyn ReplicaSource,
        now: Instant,
    ) -> TransactionResult<AppliedDelta> {
        let scratch = ContainerStore::new();
        let mut base_versions = BTreeMap::new();
        for id in transaction.containers() {
            let replica = source
                .replica_container(id)
                .ok_or(TransactionError::UnknownContainer(id))?;
            let mut snapshot = replica.snapshot();
            for (slot, stack) in self.predictions(id) {
                let index = slot.index as usize;
                if index >= snapshot.slots.len() {
                    snapshot.slots.resize(index + 1, None);
                }
                snapshot.slots[index] = stack.clone();
            }
            base_versions.insert(id, replica.version());
            let limit = self.engine.unbounded_slot_limit();
            let container = InventoryContainer::from_snapshot(snapshot, Handle::null(), limit)
                .map_err(|err| match err {
                    DeltaError::SlotOutOfRange { container, index } => {
                        TransactionError::InvalidSlotIndex { container, index }
                    }
                    _ => TransactionError::UnknownContainer(id),
                })?;
            scratch.insert(container);
        }

        let applied = self.engine.apply(&scratch, transaction, &AllowAll)?;
        log::debug!("Speculating {} ({} slots)", request, applied.changed_slots());
        self.pending.push(PendingSpeculation {
            request,
            base_versions,
            predicted: slot_changes(&applied),
            acknowledged: None,
            submitted: now,
        });
        Ok(applied)
    }

    /// Handle the authority's verdict on a speculated request
    pub fn on_result(
        &mut self,
        request: RequestId,
        outcome: &Result<AppliedDelta, TransactionError>,
        source: &dyn ReplicaSource,
    ) -> Vec<SpeculationOutcome> {
        let Some(position) = self.pending.iter().position(|p| p.request == request) else {
            return Vec::new();
        };
        match outcome {
            Err(err) => self.revert(position, RevertReason::Rejected(err.clone())),
            Ok(applied) if slot_changes(applied) != self.pending[position].predicted => {
                self.revert(position, RevertReason::Conflict)
            }
            Ok(applied) => {
                self.pending[position].acknowledged =
                    Some(applied.deltas.iter().map(|d| (d.container, d.version)).collect());
                self.settle(source)
            }
        }
    }

    /// Reconcile with authoritative changes that just landed on a replica
    pub fn reconcile(
        &mut self,
        changes: &[ContainerDelta],
        source: &dyn ReplicaSource,
    ) -> Vec<SpeculationOutcome> {
        let mut outcomes = Vec::new();
        for delta in changes {
            // Unacknowledged predictions contradicted by the authority
            while let Some(position) = self.pending.iter().position(|p| {
                p.acknowledged.is_none()
                    && delta.changes.iter().any(|change| {
                        p.predicted
                            .get(&SlotRef::new(delta.container, change.index))
                            .is_some_and(|predicted| *predicted != change.stack)
                    })
            }) {
                outcomes.extend(self.revert(position, RevertReason::Conflict));
            }
        }
        outcomes.extend(self.settle(source));
        outcomes
    }

    /// Revert speculations older than the timeout
    pub fn expire(&mut self, now: Instant) -> Vec<SpeculationOutcome> {
        let timeout = self.config.speculation_timeout();
        let mut outcomes = Vec::new();
        while let Some(position) = self
            .pending
            .iter()
            .position(|p| now.saturating_duration_since(p.submitted) >= timeout)
        {
            outcomes.extend(self.revert(position, RevertReason::Timeout));
        }
        outcomes
    }

    /// Drop every speculation touching a container (it went away)
    pub fn discard_container(&mut self, container: ContainerId) -> Vec<SpeculationOutcome> {
        let mut outcomes = Vec::new();
        while let Some(position) = self.pending.iter().position(|p| p.touches(container)) {
            outcomes.extend(self.revert(position, RevertReason::Conflict));
        }
        outcomes
    }

    /// A container as gameplay sees it: replica plus predictions
    pub fn view(&self, container: ContainerId, source: &dyn ReplicaSource) -> Option<Vec<SlotView>> {
        let replica = source.replica_container(container)?;
        let mut view: Vec<SlotView> = replica
            .slots()
            .iter()
            .cloned()
            .map(SlotView::Confirmed)
            .collect();
        for (slot, stack) in self.predictions(container) {
            let index = slot.index as usize;
            if index >= view.len() {
                view.resize(index + 1, SlotView::Confirmed(None));
            }
            view[index] = SlotView::Speculative(stack.clone());
        }
        Some(view)
    }

    /// One slot as gameplay sees it
    pub fn slot(&self, slot: SlotRef, source: &dyn ReplicaSource) -> Option<SlotView> {
        let replica = source.replica_container(slot.container)?;
        let predicted = self
            .pending
            .iter()
            .rev()
            .find_map(|p| p.predicted.get(&slot));
        Some(match predicted {
            Some(stack) => SlotView::Speculative(stack.clone()),
            None => SlotView::Confirmed(replica.stack(slot.index).cloned()),
        })
    }

    /// Check if a request is still unresolved
    pub fn is_pending(&self, request: RequestId) -> bool {
        self.pending.iter().any(|p| p.request == request)
    }

    /// Number of unresolved speculations
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Latest prediction per slot of one container, in submission order
    fn predictions(&self, container: ContainerId) -> BTreeMap<SlotRef, &Option<ItemStack>> {
        let mut merged = BTreeMap::new();
        for pending in &self.pending {
            for (slot, stack) in &pending.predicted {
                if slot.container == container {
                    merged.insert(*slot, stack);
                }
            }
        }
        merged
    }

    fn settle(&mut self, source: &dyn ReplicaSource) -> Vec<SpeculationOutcome> {
        let mut outcomes = Vec::new();
        self.pending.retain(|p| {
            if p.settled(source) {
                log::debug!("Speculation {} confirmed", p.request);
                outcomes.push(SpeculationOutcome::Confirmed(p.request));
                false
            } else {
                true
            }
        });
        outcomes
    }

    fn revert(&mut self, position: usize, reason: RevertReason) -> Vec<SpeculationOutcome> {
        let root = self.pending.remove(position);
        log::debug!("Speculation {} reverted: {:?}", root.request, reason);
        let mut outcomes = vec![SpeculationOutcome::Reverted {
            request: root.request,
            reason,
        }];

        // Later speculations were predicted on top of this one
        let mut tainted: BTreeSet<ContainerId> = root.base_versions.keys().copied().collect();
        let mut index = position;
        while index < self.pending.len() {
            let later = &self.pending[index];
            if later.base_versions.keys().any(|id| tainted.contains(id)) {
                tainted.extend(later.base_versions.keys().copied());
                let later = self.pending.remove(index);
                outcomes.push(SpeculationOutcome::Reverted {
                    request: later.request,
                    reason: RevertReason::Cascade(root.request),
                });
            } else {
                index += 1;
            }
        }
        outcomes
    }
}

fn slot_changes(applied: &AppliedDelta) -> BTreeMap<SlotRef, Option<ItemStack>> {
    applied
        .deltas
        .iter()
        .flat_map(|delta| {
            delta
                .changes
                .iter()
                .map(move |change| (SlotRef::new(delta.container, change.index), change.stack.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use invsys_core::PeerId;
    use invsys_inventory::{
        Capacity, ContainerSnapshot, ItemDefinition, ItemTable, SlotChange, TransactionId,
    };
    use std::sync::Arc;
    use std::time::Duration;

    const BAG: ContainerId = ContainerId::from_u128(0xBA6);

    fn engine() -> TransactionEngine {
        let table = ItemTable::builder()
            .item(ItemDefinition::new("potion", "Potion").with_max_stack(10))
            .item(ItemDefinition::new("sword", "Sword"))
            .build()
            .unwrap();
        TransactionEngine::new(Arc::new(table))
    }

    fn replicas(slots: Vec<Option<ItemStack>>) -> ReplicaSynchronizer {
        let mut sync = ReplicaSynchronizer::new(PeerId(1), SyncConfig::testing());
        sync.adopt(
            ContainerSnapshot {
                container: BAG,
                capacity: Capacity::Fixed(3),
                version: Version::new(5),
                slots,
            },
            PeerId::HOST,
        );
        sync
    }

    fn move_tx(from: u32, to: u32) -> Transaction {
        Transaction::builder(BAG)
            .move_stack(SlotRef::new(BAG, from), SlotRef::new(BAG, to))
            .build()
    }

    fn authoritative(version: u64, changes: Vec<(u32, Option<ItemStack>)>) -> ContainerDelta {
        ContainerDelta {
            container: BAG,
            version: Version::new(version),
            changes: changes
                .into_iter()
                .map(|(index, stack)| SlotChange { index, stack })
                .collect(),
        }
    }

    fn sword() -> Option<ItemStack> {
        Some(ItemStack::single("sword"))
    }

    #[test]
    fn test_view_shows_prediction_without_touching_replica() {
        let now = Instant::now();
        let sync = replicas(vec![sword(), None, None]);
        let mut overlay = SpeculativeOverlay::new(engine(), SyncConfig::testing());

        overlay.speculate(RequestId::from_raw(1), &move_tx(0, 1), &sync, now).unwrap();
        let view = overlay.view(BAG, &sync).unwrap();
        assert_eq!(view[0], SlotView::Speculative(None));
        assert_eq!(view[1], SlotView::Speculative(sword()));
        assert_eq!(view[2], SlotView::Confirmed(None));
        assert_eq!(sync.replica(BAG).unwrap().stack(0), sword().as_ref());
    }

    #[test]
    fn test_confirmed_by_result_and_delta() {
        let now = Instant::now();
        let mut sync = replicas(vec![sword(), None, None]);
        let mut overlay = SpeculativeOverlay::new(engine(), SyncConfig::testing());
        let request = RequestId::from_raw(1);
        let predicted = overlay.speculate(request, &move_tx(0, 1), &sync, now).unwrap();

        let delta = authoritative(6, vec![(0, None), (1, sword())]);
        let applied = AppliedDelta {
            transaction: TransactionId::new(),
            deltas: vec![delta.clone()],
        };
        assert_eq!(slot_changes(&applied), slot_changes(&predicted));

        assert!(overlay.on_result(request, &Ok(applied), &sync).is_empty());
        let landed = sync.on_delta(delta, now);
        assert_eq!(
            overlay.reconcile(&landed, &sync),
            vec![SpeculationOutcome::Confirmed(request)]
        );
        assert_eq!(overlay.slot(SlotRef::new(BAG, 1), &sync), Some(SlotView::Confirmed(sword())));
    }

    #[test]
    fn test_delta_before_result_confirms() {
        let now = Instant::now();
        let mut sync = replicas(vec![sword(), None, None]);
        let mut overlay = SpeculativeOverlay::new(engine(), SyncConfig::testing());
        let request = RequestId::from_raw(1);
        overlay.speculate(request, &move_tx(0, 1), &sync, now).unwrap();

        let landed = sync.on_delta(authoritative(6, vec![(0, None), (1, sword())]), now);
        assert_eq!(
            overlay.reconcile(&landed, &sync),
            vec![SpeculationOutcome::Confirmed(request)]
        );
        assert_eq!(overlay.pending_count(), 0);
    }

    #[test]
    fn test_rejection_reverts() {
        let now = Instant::now();
        let sync = replicas(vec![sword(), None, None]);
        let mut overlay = SpeculativeOverlay::new(engine(), SyncConfig::testing());
        let request = RequestId::from_raw(1);
        overlay.speculate(request, &move_tx(0, 1), &sync, now).unwrap();

        let outcomes = overlay.on_result(request, &Err(TransactionError::AuthorityDenied(BAG)), &sync);
        assert_eq!(
            outcomes,
            vec![SpeculationOutcome::Reverted {
                request,
                reason: RevertReason::Rejected(TransactionError::AuthorityDenied(BAG)),
            }]
        );
        assert_eq!(overlay.view(BAG, &sync).unwrap()[0], SlotView::Confirmed(sword()));
    }

    #[test]
    fn test_conflicting_delta_reverts_with_dependents() {
        let now = Instant::now();
        let mut sync = replicas(vec![sword(), None, None]);
        let mut overlay = SpeculativeOverlay::new(engine(), SyncConfig::testing());
        let first = RequestId::from_raw(1);
        let second = RequestId::from_raw(2);
        overlay.speculate(first, &move_tx(0, 1), &sync, now).unwrap();
        // Only valid on top of the first prediction
        overlay.speculate(second, &move_tx(1, 2), &sync, now).unwrap();
        assert_eq!(overlay.view(BAG, &sync).unwrap()[2], SlotView::Speculative(sword()));

        // Someone else filled slot 1 first
        let potions = Some(ItemStack::new("potion", 3));
        let landed = sync.on_delta(authoritative(6, vec![(1, potions)]), now);
        let outcomes = overlay.reconcile(&landed, &sync);
        assert_eq!(
            outcomes,
            vec![
                SpeculationOutcome::Reverted { request: first, reason: RevertReason::Conflict },
                SpeculationOutcome::Reverted { request: second, reason: RevertReason::Cascade(first) },
            ]
        );
        assert!(overlay.view(BAG, &sync).unwrap().iter().all(|s| !s.is_speculative()));
    }

    #[test]
    fn test_timeout_reverts() {
        let start = Instant::now();
        let sync = replicas(vec![sword(), None, None]);
        let mut overlay = SpeculativeOverlay::new(engine(), SyncConfig::testing());
        overlay.speculate(RequestId::from_raw(1), &move_tx(0, 1), &sync, start).unwrap();

        assert!(overlay.expire(start + Duration::from_millis(100)).is_empty());
        let outcomes = overlay.expire(start + Duration::from_millis(250));
        assert!(matches!(
            outcomes.as_slice(),
            [SpeculationOutcome::Reverted { reason: RevertReason::Timeout, .. }]
        ));
    }

    #[test]
    fn test_local_failure_records_nothing() {
        let sync = replicas(vec![None, None, None]);
        let mut overlay = SpeculativeOverlay::new(engine(), SyncConfig::testing());
        let err = overlay
            .speculate(RequestId::from_raw(1), &move_tx(0, 1), &sync, Instant::now())
            .unwrap_err();
        assert_eq!(err, TransactionError::EmptySlot(SlotRef::new(BAG, 0)));
        assert_eq!(overlay.pending_count(), 0);
    }
}
