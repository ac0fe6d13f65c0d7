//! Container lifecycle driven by gameplay
//!
//! Containers follow the actors that own them: spawning an owner creates its
//! container, despawning dissolves it, and dropped items become world pickups.

use crate::error::{PeerError, PeerResult};
use crate::events::PeerEvent;
use crate::peer::InventoryPeer;
use invsys_core::{ContainerId, Owner, OwnerKind};
use invsys_inventory::{
    AppliedDelta, Capacity, InventoryContainer, ItemStack, SlotRef, Transaction, TransactionError,
    TransactionId,
};
use invsys_net::{NetMessage, Transport};

/// Where the contents of a dissolved container go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Into another local container
    TransferTo(ContainerId),
    /// Into a new world pickup
    DropToWorld,
}

impl<T: Transport> InventoryPeer<T> {
    /// Create the container of a newly spawned owner
    pub fn on_owner_spawned(
        &mut self,
        kind: OwnerKind,
        name: impl Into<String>,
        capacity: Capacity,
    ) -> ContainerId {
        self.spawn_container(Owner::new(kind, name), capacity)
    }

    /// Create a container for a fully described owner
    pub fn spawn_container(&mut self, owner: Owner, capacity: Capacity) -> ContainerId {
        let kind = owner.kind;
        let owner = self.owners.spawn(owner);
        let container = ContainerId::new();
        self.store
            .insert(InventoryContainer::new(container, owner, capacity));
        self.resolver.claim(container);
        log::debug!("{} spawned {:?} container {}", self.local_peer(), kind, container);
        self.events
            .emit(PeerEvent::ContainerSpawned { container, kind });
        container
    }

    /// The owner left the world: its items drop where it stood
    ///
    /// Returns the pickup holding the items, if there were any.
    pub fn on_owner_despawned(&mut self, container: ContainerId) -> PeerResult<Option<ContainerId>> {
        self.dissolve(container, Disposition::DropToWorld)
    }

    /// Empty a container into `disposition` and delete it
    ///
    /// Moving the contents is one transaction, so nothing is lost or
    /// duplicated. Returns the container that received the items.
    pub fn dissolve(
        &mut self,
        container: ContainerId,
        disposition: Disposition,
    ) -> PeerResult<Option<ContainerId>> {
        self.require_authority(container)?;
        if disposition == Disposition::TransferTo(container) {
            return Err(PeerError::SelfTransfer(container));
        }

        let contents = self.contents(container)?;
        let target = match disposition {
            _ if contents.is_empty() => None,
            Disposition::TransferTo(target) => Some(target),
            Disposition::DropToWorld => Some(self.spawn_container(
                Owner::new(OwnerKind::WorldPickup, "dropped items"),
                Capacity::Unbounded,
            )),
        };

        if let Some(target) = target {
            let mut builder = Transaction::builder(container);
            for (index, stack) in contents {
                builder = builder
                    .remove(SlotRef::new(container, index), stack.quantity)
                    .insert(target, stack);
            }
            if let Err(err) = self.commit_local(&builder.build()) {
                if disposition == Disposition::DropToWorld {
                    self.remove_local(target);
                }
                return Err(err.into());
            }
        }

        self.remove_local(container);
        log::info!("Dissolved {} into {:?}", container, target);
        Ok(target)
    }

    /// Drop part of a stack into a new world pickup
    pub fn drop_item(&mut self, slot: SlotRef, quantity: u32) -> PeerResult<ContainerId> {
        self.require_authority(slot.container)?;
        let stack = self
            .store
            .read(slot.container, |c| c.stack(slot.index).cloned())
            .ok_or(PeerError::UnknownContainer(slot.container))?
            .ok_or(TransactionError::EmptySlot(slot))?;

        let pickup = self.spawn_container(
            Owner::new(OwnerKind::WorldPickup, stack.item.to_string()),
            Capacity::Unbounded,
        );
        let transaction = Transaction::builder(slot.container)
            .remove(slot, quantity)
            .insert(pickup, ItemStack::new(stack.item, quantity))
            .build();
        match self.commit_local(&transaction) {
            Ok(_) => Ok(pickup),
            Err(err) => {
                self.remove_local(pickup);
                Err(err.into())
            }
        }
    }

    /// Move everything in a pickup into `into`; the emptied pickup is removed
    ///
    /// An already empty pickup is just removed and nothing is reported changed.
    pub fn pick_up(&mut self, pickup: ContainerId, into: ContainerId) -> PeerResult<AppliedDelta> {
        self.require_authority(pickup)?;
        self.require_authority(into)?;
        let contents = self.contents(pickup)?;
        if contents.is_empty() {
            self.remove_local(pickup);
            return Ok(AppliedDelta {
                transaction: TransactionId::new(),
                deltas: Vec::new(),
            });
        }

        let mut builder = Transaction::builder(into);
        for (index, stack) in contents {
            builder = builder
                .remove(SlotRef::new(pickup, index), stack.quantity)
                .insert(into, stack);
        }
        let applied = self.commit_local(&builder.build())?;
        self.remove_local(pickup);
        Ok(applied)
    }

    fn require_authority(&self, container: ContainerId) -> PeerResult<()> {
        if self.resolver.is_authoritative(container) && self.store.contains(container) {
            return Ok(());
        }
        if self.resolver.state(container).is_some() || self.replicas.is_tracking(container) {
            Err(PeerError::NotAuthoritative(container))
        } else {
            Err(PeerError::UnknownContainer(container))
        }
    }

    fn contents(&self, container: ContainerId) -> PeerResult<Vec<(u32, ItemStack)>> {
        self.store
            .read(container, |c| {
                c.items()
                    .map(|(index, stack)| (index, stack.clone()))
                    .collect()
            })
            .ok_or(PeerError::UnknownContainer(container))
    }

    /// Delete a local container and tell its observers
    fn remove_local(&mut self, container: ContainerId) {
        if let Some(held) = self.store.remove(container) {
            self.owners.despawn(held.owner());
        }
        self.resolver.release(container);
        for peer in self.publisher.remove_container(container) {
            self.outbox
                .push((peer, NetMessage::ContainerDissolved { container }));
        }
        for outcome in self.overlay.discard_container(container) {
            self.on_speculation(outcome);
        }
        self.save_state = crate::persistence::SaveState::NeedsSaving;
        self.events
            .emit(PeerEvent::ContainerDissolved { container });
    }
}
