//! Owning actors and the registry that resolves weak owner references

use crate::handle::{Handle, HandleMap};
use serde::{Deserialize, Serialize};

/// What kind of actor owns a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerKind {
    /// A player or NPC carrying an inventory
    Character,
    /// A placed storage object (chest, crate, locker)
    Container,
    /// A loose pickup lying in the world
    WorldPickup,
}

/// An actor that can own an inventory container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Actor kind
    pub kind: OwnerKind,
    /// Display name, also used to key saves
    pub name: String,
    /// Identifier of the platform account behind the actor, if any
    pub platform_id: Option<String>,
}

impl Owner {
    /// Create an owner with no platform account
    pub fn new(kind: OwnerKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            platform_id: None,
        }
    }

    /// Attach a platform account id
    pub fn with_platform_id(mut self, id: impl Into<String>) -> Self {
        self.platform_id = Some(id.into());
        self
    }
}

/// Weak reference from a container to its owner
///
/// Resolving it after the owner despawned yields `None`.
pub type OwnerRef = Handle<Owner>;

/// Side-local table of live owners
#[derive(Default)]
pub struct OwnerRegistry {
    owners: HandleMap<Owner>,
}

impl OwnerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly spawned owner
    pub fn spawn(&mut self, owner: Owner) -> OwnerRef {
        self.owners.insert(owner)
    }

    /// Remove a despawned owner. Outstanding refs become stale.
    pub fn despawn(&mut self, owner: OwnerRef) -> Option<Owner> {
        self.owners.remove(owner)
    }

    /// Look up a live owner
    pub fn resolve(&self, owner: OwnerRef) -> Option<&Owner> {
        self.owners.get(owner)
    }

    /// Check if the owner is still alive
    pub fn is_alive(&self, owner: OwnerRef) -> bool {
        self.owners.contains(owner)
    }

    /// Number of live owners
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Check if no owners are registered
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Iterate over live owners
    pub fn iter(&self) -> impl Iterator<Item = (OwnerRef, &Owner)> {
        self.owners.iter()
    }
}
