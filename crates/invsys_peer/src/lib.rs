//! # invsys_peer - Simulation Side
//!
//! Ties containers, transactions, replication and authority together into one
//! side of a networked inventory simulation.
//!
//! # Features
//!
//! - Container lifecycle following owner spawn and despawn
//! - Transaction requests routed to the local engine or the remote authority
//! - Speculative views on observed containers
//! - Authority handover between sides
//! - Save slots in JSON or binary
//! - Event channel for gameplay and UI
//!
//! # Example
//!
//! ```ignore
//! use invsys_peer::prelude::*;
//!
//! let hub = LoopbackHub::new();
//! let mut host = InventoryPeer::new(PeerConfig::default(), catalog, hub.connect(PeerId::HOST));
//!
//! let bag = host.on_owner_spawned(OwnerKind::Character, "Ada", Capacity::Fixed(20));
//! let tx = Transaction::builder(bag).insert(bag, ItemStack::new("potion", 3)).build();
//! host.request_transaction(tx, Instant::now())?;
//! host.tick(Instant::now())?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod peer;
pub mod persistence;

pub mod prelude {
    pub use crate::config::PeerConfig;
    pub use crate::error::{PeerError, PeerResult, SaveError};
    pub use crate::events::PeerEvent;
    pub use crate::lifecycle::Disposition;
    pub use crate::peer::{InventoryPeer, Submission};
    pub use crate::persistence::{
        InventorySave, SaveFormat, SaveHeader, SaveManager, SaveSlot, SaveState, SavedContainer,
        SAVE_VERSION,
    };
}

pub use prelude::*;
