//! # invsys_core - Inventory System Core
//!
//! Small, dependency-light primitives shared by every inventory crate:
//! - **Ids**: container, peer and request identifiers
//! - **Versions**: the per-container commit counter used for replication
//! - **Handles**: generational handles and the owner registry that lets a
//!   container refer to its owning actor without holding a pointer to it

pub mod handle;
pub mod id;
pub mod owner;
pub mod version;

pub use handle::*;
pub use id::*;
pub use owner::*;
pub use version::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::handle::{Handle, HandleMap};
    pub use crate::id::{ContainerId, PeerId, RequestId};
    pub use crate::owner::{Owner, OwnerKind, OwnerRef, OwnerRegistry};
    pub use crate::version::Version;
}
