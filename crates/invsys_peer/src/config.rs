//! Peer configuration

use crate::error::PeerResult;
use crate::persistence::SaveFormat;
use invsys_core::PeerId;
use invsys_inventory::engine::DEFAULT_UNBOUNDED_SLOT_LIMIT;
use invsys_net::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings of one simulation side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Identity of this side on the link
    #[serde(default = "default_peer_id")]
    pub peer_id: PeerId,

    /// Replication and handshake timing
    #[serde(default)]
    pub sync: SyncConfig,

    /// Directory save slots are written to
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,

    /// Encoding of save files
    #[serde(default)]
    pub save_format: SaveFormat,

    /// Hand containers to other sides on request
    #[serde(default = "default_allow_authority_transfer")]
    pub allow_authority_transfer: bool,

    /// Slots an unbounded container may grow to
    #[serde(default = "default_unbounded_slot_limit")]
    pub unbounded_slot_limit: u32,
}

fn default_peer_id() -> PeerId {
    PeerId::HOST
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("saves")
}

fn default_allow_authority_transfer() -> bool {
    true
}

fn default_unbounded_slot_limit() -> u32 {
    DEFAULT_UNBOUNDED_SLOT_LIMIT
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            peer_id: default_peer_id(),
            sync: SyncConfig::default(),
            save_dir: default_save_dir(),
            save_format: SaveFormat::default(),
            allow_authority_transfer: default_allow_authority_transfer(),
            unbounded_slot_limit: default_unbounded_slot_limit(),
        }
    }
}

impl PeerConfig {
    /// Human readable saves, default timing
    pub fn development(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            save_format: SaveFormat::Json,
            ..Self::default()
        }
    }

    /// Short timeouts for tests driven by a synthetic clock
    pub fn testing(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            sync: SyncConfig::testing(),
            unbounded_slot_limit: 64,
            ..Self::default()
        }
    }

    /// Parse from TOML text
    pub fn from_toml_str(source: &str) -> PeerResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> PeerResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Set the peer identity
    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = peer_id;
        self
    }

    /// Set the save directory
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = dir.into();
        self
    }
}
