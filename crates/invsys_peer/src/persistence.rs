//! Save/load of authoritative containers

use crate::error::SaveError;
use invsys_core::OwnerKind;
use invsys_inventory::ContainerSnapshot;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current save layout version
pub const SAVE_VERSION: u32 = 1;

/// Encoding of a save slot on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SaveFormat {
    /// Pretty-printed, diffable
    Json,
    #[default]
    Binary,
}

impl SaveFormat {
    fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Binary => "sav",
        }
    }

    fn encode(&self, save: &InventorySave) -> Result<Vec<u8>, SaveError> {
        let encoded = match self {
            Self::Json => serde_json::to_vec_pretty(save).map_err(|e| e.to_string()),
            Self::Binary => bincode::serialize(save).map_err(|e| e.to_string()),
        };
        encoded.map_err(SaveError::Serialization)
    }

    fn decode(&self, bytes: &[u8]) -> Result<InventorySave, SaveError> {
        let decoded = match self {
            Self::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            Self::Binary => bincode::deserialize(bytes).map_err(|e| e.to_string()),
        };
        decoded.map_err(SaveError::Deserialization)
    }
}

/// Where a side stands with respect to persisting its containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SaveState {
    /// Nothing was ever changed or loaded
    #[default]
    None,
    /// Committed changes are not on disk yet
    NeedsSaving,
    /// A save record is being collected
    Pending,
    /// A save record is collected and ready to be written
    SaveReady,
    /// Everything committed so far is on disk
    Saved,
    /// The last write failed
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveHeader {
    /// Layout version the record was written with
    pub version: u32,
    pub name: String,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
}

impl SaveHeader {
    /// Header for a record written now
    pub fn new(name: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        Self {
            version: SAVE_VERSION,
            name: name.into(),
            timestamp,
        }
    }
}

/// One saved container and the actor that owned it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedContainer {
    pub owner_kind: OwnerKind,
    pub owner_name: String,
    pub platform_id: Option<String>,
    pub snapshot: ContainerSnapshot,
}

/// Complete save record of one side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySave {
    pub header: SaveHeader,
    pub containers: Vec<SavedContainer>,
}

impl InventorySave {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            header: SaveHeader::new(name),
            containers: Vec::new(),
        }
    }

    /// Total items across every saved container
    pub fn total_quantity(&self) -> u64 {
        self.containers
            .iter()
            .map(|c| c.snapshot.total_quantity())
            .sum()
    }
}

/// A slot found on disk
#[derive(Debug, Clone)]
pub struct SaveSlot {
    pub id: String,
    pub path: PathBuf,
    pub header: SaveHeader,
}

/// Named save slots, one file each, in a single directory
pub struct SaveManager {
    root: PathBuf,
    format: SaveFormat,
}

impl SaveManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            format: SaveFormat::default(),
        }
    }

    pub fn with_format(mut self, format: SaveFormat) -> Self {
        self.format = format;
        self
    }

    /// Directory slots live in
    pub fn save_dir(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, slot: &str) -> PathBuf {
        self.root.join(slot).with_extension(self.format.extension())
    }

    /// Write `save` into `slot`, replacing what was there
    pub fn save(&mut self, slot: &str, save: &InventorySave) -> Result<(), SaveError> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_of(slot);
        fs::write(&path, self.format.encode(save)?)?;
        log::info!("Saved {} containers to {}", save.containers.len(), path.display());
        Ok(())
    }

    /// Read `slot`. Records from a newer layout are refused.
    pub fn load(&self, slot: &str) -> Result<InventorySave, SaveError> {
        let path = self.path_of(slot);
        if !path.is_file() {
            return Err(SaveError::SlotNotFound(slot.to_string()));
        }
        let save = self.format.decode(&fs::read(&path)?)?;
        if save.header.version > SAVE_VERSION {
            return Err(SaveError::VersionMismatch(save.header.version, SAVE_VERSION));
        }
        Ok(save)
    }

    /// Remove `slot`. Missing slots are not an error.
    pub fn delete(&mut self, slot: &str) -> Result<(), SaveError> {
        match fs::remove_file(self.path_of(slot)) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    pub fn exists(&self, slot: &str) -> bool {
        self.path_of(slot).is_file()
    }

    /// Every readable slot in the directory, newest first
    pub fn list_slots(&self) -> Result<Vec<SaveSlot>, SaveError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let wanted = Some(std::ffi::OsStr::new(self.format.extension()));
        let mut slots = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension() != wanted {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match self.load(id) {
                Ok(save) => slots.push(SaveSlot {
                    id: id.to_string(),
                    header: save.header,
                    path: path.clone(),
                }),
                Err(err) => log::warn!("Skipping unreadable save {}: {}", path.display(), err),
            }
        }
        slots.sort_by(|a, b| {
            b.header
                .timestamp
                .cmp(&a.header.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(slots)
    }
}
