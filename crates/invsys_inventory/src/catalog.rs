//! Item definition table
//!
//! The table is built once, validated, and then only read. A process-wide
//! instance can be installed at startup with [`install`]; there is no way to
//! mutate or replace it afterwards.
//!
//! ```ignore
//! let table = ItemTable::builder()
//!     .item(ItemDefinition::new("potion", "Potion").with_max_stack(10))
//!     .item(ItemDefinition::new("sword", "Sword").with_category(ItemCategory::Weapon))
//!     .build()?;
//! catalog::install(table)?;
//! ```

use crate::error::CatalogError;
use crate::item::{ItemDefinition, ItemTypeId};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only mapping from item type to its definition
#[derive(Debug, Clone, Default)]
pub struct ItemTable {
    items: HashMap<ItemTypeId, ItemDefinition>,
}

impl ItemTable {
    /// Start building a table
    pub fn builder() -> ItemTableBuilder {
        ItemTableBuilder::default()
    }

    /// Parse a table from TOML
    ///
    /// ```toml
    /// [[items]]
    /// id = "potion"
    /// name = "Potion"
    /// category = "Consumable"
    /// max_stack = 10
    /// weight = 0.5
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, CatalogError> {
        #[derive(Deserialize)]
        struct CatalogFile {
            #[serde(default)]
            items: Vec<ItemDefinition>,
        }

        let file: CatalogFile = toml::from_str(source)?;
        file.items
            .into_iter()
            .fold(ItemTableBuilder::default(), ItemTableBuilder::item)
            .build()
    }

    /// Look up a definition
    pub fn get(&self, id: &str) -> Option<&ItemDefinition> {
        self.items.get(id)
    }

    /// Check if an item type is defined
    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// Max stack size of an item type
    pub fn max_stack(&self, id: &str) -> Option<u32> {
        self.get(id).map(|def| def.max_stack)
    }

    /// Number of defined item types
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the table defines nothing
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over all definitions
    pub fn iter(&self) -> impl Iterator<Item = &ItemDefinition> {
        self.items.values()
    }
}

/// Collects definitions and validates them into an [`ItemTable`]
#[derive(Debug, Default)]
pub struct ItemTableBuilder {
    items: Vec<ItemDefinition>,
}

impl ItemTableBuilder {
    /// Add a definition
    pub fn item(mut self, definition: ItemDefinition) -> Self {
        self.items.push(definition);
        self
    }

    /// Validate and build the table
    pub fn build(self) -> Result<ItemTable, CatalogError> {
        let mut items = HashMap::with_capacity(self.items.len());
        for def in self.items {
            if def.max_stack == 0 {
                return Err(CatalogError::InvalidMaxStack(def.id));
            }
            if !def.weight.is_finite() || def.weight < 0.0 {
                return Err(CatalogError::InvalidWeight(def.id));
            }
            if items.contains_key(&def.id) {
                return Err(CatalogError::DuplicateItem(def.id));
            }
            items.insert(def.id.clone(), def);
        }
        Ok(ItemTable { items })
    }
}

static GLOBAL: OnceCell<Arc<ItemTable>> = OnceCell::new();

/// Install the process-wide catalog
///
/// Succeeds once; later calls fail with [`CatalogError::AlreadyInstalled`].
pub fn install(table: ItemTable) -> Result<Arc<ItemTable>, CatalogError> {
    let table = Arc::new(table);
    GLOBAL
        .set(table.clone())
        .map_err(|_| CatalogError::AlreadyInstalled)?;
    log::info!("Installed item catalog with {} item types", table.len());
    Ok(table)
}

/// The process-wide catalog
pub fn global() -> Result<Arc<ItemTable>, CatalogError> {
    GLOBAL.get().cloned().ok_or(CatalogError::NotInstalled)
}
