//! Item definitions and stacks

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Catalog key of an item type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemTypeId(String);

impl ItemTypeId {
    /// Create an item type id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemTypeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ItemTypeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ItemTypeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Item category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ItemCategory {
    /// Generic item
    #[default]
    Item,
    /// Armor pieces
    Armor,
    /// Readable notes
    Note,
    /// Quest items
    QuestItem,
    /// Weapons
    Weapon,
    /// Crafting materials
    Material,
    /// Potions, food
    Consumable,
    /// Game-defined category
    Custom(u32),
}

/// Immutable attributes of one item type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDefinition {
    /// Unique identifier
    pub id: ItemTypeId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Category
    #[serde(default)]
    pub category: ItemCategory,
    /// Maximum stack size (1 = not stackable)
    #[serde(default = "default_max_stack")]
    pub max_stack: u32,
    /// Weight per item
    #[serde(default)]
    pub weight: f32,
}

fn default_max_stack() -> u32 {
    1
}

impl ItemDefinition {
    /// Create a new item definition
    pub fn new(id: impl Into<ItemTypeId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category: ItemCategory::default(),
            max_stack: 1,
            weight: 0.0,
        }
    }

    /// Set description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Set category
    pub fn with_category(mut self, category: ItemCategory) -> Self {
        self.category = category;
        self
    }

    /// Set max stack size
    ///
    /// Zero is kept as given and rejected when the table is built.
    pub fn with_max_stack(mut self, max: u32) -> Self {
        self.max_stack = max;
        self
    }

    /// Set weight
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Check if stackable
    pub fn is_stackable(&self) -> bool {
        self.max_stack > 1
    }
}

/// A quantity of identical items occupying one slot
///
/// Quantity is always at least one inside a container: an emptied stack is
/// stored as an empty slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemStack {
    /// Item type (references an ItemDefinition)
    pub item: ItemTypeId,
    /// Quantity
    pub quantity: u32,
}

impl ItemStack {
    /// Create a new item stack
    pub fn new(item: impl Into<ItemTypeId>, quantity: u32) -> Self {
        Self {
            item: item.into(),
            quantity,
        }
    }

    /// Create a single item
    pub fn single(item: impl Into<ItemTypeId>) -> Self {
        Self::new(item, 1)
    }

    /// Check if this stack holds nothing
    pub fn is_empty(&self) -> bool {
        self.quantity == 0
    }

    /// Check if both stacks hold the same item type
    pub fn can_merge(&self, other: &ItemStack) -> bool {
        self.item == other.item
    }

    /// Room left before `max_stack`
    pub fn space(&self, max_stack: u32) -> u32 {
        max_stack.saturating_sub(self.quantity)
    }

    /// Add up to `amount`, returning the overflow
    pub fn add(&mut self, amount: u32, max_stack: u32) -> u32 {
        let to_add = amount.min(self.space(max_stack));
        self.quantity += to_add;
        amount - to_add
    }

    /// Take `amount` off into a new stack
    ///
    /// Only splits when `0 < amount < quantity`.
    pub fn split(&mut self, amount: u32) -> Option<ItemStack> {
        if amount == 0 || amount >= self.quantity {
            return None;
        }
        self.quantity -= amount;
        Some(ItemStack::new(self.item.clone(), amount))
    }

    /// Turn an empty stack into an empty slot
    pub fn normalized(self) -> Option<ItemStack> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for ItemStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x{}", self.item, self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_definition() {
        let item = ItemDefinition::new("health_potion", "Health Potion")
            .with_category(ItemCategory::Consumable)
            .with_max_stack(10)
            .with_weight(0.5);

        assert_eq!(item.id.as_str(), "health_potion");
        assert!(item.is_stackable());
        assert!(!ItemDefinition::new("sword", "Sword").is_stackable());
    }

    #[test]
    fn test_item_stack_add() {
        let mut stack = ItemStack::new("potion", 8);
        let overflow = stack.add(5, 10);
        assert_eq!(stack.quantity, 10);
        assert_eq!(overflow, 3);
        assert_eq!(stack.space(10), 0);
    }

    #[test]
    fn test_stack_split() {
        let mut stack = ItemStack::new("arrow", 20);
        let part = stack.split(5).unwrap();
        assert_eq!(stack.quantity, 15);
        assert_eq!(part.quantity, 5);

        assert!(stack.split(0).is_none());
        assert!(stack.split(15).is_none());
        assert_eq!(stack.quantity, 15);
    }

    #[test]
    fn test_normalized() {
        assert!(ItemStack::new("arrow", 0).normalized().is_none());
        assert!(ItemStack::new("arrow", 1).normalized().is_some());
    }

    #[test]
    fn test_definition_serde_defaults() {
        let def: ItemDefinition = serde_json::from_str(r#"{"id":"rock"}"#).unwrap();
        assert_eq!(def.max_stack, 1);
        assert_eq!(def.category, ItemCategory::Item);
    }
}
