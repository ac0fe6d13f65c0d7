//! Generational handles
//!
//! A handle names a slot in a [`HandleMap`] together with the generation the
//! slot had when the value was inserted. Once the value is removed the slot's
//! generation moves on, so a stale handle resolves to `None` instead of to
//! whatever reuses the slot. Containers use this to point at their owner
//! without keeping the owner alive.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A weak, typed reference into a [`HandleMap<T>`]
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Handle<T> {
    index: u32,
    generation: u32,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    const NULL_INDEX: u32 = u32::MAX;

    /// Create a handle from its parts
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// A handle that never resolves
    #[inline]
    pub const fn null() -> Self {
        Self::new(Self::NULL_INDEX, 0)
    }

    /// Check if this handle is null
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.index == Self::NULL_INDEX
    }

    /// Slot index
    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation at insertion time
    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

// Manual impls so `T` needs no bounds
impl<T> Clone for Handle<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = std::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        if self.is_null() {
            write!(f, "Handle<{}>(null)", short)
        } else {
            write!(f, "Handle<{}>({}g{})", short, self.index, self.generation)
        }
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}

/// One slot of a [`HandleMap`]
enum Entry<T> {
    Occupied { generation: u32, value: T },
    /// `next` links the vacant chain
    Vacant { generation: u32, next: Option<u32> },
}

impl<T> Entry<T> {
    fn generation(&self) -> u32 {
        match self {
            Entry::Occupied { generation, .. } | Entry::Vacant { generation, .. } => *generation,
        }
    }
}

/// Values addressed by generational handles
///
/// Removed slots are chained and reused newest first, with their generation
/// bumped so that old handles stop resolving.
pub struct HandleMap<T> {
    entries: Vec<Entry<T>>,
    vacant: Option<u32>,
    len: usize,
}

impl<T> HandleMap<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            vacant: None,
            len: 0,
        }
    }

    /// Store `value` and return the handle that reaches it
    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.len += 1;
        if let Some(index) = self.vacant {
            let entry = &mut self.entries[index as usize];
            let (generation, next) = match *entry {
                Entry::Vacant { generation, next } => (generation, next),
                Entry::Occupied { generation, .. } => (generation, None),
            };
            *entry = Entry::Occupied { generation, value };
            self.vacant = next;
            return Handle::new(index, generation);
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry::Occupied { generation: 0, value });
        Handle::new(index, 0)
    }

    /// Take the value out. Every copy of `handle` goes stale.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        let index = handle.index();
        let vacated = Entry::Vacant {
            generation: handle.generation().wrapping_add(1),
            next: self.vacant,
        };
        match std::mem::replace(&mut self.entries[index as usize], vacated) {
            Entry::Occupied { value, .. } => {
                self.vacant = Some(index);
                self.len -= 1;
                Some(value)
            }
            Entry::Vacant { .. } => None,
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.entries.get(handle.index() as usize)? {
            Entry::Occupied { generation, value } if *generation == handle.generation() => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        match self.entries.get_mut(handle.index() as usize)? {
            Entry::Occupied { generation, value } if *generation == handle.generation() => Some(value),
            _ => None,
        }
    }

    /// Whether `handle` still resolves
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live values with their handles, in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.entries.iter().enumerate().filter_map(|(index, entry)| match entry {
            Entry::Occupied { value, .. } => Some((Handle::new(index as u32, entry.generation()), value)),
            Entry::Vacant { .. } => None,
        })
    }
}

impl<T> Default for HandleMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
