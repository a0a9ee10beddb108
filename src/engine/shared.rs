//! Deduplicated shared component values.
//!
//! A shared component is stored once per chunk rather than once per entity:
//! every chunk carries one `u32` index per shared type in its signature, and
//! the index points into this table. Entities whose shared values differ can
//! therefore never live in the same chunk.
//!
//! ## Reference counting
//! - Index `0` is the default (all-zero) value of every shared type. It is
//!   never stored and never counted.
//! - Every live chunk holds one reference to each non-default index it
//!   carries. References are taken when the chunk is created and dropped
//!   when it empties.
//! - Callers that intern a value without placing it in a chunk hold a
//!   temporary reference and must release it.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};

use crate::engine::types::TypeIndex;


/// Index of the default value of every shared type.
pub const DEFAULT_SHARED_INDEX: u32 = 0;

/// A shared value paired with its component type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SharedValue {
    /// Shared component type.
    pub type_index: TypeIndex,

    /// Raw value bytes.
    pub bytes: Box<[u8]>,
}

impl SharedValue {
    /// Captures `value` for `type_index`.
    pub fn new<T: Pod>(type_index: TypeIndex, value: &T) -> Self {
        Self { type_index, bytes: bytemuck::bytes_of(value).into() }
    }
}

struct SharedEntry {
    value: SharedValue,
    refcount: u32,
}

/// Deduplicating, reference-counted table of shared component values.
///
/// ## Invariants
/// - `lookup[value] == i` iff `entries[i]` holds `value`.
/// - An entry is removed as soon as its refcount reaches zero.

pub struct SharedValueTable {
    entries: Vec<Option<SharedEntry>>,
    free: Vec<u32>,
    lookup: HashMap<SharedValue, u32>,
}

impl Default for SharedValueTable {
    fn default() -> Self { Self::new() }
}

impl SharedValueTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self { entries: vec![None], free: Vec::new(), lookup: HashMap::new() }
    }

    /// Interns `value` and takes one reference to it.
    ///
    /// ## Behavior
    /// All-zero values map to [`DEFAULT_SHARED_INDEX`] and take no
    /// reference.

    pub fn acquire(&mut self, value: SharedValue) -> u32 {
        if value.bytes.iter().all(|&b| b == 0) {
            return DEFAULT_SHARED_INDEX;
        }
        if let Some(&index) = self.lookup.get(&value) {
            self.retain(index);
            return index;
        }

        let entry = SharedEntry { value: value.clone(), refcount: 1 };
        let index = match self.free.pop() {
            Some(index) => {
                self.entries[index as usize] = Some(entry);
                index
            }
            None => {
                self.entries.push(Some(entry));
                (self.entries.len() - 1) as u32
            }
        };
        self.lookup.insert(value, index);
        index
    }

    /// Takes one more reference to `index`.
    pub fn retain(&mut self, index: u32) {
        if index == DEFAULT_SHARED_INDEX { return; }
        match self.entries.get_mut(index as usize) {
            Some(Some(entry)) => entry.refcount += 1,
            _ => panic!("retain of unknown shared value index {index}"),
        }
    }

    /// Drops one reference to `index`, freeing the entry at zero.
    pub fn release(&mut self, index: u32) {
        if index == DEFAULT_SHARED_INDEX { return; }
        let Some(Some(entry)) = self.entries.get_mut(index as usize) else {
            panic!("release of unknown shared value index {index}");
        };

        entry.refcount -= 1;
        if entry.refcount == 0 {
            if let Some(entry) = self.entries[index as usize].take() {
                self.lookup.remove(&entry.value);
            }
            self.free.push(index);
        }
    }

    /// Raw bytes stored at `index`; `None` for the default value.
    pub fn bytes(&self, index: u32) -> Option<&[u8]> {
        self.entries
            .get(index as usize)
            .and_then(|e| e.as_ref())
            .map(|e| &*e.value.bytes)
    }

    /// Reads the value at `index` as `T`, returning the zero value for the
    /// default index.
    pub fn read<T: Pod>(&self, index: u32) -> T {
        match self.bytes(index) {
            Some(bytes) => bytemuck::pod_read_unaligned(bytes),
            None => <T as Zeroable>::zeroed(),
        }
    }

    /// Reference count of `index` (`0` for the default or a free slot).
    pub fn refcount(&self, index: u32) -> u32 {
        self.entries
            .get(index as usize)
            .and_then(|e| e.as_ref())
            .map_or(0, |e| e.refcount)
    }

    /// Number of stored (non-default) values.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// Returns `true` when only the default value exists.
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}
