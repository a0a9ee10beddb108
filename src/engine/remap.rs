//! Entity reference remapping.
//!
//! After a group of entities is cloned, components of the clones still hold
//! the *source* entities in their `Entity` fields. An [`EntityRemapper`]
//! records the `source -> clone` pairs of one clone group and rewrites those
//! fields in place, using the byte offsets recorded in each component's
//! descriptor. References to entities outside the group are left untouched.

use std::collections::HashMap;
use std::mem::size_of;

use crate::engine::entity::Entity;


/// `source -> target` table for one clone group.
#[derive(Debug, Default)]
pub struct EntityRemapper {
    map: HashMap<Entity, Entity>,
}

impl EntityRemapper {
    /// Creates an empty remapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that references to `source` should point at `target`.
    #[inline]
    pub fn add(&mut self, source: Entity, target: Entity) {
        self.map.insert(source, target);
    }

    /// Forgets all pairs, keeping the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Number of recorded pairs.
    #[inline]
    pub fn len(&self) -> usize { self.map.len() }

    /// Returns `true` when no pair is recorded.
    #[inline]
    pub fn is_empty(&self) -> bool { self.map.is_empty() }

    /// Maps `entity`, or returns it unchanged if it is not a source.
    #[inline]
    pub fn remap(&self, entity: Entity) -> Entity {
        self.map.get(&entity).copied().unwrap_or(entity)
    }

    /// Rewrites the `Entity` fields of every element in `bytes`.
    ///
    /// `bytes` holds whole elements of `element_size` bytes; `offsets` are
    /// the byte offsets of entity fields inside one element.

    pub fn remap_elements(&self, bytes: &mut [u8], element_size: usize, offsets: &[u32]) {
        if offsets.is_empty() || self.map.is_empty() { return; }
        const ENTITY_BYTES: usize = size_of::<Entity>();

        for element in bytes.chunks_exact_mut(element_size) {
            for &offset in offsets {
                let field = &mut element[offset as usize..offset as usize + ENTITY_BYTES];
                let source: Entity = bytemuck::pod_read_unaligned(field);
                let target = self.remap(source);
                if target != source {
                    field.copy_from_slice(bytemuck::bytes_of(&target));
                }
            }
        }
    }
}
