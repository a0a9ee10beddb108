//! # Component type catalog
//!
//! This module provides the [`TypeCatalog`], the service that assigns dense
//! [`TypeIndex`] values to component types and records everything the
//! storage engine needs to lay them out: byte size, alignment, category, a
//! stable memory-ordering key and the byte offsets of embedded entity
//! references.
//!
//! ## Design
//! - The catalog is an explicit value, constructed once and handed to the
//!   [`EntityManager`](crate::engine::manager::EntityManager). There is no
//!   process-global registry.
//! - Type indices are assigned in registration order and are only meaningful
//!   inside one catalog. Layouts never depend on them: archetype columns are
//!   ordered by [`ComponentDesc::memory_ordering`], which defaults to a
//!   FNV-1a hash of the type name.
//! - Four built-in types are always present, see [`TypeCatalog::new`].
//!
//! ## Invariants
//! - `descs[i].type_index == i` for every registered type.
//! - The identity component (`Entity`) has index [`IDENTITY_TYPE`] and
//!   memory ordering `0`, so it is first both in signatures and in memory.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::mem::{align_of, size_of};

use bytemuck::{Pod, Zeroable};

use crate::engine::entity::Entity;
use crate::engine::error::{ECSResult, RegistryError};
use crate::engine::types::{
    TypeIndex,
    IDENTITY_TYPE,
    TYPE_CAP,
    COLUMN_ALIGNMENT,
    MAX_COMPONENT_ALIGNMENT,
};


/// Storage category of a component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentCategory {
    /// Plain bytes stored in a chunk column.
    Data,

    /// Zero-sized marker; occupies no column bytes.
    Tag,

    /// Deduplicated value stored once per chunk in the shared-value table.
    Shared,

    /// Variable-length list with inline capacity and out-of-line overflow.
    Buffer,

    /// Arbitrary Rust object held in the managed store.
    Managed,
}

/// Clones a managed component value.
pub type ManagedCloneFn = fn(&(dyn Any + Send + Sync)) -> Box<dyn Any + Send + Sync>;

fn clone_managed<T: Clone + Send + Sync + 'static>(value: &(dyn Any + Send + Sync)) -> Box<dyn Any + Send + Sync> {
    match value.downcast_ref::<T>() {
        Some(v) => Box::new(v.clone()),
        None => unreachable!("managed store holds a value of the wrong type"),
    }
}

/// Describes a registered component type.
///
/// ## Fields
/// - `size` / `align` describe one element (for buffers: one buffer
///   element; for managed types: the Rust value, which never lives in a
///   chunk).
/// - `entity_offsets` are byte offsets of `Entity` fields inside one
///   element, used to remap references after cloning.
/// - `system_state` marks cleanup components that survive destruction.

#[derive(Clone, Debug)]
pub struct ComponentDesc {
    /// Index assigned by the catalog.
    pub type_index: TypeIndex,

    /// Human-readable type name.
    pub name: String,

    /// Rust type, when the type was registered from Rust.
    pub type_id: Option<TypeId>,

    /// Element size in bytes.
    pub size: usize,

    /// Element alignment in bytes.
    pub align: usize,

    /// Storage category.
    pub category: ComponentCategory,

    /// Stable key ordering columns inside a chunk.
    pub memory_ordering: u64,

    /// Byte offsets of `Entity` fields inside one element.
    pub entity_offsets: Vec<u32>,

    /// Survives destruction until removed explicitly.
    pub system_state: bool,

    /// Inline element capacity for buffer components.
    pub buffer_capacity: u32,

    /// Clone hook for managed components.
    pub clone_managed: Option<ManagedCloneFn>,
}

impl ComponentDesc {
    /// Returns `true` if one element contains entity references.
    #[inline]
    pub fn has_entity_references(&self) -> bool {
        !self.entity_offsets.is_empty()
    }

    /// Returns `true` if this component can be laid out inside a chunk.
    pub fn is_chunk_eligible(&self) -> bool {
        match self.category {
            ComponentCategory::Tag | ComponentCategory::Shared | ComponentCategory::Managed => true,
            ComponentCategory::Data | ComponentCategory::Buffer => {
                self.align.is_power_of_two() && self.align <= MAX_COMPONENT_ALIGNMENT
            }
        }
    }
}

/// Optional registration parameters.
///
/// ```ignore
/// let target = catalog.register_with::<Target>(
///     ComponentOptions::default().with_entity_offsets(&[0]),
/// )?;
/// ```

#[derive(Clone, Debug, Default)]
pub struct ComponentOptions {
    /// Byte offsets of `Entity` fields inside the type.
    pub entity_offsets: Vec<u32>,

    /// Marks the type as a cleanup (system-state) component.
    pub system_state: bool,

    /// Overrides the default memory-ordering key.
    pub memory_ordering: Option<u64>,
}

impl ComponentOptions {
    /// Declares entity fields inside the component.
    pub fn with_entity_offsets(mut self, offsets: &[u32]) -> Self {
        self.entity_offsets = offsets.to_vec();
        self
    }

    /// Marks the component as system state.
    pub fn system_state(mut self) -> Self {
        self.system_state = true;
        self
    }

    /// Overrides the memory-ordering key.
    pub fn with_memory_ordering(mut self, key: u64) -> Self {
        self.memory_ordering = Some(key);
        self
    }
}

/// Buffer element listing the members of an entity's linked group.
///
/// By convention element 0 is the root itself. Destroying a root requires
/// destroying every member; instantiating a root clones every member.

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Pod, Zeroable)]
pub struct LinkedEntityGroup {
    /// Group member.
    pub value: Entity,
}

/// Marks an entity as a prefab; stripped from instantiated copies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Prefab;

/// Marks the residue archetype an entity with cleanup components moves to
/// when destroyed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupEntity;

/// Type index of [`LinkedEntityGroup`].
pub const LINKED_ENTITY_GROUP_TYPE: TypeIndex = 1;
/// Type index of [`Prefab`].
pub const PREFAB_TYPE: TypeIndex = 2;
/// Type index of [`CleanupEntity`].
pub const CLEANUP_ENTITY_TYPE: TypeIndex = 3;

/// Inline capacity of [`LinkedEntityGroup`] buffers.
pub const LINKED_ENTITY_GROUP_CAPACITY: u32 = 1;

/// Default memory-ordering key: FNV-1a of the type name, never zero.
#[inline]
pub fn default_memory_ordering(name: &str) -> u64 {
    const_fnv1a_hash::fnv1a_hash_str_64(name).max(1)
}

/// Assigns type indices and records component layouts.
///
/// ## Invariants
/// - Every entry in `by_type` has a matching `descs[index]`.
/// - Indices never exceed `TYPE_CAP`.

pub struct TypeCatalog {
    descs: Vec<ComponentDesc>,
    by_type: HashMap<TypeId, TypeIndex>,
}

impl Default for TypeCatalog {
    fn default() -> Self { Self::new() }
}

impl TypeCatalog {
    /// Creates a catalog holding the built-in types:
    ///
    /// | index | type                  | category |
    /// |-------|-----------------------|----------|
    /// | 0     | [`Entity`]            | Data     |
    /// | 1     | [`LinkedEntityGroup`] | Buffer   |
    /// | 2     | [`Prefab`]            | Tag      |
    /// | 3     | [`CleanupEntity`]     | Tag      |

    pub fn new() -> Self {
        let mut catalog = Self { descs: Vec::new(), by_type: HashMap::new() };

        let identity = catalog.push_desc::<Entity>(ComponentCategory::Data, ComponentOptions::default().with_memory_ordering(0), 0);
        let linked = catalog.push_desc::<LinkedEntityGroup>(
            ComponentCategory::Buffer,
            ComponentOptions::default().with_entity_offsets(&[0]),
            LINKED_ENTITY_GROUP_CAPACITY,
        );
        let prefab = catalog.push_desc::<Prefab>(ComponentCategory::Tag, ComponentOptions::default(), 0);
        let cleanup = catalog.push_desc::<CleanupEntity>(ComponentCategory::Tag, ComponentOptions::default(), 0);

        debug_assert_eq!(identity, Ok(IDENTITY_TYPE));
        debug_assert_eq!(linked, Ok(LINKED_ENTITY_GROUP_TYPE));
        debug_assert_eq!(prefab, Ok(PREFAB_TYPE));
        debug_assert_eq!(cleanup, Ok(CLEANUP_ENTITY_TYPE));
        catalog
    }

    fn push_desc<T: 'static>(
        &mut self,
        category: ComponentCategory,
        options: ComponentOptions,
        buffer_capacity: u32,
    ) -> Result<TypeIndex, RegistryError> {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return Ok(existing);
        }

        let name = type_name::<T>();
        let desc = ComponentDesc {
            type_index: 0,
            name: name.to_string(),
            type_id: Some(type_id),
            size: size_of::<T>(),
            align: align_of::<T>(),
            category,
            memory_ordering: options.memory_ordering.unwrap_or_else(|| default_memory_ordering(name)),
            entity_offsets: options.entity_offsets,
            system_state: options.system_state,
            buffer_capacity,
            clone_managed: None,
        };
        let index = self.register_raw(desc)?;
        self.by_type.insert(type_id, index);
        Ok(index)
    }

    /// Registers a plain-data component (or a tag, if `T` is zero-sized).
    pub fn register<T: Pod>(&mut self) -> ECSResult<TypeIndex> {
        self.register_with::<T>(ComponentOptions::default())
    }

    /// Registers a plain-data component with explicit options.
    pub fn register_with<T: Pod>(&mut self, options: ComponentOptions) -> ECSResult<TypeIndex> {
        let category = if size_of::<T>() == 0 { ComponentCategory::Tag } else { ComponentCategory::Data };
        Ok(self.push_desc::<T>(category, options, 0)?)
    }

    /// Registers a zero-sized marker type.
    pub fn register_tag<T: 'static>(&mut self) -> ECSResult<TypeIndex> {
        if size_of::<T>() != 0 {
            return Err(RegistryError::InvalidDescriptor {
                name: type_name::<T>().to_string(),
                reason: "tags must be zero-sized",
            }.into());
        }
        Ok(self.push_desc::<T>(ComponentCategory::Tag, ComponentOptions::default(), 0)?)
    }

    /// Registers a shared component; chunks are keyed by its value.
    pub fn register_shared<T: Pod>(&mut self) -> ECSResult<TypeIndex> {
        Ok(self.push_desc::<T>(ComponentCategory::Shared, ComponentOptions::default(), 0)?)
    }

    /// Registers a buffer component with `inline_capacity` elements stored
    /// in the chunk.
    pub fn register_buffer<T: Pod>(&mut self, inline_capacity: u32) -> ECSResult<TypeIndex> {
        self.register_buffer_with::<T>(inline_capacity, ComponentOptions::default())
    }

    /// Registers a buffer component with explicit options.
    pub fn register_buffer_with<T: Pod>(&mut self, inline_capacity: u32, options: ComponentOptions) -> ECSResult<TypeIndex> {
        Ok(self.push_desc::<T>(ComponentCategory::Buffer, options, inline_capacity)?)
    }

    /// Registers a managed component holding an arbitrary Rust value.
    pub fn register_managed<T: Clone + Send + Sync + 'static>(&mut self) -> ECSResult<TypeIndex> {
        let index = self.push_desc::<T>(ComponentCategory::Managed, ComponentOptions::default(), 0)?;
        self.descs[index as usize].clone_managed = Some(clone_managed::<T>);
        Ok(index)
    }

    /// Registers a descriptor built by a foreign catalog.
    ///
    /// ## Behavior
    /// The descriptor's `type_index` is overwritten with the assigned
    /// index.
    ///
    /// ## Errors
    /// - `CapacityExceeded` when no index is left.
    /// - `InvalidDescriptor` for inconsistent size/category combinations or
    ///   entity offsets outside the element.

    pub fn register_raw(&mut self, mut desc: ComponentDesc) -> Result<TypeIndex, RegistryError> {
        if self.descs.len() >= TYPE_CAP {
            return Err(RegistryError::CapacityExceeded { capacity: TYPE_CAP });
        }
        if desc.category == ComponentCategory::Tag && desc.size != 0 {
            return Err(RegistryError::InvalidDescriptor { name: desc.name, reason: "tags must be zero-sized" });
        }
        if matches!(desc.category, ComponentCategory::Data | ComponentCategory::Shared | ComponentCategory::Buffer)
            && desc.size == 0
        {
            return Err(RegistryError::InvalidDescriptor { name: desc.name, reason: "zero-sized types must be tags" });
        }
        if desc.category == ComponentCategory::Managed && desc.clone_managed.is_none() && desc.type_id.is_none() {
            return Err(RegistryError::InvalidDescriptor { name: desc.name, reason: "managed types need a clone hook" });
        }
        if desc.category == ComponentCategory::Buffer && desc.align > COLUMN_ALIGNMENT {
            return Err(RegistryError::InvalidDescriptor { name: desc.name, reason: "buffer elements must be at most 16-byte aligned" });
        }
        let entity_bytes = size_of::<Entity>() as u32;
        if desc.entity_offsets.iter().any(|&o| o as usize + entity_bytes as usize > desc.size) {
            return Err(RegistryError::InvalidDescriptor { name: desc.name, reason: "entity offset outside the element" });
        }

        let index = self.descs.len() as TypeIndex;
        desc.type_index = index;
        self.descs.push(desc);
        Ok(index)
    }

    /// Returns the index registered for `T`.
    pub fn index_of<T: 'static>(&self) -> Option<TypeIndex> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Returns the index registered for `T` or `RegistryError::NotRegistered`.
    pub fn require_index_of<T: 'static>(&self) -> ECSResult<TypeIndex> {
        self.index_of::<T>()
            .ok_or_else(|| RegistryError::NotRegistered { name: type_name::<T>() }.into())
    }

    /// Returns the descriptor of `type_index`, if registered.
    #[inline]
    pub fn desc(&self, type_index: TypeIndex) -> Option<&ComponentDesc> {
        self.descs.get(type_index as usize)
    }

    /// Number of registered types.
    #[inline]
    pub fn len(&self) -> usize { self.descs.len() }

    /// Returns `true` when only built-ins are registered.
    #[inline]
    pub fn is_empty(&self) -> bool { self.descs.len() <= CLEANUP_ENTITY_TYPE as usize + 1 }

    /// Iterates over every descriptor.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentDesc> {
        self.descs.iter()
    }
}
