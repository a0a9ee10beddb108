//! # Archetypes and the archetype registry
//!
//! An [`Archetype`] groups every entity with one exact [`TypeSignature`]
//! and fixes how those entities are laid out inside chunk pages. The
//! [`ArchetypeRegistry`] interns signatures and computes layouts.
//!
//! ## Layout
//!
//! For a signature the registry computes:
//!
//! * a column stride per type (see [`column_stride`]),
//! * `bytes_per_entity`, the sum of strides,
//! * `chunk_capacity`, the largest entity count whose aligned columns and
//!   trailing regions fit in one page,
//! * a **memory-order permutation** sorting columns by the types'
//!   `memory_ordering` keys (ties broken by name),
//! * a byte offset per column, walking the permutation from byte
//!   [`CHUNK_HEADER_BYTES`].
//!
//! Layouts depend only on the signature and the catalog's memory-ordering
//! keys, never on type indices or registration order. Two catalogs that
//! register the same types in different orders produce the same columns at
//! the same offsets.
//!
//! ## Derived archetypes
//!
//! Destroying an entity that carries system-state components moves it to a
//! *cleanup residue* archetype instead of freeing it; instantiating a prefab
//! clones into an *instantiate copy* archetype. Both are derived from the
//! signature once and cached on the archetype.
//!
//! ## Observers
//!
//! Query matching is an external collaborator. It learns about new
//! archetypes through the [`ArchetypeObserver`] seam.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::engine::component::{
    ComponentCategory,
    TypeCatalog,
    CLEANUP_ENTITY_TYPE,
    PREFAB_TYPE,
};
use crate::engine::error::{
    ECSResult,
    InvalidSignatureError,
    InvalidSignatureReason,
    SignatureTooLargeError,
};
use crate::engine::signature::{ComponentType, TypeSignature};
use crate::engine::types::{
    align_up,
    ArchetypeID,
    ChunkID,
    TypeIndex,
    BUFFER_HEADER_BYTES,
    CHUNK_HEADER_BYTES,
    IDENTITY_TYPE,
    MANAGED_HANDLE_BYTES,
};


/// Placement of one component type inside a chunk page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    /// Component type stored in this column.
    pub type_index: TypeIndex,

    /// Storage category of the type.
    pub category: ComponentCategory,

    /// Fixed-array length from the signature (`0` for plain types).
    pub fixed_array_length: u16,

    /// Byte offset of the column inside the page.
    pub offset: usize,

    /// Bytes per entity.
    pub stride: usize,

    /// Alignment of the column start.
    pub align: usize,

    /// Size of one element (buffer element, array element or value).
    pub element_size: usize,

    /// Inline capacity for buffer columns.
    pub inline_capacity: u32,
}

impl Column {
    /// Byte range of `slot` relative to the page start.
    #[inline]
    pub fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        let start = self.offset + slot * self.stride;
        start..start + self.stride
    }

    /// Byte range of `count` slots starting at `slot`.
    #[inline]
    pub fn run_range(&self, slot: usize, count: usize) -> std::ops::Range<usize> {
        let start = self.offset + slot * self.stride;
        start..start + count * self.stride
    }
}

/// Column stride of one type, before the aligned layout is computed.
///
/// | category | stride                                                    |
/// |----------|-----------------------------------------------------------|
/// | Data     | `size * max(1, fixed_array_length)`                       |
/// | Tag      | `0`                                                       |
/// | Shared   | `0` (stored once per chunk)                               |
/// | Buffer   | `16 + inline_capacity * size`, rounded to the alignment   |
/// | Managed  | `4` (store handle)                                        |

pub fn column_stride(category: ComponentCategory, size: usize, align: usize, fixed_array_length: u16, inline_capacity: u32) -> (usize, usize) {
    match category {
        ComponentCategory::Data => (size * (fixed_array_length as usize).max(1), align),
        ComponentCategory::Tag | ComponentCategory::Shared => (0, 1),
        ComponentCategory::Buffer => {
            let align = align.max(4);
            (align_up(BUFFER_HEADER_BYTES + inline_capacity as usize * size, align), align)
        }
        ComponentCategory::Managed => (MANAGED_HANDLE_BYTES, MANAGED_HANDLE_BYTES),
    }
}

/// Entities sharing one exact signature, and their page layout.
///
/// ## Invariants
/// - `columns[i]` describes `signature.types()[i]`.
/// - `memory_order` is a permutation of `0..columns.len()` with the
///   identity column first.
/// - A chunk is in `chunks_with_space` iff its count is below its capacity.
/// - `entity_count` equals the sum of its chunks' counts.

#[derive(Debug)]
pub struct Archetype {
    pub(crate) id: ArchetypeID,
    pub(crate) signature: TypeSignature,
    pub(crate) columns: Vec<Column>,
    pub(crate) memory_order: Vec<usize>,
    pub(crate) shared_types: SmallVec<[TypeIndex; 4]>,
    pub(crate) chunk_capacity: u32,
    pub(crate) bytes_per_entity: usize,
    pub(crate) change_versions_offset: usize,
    pub(crate) shared_indices_offset: usize,
    pub(crate) entity_count: u64,
    pub(crate) chunks: Vec<ChunkID>,
    pub(crate) chunks_with_space: Vec<ChunkID>,
    pub(crate) previous: Option<ArchetypeID>,
    pub(crate) cleanup_required: bool,
    pub(crate) cleanup_complete: bool,
    pub(crate) is_cleanup_residue: bool,
    pub(crate) is_prefab: bool,
    pub(crate) has_entity_references: bool,
    pub(crate) cleanup_residue: Option<ArchetypeID>,
    pub(crate) instantiate_copy: Option<ArchetypeID>,
}

impl Archetype {
    /// Registry id.
    #[inline] pub fn id(&self) -> ArchetypeID { self.id }

    /// The signature this archetype was created for.
    #[inline] pub fn signature(&self) -> &TypeSignature { &self.signature }

    /// Column layouts in signature order.
    #[inline] pub fn columns(&self) -> &[Column] { &self.columns }

    /// Column positions sorted by memory order.
    #[inline] pub fn memory_order(&self) -> &[usize] { &self.memory_order }

    /// Shared component types in signature order.
    #[inline] pub fn shared_types(&self) -> &[TypeIndex] { &self.shared_types }

    /// Entities that fit in one chunk.
    #[inline] pub fn chunk_capacity(&self) -> u32 { self.chunk_capacity }

    /// Sum of column strides.
    #[inline] pub fn bytes_per_entity(&self) -> usize { self.bytes_per_entity }

    /// Live entities across all chunks.
    #[inline] pub fn entity_count(&self) -> u64 { self.entity_count }

    /// Number of live chunks.
    #[inline] pub fn chunk_count(&self) -> usize { self.chunks.len() }

    /// Every live chunk.
    #[inline] pub fn chunks(&self) -> &[ChunkID] { &self.chunks }

    /// Chunks with at least one free slot.
    #[inline] pub fn chunks_with_space(&self) -> &[ChunkID] { &self.chunks_with_space }

    /// Archetype created just before this one.
    #[inline] pub fn previous(&self) -> Option<ArchetypeID> { self.previous }

    /// Destroying entities of this archetype leaves a residue.
    #[inline] pub fn cleanup_required(&self) -> bool { self.cleanup_required }

    /// Only the identity and the cleanup marker remain; entities moving
    /// here are destroyed.
    #[inline] pub fn cleanup_complete(&self) -> bool { self.cleanup_complete }

    /// Holds destroyed entities waiting for system-state removal.
    #[inline] pub fn is_cleanup_residue(&self) -> bool { self.is_cleanup_residue }

    /// Carries the prefab marker.
    #[inline] pub fn is_prefab(&self) -> bool { self.is_prefab }

    /// Position of `type_index` in the signature.
    #[inline]
    pub fn position_of(&self, type_index: TypeIndex) -> Option<usize> {
        self.signature.position_of(type_index)
    }

    /// Column of `type_index`.
    #[inline]
    pub fn column_of(&self, type_index: TypeIndex) -> Option<&Column> {
        self.position_of(type_index).map(|p| &self.columns[p])
    }

    /// Position of `type_index` among the shared types.
    #[inline]
    pub fn shared_position_of(&self, type_index: TypeIndex) -> Option<usize> {
        self.shared_types.iter().position(|&t| t == type_index)
    }

    /// Returns `true` if the signature contains `type_index`.
    #[inline]
    pub fn has(&self, type_index: TypeIndex) -> bool {
        self.signature.has(type_index)
    }

    /// Number of trailing change-version slots (one per type).
    #[inline]
    pub fn type_count(&self) -> usize { self.columns.len() }
}

/// Notified whenever the registry creates an archetype.
pub trait ArchetypeObserver: Send {
    /// Called once per new archetype, after its layout is final.
    fn on_archetype_created(&mut self, archetype: &Archetype);
}

/// Interns signatures and owns every archetype.
///
/// ## Invariants
/// - `archetypes[i].id == i`.
/// - Each signature maps to exactly one archetype.

pub struct ArchetypeRegistry {
    archetypes: Vec<Archetype>,
    by_hash: HashMap<u32, SmallVec<[ArchetypeID; 1]>>,
    observers: Vec<Box<dyn ArchetypeObserver>>,
    chunk_size: usize,
}

impl ArchetypeRegistry {
    /// Creates an empty registry laying out pages of `chunk_size` bytes.
    pub fn new(chunk_size: usize) -> Self {
        Self { archetypes: Vec::new(), by_hash: HashMap::new(), observers: Vec::new(), chunk_size }
    }

    /// Page size used for layouts.
    #[inline]
    pub fn chunk_size(&self) -> usize { self.chunk_size }

    /// Number of archetypes.
    #[inline]
    pub fn len(&self) -> usize { self.archetypes.len() }

    /// Returns `true` before the first archetype is created.
    #[inline]
    pub fn is_empty(&self) -> bool { self.archetypes.is_empty() }

    /// Archetype by id.
    #[inline]
    pub fn get(&self, id: ArchetypeID) -> Option<&Archetype> {
        self.archetypes.get(id as usize)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: ArchetypeID) -> &mut Archetype {
        &mut self.archetypes[id as usize]
    }

    #[inline]
    pub(crate) fn archetype(&self, id: ArchetypeID) -> &Archetype {
        &self.archetypes[id as usize]
    }

    /// Every archetype, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Most recently created archetype; follow [`Archetype::previous`] for
    /// the rest of the history chain.
    pub fn last(&self) -> Option<ArchetypeID> {
        self.archetypes.last().map(|a| a.id)
    }

    /// Registers an observer and replays every existing archetype to it.
    pub fn add_observer(&mut self, mut observer: Box<dyn ArchetypeObserver>) {
        for archetype in &self.archetypes {
            observer.on_archetype_created(archetype);
        }
        self.observers.push(observer);
    }

    /// Looks up an existing archetype without creating one.
    pub fn find(&self, signature: &TypeSignature) -> Option<ArchetypeID> {
        self.by_hash
            .get(&signature.hash32())?
            .iter()
            .copied()
            .find(|&id| self.archetypes[id as usize].signature == *signature)
    }

    /// Returns the archetype for `signature`, creating it on first use.
    ///
    /// ## Errors
    /// - `InvalidSignature` if the signature is malformed or names an
    ///   unregistered or non-chunk type.
    /// - `SignatureTooLarge` if not even one entity fits in a page.

    pub fn get_or_create(&mut self, catalog: &TypeCatalog, signature: &TypeSignature) -> ECSResult<ArchetypeID> {
        if let Some(id) = self.find(signature) {
            return Ok(id);
        }

        validate_signature(catalog, signature)?;
        let id = self.archetypes.len() as ArchetypeID;
        let archetype = build_archetype(catalog, signature, id, self.chunk_size, self.last())?;

        log::debug!(
            "archetype {} created: {:?}, {} bytes/entity, {} per chunk",
            id, signature, archetype.bytes_per_entity, archetype.chunk_capacity
        );

        self.by_hash.entry(signature.hash32()).or_default().push(id);
        self.archetypes.push(archetype);

        let created = &self.archetypes[id as usize];
        for observer in &mut self.observers {
            observer.on_archetype_created(created);
        }
        Ok(id)
    }

    /// Archetypes containing every type of `required` and none of
    /// `excluded`, in creation order.
    pub fn matching_archetypes(&self, required: &[TypeIndex], excluded: &[TypeIndex]) -> Vec<ArchetypeID> {
        self.archetypes
            .iter()
            .filter(|a| a.signature.contains_all(required) && a.signature.contains_none(excluded))
            .map(|a| a.id)
            .collect()
    }

    /// Residue archetype entities of `id` move to when destroyed: the
    /// identity, the cleanup marker and every system-state type.
    pub fn cleanup_residue_of(&mut self, catalog: &TypeCatalog, id: ArchetypeID) -> ECSResult<ArchetypeID> {
        if let Some(cached) = self.archetypes[id as usize].cleanup_residue {
            return Ok(cached);
        }

        let mut types: SmallVec<[ComponentType; 8]> = self.archetypes[id as usize]
            .signature
            .types()
            .iter()
            .copied()
            .filter(|t| catalog.desc(t.type_index).is_some_and(|d| d.system_state))
            .collect();
        types.push(ComponentType::of(CLEANUP_ENTITY_TYPE));

        let residue = self.get_or_create(catalog, &TypeSignature::new(&types))?;
        self.archetypes[id as usize].cleanup_residue = Some(residue);
        Ok(residue)
    }

    /// Archetype instantiated copies of `id` go to: system-state types and
    /// the prefab marker removed.
    pub fn instantiate_copy_of(&mut self, catalog: &TypeCatalog, id: ArchetypeID) -> ECSResult<ArchetypeID> {
        if let Some(cached) = self.archetypes[id as usize].instantiate_copy {
            return Ok(cached);
        }

        let copy_signature = self.archetypes[id as usize].signature.filtered(|t| {
            t.type_index != PREFAB_TYPE && !catalog.desc(t.type_index).is_some_and(|d| d.system_state)
        });

        let copy = self.get_or_create(catalog, &copy_signature)?;
        self.archetypes[id as usize].instantiate_copy = Some(copy);
        Ok(copy)
    }
}

fn invalid(reason: InvalidSignatureReason) -> InvalidSignatureError {
    InvalidSignatureError { reason }
}

/// Rejects malformed signatures before anything is allocated.
pub fn validate_signature(catalog: &TypeCatalog, signature: &TypeSignature) -> Result<(), InvalidSignatureError> {
    let types = signature.types();
    let Some(first) = types.first() else {
        return Err(invalid(InvalidSignatureReason::Empty));
    };
    if first.type_index != IDENTITY_TYPE {
        return Err(invalid(InvalidSignatureReason::IdentityNotFirst));
    }

    for pair in types.windows(2) {
        if pair[0].type_index == pair[1].type_index {
            return Err(invalid(InvalidSignatureReason::DuplicateType(pair[1].type_index)));
        }
        if pair[0].type_index > pair[1].type_index {
            return Err(invalid(InvalidSignatureReason::Unsorted));
        }
    }

    for t in types {
        let Some(desc) = catalog.desc(t.type_index) else {
            return Err(invalid(InvalidSignatureReason::UnregisteredType(t.type_index)));
        };
        if !desc.is_chunk_eligible() {
            return Err(invalid(InvalidSignatureReason::NotChunkEligible(t.type_index)));
        }
    }
    Ok(())
}

/// Sorts column positions by `(memory_ordering, name)`.
fn memory_order(catalog: &TypeCatalog, signature: &TypeSignature) -> Vec<usize> {
    let key = |position: usize| {
        let desc = catalog.desc(signature.types()[position].type_index);
        (desc.map_or(u64::MAX, |d| d.memory_ordering), desc.map_or("", |d| d.name.as_str()))
    };

    let mut order: Vec<usize> = (0..signature.len()).collect();
    for i in 1..order.len() {
        let mut j = i;
        while j > 0 && key(order[j]) < key(order[j - 1]) {
            order.swap(j, j - 1);
            j -= 1;
        }
    }
    order
}

/// Byte just past the last column when `capacity` entities are laid out.
fn layout_end(columns: &[Column], order: &[usize], capacity: usize) -> usize {
    order.iter().fold(CHUNK_HEADER_BYTES, |cursor, &p| {
        align_up(cursor, columns[p].align) + columns[p].stride * capacity
    })
}

fn build_archetype(
    catalog: &TypeCatalog,
    signature: &TypeSignature,
    id: ArchetypeID,
    chunk_size: usize,
    previous: Option<ArchetypeID>,
) -> ECSResult<Archetype> {
    let mut columns: Vec<Column> = Vec::with_capacity(signature.len());
    let mut shared_types: SmallVec<[TypeIndex; 4]> = SmallVec::new();
    let mut has_entity_references = false;
    let mut cleanup_required = false;

    for t in signature.types() {
        let Some(desc) = catalog.desc(t.type_index) else {
            return Err(invalid(InvalidSignatureReason::UnregisteredType(t.type_index)).into());
        };
        let (stride, align) = column_stride(desc.category, desc.size, desc.align, t.fixed_array_length, desc.buffer_capacity);

        if desc.category == ComponentCategory::Shared {
            shared_types.push(t.type_index);
        }
        has_entity_references |= desc.has_entity_references();
        cleanup_required |= desc.system_state;

        columns.push(Column {
            type_index: t.type_index,
            category: desc.category,
            fixed_array_length: t.fixed_array_length,
            offset: 0,
            stride,
            align,
            element_size: desc.size,
            inline_capacity: desc.buffer_capacity,
        });
    }

    let bytes_per_entity: usize = columns.iter().map(|c| c.stride).sum();
    let trailing = 4 * columns.len() + 4 * shared_types.len();
    let payload = chunk_size.saturating_sub(CHUNK_HEADER_BYTES + trailing);
    let payload_end = CHUNK_HEADER_BYTES + payload;

    let order = memory_order(catalog, signature);
    let mut capacity = payload / bytes_per_entity.max(1);
    while capacity > 0 && layout_end(&columns, &order, capacity) > payload_end {
        capacity -= 1;
    }
    if capacity == 0 {
        return Err(SignatureTooLargeError { bytes_per_entity, chunk_payload: payload }.into());
    }
    let capacity = capacity.min(u32::MAX as usize);

    let mut cursor = CHUNK_HEADER_BYTES;
    for &position in &order {
        let column = &mut columns[position];
        cursor = align_up(cursor, column.align);
        column.offset = cursor;
        cursor += column.stride * capacity;
    }
    debug_assert!(cursor <= payload_end);

    let change_versions_offset = chunk_size - trailing;
    let is_cleanup_residue = signature.has(CLEANUP_ENTITY_TYPE);
    let cleanup_complete = is_cleanup_residue && signature.len() == 2;

    Ok(Archetype {
        id,
        signature: signature.clone(),
        columns,
        memory_order: order,
        shared_indices_offset: change_versions_offset + 4 * signature.len(),
        change_versions_offset,
        shared_types,
        chunk_capacity: capacity as u32,
        bytes_per_entity,
        entity_count: 0,
        chunks: Vec::new(),
        chunks_with_space: Vec::new(),
        previous,
        cleanup_required: cleanup_required && !is_cleanup_residue,
        cleanup_complete,
        is_cleanup_residue,
        is_prefab: signature.has(PREFAB_TYPE),
        has_entity_references,
        cleanup_residue: None,
        instantiate_copy: None,
    })
}
