//! Core identifiers, capacities, and page layout constants.
//!
//! This module defines the **small copyable identifiers** and the
//! **compile-time layout constants** shared by every other part of the
//! engine: the archetype registry, the chunk store, the entity allocator
//! and the dependency tracker.
//!
//! ## Page layout
//!
//! Every chunk is a single fixed-size page:
//!
//! ```text
//! | header | columns (memory order) ... | change versions | shared indices |
//! ```
//!
//! - The header is [`CHUNK_HEADER_BYTES`] long and mirrors the owning
//!   archetype, the slot count and the capacity so a raw page is
//!   self-describing.
//! - Columns start 16-byte aligned; pages themselves are
//!   [`CHUNK_ALIGNMENT`]-aligned.
//! - The trailing regions hold one `u32` change version per component type
//!   and one `u32` shared-value index per shared component type.
//!
//! ## Identity blocks
//!
//! Entity identities are handed out in blocks of [`ENTITIES_PER_BLOCK`]
//! slots. Blocks are allocated lazily and indexed by a flat table whose
//! length is configured by [`crate::engine::config::EngineConfig`].

/// Dense index of a registered component type inside a
/// [`TypeCatalog`](crate::engine::component::TypeCatalog).
pub type TypeIndex = u16;

/// Identifier for an archetype (index into the registry).
pub type ArchetypeID = u32;

/// Arena index of a live chunk.
pub type ChunkID = u32;

/// Slot index inside a chunk.
pub type SlotID = u32;

/// Entity index inside the identity space.
pub type IndexID = u32;

/// Generation counter used to detect stale entities.
pub type VersionID = u32;

/// Change version stamped on chunk columns.
pub type ChangeVersion = u32;

/// Size in bytes of one chunk page.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Alignment of every chunk page.
pub const CHUNK_ALIGNMENT: usize = 64;

/// Bytes reserved at the start of each page for the mirrored header.
pub const CHUNK_HEADER_BYTES: usize = 48;

/// Alignment guaranteed for the first column of every chunk.
pub const COLUMN_ALIGNMENT: usize = 16;

/// Largest element alignment a component may declare and still be laid
/// out inside a chunk.
pub const MAX_COMPONENT_ALIGNMENT: usize = CHUNK_ALIGNMENT;

/// Number of identities per allocator block.
pub const ENTITIES_PER_BLOCK: usize = 8192;

/// Number of `u64` words in one block's occupancy bitset.
pub const BLOCK_BITSET_WORDS: usize = ENTITIES_PER_BLOCK / 64;

/// Default length of the block table (8M identities).
pub const DEFAULT_MAX_ENTITY_BLOCKS: usize = 1024;

/// Default number of read handles tracked per component type before the
/// ring collapses into a single combined handle.
pub const READ_HANDLE_CAPACITY: usize = 17;

/// Size in bytes of a buffer column header.
pub const BUFFER_HEADER_BYTES: usize = 16;

/// Size in bytes of a managed-object column slot (a store handle).
pub const MANAGED_HANDLE_BYTES: usize = 4;

/// Type index of the identity component. Always registered first.
pub const IDENTITY_TYPE: TypeIndex = 0;

/// Maximum number of distinct component types in a catalog.
pub const TYPE_CAP: usize = TypeIndex::MAX as usize;

const _: [(); 1] = [(); (ENTITIES_PER_BLOCK % 64 == 0) as usize];
const _: [(); 1] = [(); (CHUNK_HEADER_BYTES % COLUMN_ALIGNMENT == 0) as usize];
const _: [(); 1] = [(); (CHUNK_SIZE % CHUNK_ALIGNMENT == 0) as usize];

/// Rounds `value` up to the next multiple of `align` (a power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
