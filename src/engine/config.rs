//! Engine configuration.
//!
//! Compile-time defaults live in [`crate::engine::types`]; `EngineConfig`
//! carries the values an embedding application may override when it
//! constructs an [`EntityManager`](crate::engine::manager::EntityManager).

use crate::engine::types::{
    CHUNK_SIZE,
    CHUNK_ALIGNMENT,
    CHUNK_HEADER_BYTES,
    DEFAULT_MAX_ENTITY_BLOCKS,
    READ_HANDLE_CAPACITY,
};


/// Tunables injected into the engine at construction.
///
/// ## Invariants
/// - `chunk_size` is a multiple of `CHUNK_ALIGNMENT` and larger than the
///   page header.
/// - `max_entity_blocks` and `read_handle_capacity` are non-zero.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Size in bytes of each chunk page.
    pub chunk_size: usize,

    /// Length of the identity block table.
    pub max_entity_blocks: usize,

    /// Read handles kept per component type before collapsing.
    pub read_handle_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_entity_blocks: DEFAULT_MAX_ENTITY_BLOCKS,
            read_handle_capacity: READ_HANDLE_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Returns a copy with a different page size.
    ///
    /// ## Panics
    /// Panics if the size is not a multiple of the page alignment or does
    /// not leave room after the header.

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size % CHUNK_ALIGNMENT == 0, "chunk size must be a multiple of {CHUNK_ALIGNMENT}");
        assert!(chunk_size > CHUNK_HEADER_BYTES, "chunk size must exceed the page header");
        self.chunk_size = chunk_size;
        self
    }

    /// Returns a copy with a different identity block table length.
    pub fn with_max_entity_blocks(mut self, blocks: usize) -> Self {
        assert!(blocks > 0, "at least one identity block is required");
        self.max_entity_blocks = blocks;
        self
    }

    /// Returns a copy with a different read ring capacity.
    pub fn with_read_handle_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "read ring needs at least one slot");
        self.read_handle_capacity = capacity;
        self
    }
}
