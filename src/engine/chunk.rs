//! Chunk pages and slot accounting.
//!
//! A [`Chunk`] is one page owned by one archetype at a time. All chunks live
//! in the [`ChunkStore`] arena and are addressed by [`ChunkID`]; archetypes
//! keep `Vec<ChunkID>` lists and every chunk remembers its position in
//! those lists so detaching is `O(1)`.
//!
//! ## Page header
//!
//! | bytes   | field                   |
//! |---------|-------------------------|
//! | 0..4    | archetype id            |
//! | 4..8    | slot count              |
//! | 8..12   | capacity                |
//! | 12..16  | chunk id                |
//! | 16..20  | shared type count       |
//! | 20..48  | reserved (zero)         |
//!
//! The header is rewritten whenever one of the fields changes so an
//! external serializer can read pages without the engine's tables.
//!
//! ## Recycling
//!
//! A chunk whose count drops to zero gives its page back to a pool keyed by
//! page size and frees its arena slot. New chunks reuse pooled pages before
//! asking the [`PageAllocator`].

use std::collections::HashMap;

use crate::engine::archetype::{Archetype, Column};
use crate::engine::page::{Page, PageAllocator, SystemPageAllocator};
use crate::engine::shared::SharedValueTable;
use crate::engine::types::{ArchetypeID, ChangeVersion, ChunkID, SlotID};


const NOT_LISTED: u32 = u32::MAX;

/// One page of entity storage.
pub struct Chunk {
    page: Page,
    archetype: ArchetypeID,
    count: u32,
    capacity: u32,
    list_index: u32,
    space_index: u32,
}

impl Chunk {
    /// Owning archetype.
    #[inline] pub fn archetype(&self) -> ArchetypeID { self.archetype }

    /// Occupied slots.
    #[inline] pub fn count(&self) -> u32 { self.count }

    /// Slots available in this chunk.
    #[inline] pub fn capacity(&self) -> u32 { self.capacity }

    /// Returns `true` if no slot is free.
    #[inline] pub fn is_full(&self) -> bool { self.count == self.capacity }

    /// Raw page bytes, header included.
    #[inline] pub fn bytes(&self) -> &[u8] { self.page.as_slice() }

    #[inline]
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] { self.page.as_mut_slice() }

    /// Base address of the page.
    #[inline]
    pub fn page_ptr(&self) -> *mut u8 { self.page.as_ptr() }

    /// Bytes of one slot of `column`.
    #[inline]
    pub fn slot_bytes(&self, column: &Column, slot: usize) -> &[u8] {
        &self.page.as_slice()[column.slot_range(slot)]
    }

    /// Mutable bytes of one slot of `column`.
    #[inline]
    pub fn slot_bytes_mut(&mut self, column: &Column, slot: usize) -> &mut [u8] {
        &mut self.page.as_mut_slice()[column.slot_range(slot)]
    }

    fn read_u32(&self, at: usize) -> u32 {
        bytemuck::pod_read_unaligned(&self.page.as_slice()[at..at + 4])
    }

    fn write_u32(&mut self, at: usize, value: u32) {
        self.page.as_mut_slice()[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }

    fn write_header(&mut self, id: ChunkID, shared_count: usize) {
        self.write_u32(0, self.archetype);
        self.write_u32(4, self.count);
        self.write_u32(8, self.capacity);
        self.write_u32(12, id);
        self.write_u32(16, shared_count as u32);
    }

    /// Change version of the column at signature position `position`.
    #[inline]
    pub fn change_version(&self, archetype: &Archetype, position: usize) -> ChangeVersion {
        self.read_u32(archetype.change_versions_offset + 4 * position)
    }

    /// Stamps the column at `position` with `version`.
    #[inline]
    pub fn set_change_version(&mut self, archetype: &Archetype, position: usize, version: ChangeVersion) {
        self.write_u32(archetype.change_versions_offset + 4 * position, version);
    }

    /// Stamps every column with `version`.
    pub fn stamp_all(&mut self, archetype: &Archetype, version: ChangeVersion) {
        for position in 0..archetype.type_count() {
            self.set_change_version(archetype, position, version);
        }
    }

    /// Shared-value index for the `k`-th shared type of the archetype.
    #[inline]
    pub fn shared_index(&self, archetype: &Archetype, k: usize) -> u32 {
        self.read_u32(archetype.shared_indices_offset + 4 * k)
    }

    fn shared_matches(&self, archetype: &Archetype, shared: &[u32]) -> bool {
        shared.iter().enumerate().all(|(k, &v)| self.shared_index(archetype, k) == v)
    }
}

/// Arena of live chunks plus the recycled page pool.
///
/// ## Invariants
/// - `chunks[id]` is `Some` iff `id` is listed in its archetype's `chunks`.
/// - Pooled pages are never referenced by a live chunk.

pub struct ChunkStore {
    chunks: Vec<Option<Chunk>>,
    free_ids: Vec<ChunkID>,
    pool: HashMap<usize, Vec<Page>>,
    page_size: usize,
    allocator: Box<dyn PageAllocator>,
}

impl ChunkStore {
    /// Creates a store of `page_size`-byte pages from the system allocator.
    pub fn new(page_size: usize) -> Self {
        Self::with_allocator(page_size, Box::new(SystemPageAllocator))
    }

    /// Creates a store drawing pages from `allocator`.
    pub fn with_allocator(page_size: usize, allocator: Box<dyn PageAllocator>) -> Self {
        Self { chunks: Vec::new(), free_ids: Vec::new(), pool: HashMap::new(), page_size, allocator }
    }

    /// Page size in bytes.
    #[inline]
    pub fn page_size(&self) -> usize { self.page_size }

    /// Chunk by id.
    #[inline]
    pub fn get(&self, id: ChunkID) -> Option<&Chunk> {
        self.chunks.get(id as usize).and_then(|c| c.as_ref())
    }

    /// Live chunk by id, for ids taken from entity locations or archetype
    /// lists, which never hold dead ids.
    #[inline]
    pub(crate) fn chunk(&self, id: ChunkID) -> &Chunk {
        match self.get(id) {
            Some(chunk) => chunk,
            None => panic!("chunk {id} is not live"),
        }
    }

    #[inline]
    pub(crate) fn chunk_mut(&mut self, id: ChunkID) -> &mut Chunk {
        match self.chunks.get_mut(id as usize).and_then(|c| c.as_mut()) {
            Some(chunk) => chunk,
            None => panic!("chunk {id} is not live"),
        }
    }

    /// Number of live chunks.
    pub fn live_chunks(&self) -> usize {
        self.chunks.len() - self.free_ids.len()
    }

    /// Number of pages waiting in the pool.
    pub fn pooled_pages(&self) -> usize {
        self.pool.values().map(Vec::len).sum()
    }

    /// Returns a chunk of `archetype` with a free slot whose shared values
    /// equal `shared`, creating one if needed.
    ///
    /// ## Behavior
    /// 1. An existing chunk with space and matching shared values.
    /// 2. A pooled page, zeroed.
    /// 3. A fresh page from the allocator.
    ///
    /// A new chunk takes one reference to every shared index it carries and
    /// stamps every column with `version`.

    pub fn allocate_chunk(
        &mut self,
        archetype: &mut Archetype,
        shared_values: &mut SharedValueTable,
        shared: &[u32],
        version: ChangeVersion,
    ) -> ChunkID {
        debug_assert_eq!(shared.len(), archetype.shared_types.len());

        if let Some(&id) = archetype
            .chunks_with_space
            .iter()
            .find(|&&id| self.chunk(id).shared_matches(archetype, shared))
        {
            return id;
        }

        let page = match self.pool.get_mut(&self.page_size).and_then(Vec::pop) {
            Some(mut page) => {
                page.clear();
                log::trace!("archetype {}: reusing pooled page", archetype.id);
                page
            }
            None => {
                log::trace!("archetype {}: allocating page", archetype.id);
                self.allocator.allocate(self.page_size)
            }
        };

        let mut chunk = Chunk {
            page,
            archetype: archetype.id,
            count: 0,
            capacity: archetype.chunk_capacity,
            list_index: archetype.chunks.len() as u32,
            space_index: archetype.chunks_with_space.len() as u32,
        };

        let id = match self.free_ids.pop() {
            Some(id) => id,
            None => {
                self.chunks.push(None);
                (self.chunks.len() - 1) as ChunkID
            }
        };

        chunk.write_header(id, shared.len());
        for (k, &index) in shared.iter().enumerate() {
            shared_values.retain(index);
            chunk.write_u32(archetype.shared_indices_offset + 4 * k, index);
        }
        chunk.stamp_all(archetype, version);

        archetype.chunks.push(id);
        archetype.chunks_with_space.push(id);
        self.chunks[id as usize] = Some(chunk);
        id
    }

    /// Sole mutator of a chunk's slot count.
    ///
    /// ## Behavior
    /// - `0`: releases shared references, detaches the chunk from both
    ///   lists, pools its page and frees its id.
    /// - `capacity`: detaches from the free-slot list.
    /// - Dropping below capacity from full: re-attaches to the free-slot
    ///   list.

    pub fn set_slot_count(
        &mut self,
        archetype: &mut Archetype,
        shared_values: &mut SharedValueTable,
        id: ChunkID,
        new_count: u32,
    ) {
        let chunk = self.chunk_mut(id);
        debug_assert!(new_count <= chunk.capacity);
        let was_full = chunk.is_full();
        chunk.count = new_count;
        chunk.write_u32(4, new_count);

        if new_count == 0 {
            for k in 0..archetype.shared_types.len() {
                shared_values.release(self.chunk(id).shared_index(archetype, k));
            }
            self.detach_space(archetype, id);
            self.detach_all(archetype, id);

            if let Some(chunk) = self.chunks[id as usize].take() {
                self.pool.entry(self.page_size).or_default().push(chunk.page);
            }
            self.free_ids.push(id);
            log::trace!("archetype {}: chunk {id} emptied, page pooled", archetype.id);
        } else if new_count == self.chunk(id).capacity {
            self.detach_space(archetype, id);
        } else if was_full {
            let space_index = archetype.chunks_with_space.len() as u32;
            archetype.chunks_with_space.push(id);
            self.chunk_mut(id).space_index = space_index;
        }
    }

    /// Reserves up to `requested` slots at the end of chunk `id`.
    ///
    /// Returns `(actual, first_slot)` with
    /// `actual = min(requested, capacity - count)`.

    pub fn allocate_into_chunk(
        &mut self,
        archetype: &mut Archetype,
        shared_values: &mut SharedValueTable,
        id: ChunkID,
        requested: u32,
    ) -> (u32, SlotID) {
        let chunk = self.chunk(id);
        let start = chunk.count;
        let actual = requested.min(chunk.capacity - chunk.count);
        if actual == 0 {
            return (0, start);
        }

        archetype.entity_count += actual as u64;
        self.set_slot_count(archetype, shared_values, id, start + actual);
        (actual, start)
    }

    fn detach_space(&mut self, archetype: &mut Archetype, id: ChunkID) {
        let index = self.chunk(id).space_index;
        if index == NOT_LISTED { return; }

        let list = &mut archetype.chunks_with_space;
        list.swap_remove(index as usize);
        if let Some(&moved) = list.get(index as usize) {
            self.chunk_mut(moved).space_index = index;
        }
        self.chunk_mut(id).space_index = NOT_LISTED;
    }

    fn detach_all(&mut self, archetype: &mut Archetype, id: ChunkID) {
        let index = self.chunk(id).list_index;
        let list = &mut archetype.chunks;
        list.swap_remove(index as usize);
        if let Some(&moved) = list.get(index as usize) {
            self.chunk_mut(moved).list_index = index;
        }
        self.chunk_mut(id).list_index = NOT_LISTED;
    }

    /// Address of the page backing chunk `id`; used to observe page reuse.
    pub fn page_address(&self, id: ChunkID) -> usize {
        self.chunk(id).page_ptr() as usize
    }
}

impl Drop for ChunkStore {
    fn drop(&mut self) {
        for chunk in self.chunks.drain(..).flatten() {
            self.allocator.release(chunk.page);
        }
        for (_, pages) in self.pool.drain() {
            for page in pages {
                self.allocator.release(page);
            }
        }
    }
}
