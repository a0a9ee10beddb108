//! # Entity identities
//!
//! This module defines the [`Entity`] handle, its physical
//! [`EntityLocation`], and the block-based [`EntityIdAllocator`] that hands
//! out identities to many concurrent callers.
//!
//! ## Identity space
//!
//! Identities are grouped into blocks of [`ENTITIES_PER_BLOCK`] slots. Each
//! block owns:
//!
//! - an occupancy bitset,
//! - one generation counter per slot,
//! - one packed location per slot.
//!
//! Blocks are allocated lazily and indexed by a flat table of block pointers
//! with a parallel table of live counts.
//!
//! ## Busy-flag protocol
//!
//! A block's live count doubles as its lock. A caller that wants to mutate a
//! block swaps the live count for the `BUSY` sentinel with a
//! compare-and-swap; while it holds the sentinel it is the only writer of the
//! block's bitset and generations. It publishes the new live count with a
//! second compare-and-swap when done.
//!
//! Readers ([`EntityIdAllocator::exists`], [`EntityIdAllocator::location`])
//! never take the flag. Generation and bit writes only happen inside the busy
//! window, so a racing reader observes either the old or the new state of a
//! slot. Callers needing strict consistency must read at a synchronization
//! point.
//!
//! ## Block retirement
//!
//! When a block's live count drops to zero its pointer is unpublished and the
//! block is parked in a retired list. Retired blocks are physically freed by
//! [`EntityIdAllocator::reclaim`], which takes `&mut self` and therefore
//! cannot race a lock-free reader. The highest generation a retired block
//! reached is kept as a floor so a recreated block continues the sequence.

use std::ptr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};

use crate::engine::types::{
    ChunkID,
    SlotID,
    IndexID,
    VersionID,
    ENTITIES_PER_BLOCK,
    BLOCK_BITSET_WORDS,
};
use crate::engine::error::CapacityError;


/// Stable logical identity of a record.
///
/// `index` selects a physical slot; `generation` invalidates stale handles
/// after the slot is freed and reused. Generation 0 is never issued, so
/// [`Entity::NULL`] never exists.

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default, Pod, Zeroable)]
pub struct Entity {
    /// Slot index in the identity space.
    pub index: IndexID,

    /// Generation of the slot this handle refers to.
    pub generation: VersionID,
}

impl Entity {
    /// Canonical null handle.
    pub const NULL: Entity = Entity { index: 0, generation: 0 };

    /// Builds a handle from raw parts.
    #[inline]
    pub const fn new(index: IndexID, generation: VersionID) -> Self {
        Self { index, generation }
    }

    /// Returns `true` for the null handle.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.index == 0 && self.generation == 0
    }
}

/// Physical position of a live entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    /// Chunk holding the entity's payload.
    pub chunk: ChunkID,

    /// Slot inside the chunk.
    pub slot: SlotID,
}

impl EntityLocation {
    /// Location of an identity that has no storage yet.
    pub const INVALID: EntityLocation = EntityLocation { chunk: ChunkID::MAX, slot: SlotID::MAX };

    #[inline]
    fn pack(self) -> u64 {
        ((self.chunk as u64) << 32) | self.slot as u64
    }

    #[inline]
    fn unpack(bits: u64) -> Self {
        Self { chunk: (bits >> 32) as ChunkID, slot: bits as SlotID }
    }

    /// Returns `true` unless this is [`EntityLocation::INVALID`].
    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Live-count sentinel marking a block as owned by one mutator.
const BUSY: u32 = u32::MAX;

#[inline]
fn next_generation(generation: VersionID) -> VersionID {
    match generation.wrapping_add(1) {
        0 => 1,
        g => g,
    }
}

/// Storage for one block of identities.
struct Block {
    occupied: [AtomicU64; BLOCK_BITSET_WORDS],
    generations: Box<[AtomicU32]>,
    locations: Box<[AtomicU64]>,
}

impl Block {
    fn new(generation_floor: VersionID) -> Box<Self> {
        let invalid = EntityLocation::INVALID.pack();
        Box::new(Self {
            occupied: std::array::from_fn(|_| AtomicU64::new(0)),
            generations: (0..ENTITIES_PER_BLOCK).map(|_| AtomicU32::new(generation_floor)).collect(),
            locations: (0..ENTITIES_PER_BLOCK).map(|_| AtomicU64::new(invalid)).collect(),
        })
    }

    #[inline]
    fn is_occupied(&self, local: usize) -> bool {
        (self.occupied[local / 64].load(Ordering::Acquire) >> (local % 64)) & 1 == 1
    }

    /// Grants up to `wanted` free slots. Caller holds the busy flag.
    fn grant(&self, base: IndexID, wanted: usize, out: &mut Vec<Entity>) -> usize {
        let mut granted = 0;
        for (word_index, word) in self.occupied.iter().enumerate() {
            if granted == wanted { break; }

            let mut bits = word.load(Ordering::Relaxed);
            let mut free = !bits;
            while free != 0 && granted < wanted {
                let bit = free.trailing_zeros() as usize;
                free &= free - 1;
                bits |= 1u64 << bit;

                let local = word_index * 64 + bit;
                let generation = next_generation(self.generations[local].load(Ordering::Relaxed));
                self.generations[local].store(generation, Ordering::Release);
                self.locations[local].store(EntityLocation::INVALID.pack(), Ordering::Relaxed);

                out.push(Entity::new(base + local as IndexID, generation));
                granted += 1;
            }
            word.store(bits, Ordering::Release);
        }
        granted
    }

    /// Frees `entity` if its generation still matches. Caller holds the busy flag.
    fn release(&self, local: usize, generation: VersionID) -> bool {
        if !self.is_occupied(local) { return false; }
        let stored = self.generations[local].load(Ordering::Relaxed);
        if stored != generation { return false; }

        self.generations[local].store(next_generation(stored), Ordering::Release);
        self.occupied[local / 64].fetch_and(!(1u64 << (local % 64)), Ordering::Release);
        self.locations[local].store(EntityLocation::INVALID.pack(), Ordering::Relaxed);
        true
    }

    fn max_generation(&self) -> VersionID {
        self.generations
            .iter()
            .map(|g| g.load(Ordering::Relaxed))
            .max()
            .unwrap_or(0)
    }
}

/// Allocates and frees `(index, generation)` identities and maps them to
/// physical locations.
///
/// ## Concurrency
/// `allocate`, `deallocate`, `exists` and `location` take `&self` and are
/// safe to call from many workers at once. Reclaiming retired blocks takes
/// `&mut self`.
///
/// ## Invariants
/// - No two simultaneously live identities share `(index, generation)`.
/// - Freeing and reallocating an index strictly increases its generation.

pub struct EntityIdAllocator {
    blocks: Box<[AtomicPtr<Block>]>,
    live_counts: Box<[AtomicU32]>,
    generation_floors: Box<[AtomicU32]>,
    retired: Mutex<Vec<Box<Block>>>,
}

impl EntityIdAllocator {
    /// Creates an allocator with room for `max_blocks` blocks.
    ///
    /// ## Panics
    /// Panics if `max_blocks` is zero or the identity space would not fit in
    /// a `u32` index.

    pub fn new(max_blocks: usize) -> Self {
        assert!(max_blocks > 0, "allocator needs at least one block");
        assert!(
            (max_blocks as u64) * (ENTITIES_PER_BLOCK as u64) <= IndexID::MAX as u64,
            "identity space exceeds the index range"
        );

        Self {
            blocks: (0..max_blocks).map(|_| AtomicPtr::new(ptr::null_mut())).collect(),
            live_counts: (0..max_blocks).map(|_| AtomicU32::new(0)).collect(),
            generation_floors: (0..max_blocks).map(|_| AtomicU32::new(0)).collect(),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Total identities this allocator can hand out at once.
    #[inline]
    pub fn capacity(&self) -> u64 {
        (self.blocks.len() * ENTITIES_PER_BLOCK) as u64
    }

    /// Approximate number of live identities.
    ///
    /// ## Notes
    /// Blocks that are busy at the time of the call are skipped.

    pub fn live_count(&self) -> u64 {
        self.live_counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .filter(|&c| c != BUSY)
            .map(u64::from)
            .sum()
    }

    /// Tries once to take the busy flag on `block_index`.
    ///
    /// Returns the live count the block had, or `None` if it is busy, full
    /// (when `skip_full` is set) or the CAS lost a race.

    #[inline]
    fn try_acquire(&self, block_index: usize, skip_full: bool) -> Option<u32> {
        let count = &self.live_counts[block_index];
        let current = count.load(Ordering::Acquire);
        if current == BUSY { return None; }
        if skip_full && current as usize == ENTITIES_PER_BLOCK { return None; }
        count
            .compare_exchange(current, BUSY, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
    }

    /// Spins until the busy flag on `block_index` is taken.
    fn acquire(&self, block_index: usize) -> u32 {
        let mut spins = 0u32;
        loop {
            if let Some(previous) = self.try_acquire(block_index, false) {
                return previous;
            }
            spins += 1;
            if spins % 1024 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    #[inline]
    fn release_flag(&self, block_index: usize, live: u32) {
        let restored = self.live_counts[block_index]
            .compare_exchange(BUSY, live, Ordering::AcqRel, Ordering::Relaxed);
        debug_assert!(restored.is_ok(), "block {block_index} lost its busy flag");
    }

    /// Allocates `n` fresh identities.
    ///
    /// ## Behavior
    /// Blocks are scanned in order; a block that is busy is skipped and
    /// retried on a later pass. The call is all-or-nothing: if the identity
    /// space runs out, everything granted so far is released again.
    ///
    /// ## Errors
    /// `CapacityError` when every block is exhausted.

    pub fn allocate(&self, n: usize) -> Result<Vec<Entity>, CapacityError> {
        if n == 0 { return Ok(Vec::new()); }
        if n as u64 > self.capacity() {
            return Err(CapacityError { entities_needed: n as u64, capacity: self.capacity() });
        }
        let mut out = Vec::with_capacity(n);

        loop {
            let mut skipped_busy = false;

            for block_index in 0..self.blocks.len() {
                if out.len() == n { break; }

                let count = self.live_counts[block_index].load(Ordering::Relaxed);
                if count as usize == ENTITIES_PER_BLOCK { continue; }

                let Some(previous) = self.try_acquire(block_index, true) else {
                    skipped_busy = true;
                    continue;
                };

                let mut block = self.blocks[block_index].load(Ordering::Acquire);
                if block.is_null() {
                    let floor = self.generation_floors[block_index].load(Ordering::Acquire);
                    block = Box::into_raw(Block::new(floor));
                    self.blocks[block_index].store(block, Ordering::Release);
                }

                // SAFETY: the pointer was published by a busy-flag holder and
                // blocks are only freed through `reclaim(&mut self)`.
                let block_ref = unsafe { &*block };
                let base = (block_index * ENTITIES_PER_BLOCK) as IndexID;
                let granted = block_ref.grant(base, n - out.len(), &mut out);

                self.release_flag(block_index, previous + granted as u32);
            }

            if out.len() == n { return Ok(out); }

            if !skipped_busy {
                let granted = out.len();
                self.deallocate(&out);
                log::warn!("identity space exhausted after granting {granted} of {n}");
                return Err(CapacityError { entities_needed: n as u64, capacity: self.capacity() });
            }

            std::thread::yield_now();
        }
    }

    /// Frees identities.
    ///
    /// ## Behavior
    /// Input is grouped by block so each block's busy flag is taken once.
    /// Entities whose generation no longer matches are skipped silently; a
    /// second deallocation of the same handle is a no-op.

    pub fn deallocate(&self, entities: &[Entity]) {
        if entities.is_empty() { return; }

        let mut sorted = entities.to_vec();
        sorted.sort_unstable();

        let mut start = 0;
        while start < sorted.len() {
            let block_index = sorted[start].index as usize / ENTITIES_PER_BLOCK;
            let mut end = start + 1;
            while end < sorted.len() && sorted[end].index as usize / ENTITIES_PER_BLOCK == block_index {
                end += 1;
            }

            if block_index < self.blocks.len() {
                self.deallocate_in_block(block_index, &sorted[start..end]);
            }
            start = end;
        }
    }

    fn deallocate_in_block(&self, block_index: usize, run: &[Entity]) {
        let previous = self.acquire(block_index);
        let block = self.blocks[block_index].load(Ordering::Acquire);
        if block.is_null() {
            self.release_flag(block_index, previous);
            return;
        }

        // SAFETY: see `allocate`; the busy flag is held.
        let block_ref = unsafe { &*block };
        let mut freed = 0u32;
        for entity in run {
            let local = entity.index as usize % ENTITIES_PER_BLOCK;
            if block_ref.release(local, entity.generation) {
                freed += 1;
            }
        }

        let live = previous - freed;
        if live == 0 && freed > 0 {
            let floor = block_ref.max_generation();
            self.generation_floors[block_index].store(floor, Ordering::Release);
            self.blocks[block_index].store(ptr::null_mut(), Ordering::Release);

            // SAFETY: the pointer came from `Box::into_raw` and was just
            // unpublished while the busy flag is held.
            let owned = unsafe { Box::from_raw(block) };
            match self.retired.lock() {
                Ok(mut retired) => retired.push(owned),
                Err(poisoned) => poisoned.into_inner().push(owned),
            }
        }

        self.release_flag(block_index, live);
    }

    /// Returns `true` if `entity` is live.
    pub fn exists(&self, entity: Entity) -> bool {
        let block_index = entity.index as usize / ENTITIES_PER_BLOCK;
        let Some(slot) = self.blocks.get(block_index) else { return false; };
        let block = slot.load(Ordering::Acquire);
        if block.is_null() { return false; }

        // SAFETY: published blocks stay allocated until `reclaim(&mut self)`.
        let block_ref = unsafe { &*block };
        let local = entity.index as usize % ENTITIES_PER_BLOCK;
        block_ref.is_occupied(local)
            && block_ref.generations[local].load(Ordering::Acquire) == entity.generation
    }

    /// Returns the physical location of a live entity.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        if !self.exists(entity) { return None; }
        let block = self.blocks[entity.index as usize / ENTITIES_PER_BLOCK].load(Ordering::Acquire);

        // SAFETY: `exists` observed the block published.
        let block_ref = unsafe { &*block };
        let local = entity.index as usize % ENTITIES_PER_BLOCK;
        Some(EntityLocation::unpack(block_ref.locations[local].load(Ordering::Acquire)))
    }

    /// Records the physical location of a live entity.
    ///
    /// ## Notes
    /// Called by the structural change engine only, at a synchronization
    /// point.

    pub fn set_location(&self, entity: Entity, location: EntityLocation) {
        debug_assert!(
            self.exists(entity),
            "set_location was called on a dead or stale entity. Entity: {:?}, Location: {:?}",
            entity, location
        );
        let block_index = entity.index as usize / ENTITIES_PER_BLOCK;
        let Some(slot) = self.blocks.get(block_index) else { return; };
        let block = slot.load(Ordering::Acquire);
        if block.is_null() { return; }

        // SAFETY: published blocks stay allocated until `reclaim(&mut self)`.
        let block_ref = unsafe { &*block };
        block_ref.locations[entity.index as usize % ENTITIES_PER_BLOCK]
            .store(location.pack(), Ordering::Release);
    }

    /// Physically frees blocks retired since the last call.
    ///
    /// Returns the number of blocks freed.

    pub fn reclaim(&mut self) -> usize {
        let retired = match self.retired.get_mut() {
            Ok(retired) => retired,
            Err(poisoned) => poisoned.into_inner(),
        };
        let freed = retired.len();
        retired.clear();
        freed
    }

    /// Number of blocks currently allocated.
    pub fn allocated_blocks(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| !b.load(Ordering::Relaxed).is_null())
            .count()
    }
}

impl Drop for EntityIdAllocator {
    fn drop(&mut self) {
        for slot in self.blocks.iter() {
            let block = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !block.is_null() {
                // SAFETY: every published pointer came from `Box::into_raw`.
                drop(unsafe { Box::from_raw(block) });
            }
        }
    }
}
