//! Out-of-line payload storage for buffer and managed components.
//!
//! Chunk columns are fixed-stride, so two kinds of component keep part of
//! their payload outside the chunk page:
//!
//! - **Buffers** keep a [`BufferHeader`] plus an inline element region in the
//!   column. When a buffer outgrows its inline capacity its elements move to
//!   a [`BufferHeap`] allocation and the header records the heap handle.
//! - **Managed** components store only a `u32` handle in the column; the
//!   value itself is a boxed Rust object inside the [`ManagedStore`].
//!
//! # Slot format
//!
//! ```text
//! buffer slot  = | heap u32 | length u32 | capacity u32 | reserved u32 | inline elements ... |
//! managed slot = | handle u32 |
//! ```
//!
//! Handle `0` means "no out-of-line payload" in both cases; every other
//! handle is `slab index + 1`.
//!
//! # Ownership
//!
//! A payload is owned by exactly one slot. Moving a slot between chunks
//! copies the handle; destroying a slot (or dropping the type in a move)
//! releases the payload; cloning a slot deep-copies it.

use std::any::Any;

use bytemuck::{Pod, Zeroable};

use crate::engine::page::AlignedAlloc;
use crate::engine::types::{BUFFER_HEADER_BYTES, COLUMN_ALIGNMENT};


/// Header at the start of every buffer slot.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferHeader {
    /// Heap handle, `0` while elements are inline.
    pub heap: u32,

    /// Number of elements.
    pub length: u32,

    /// Elements that fit without reallocating.
    pub capacity: u32,

    /// Padding; always zero.
    pub reserved: u32,
}

const _: [(); 1] = [(); (std::mem::size_of::<BufferHeader>() == BUFFER_HEADER_BYTES) as usize];

impl BufferHeader {
    /// Header of an empty buffer with `inline_capacity` inline elements.
    #[inline]
    pub const fn empty(inline_capacity: u32) -> Self {
        Self { heap: 0, length: 0, capacity: inline_capacity, reserved: 0 }
    }

    /// Reads the header at the start of `slot`.
    #[inline]
    pub fn read(slot: &[u8]) -> Self {
        bytemuck::pod_read_unaligned(&slot[..BUFFER_HEADER_BYTES])
    }

    /// Writes the header at the start of `slot`.
    #[inline]
    pub fn write(self, slot: &mut [u8]) {
        slot[..BUFFER_HEADER_BYTES].copy_from_slice(bytemuck::bytes_of(&self));
    }
}

/// Slab of 16-byte aligned element arrays for overflowing buffers.
#[derive(Default)]
pub struct BufferHeap {
    slots: Vec<Option<AlignedAlloc>>,
    free: Vec<u32>,
}

impl BufferHeap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `bytes` zeroed bytes and returns the handle.
    pub fn allocate(&mut self, bytes: usize) -> u32 {
        let alloc = AlignedAlloc::zeroed(bytes.max(COLUMN_ALIGNMENT), COLUMN_ALIGNMENT);
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(alloc);
                index + 1
            }
            None => {
                self.slots.push(Some(alloc));
                self.slots.len() as u32
            }
        }
    }

    /// Frees the allocation behind `handle`. Handle `0` is ignored.
    pub fn free(&mut self, handle: u32) {
        if handle == 0 { return; }
        let index = handle - 1;
        if let Some(slot) = self.slots.get_mut(index as usize) {
            if slot.take().is_some() {
                self.free.push(index);
            }
        }
    }

    /// Bytes of the allocation behind `handle`.
    ///
    /// ## Panics
    /// Panics on a dangling handle; a live buffer header always points at a
    /// live allocation.

    pub fn bytes(&self, handle: u32) -> &[u8] {
        match self.slots.get(handle.wrapping_sub(1) as usize) {
            Some(Some(alloc)) => alloc.as_slice(),
            _ => panic!("dangling buffer heap handle {handle}"),
        }
    }

    /// Mutable bytes of the allocation behind `handle`.
    pub fn bytes_mut(&mut self, handle: u32) -> &mut [u8] {
        match self.slots.get_mut(handle.wrapping_sub(1) as usize) {
            Some(Some(alloc)) => alloc.as_mut_slice(),
            _ => panic!("dangling buffer heap handle {handle}"),
        }
    }

    /// Number of live allocations.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// Element bytes of the buffer stored in `slot`.
pub fn buffer_elements<'a>(slot: &'a [u8], heap: &'a BufferHeap, element_size: usize) -> &'a [u8] {
    let header = BufferHeader::read(slot);
    let len = header.length as usize * element_size;
    if header.heap == 0 {
        &slot[BUFFER_HEADER_BYTES..BUFFER_HEADER_BYTES + len]
    } else {
        &heap.bytes(header.heap)[..len]
    }
}

/// Mutable element bytes of the buffer stored in `slot`.
pub fn buffer_elements_mut<'a>(slot: &'a mut [u8], heap: &'a mut BufferHeap, element_size: usize) -> &'a mut [u8] {
    let header = BufferHeader::read(slot);
    let len = header.length as usize * element_size;
    if header.heap == 0 {
        &mut slot[BUFFER_HEADER_BYTES..BUFFER_HEADER_BYTES + len]
    } else {
        &mut heap.bytes_mut(header.heap)[..len]
    }
}

/// Makes room for at least `required` elements, moving the buffer to the
/// heap when it outgrows its current capacity.
pub fn buffer_reserve(slot: &mut [u8], heap: &mut BufferHeap, element_size: usize, required: u32) {
    let mut header = BufferHeader::read(slot);
    if required <= header.capacity { return; }

    let capacity = required.max(header.capacity.saturating_mul(2)).max(8);
    let handle = heap.allocate(capacity as usize * element_size);
    let used = header.length as usize * element_size;

    if header.heap == 0 {
        let (source, target) = (&slot[BUFFER_HEADER_BYTES..BUFFER_HEADER_BYTES + used], heap.bytes_mut(handle));
        target[..used].copy_from_slice(source);
    } else {
        let old: Vec<u8> = heap.bytes(header.heap)[..used].to_vec();
        heap.bytes_mut(handle)[..used].copy_from_slice(&old);
        heap.free(header.heap);
    }

    header.heap = handle;
    header.capacity = capacity;
    header.write(slot);
}

/// Appends one element.
pub fn buffer_push(slot: &mut [u8], heap: &mut BufferHeap, element: &[u8]) {
    let element_size = element.len();
    let length = BufferHeader::read(slot).length;
    buffer_reserve(slot, heap, element_size, length + 1);

    let mut header = BufferHeader::read(slot);
    let at = header.length as usize * element_size;
    header.length += 1;
    header.write(slot);

    let elements = buffer_elements_mut(slot, heap, element_size);
    elements[at..at + element_size].copy_from_slice(element);
}

/// Replaces the contents with `elements` (a whole number of elements).
pub fn buffer_set(slot: &mut [u8], heap: &mut BufferHeap, element_size: usize, elements: &[u8]) {
    debug_assert_eq!(elements.len() % element_size, 0);
    let count = (elements.len() / element_size) as u32;
    buffer_reserve(slot, heap, element_size, count);

    let mut header = BufferHeader::read(slot);
    header.length = count;
    header.write(slot);
    buffer_elements_mut(slot, heap, element_size).copy_from_slice(elements);
}

/// Empties the buffer and returns it to inline storage.
pub fn buffer_clear(slot: &mut [u8], heap: &mut BufferHeap, inline_capacity: u32) {
    buffer_release(slot, heap);
    BufferHeader::empty(inline_capacity).write(slot);
}

/// Frees the heap allocation of the buffer in `slot`, if any.
#[inline]
pub fn buffer_release(slot: &[u8], heap: &mut BufferHeap) {
    heap.free(BufferHeader::read(slot).heap);
}

/// Gives the buffer in `slot` (a byte copy of another slot) its own heap
/// allocation.
pub fn buffer_detach(slot: &mut [u8], heap: &mut BufferHeap, element_size: usize) {
    let mut header = BufferHeader::read(slot);
    if header.heap == 0 { return; }

    let copy: Vec<u8> = heap.bytes(header.heap)[..header.capacity as usize * element_size].to_vec();
    let handle = heap.allocate(copy.len());
    heap.bytes_mut(handle)[..copy.len()].copy_from_slice(&copy);
    header.heap = handle;
    header.write(slot);
}

/// Boxed value of a managed component.
pub type ManagedValue = Box<dyn Any + Send + Sync>;

/// Slab of managed component values.
#[derive(Default)]
pub struct ManagedStore {
    values: Vec<Option<ManagedValue>>,
    free: Vec<u32>,
}

impl ManagedStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` and returns its handle.
    pub fn insert(&mut self, value: ManagedValue) -> u32 {
        match self.free.pop() {
            Some(index) => {
                self.values[index as usize] = Some(value);
                index + 1
            }
            None => {
                self.values.push(Some(value));
                self.values.len() as u32
            }
        }
    }

    /// Value behind `handle`.
    pub fn get(&self, handle: u32) -> Option<&(dyn Any + Send + Sync)> {
        if handle == 0 { return None; }
        self.values.get(handle as usize - 1)?.as_deref()
    }

    /// Mutable value behind `handle`.
    pub fn get_mut(&mut self, handle: u32) -> Option<&mut (dyn Any + Send + Sync)> {
        if handle == 0 { return None; }
        self.values.get_mut(handle as usize - 1)?.as_deref_mut()
    }

    /// Replaces the value behind a live `handle`.
    pub fn replace(&mut self, handle: u32, value: ManagedValue) {
        match self.values.get_mut(handle.wrapping_sub(1) as usize) {
            Some(slot) if slot.is_some() => *slot = Some(value),
            _ => panic!("dangling managed handle {handle}"),
        }
    }

    /// Drops the value behind `handle`. Handle `0` is ignored.
    pub fn remove(&mut self, handle: u32) {
        if handle == 0 { return; }
        let index = handle - 1;
        if let Some(slot) = self.values.get_mut(index as usize) {
            if slot.take().is_some() {
                self.free.push(index);
            }
        }
    }

    /// Clones the value behind `handle` with `clone` and stores the copy.
    pub fn clone_value(&mut self, handle: u32, clone: fn(&(dyn Any + Send + Sync)) -> ManagedValue) -> u32 {
        let copy = match self.get(handle) {
            Some(value) => clone(value),
            None => return 0,
        };
        self.insert(copy)
    }

    /// Number of live values.
    pub fn live(&self) -> usize {
        self.values.len() - self.free.len()
    }
}

/// Reads a managed handle from a column slot.
#[inline]
pub fn read_handle(slot: &[u8]) -> u32 {
    bytemuck::pod_read_unaligned(&slot[..4])
}

/// Writes a managed handle into a column slot.
#[inline]
pub fn write_handle(slot: &mut [u8], handle: u32) {
    slot[..4].copy_from_slice(&handle.to_ne_bytes());
}
