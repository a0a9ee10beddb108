//! Raw page allocation.
//!
//! Chunks never allocate memory themselves; they ask a [`PageAllocator`]
//! for fixed-size, 64-byte aligned pages. The default
//! [`SystemPageAllocator`] forwards to `std::alloc`. Embedders with their
//! own arenas implement the trait and hand it to the
//! [`EntityManager`](crate::engine::manager::EntityManager).

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

use crate::engine::types::CHUNK_ALIGNMENT;


/// Owned, zero-initialized, aligned allocation.
///
/// ## Safety
/// The pointer is valid for `len` bytes for as long as the value lives and
/// is freed exactly once on drop.

pub struct AlignedAlloc {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the allocation is uniquely owned; access is synchronized by its
// owner.
unsafe impl Send for AlignedAlloc {}
unsafe impl Sync for AlignedAlloc {}

impl AlignedAlloc {
    /// Allocates `len` zeroed bytes aligned to `align`.
    ///
    /// ## Panics
    /// Panics if `len` is zero or the layout is invalid; aborts through
    /// `handle_alloc_error` on allocation failure.

    pub fn zeroed(len: usize, align: usize) -> Self {
        assert!(len > 0, "zero-length allocation");
        let layout = match Layout::from_size_align(len, align) {
            Ok(layout) => layout,
            Err(e) => panic!("invalid allocation layout ({len} bytes, align {align}): {e}"),
        };

        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else { handle_alloc_error(layout) };
        Self { ptr, layout }
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize { self.layout.size() }

    /// Always `false`; zero-length allocations are rejected.
    #[inline]
    pub fn is_empty(&self) -> bool { false }

    /// Base pointer.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 { self.ptr.as_ptr() }

    /// Whole allocation as bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: valid for `len` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    /// Whole allocation as mutable bytes.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: valid for `len` initialized bytes; `&mut self` is unique.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }

    /// Zeroes the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.as_mut_slice().fill(0);
    }
}

impl Drop for AlignedAlloc {
    fn drop(&mut self) {
        // SAFETY: allocated with this exact layout in `zeroed`.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// One chunk page.
pub type Page = AlignedAlloc;

/// Source of chunk pages.
///
/// ## Contract
/// - Returned pages are exactly `size` bytes, zeroed and aligned to at
///   least [`CHUNK_ALIGNMENT`].
/// - `release` receives pages previously returned by `allocate` when the
///   engine drops them for good.

pub trait PageAllocator: Send + Sync {
    /// Returns a fresh zeroed page.
    fn allocate(&self, size: usize) -> Page;

    /// Takes back a page the engine no longer needs.
    fn release(&self, page: Page) {
        drop(page);
    }
}

/// Default page source backed by the global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemPageAllocator;

impl PageAllocator for SystemPageAllocator {
    fn allocate(&self, size: usize) -> Page {
        AlignedAlloc::zeroed(size, CHUNK_ALIGNMENT)
    }
}
