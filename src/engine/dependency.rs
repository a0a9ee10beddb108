//! # Dependency Tracking Module
//!
//! This module implements a **per-component read/write completion ledger**.
//!
//! ## Purpose
//!
//! Workers touch component data concurrently. The tracker tells each new
//! piece of work which earlier work it must wait for:
//!
//! - A **reader** of a type waits for the last writer of that type.
//! - A **writer** of a type waits for the last writer and every reader
//!   registered since.
//!
//! Work that declares no types is tracked under the identity type as a
//! reader, so a full synchronization still waits for it.
//!
//! ## State
//!
//! | Per type        | Meaning                                             |
//! |-----------------|-----------------------------------------------------|
//! | `writer`        | handle of the last registered writer, if any        |
//! | `readers`       | readers registered since that writer (bounded ring) |
//!
//! The ring holds at most `read_capacity` handles. Registering one more
//! reader first collapses the ring into a single combined handle.
//!
//! ## Exclusive transactions
//!
//! Between [`DependencyTracker::begin_exclusive_transaction`] and
//! [`DependencyTracker::end_exclusive_transaction`] per-type tracking is
//! suspended. Registrations join a flat set of handles and every request
//! returns a handle combining that set.

use std::collections::HashMap;

use crate::engine::error::{ECSError, ECSResult};
use crate::engine::jobs::JobHandle;
use crate::engine::types::{TypeIndex, IDENTITY_TYPE, READ_HANDLE_CAPACITY};
use crate::profiling::profiler;


/// Handles registered during an exclusive transaction, kept flat so no
/// combined handle ever chains onto the previous one.
struct ExclusiveSet {
    handles: Vec<JobHandle>,
    prune_at: usize,
}

impl ExclusiveSet {
    const PRUNE_FLOOR: usize = 64;

    fn new() -> Self {
        Self { handles: Vec::new(), prune_at: Self::PRUNE_FLOOR }
    }

    fn push(&mut self, handle: &JobHandle) {
        if handle.is_completed() { return; }
        if self.handles.len() >= self.prune_at {
            self.handles.retain(|h| !h.is_completed());
            self.prune_at = (self.handles.len() * 2).max(Self::PRUNE_FLOOR);
        }
        self.handles.push(handle.clone());
    }

    fn combined(&self) -> JobHandle {
        JobHandle::combine(&self.handles)
    }

    fn complete(&mut self) {
        for handle in self.handles.drain(..) {
            handle.complete();
        }
        self.prune_at = Self::PRUNE_FLOOR;
    }
}

#[derive(Default)]
struct TypeDependency {
    writer: Option<JobHandle>,
    readers: Vec<JobHandle>,
}

impl TypeDependency {
    fn complete(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.complete();
        }
        for reader in self.readers.drain(..) {
            reader.complete();
        }
    }
}

/// Per-component ledger of outstanding read and write handles.
///
/// ## Invariants
/// - `readers.len() <= read_capacity` for every type.
/// - No reader in the ring was covered by `writer` when it was registered.

pub struct DependencyTracker {
    types: HashMap<TypeIndex, TypeDependency>,
    read_capacity: usize,
    exclusive: Option<ExclusiveSet>,
}

impl Default for DependencyTracker {
    fn default() -> Self {
        Self::new(READ_HANDLE_CAPACITY)
    }
}

impl DependencyTracker {
    /// Creates a tracker keeping up to `read_capacity` readers per type.
    pub fn new(read_capacity: usize) -> Self {
        assert!(read_capacity > 0, "read ring needs at least one slot");
        Self { types: HashMap::new(), read_capacity, exclusive: None }
    }

    /// Returns the handle new work must depend on.
    ///
    /// ## Behavior
    /// - Types listed in both `reads` and `writes` count as written.
    /// - Both lists empty: the work waits for the identity type's writer.

    pub fn request_dependency(&self, reads: &[TypeIndex], writes: &[TypeIndex]) -> JobHandle {
        if let Some(exclusive) = &self.exclusive {
            return exclusive.combined();
        }

        let mut handles: Vec<JobHandle> = Vec::new();
        let reads: &[TypeIndex] = if reads.is_empty() && writes.is_empty() { &[IDENTITY_TYPE] } else { reads };

        for type_index in reads {
            if let Some(entry) = self.types.get(type_index) {
                handles.extend(entry.writer.iter().cloned());
            }
        }
        for type_index in writes {
            if let Some(entry) = self.types.get(type_index) {
                handles.extend(entry.writer.iter().cloned());
                handles.extend(entry.readers.iter().cloned());
            }
        }
        JobHandle::combine(&handles)
    }

    /// Records `handle` as the latest reader or writer of the given types.
    ///
    /// ## Notes
    /// A writer handle replaces the previous writer and drops the readers it
    /// already waits for. Readers and a previous writer it does not cover
    /// stay tracked, so a later writer or a full synchronization still
    /// waits for them.

    pub fn register_completion(&mut self, reads: &[TypeIndex], writes: &[TypeIndex], handle: &JobHandle) {
        if let Some(exclusive) = self.exclusive.as_mut() {
            exclusive.push(handle);
            return;
        }

        let reads: &[TypeIndex] = if reads.is_empty() && writes.is_empty() { &[IDENTITY_TYPE] } else { reads };

        for &type_index in writes {
            let entry = self.types.entry(type_index).or_default();
            entry.writer = Some(match entry.writer.take() {
                Some(previous) if !handle.depends_on(&previous) => JobHandle::combine(&[previous, handle.clone()]),
                _ => handle.clone(),
            });
            entry.readers.retain(|reader| !handle.depends_on(reader));
        }

        let capacity = self.read_capacity;
        for &type_index in reads {
            if writes.contains(&type_index) { continue; }

            let entry = self.types.entry(type_index).or_default();
            if entry.readers.len() == capacity {
                let collapsed = JobHandle::combine(&entry.readers);
                entry.readers.clear();
                entry.readers.push(collapsed);
                log::trace!("read ring of type {type_index} collapsed");
            }
            entry.readers.push(handle.clone());
        }
    }

    /// Blocks on every tracked handle and forgets them.
    pub fn complete_all(&mut self) {
        let _g = profiler::span("DependencyTracker::complete_all");

        for entry in self.types.values_mut() {
            entry.complete();
        }
        self.types.clear();

        if let Some(exclusive) = self.exclusive.as_mut() {
            exclusive.complete();
        }
    }

    /// Blocks on the writer and readers of `type_index`.
    pub fn complete_type(&mut self, type_index: TypeIndex) {
        if self.complete_exclusive() { return; }
        if let Some(entry) = self.types.get_mut(&type_index) {
            entry.complete();
        }
    }

    /// Blocks on the writer of `type_index` only.
    pub fn complete_write_type(&mut self, type_index: TypeIndex) {
        if self.complete_exclusive() { return; }
        if let Some(entry) = self.types.get_mut(&type_index) {
            if let Some(writer) = entry.writer.take() {
                writer.complete();
            }
        }
    }

    fn complete_exclusive(&mut self) -> bool {
        match self.exclusive.as_mut() {
            Some(exclusive) => {
                exclusive.complete();
                true
            }
            None => false,
        }
    }

    /// Completes all outstanding work and suspends per-type tracking.
    ///
    /// ## Errors
    /// `ExclusiveTransaction` if a transaction is already open.

    pub fn begin_exclusive_transaction(&mut self) -> ECSResult<()> {
        if self.exclusive.is_some() {
            return Err(ECSError::ExclusiveTransaction("transaction already open"));
        }
        self.complete_all();
        self.exclusive = Some(ExclusiveSet::new());
        log::debug!("exclusive transaction opened");
        Ok(())
    }

    /// Completes the transaction's combined handle and resumes per-type
    /// tracking.
    ///
    /// ## Errors
    /// `ExclusiveTransaction` if no transaction is open.

    pub fn end_exclusive_transaction(&mut self) -> ECSResult<()> {
        let Some(mut exclusive) = self.exclusive.take() else {
            return Err(ECSError::ExclusiveTransaction("no transaction open"));
        };
        exclusive.complete();
        log::debug!("exclusive transaction closed");
        Ok(())
    }

    /// Returns `true` while an exclusive transaction is open.
    #[inline]
    pub fn is_exclusive(&self) -> bool {
        self.exclusive.is_some()
    }

    /// Number of read handles currently held for `type_index`.
    pub fn read_handle_count(&self, type_index: TypeIndex) -> usize {
        self.types.get(&type_index).map_or(0, |e| e.readers.len())
    }

    /// Returns `true` if a writer is recorded for `type_index`.
    pub fn has_writer(&self, type_index: TypeIndex) -> bool {
        self.types.get(&type_index).is_some_and(|e| e.writer.is_some())
    }

    /// Maximum read handles kept per type.
    #[inline]
    pub fn read_capacity(&self) -> usize {
        self.read_capacity
    }
}
