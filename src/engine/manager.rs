//! Entity manager: the coordinator-side entry point to the storage engine.
//!
//! This module defines [`EntityManager`], which owns every service of the
//! engine:
//!
//! * the [`TypeCatalog`] and the [`ArchetypeRegistry`],
//! * the [`ChunkStore`] with its page pool,
//! * the lock-free [`EntityIdAllocator`],
//! * the shared-value table and out-of-line payload stores,
//! * the [`DependencyTracker`].
//!
//! Structural changes (create, destroy, instantiate, move) are implemented in
//! the `structural` module; this module holds construction, lookups,
//! payload accessors and the dependency API.
//!
//! ## Concurrency model
//!
//! * Workers never hold references into the manager. They receive raw
//!   column views ([`ChunkColumn`]) and declare the component types they read
//!   and write through [`EntityManager::request_dependency`] and
//!   [`EntityManager::register_completion`].
//! * Main-thread accessors wait for exactly the handles they conflict with:
//!   reads wait for the type's writer, writes wait for its writer and
//!   readers.
//! * Structural changes wait for everything.
//!
//! ## Safety
//!
//! [`ChunkColumn`] hands raw pointers to workers. They stay valid until the
//! next structural change, which cannot start before every registered handle
//! has completed.

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::Pod;

use crate::engine::archetype::{Archetype, ArchetypeObserver, ArchetypeRegistry, Column};
use crate::engine::chunk::ChunkStore;
use crate::engine::component::{ComponentCategory, LinkedEntityGroup, TypeCatalog, LINKED_ENTITY_GROUP_TYPE};
use crate::engine::config::EngineConfig;
use crate::engine::dependency::DependencyTracker;
use crate::engine::entity::{Entity, EntityIdAllocator, EntityLocation};
use crate::engine::error::{
    ECSError,
    ECSResult,
    MissingComponentError,
    StaleEntityError,
    TypeMismatchError,
};
use crate::engine::jobs::JobHandle;
use crate::engine::page::{PageAllocator, SystemPageAllocator};
use crate::engine::shared::SharedValueTable;
use crate::engine::signature::TypeSignature;
use crate::engine::storage::{self, BufferHeap, ManagedStore};
use crate::engine::types::{ArchetypeID, ChangeVersion, ChunkID, TypeIndex};


/// Raw view of one column of one chunk, handed to workers.
///
/// ## Safety
/// The view does not borrow the manager. It is valid until the next
/// structural change; callers must register the job using it with the
/// dependency tracker so that change waits for the job.

pub struct ChunkColumn<T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<T>,
}

// SAFETY: access is coordinated through the dependency tracker.
unsafe impl<T: Send> Send for ChunkColumn<T> {}
unsafe impl<T: Sync> Sync for ChunkColumn<T> {}

impl<T> ChunkColumn<T> {
    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize { self.len }

    /// Returns `true` if the chunk holds no entities.
    #[inline]
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Elements as a shared slice.
    ///
    /// # Safety
    /// No structural change and no conflicting writer may run while the
    /// slice is alive.
    #[inline]
    pub unsafe fn as_slice<'a>(&self) -> &'a [T] {
        // SAFETY: upheld by the caller.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Elements as a mutable slice.
    ///
    /// # Safety
    /// The caller must be the only accessor of this column for the lifetime
    /// of the slice, and no structural change may run meanwhile.
    #[inline]
    pub unsafe fn as_mut_slice<'a>(&mut self) -> &'a mut [T] {
        // SAFETY: upheld by the caller.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

/// Owns archetypes, chunks, identities and the dependency ledger.
///
/// ## Invariants
/// - Every live entity has a valid location whose chunk belongs to the
///   archetype the entity is in.
/// - Chunk and archetype state only change inside `&mut self` methods,
///   after [`DependencyTracker::complete_all`].

pub struct EntityManager {
    pub(crate) config: EngineConfig,
    pub(crate) catalog: TypeCatalog,
    pub(crate) archetypes: ArchetypeRegistry,
    pub(crate) chunks: ChunkStore,
    pub(crate) entities: EntityIdAllocator,
    pub(crate) shared: SharedValueTable,
    pub(crate) buffers: BufferHeap,
    pub(crate) managed: ManagedStore,
    pub(crate) dependencies: DependencyTracker,
    pub(crate) version: ChangeVersion,
}

impl EntityManager {
    /// Creates a manager with the default configuration.
    pub fn new(catalog: TypeCatalog) -> Self {
        Self::with_config(catalog, EngineConfig::default())
    }

    /// Creates a manager with `config`, drawing pages from the system
    /// allocator.
    pub fn with_config(catalog: TypeCatalog, config: EngineConfig) -> Self {
        Self::with_page_allocator(catalog, config, Box::new(SystemPageAllocator))
    }

    /// Creates a manager drawing chunk pages from `allocator`.
    pub fn with_page_allocator(catalog: TypeCatalog, config: EngineConfig, allocator: Box<dyn PageAllocator>) -> Self {
        Self {
            catalog,
            archetypes: ArchetypeRegistry::new(config.chunk_size),
            chunks: ChunkStore::with_allocator(config.chunk_size, allocator),
            entities: EntityIdAllocator::new(config.max_entity_blocks),
            shared: SharedValueTable::new(),
            buffers: BufferHeap::new(),
            managed: ManagedStore::new(),
            dependencies: DependencyTracker::new(config.read_handle_capacity),
            version: 1,
            config,
        }
    }

    /// Active configuration.
    #[inline] pub fn config(&self) -> &EngineConfig { &self.config }

    /// The type catalog.
    #[inline] pub fn catalog(&self) -> &TypeCatalog { &self.catalog }

    /// The archetype registry.
    #[inline] pub fn archetypes(&self) -> &ArchetypeRegistry { &self.archetypes }

    /// Archetype by id.
    #[inline] pub fn archetype(&self, id: ArchetypeID) -> Option<&Archetype> { self.archetypes.get(id) }

    /// The chunk arena.
    #[inline] pub fn chunks(&self) -> &ChunkStore { &self.chunks }

    /// The identity allocator; safe to share with workers.
    #[inline] pub fn entity_allocator(&self) -> &EntityIdAllocator { &self.entities }

    /// The shared-value table.
    #[inline] pub fn shared_values(&self) -> &SharedValueTable { &self.shared }

    /// The out-of-line buffer heap.
    #[inline] pub fn buffer_heap(&self) -> &BufferHeap { &self.buffers }

    /// The managed object store.
    #[inline] pub fn managed_store(&self) -> &ManagedStore { &self.managed }

    /// The dependency ledger.
    #[inline] pub fn dependencies(&self) -> &DependencyTracker { &self.dependencies }

    /// Current global change version.
    #[inline] pub fn global_version(&self) -> ChangeVersion { self.version }

    /// Bumps the global change version and returns the new value.
    pub fn advance_version(&mut self) -> ChangeVersion {
        self.version = match self.version.wrapping_add(1) {
            0 => 1,
            v => v,
        };
        self.version
    }

    /// Returns the archetype for `signature`, creating it on first use.
    pub fn get_or_create_archetype(&mut self, signature: &TypeSignature) -> ECSResult<ArchetypeID> {
        self.archetypes.get_or_create(&self.catalog, signature)
    }

    /// Shorthand for an archetype made of plain type indices.
    pub fn archetype_of_types(&mut self, types: &[TypeIndex]) -> ECSResult<ArchetypeID> {
        self.get_or_create_archetype(&TypeSignature::from_indices(types))
    }

    /// Registers an archetype creation observer.
    pub fn add_archetype_observer(&mut self, observer: Box<dyn ArchetypeObserver>) {
        self.archetypes.add_observer(observer);
    }

    /// Archetypes containing all of `required` and none of `excluded`.
    pub fn matching_archetypes(&self, required: &[TypeIndex], excluded: &[TypeIndex]) -> Vec<ArchetypeID> {
        self.archetypes.matching_archetypes(required, excluded)
    }

    /// Returns `true` if `entity` is live.
    #[inline]
    pub fn exists(&self, entity: Entity) -> bool {
        self.entities.exists(entity)
    }

    /// Physical location of a live entity.
    #[inline]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.location(entity).filter(|l| l.is_valid())
    }

    /// Total entities stored across all archetypes.
    pub fn entity_count(&self) -> u64 {
        self.archetypes.iter().map(Archetype::entity_count).sum()
    }

    pub(crate) fn live_location(&self, entity: Entity) -> ECSResult<EntityLocation> {
        self.location(entity).ok_or_else(|| StaleEntityError { entity }.into())
    }

    /// Archetype a live entity belongs to.
    pub fn archetype_of(&self, entity: Entity) -> ECSResult<ArchetypeID> {
        let location = self.live_location(entity)?;
        Ok(self.chunks.chunk(location.chunk).archetype())
    }

    /// Returns `true` if `entity` has a component of `type_index`.
    pub fn has_component(&self, entity: Entity, type_index: TypeIndex) -> ECSResult<bool> {
        let archetype = self.archetype_of(entity)?;
        Ok(self.archetypes.archetype(archetype).has(type_index))
    }

    /// Entities stored in chunk `id`, in slot order.
    ///
    /// ## Errors
    /// `UnknownChunk` if `id` is not a live chunk.

    pub fn chunk_entities(&self, id: ChunkID) -> ECSResult<&[Entity]> {
        let chunk = self.chunks.get(id).ok_or(ECSError::UnknownChunk(id))?;
        let identity = &self.archetypes.archetype(chunk.archetype()).columns[0];
        Ok(bytemuck::cast_slice(&chunk.bytes()[identity.run_range(0, chunk.count() as usize)]))
    }

    /// Change version of `type_index` in chunk `id`.
    pub fn chunk_change_version(&self, id: ChunkID, type_index: TypeIndex) -> Option<ChangeVersion> {
        let chunk = self.chunks.get(id)?;
        let archetype = self.archetypes.archetype(chunk.archetype());
        let position = archetype.position_of(type_index)?;
        Some(chunk.change_version(archetype, position))
    }

    /// Resolves `T` for `entity` and checks its category.
    ///
    /// Returns the type index, the location and the column.

    fn resolve<T: 'static>(&self, entity: Entity, category: ComponentCategory) -> ECSResult<(TypeIndex, EntityLocation, Column)> {
        let type_index = self.catalog.require_index_of::<T>()?;
        let desc = self.catalog.desc(type_index).ok_or_else(|| {
            TypeMismatchError { type_index, expected: None, actual: TypeId::of::<T>() }
        })?;
        if desc.category != category {
            return Err(TypeMismatchError { type_index, expected: desc.type_id, actual: TypeId::of::<T>() }.into());
        }

        let location = self.live_location(entity)?;
        let archetype = self.archetypes.archetype(self.chunks.chunk(location.chunk).archetype());
        let column = archetype
            .column_of(type_index)
            .copied()
            .ok_or(MissingComponentError { entity, type_index })?;
        Ok((type_index, location, column))
    }

    fn stamp(&mut self, location: EntityLocation, type_index: TypeIndex) {
        let chunk = self.chunks.chunk_mut(location.chunk);
        let archetype = self.archetypes.archetype(chunk.archetype());
        if let Some(position) = archetype.position_of(type_index) {
            chunk.set_change_version(archetype, position, self.version);
        }
    }

    /// Reads a data component, waiting for its last writer.
    pub fn get_component<T: Pod>(&mut self, entity: Entity) -> ECSResult<&T> {
        let (type_index, location, column) = self.resolve::<T>(entity, ComponentCategory::Data)?;
        self.dependencies.complete_write_type(type_index);

        let slot = self.chunks.chunk(location.chunk).slot_bytes(&column, location.slot as usize);
        Ok(bytemuck::from_bytes(&slot[..size_of::<T>()]))
    }

    /// Reads every element of a fixed-array data component.
    pub fn get_component_slice<T: Pod>(&mut self, entity: Entity) -> ECSResult<&[T]> {
        let (type_index, location, column) = self.resolve::<T>(entity, ComponentCategory::Data)?;
        self.dependencies.complete_write_type(type_index);

        let slot = self.chunks.chunk(location.chunk).slot_bytes(&column, location.slot as usize);
        Ok(bytemuck::cast_slice(slot))
    }

    /// Mutable access to a data component; waits for readers and writer and
    /// stamps the chunk's change version.
    pub fn get_component_mut<T: Pod>(&mut self, entity: Entity) -> ECSResult<&mut T> {
        let (type_index, location, column) = self.resolve::<T>(entity, ComponentCategory::Data)?;
        self.dependencies.complete_type(type_index);
        self.stamp(location, type_index);

        let slot = self.chunks.chunk_mut(location.chunk).slot_bytes_mut(&column, location.slot as usize);
        Ok(bytemuck::from_bytes_mut(&mut slot[..size_of::<T>()]))
    }

    /// Overwrites a data component.
    pub fn set_component<T: Pod>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        *self.get_component_mut::<T>(entity)? = value;
        Ok(())
    }

    /// Reads the shared component value of the chunk holding `entity`.
    pub fn get_shared_component<T: Pod>(&self, entity: Entity) -> ECSResult<T> {
        let (type_index, location, _) = self.resolve::<T>(entity, ComponentCategory::Shared)?;
        let chunk = self.chunks.chunk(location.chunk);
        let archetype = self.archetypes.archetype(chunk.archetype());
        let k = archetype
            .shared_position_of(type_index)
            .ok_or(MissingComponentError { entity, type_index })?;
        Ok(self.shared.read(chunk.shared_index(archetype, k)))
    }

    /// Shared-value index of `type_index` in the chunk holding `entity`.
    pub fn shared_index_of(&self, entity: Entity, type_index: TypeIndex) -> ECSResult<u32> {
        let location = self.live_location(entity)?;
        let chunk = self.chunks.chunk(location.chunk);
        let archetype = self.archetypes.archetype(chunk.archetype());
        let k = archetype
            .shared_position_of(type_index)
            .ok_or(MissingComponentError { entity, type_index })?;
        Ok(chunk.shared_index(archetype, k))
    }

    /// Elements of a buffer component, waiting for its last writer.
    pub fn get_buffer<T: Pod>(&mut self, entity: Entity) -> ECSResult<&[T]> {
        let (type_index, location, column) = self.resolve::<T>(entity, ComponentCategory::Buffer)?;
        self.dependencies.complete_write_type(type_index);

        let slot = self.chunks.chunk(location.chunk).slot_bytes(&column, location.slot as usize);
        Ok(bytemuck::cast_slice(storage::buffer_elements(slot, &self.buffers, size_of::<T>())))
    }

    fn buffer_slot_mut<T: Pod>(&mut self, entity: Entity) -> ECSResult<(EntityLocation, Column)> {
        let (type_index, location, column) = self.resolve::<T>(entity, ComponentCategory::Buffer)?;
        self.dependencies.complete_type(type_index);
        self.stamp(location, type_index);
        Ok((location, column))
    }

    /// Appends one element to a buffer component.
    pub fn push_buffer<T: Pod>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        let (location, column) = self.buffer_slot_mut::<T>(entity)?;
        let slot = self.chunks.chunk_mut(location.chunk).slot_bytes_mut(&column, location.slot as usize);
        storage::buffer_push(slot, &mut self.buffers, bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Replaces the contents of a buffer component.
    pub fn set_buffer<T: Pod>(&mut self, entity: Entity, values: &[T]) -> ECSResult<()> {
        let (location, column) = self.buffer_slot_mut::<T>(entity)?;
        let slot = self.chunks.chunk_mut(location.chunk).slot_bytes_mut(&column, location.slot as usize);
        storage::buffer_set(slot, &mut self.buffers, size_of::<T>(), bytemuck::cast_slice(values));
        Ok(())
    }

    /// Empties a buffer component and frees its heap storage.
    pub fn clear_buffer<T: Pod>(&mut self, entity: Entity) -> ECSResult<()> {
        let (location, column) = self.buffer_slot_mut::<T>(entity)?;
        let slot = self.chunks.chunk_mut(location.chunk).slot_bytes_mut(&column, location.slot as usize);
        storage::buffer_clear(slot, &mut self.buffers, column.inline_capacity);
        Ok(())
    }

    /// Members of the linked group rooted at `entity`, if it has one.
    pub fn linked_group(&self, entity: Entity) -> ECSResult<Option<Vec<Entity>>> {
        let location = self.live_location(entity)?;
        Ok(self.linked_group_at(location))
    }

    pub(crate) fn linked_group_at(&self, location: EntityLocation) -> Option<Vec<Entity>> {
        let chunk = self.chunks.chunk(location.chunk);
        let column = self.archetypes.archetype(chunk.archetype()).column_of(LINKED_ENTITY_GROUP_TYPE)?;
        let slot = chunk.slot_bytes(column, location.slot as usize);
        let elements = storage::buffer_elements(slot, &self.buffers, size_of::<LinkedEntityGroup>());
        Some(bytemuck::cast_slice::<u8, LinkedEntityGroup>(elements).iter().map(|l| l.value).collect())
    }

    /// Reads a managed component; `None` until a value is set.
    pub fn get_managed<T: Any + Send + Sync>(&mut self, entity: Entity) -> ECSResult<Option<&T>> {
        let (type_index, location, column) = self.resolve::<T>(entity, ComponentCategory::Managed)?;
        self.dependencies.complete_write_type(type_index);

        let slot = self.chunks.chunk(location.chunk).slot_bytes(&column, location.slot as usize);
        let handle = storage::read_handle(slot);
        Ok(self.managed.get(handle).and_then(|v| v.downcast_ref::<T>()))
    }

    /// Stores a managed component value.
    pub fn set_managed<T: Any + Send + Sync>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        let (type_index, location, column) = self.resolve::<T>(entity, ComponentCategory::Managed)?;
        self.dependencies.complete_type(type_index);
        self.stamp(location, type_index);

        let slot = self.chunks.chunk_mut(location.chunk).slot_bytes_mut(&column, location.slot as usize);
        match storage::read_handle(slot) {
            0 => {
                let handle = self.managed.insert(Box::new(value));
                storage::write_handle(slot, handle);
            }
            handle => self.managed.replace(handle, Box::new(value)),
        }
        Ok(())
    }

    fn column_view<T: Pod>(&mut self, id: ChunkID, write: bool) -> ECSResult<ChunkColumn<T>> {
        let type_index = self.catalog.require_index_of::<T>()?;
        let missing = MissingComponentError { entity: Entity::NULL, type_index };
        let chunk = self.chunks.get(id).ok_or(ECSError::UnknownChunk(id))?;
        let archetype = self.archetypes.archetype(chunk.archetype());
        let position = archetype.position_of(type_index).ok_or(missing)?;
        let column = archetype.columns[position];
        if column.category != ComponentCategory::Data {
            return Err(TypeMismatchError { type_index, expected: None, actual: TypeId::of::<T>() }.into());
        }

        let len = chunk.count() as usize * column.stride / size_of::<T>();
        if write {
            let version = self.version;
            let chunk = self.chunks.chunk_mut(id);
            let archetype = self.archetypes.archetype(chunk.archetype());
            chunk.set_change_version(archetype, position, version);
        }

        // SAFETY: the column lies inside the page and is aligned for `T`.
        let ptr = unsafe { self.chunks.chunk(id).page_ptr().add(column.offset) } as *mut T;
        Ok(ChunkColumn { ptr, len, _marker: PhantomData })
    }

    /// Read-only raw view of a data column of chunk `id`.
    pub fn chunk_column<T: Pod>(&mut self, id: ChunkID) -> ECSResult<ChunkColumn<T>> {
        self.column_view(id, false)
    }

    /// Writable raw view of a data column of chunk `id`; stamps the chunk's
    /// change version for the type.
    pub fn chunk_column_mut<T: Pod>(&mut self, id: ChunkID) -> ECSResult<ChunkColumn<T>> {
        self.column_view(id, true)
    }

    /// Handle new work must wait for; see [`DependencyTracker::request_dependency`].
    pub fn request_dependency(&self, reads: &[TypeIndex], writes: &[TypeIndex]) -> JobHandle {
        self.dependencies.request_dependency(reads, writes)
    }

    /// Records a job's completion handle; see
    /// [`DependencyTracker::register_completion`].
    pub fn register_completion(&mut self, reads: &[TypeIndex], writes: &[TypeIndex], handle: &JobHandle) {
        self.dependencies.register_completion(reads, writes, handle);
    }

    /// Waits for every registered job.
    pub fn complete_all(&mut self) {
        self.dependencies.complete_all();
    }

    /// Waits for every job touching `type_index`.
    pub fn complete_type(&mut self, type_index: TypeIndex) {
        self.dependencies.complete_type(type_index);
    }

    /// Opens an exclusive transaction.
    pub fn begin_exclusive_transaction(&mut self) -> ECSResult<()> {
        self.dependencies.begin_exclusive_transaction()
    }

    /// Closes the exclusive transaction.
    pub fn end_exclusive_transaction(&mut self) -> ECSResult<()> {
        self.dependencies.end_exclusive_transaction()
    }
}
