//! Structural changes: creating, destroying, cloning and moving entities.
//!
//! Every entry point in this module:
//!
//! 1. waits for all registered jobs and reclaims retired identity blocks,
//! 2. validates the whole request,
//! 3. mutates chunks, archetypes and identities.
//!
//! Nothing is mutated before validation succeeds, so a failed call leaves the
//! manager untouched.
//!
//! ## Runs
//!
//! Batches are processed as *runs*: maximal sequences of input entities that
//! sit in consecutive slots of one chunk. Locations are re-read before every
//! run because compacting a chunk moves tail entities into the hole.
//!
//! ## Compaction
//!
//! Removing `len` slots at `start` from a chunk of `count` entities moves
//! `min(len, count - start - len)` entities from the tail into the hole, so
//! slots stay dense and only the moved entities change location.

use std::collections::HashSet;
use std::ptr;

use bytemuck::Pod;
use smallvec::SmallVec;

use crate::engine::archetype::{Archetype, Column};
use crate::engine::chunk::Chunk;
use crate::engine::component::ComponentCategory;
use crate::engine::entity::{Entity, EntityLocation};
use crate::engine::error::{
    CapacityError,
    ECSError,
    ECSResult,
    IncompleteLinkedGroupError,
    MissingComponentError,
    StaleEntityError,
    TypeMismatchError,
};
use crate::engine::manager::EntityManager;
use crate::engine::remap::EntityRemapper;
use crate::engine::shared::{SharedValue, DEFAULT_SHARED_INDEX};
use crate::engine::signature::{ComponentType, TypeSignature};
use crate::engine::storage::{self, BufferHeader};
use crate::engine::types::{ArchetypeID, ChunkID, SlotID, TypeIndex, IDENTITY_TYPE};
use crate::profiling::profiler;


/// Writes the empty value of `column` into `count` slots from `start`.
fn init_run(chunk: &mut Chunk, column: &Column, start: usize, count: usize) {
    match column.category {
        ComponentCategory::Tag | ComponentCategory::Shared => {}
        ComponentCategory::Data | ComponentCategory::Managed => {
            chunk.bytes_mut()[column.run_range(start, count)].fill(0);
        }
        ComponentCategory::Buffer => {
            for slot in start..start + count {
                let bytes = chunk.slot_bytes_mut(column, slot);
                bytes.fill(0);
                BufferHeader::empty(column.inline_capacity).write(bytes);
            }
        }
    }
}

impl EntityManager {
    fn sync_point(&mut self) {
        let _g = profiler::span("EntityManager::sync_point");
        self.dependencies.complete_all();
        self.entities.reclaim();
    }

    /// Reserves up to `wanted` slots in a chunk of `archetype` carrying
    /// `shared`. Returns `(chunk, first_slot, reserved)`.
    fn reserve_slots(&mut self, archetype: ArchetypeID, shared: &[u32], wanted: u32) -> (ChunkID, SlotID, u32) {
        let version = self.version;
        let archetype = self.archetypes.get_mut(archetype);
        let chunk = self.chunks.allocate_chunk(archetype, &mut self.shared, shared, version);
        let (reserved, start) = self.chunks.allocate_into_chunk(archetype, &mut self.shared, chunk, wanted);
        debug_assert!(reserved > 0, "a chunk with space reserved no slots");
        (chunk, start, reserved)
    }

    /// Entities in `count` slots of chunk `id` from `start`.
    fn run_entities(&self, id: ChunkID, start: SlotID, count: u32) -> Vec<Entity> {
        let chunk = self.chunks.chunk(id);
        let identity = &self.archetypes.archetype(chunk.archetype()).columns[0];
        bytemuck::cast_slice::<u8, Entity>(&chunk.bytes()[identity.run_range(start as usize, count as usize)]).to_vec()
    }

    /// Writes identities and empty components into freshly reserved slots.
    fn init_slots(&mut self, id: ChunkID, start: SlotID, entities: &[Entity]) {
        let chunk = self.chunks.chunk_mut(id);
        let archetype = self.archetypes.archetype(chunk.archetype());
        let (start_slot, count) = (start as usize, entities.len());

        for column in &archetype.columns[1..] {
            init_run(chunk, column, start_slot, count);
        }
        let identity = archetype.columns[0];
        chunk.bytes_mut()[identity.run_range(start_slot, count)].copy_from_slice(bytemuck::cast_slice(entities));
        chunk.stamp_all(archetype, self.version);

        for (i, &entity) in entities.iter().enumerate() {
            self.entities.set_location(entity, EntityLocation { chunk: id, slot: start + i as SlotID });
        }
    }

    /// Frees buffer and managed payloads of `count` slots, skipping types
    /// present in `keep`.
    fn release_payloads(&mut self, id: ChunkID, start: SlotID, count: u32, keep: Option<ArchetypeID>) {
        let chunk = self.chunks.chunk(id);
        let archetype = self.archetypes.archetype(chunk.archetype());
        let keep = keep.map(|k| self.archetypes.archetype(k));

        for column in &archetype.columns {
            if !matches!(column.category, ComponentCategory::Buffer | ComponentCategory::Managed) { continue; }
            if keep.is_some_and(|k| k.column_of(column.type_index).is_some_and(|c| c.stride == column.stride)) {
                continue;
            }
            for slot in start as usize..(start + count) as usize {
                let bytes = chunk.slot_bytes(column, slot);
                match column.category {
                    ComponentCategory::Buffer => storage::buffer_release(bytes, &mut self.buffers),
                    _ => self.managed.remove(storage::read_handle(bytes)),
                }
            }
        }
    }

    /// Removes `len` slots at `start`, filling the hole from the tail.
    fn compact(&mut self, id: ChunkID, start: SlotID, len: u32) {
        let archetype_id = self.chunks.chunk(id).archetype();
        let count = self.chunks.chunk(id).count();
        let end = start + len;
        let fill = len.min(count - end);

        {
            let chunk = self.chunks.chunk_mut(id);
            let archetype = self.archetypes.archetype(archetype_id);
            for column in archetype.columns.iter().filter(|c| c.stride > 0) {
                let source = column.run_range((count - fill) as usize, fill as usize);
                chunk.bytes_mut().copy_within(source, column.slot_range(start as usize).start);
            }
        }
        for (i, entity) in self.run_entities(id, start, fill).into_iter().enumerate() {
            self.entities.set_location(entity, EntityLocation { chunk: id, slot: start + i as SlotID });
        }

        let archetype = self.archetypes.get_mut(archetype_id);
        archetype.entity_count -= len as u64;
        self.chunks.set_slot_count(archetype, &mut self.shared, id, count - len);
    }

    /// Shared indices for `destination`, derived from the chunk `source`
    /// entities come from.
    ///
    /// ## Panics
    /// Panics if the shared types common to both archetypes appear in a
    /// different relative order.

    fn derive_shared(&self, source: ChunkID, destination: ArchetypeID, replace: Option<(TypeIndex, u32)>) -> SmallVec<[u32; 4]> {
        let chunk = self.chunks.chunk(source);
        let from = self.archetypes.archetype(chunk.archetype());
        let to = self.archetypes.archetype(destination);

        let mut last_position: Option<usize> = None;
        let mut shared = SmallVec::with_capacity(to.shared_types.len());
        for &type_index in &to.shared_types {
            let carried = from.shared_position_of(type_index).map(|k| {
                assert!(
                    last_position.map_or(true, |last| k > last),
                    "shared types of archetypes {} and {} are ordered differently", from.id, to.id
                );
                last_position = Some(k);
                chunk.shared_index(from, k)
            });

            shared.push(match replace {
                Some((replaced, index)) if replaced == type_index => index,
                _ => carried.unwrap_or(DEFAULT_SHARED_INDEX),
            });
        }
        shared
    }

    /// Copies columns present in both archetypes from one run to another and
    /// empty-initializes the rest.
    fn copy_run(&mut self, source: ChunkID, source_start: SlotID, destination: ChunkID, destination_start: SlotID, count: u32) {
        let source_chunk = self.chunks.chunk(source);
        let source_ptr = source_chunk.page_ptr();
        let from = self.archetypes.archetype(source_chunk.archetype());
        let to = self.archetypes.archetype(self.chunks.chunk(destination).archetype());
        let destination_ptr = self.chunks.chunk(destination).page_ptr();

        let mut fresh: SmallVec<[Column; 8]> = SmallVec::new();
        for column in &to.columns {
            match from.column_of(column.type_index) {
                Some(source_column) if source_column.stride == column.stride => {
                    if column.stride == 0 { continue; }
                    let bytes = column.stride * count as usize;
                    let from_range = source_column.run_range(source_start as usize, count as usize);
                    let to_range = column.run_range(destination_start as usize, count as usize);
                    debug_assert_eq!(from_range.len(), bytes);
                    // SAFETY: both ranges lie inside live pages. Source and
                    // destination may share a page but never a slot.
                    unsafe {
                        ptr::copy(source_ptr.add(from_range.start), destination_ptr.add(to_range.start), bytes);
                    }
                }
                _ => fresh.push(*column),
            }
        }

        let version = self.version;
        let chunk = self.chunks.chunk_mut(destination);
        for column in &fresh {
            init_run(chunk, column, destination_start as usize, count as usize);
        }
        chunk.stamp_all(to, version);
    }

    /// Moves a run to `destination`, or destroys it if `destination` only
    /// holds finished cleanup residue.
    fn move_run(&mut self, source: ChunkID, start: SlotID, len: u32, destination: ArchetypeID, replace: Option<(TypeIndex, u32)>) {
        if self.archetypes.archetype(destination).cleanup_complete {
            self.destroy_plain_run(source, start, len);
            return;
        }

        let shared = self.derive_shared(source, destination, replace);
        let entities = self.run_entities(source, start, len);
        self.release_payloads(source, start, len, Some(destination));

        let mut placed = 0u32;
        while placed < len {
            let (chunk, first, reserved) = self.reserve_slots(destination, &shared, len - placed);
            self.copy_run(source, start + placed, chunk, first, reserved);
            for i in 0..reserved {
                let entity = entities[(placed + i) as usize];
                self.entities.set_location(entity, EntityLocation { chunk, slot: first + i });
            }
            placed += reserved;
        }

        self.compact(source, start, len);
    }

    /// Frees a run for good: payloads, slots and identities.
    fn destroy_plain_run(&mut self, id: ChunkID, start: SlotID, len: u32) {
        let entities = self.run_entities(id, start, len);
        self.release_payloads(id, start, len, None);
        self.compact(id, start, len);
        self.entities.deallocate(&entities);
    }

    fn destroy_run(&mut self, id: ChunkID, start: SlotID, len: u32) -> ECSResult<()> {
        let archetype_id = self.chunks.chunk(id).archetype();
        let archetype = self.archetypes.archetype(archetype_id);

        if archetype.is_cleanup_residue {
            return Ok(());
        }
        if archetype.cleanup_required {
            let residue = self.archetypes.cleanup_residue_of(&self.catalog, archetype_id)?;
            self.move_run(id, start, len, residue, None);
        } else {
            self.destroy_plain_run(id, start, len);
        }
        Ok(())
    }

    /// Length of the run starting at `entities[0]`, located at `location`.
    fn run_length(&self, entities: &[Entity], location: EntityLocation) -> u32 {
        let mut len = 1u32;
        while (len as usize) < entities.len()
            && self.location(entities[len as usize])
                == Some(EntityLocation { chunk: location.chunk, slot: location.slot + len })
        {
            len += 1;
        }
        len
    }

    /// Checks linked groups and prepares residue archetypes for a destroy
    /// batch.
    fn validate_destroy(&mut self, entities: &[Entity]) -> ECSResult<()> {
        let batch: HashSet<Entity> = entities.iter().copied().filter(|&e| self.exists(e)).collect();

        for &root in &batch {
            let Some(location) = self.location(root) else { continue };
            let archetype_id = self.chunks.chunk(location.chunk).archetype();

            if self.archetypes.archetype(archetype_id).cleanup_required {
                self.archetypes.cleanup_residue_of(&self.catalog, archetype_id)?;
            }

            let Some(group) = self.linked_group_at(location) else { continue };
            if let Some(&missing) = group.iter().find(|&&m| m != root && self.exists(m) && !batch.contains(&m)) {
                return Err(IncompleteLinkedGroupError { root, missing }.into());
            }
        }
        Ok(())
    }

    /// Creates `n` entities in `archetype` with default shared values.
    ///
    /// ## Behavior
    /// Identities are allocated first (all-or-nothing), then placed into
    /// chunks with free slots, creating chunks as needed. Components are
    /// zeroed, buffers are empty and managed slots hold no value.
    ///
    /// ## Errors
    /// `UnknownArchetype` for an id the registry never handed out;
    /// `OutOfCapacity` when the identity space is exhausted.

    pub fn create_entities(&mut self, archetype: ArchetypeID, n: usize) -> ECSResult<Vec<Entity>> {
        let target = self.archetypes.get(archetype).ok_or(ECSError::UnknownArchetype(archetype))?;
        let shared: SmallVec<[u32; 4]> = SmallVec::from_elem(DEFAULT_SHARED_INDEX, target.shared_types.len());
        self.create_in(archetype, &shared, n)
    }

    /// Creates `n` entities in `archetype` carrying the given shared values.
    ///
    /// ## Errors
    /// `MissingComponent` if a value's type is not a shared type of the
    /// archetype; `OutOfCapacity` as for [`create_entities`](Self::create_entities).

    pub fn create_entities_with_shared(&mut self, archetype: ArchetypeID, values: &[SharedValue], n: usize) -> ECSResult<Vec<Entity>> {
        let target = self.archetypes.get(archetype).ok_or(ECSError::UnknownArchetype(archetype))?;
        let mut positions: SmallVec<[usize; 4]> = SmallVec::new();
        for value in values {
            let k = target
                .shared_position_of(value.type_index)
                .ok_or(MissingComponentError { entity: Entity::NULL, type_index: value.type_index })?;
            positions.push(k);
        }

        let mut shared: SmallVec<[u32; 4]> = SmallVec::from_elem(DEFAULT_SHARED_INDEX, target.shared_types.len());
        let mut temporary: SmallVec<[u32; 4]> = SmallVec::new();
        for (value, k) in values.iter().zip(positions) {
            let index = self.shared.acquire(value.clone());
            shared[k] = index;
            temporary.push(index);
        }

        let created = self.create_in(archetype, &shared, n);
        for index in temporary {
            self.shared.release(index);
        }
        created
    }

    fn create_in(&mut self, archetype: ArchetypeID, shared: &[u32], n: usize) -> ECSResult<Vec<Entity>> {
        let _g = profiler::span("EntityManager::create_entities").arg("count", n as u64);
        self.sync_point();
        if n == 0 { return Ok(Vec::new()); }

        let entities = self.entities.allocate(n)?;
        let mut placed = 0usize;
        while placed < n {
            let wanted = (n - placed).min(u32::MAX as usize) as u32;
            let (chunk, start, reserved) = self.reserve_slots(archetype, shared, wanted);
            self.init_slots(chunk, start, &entities[placed..placed + reserved as usize]);
            placed += reserved as usize;
        }
        Ok(entities)
    }

    /// Destroys a batch of entities.
    ///
    /// ## Behavior
    /// - Stale and repeated entities are skipped.
    /// - Entities with system-state components move to their cleanup
    ///   residue archetype and stay alive until those components are
    ///   removed. Entities already in a residue are left alone.
    /// - Everything else is freed: payloads released, slots compacted,
    ///   identities returned.
    ///
    /// ## Errors
    /// `IncompleteLinkedGroupDestroy` if the batch holds a linked-group root
    /// but not every live member of its group. Nothing is destroyed then.

    pub fn destroy_entities(&mut self, entities: &[Entity]) -> ECSResult<()> {
        let _g = profiler::span("EntityManager::destroy_entities").arg("count", entities.len() as u64);
        self.sync_point();
        self.validate_destroy(entities)?;

        let (mut i, mut skipped) = (0, 0usize);
        while i < entities.len() {
            let Some(location) = self.location(entities[i]) else {
                skipped += 1;
                i += 1;
                continue;
            };
            let len = self.run_length(&entities[i..], location);
            self.destroy_run(location.chunk, location.slot, len)?;
            i += len as usize;
        }

        if skipped > 0 {
            log::warn!("destroy_entities skipped {skipped} stale or repeated entities");
        }
        Ok(())
    }

    /// Destroys `root` together with every member of its linked group.
    pub fn destroy_linked_group(&mut self, root: Entity) -> ECSResult<()> {
        let location = self.live_location(root)?;
        let mut group = self.linked_group_at(location).unwrap_or_default();
        if !group.contains(&root) {
            group.insert(0, root);
        }
        group.retain(|&e| self.exists(e));
        self.destroy_entities(&group)
    }

    /// Destroys every entity of the given archetypes.
    pub fn destroy_matching(&mut self, archetypes: &[ArchetypeID]) -> ECSResult<()> {
        let mut entities: Vec<Entity> = Vec::new();
        for &archetype in archetypes {
            let Some(archetype) = self.archetypes.get(archetype) else { continue };
            for &chunk in &archetype.chunks {
                entities.extend_from_slice(self.chunk_entities(chunk)?);
            }
        }
        self.destroy_entities(&entities)
    }

    /// Moves entities to the archetype of `signature`.
    ///
    /// ## Behavior
    /// Components present in both archetypes keep their values; dropped
    /// components release their payloads; new components start empty.
    /// Entities already in the target are left alone. Moving into a
    /// finished cleanup residue destroys the entity.
    ///
    /// ## Errors
    /// - `InvalidSignature` / `SignatureTooLarge` for a bad target.
    /// - `StaleEntity` if any entity is not live; nothing moves then.

    pub fn move_to_archetype(&mut self, entities: &[Entity], signature: &TypeSignature) -> ECSResult<()> {
        let _g = profiler::span("EntityManager::move_to_archetype").arg("count", entities.len() as u64);
        self.sync_point();

        let destination = self.archetypes.get_or_create(&self.catalog, signature)?;
        if let Some(&entity) = entities.iter().find(|&&e| !self.exists(e)) {
            return Err(StaleEntityError { entity }.into());
        }
        self.move_entities(entities, destination);
        Ok(())
    }

    fn move_entities(&mut self, entities: &[Entity], destination: ArchetypeID) {
        let mut i = 0;
        while i < entities.len() {
            let Some(location) = self.location(entities[i]) else {
                i += 1;
                continue;
            };
            let len = self.run_length(&entities[i..], location);
            if self.chunks.chunk(location.chunk).archetype() != destination {
                self.move_run(location.chunk, location.slot, len, destination, None);
            }
            i += len as usize;
        }
    }

    /// Adds the component type `type_index` to `entity`, empty-initialized.
    /// Adding a type the entity already has is a no-op.
    pub fn add_component_type(&mut self, entity: Entity, type_index: TypeIndex) -> ECSResult<()> {
        let _g = profiler::span("EntityManager::add_component_type");
        self.sync_point();
        let location = self.live_location(entity)?;
        let source = self.archetypes.archetype(self.chunks.chunk(location.chunk).archetype());
        if source.has(type_index) { return Ok(()); }

        let signature = source.signature.with(ComponentType::of(type_index));
        let destination = self.archetypes.get_or_create(&self.catalog, &signature)?;
        self.move_run(location.chunk, location.slot, 1, destination, None);
        Ok(())
    }

    /// Adds `T` to `entity` and stores `value`.
    ///
    /// Data components are written, shared components select the chunk
    /// holding `value`, tags carry no value.

    pub fn add_component<T: Pod>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        let type_index = self.catalog.require_index_of::<T>()?;
        let category = self.catalog.desc(type_index).map(|d| d.category);
        match category {
            Some(ComponentCategory::Shared) => self.set_shared_component(entity, value),
            Some(ComponentCategory::Data) => {
                self.add_component_type(entity, type_index)?;
                self.set_component(entity, value)
            }
            Some(ComponentCategory::Tag) => self.add_component_type(entity, type_index),
            _ => Err(TypeMismatchError { type_index, expected: None, actual: std::any::TypeId::of::<T>() }.into()),
        }
    }

    /// Removes the component type `type_index` from `entity`.
    ///
    /// Removing a type the entity lacks, or the identity, is a no-op.
    /// Removing the last system-state type from a destroyed entity frees it.

    pub fn remove_component_type(&mut self, entity: Entity, type_index: TypeIndex) -> ECSResult<()> {
        let _g = profiler::span("EntityManager::remove_component_type");
        self.sync_point();
        let location = self.live_location(entity)?;
        let source = self.archetypes.archetype(self.chunks.chunk(location.chunk).archetype());
        if type_index == IDENTITY_TYPE || !source.has(type_index) { return Ok(()); }

        let signature = source.signature.without(type_index);
        let destination = self.archetypes.get_or_create(&self.catalog, &signature)?;
        self.move_run(location.chunk, location.slot, 1, destination, None);
        Ok(())
    }

    /// Removes `T` from `entity`.
    pub fn remove_component<T: 'static>(&mut self, entity: Entity) -> ECSResult<()> {
        let type_index = self.catalog.require_index_of::<T>()?;
        self.remove_component_type(entity, type_index)
    }

    /// Sets the shared component `T` of `entity`, moving it to a chunk that
    /// carries `value`. Adds `T` first if the entity lacks it.
    pub fn set_shared_component<T: Pod>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        let _g = profiler::span("EntityManager::set_shared_component");
        self.sync_point();

        let type_index = self.catalog.require_index_of::<T>()?;
        let desc = self.catalog.desc(type_index);
        if desc.map(|d| d.category) != Some(ComponentCategory::Shared) {
            return Err(TypeMismatchError {
                type_index,
                expected: desc.and_then(|d| d.type_id),
                actual: std::any::TypeId::of::<T>(),
            }.into());
        }

        let location = self.live_location(entity)?;
        let source_id = self.chunks.chunk(location.chunk).archetype();
        let source = self.archetypes.archetype(source_id);
        let destination = if source.has(type_index) {
            source_id
        } else {
            let signature = source.signature.with(ComponentType::of(type_index));
            self.archetypes.get_or_create(&self.catalog, &signature)?
        };

        let index = self.shared.acquire(SharedValue::new(type_index, &value));
        let current = self.shared_index_of(entity, type_index).ok();
        if destination != source_id || current != Some(index) {
            self.move_run(location.chunk, location.slot, 1, destination, Some((type_index, index)));
        }
        self.shared.release(index);
        Ok(())
    }

    /// Clones `source` (and its linked group) `n` times.
    ///
    /// ## Behavior
    /// - Clones go to the source's instantiate-copy archetype: prefab
    ///   marker and system-state types are dropped.
    /// - Buffers and managed values are deep-copied; shared values are
    ///   shared.
    /// - Entity fields referring to a group member are redirected to the
    ///   member's clone in the same copy; other references are kept.
    ///
    /// Returns the `n` cloned roots.
    ///
    /// ## Errors
    /// `StaleEntity` if the source or a group member is not live;
    /// `OutOfCapacity` if the identities cannot be allocated.

    pub fn instantiate(&mut self, source: Entity, n: usize) -> ECSResult<Vec<Entity>> {
        let _g = profiler::span("EntityManager::instantiate").arg("count", n as u64);
        self.sync_point();

        let location = self.live_location(source)?;
        let mut group = self.linked_group_at(location).unwrap_or_default();
        group.retain(|&m| m != source);
        group.insert(0, source);

        let mut copies: SmallVec<[ArchetypeID; 4]> = SmallVec::new();
        for &member in &group {
            let location = self.live_location(member)?;
            let archetype = self.chunks.chunk(location.chunk).archetype();
            copies.push(self.archetypes.instantiate_copy_of(&self.catalog, archetype)?);
        }
        if n == 0 { return Ok(Vec::new()); }

        let total = n.checked_mul(group.len()).ok_or(CapacityError {
            entities_needed: u64::MAX,
            capacity: self.entities.capacity(),
        })?;
        let clones = self.entities.allocate(total)?;
        for (g, &member) in group.iter().enumerate() {
            self.clone_member(member, copies[g], &clones[g * n..(g + 1) * n]);
        }

        if copies.iter().any(|&a| self.archetypes.archetype(a).has_entity_references) {
            let mut remapper = EntityRemapper::new();
            for i in 0..n {
                remapper.clear();
                for (g, &member) in group.iter().enumerate() {
                    remapper.add(member, clones[g * n + i]);
                }
                for g in 0..group.len() {
                    self.remap_entity(clones[g * n + i], &remapper);
                }
            }
        }

        Ok(clones[..n].to_vec())
    }

    /// Places `targets` in `destination` as copies of `member`.
    fn clone_member(&mut self, member: Entity, destination: ArchetypeID, targets: &[Entity]) {
        let Some(location) = self.location(member) else { return };
        let shared = self.derive_shared(location.chunk, destination, None);
        let source_archetype = self.chunks.chunk(location.chunk).archetype();

        let mut placed = 0usize;
        while placed < targets.len() {
            let (chunk, first, reserved) = self.reserve_slots(destination, &shared, (targets.len() - placed) as u32);
            for i in 0..reserved {
                self.copy_run(location.chunk, location.slot, chunk, first + i, 1);
            }
            self.detach_payloads(source_archetype, chunk, first, reserved);
            self.init_identities(chunk, first, &targets[placed..placed + reserved as usize]);
            placed += reserved as usize;
        }
    }

    /// Gives byte-copied buffer and managed slots their own payloads.
    fn detach_payloads(&mut self, source_archetype: ArchetypeID, id: ChunkID, start: SlotID, count: u32) {
        let archetype = self.archetypes.archetype(self.chunks.chunk(id).archetype());
        let from = self.archetypes.archetype(source_archetype);

        for column in &archetype.columns {
            if from.column_of(column.type_index).is_none() { continue; }
            match column.category {
                ComponentCategory::Buffer => {
                    for slot in start as usize..(start + count) as usize {
                        let bytes = self.chunks.chunk_mut(id).slot_bytes_mut(column, slot);
                        storage::buffer_detach(bytes, &mut self.buffers, column.element_size);
                    }
                }
                ComponentCategory::Managed => {
                    let clone = self.catalog.desc(column.type_index).and_then(|d| d.clone_managed);
                    for slot in start as usize..(start + count) as usize {
                        let bytes = self.chunks.chunk_mut(id).slot_bytes_mut(column, slot);
                        let handle = match clone {
                            Some(clone) => self.managed.clone_value(storage::read_handle(bytes), clone),
                            None => 0,
                        };
                        storage::write_handle(bytes, handle);
                    }
                }
                _ => {}
            }
        }
    }

    fn init_identities(&mut self, id: ChunkID, start: SlotID, entities: &[Entity]) {
        let chunk = self.chunks.chunk_mut(id);
        let identity = self.archetypes.archetype(chunk.archetype()).columns[0];
        chunk.bytes_mut()[identity.run_range(start as usize, entities.len())]
            .copy_from_slice(bytemuck::cast_slice(entities));

        for (i, &entity) in entities.iter().enumerate() {
            self.entities.set_location(entity, EntityLocation { chunk: id, slot: start + i as SlotID });
        }
    }

    /// Rewrites the entity fields of one entity through `remapper`.
    fn remap_entity(&mut self, entity: Entity, remapper: &EntityRemapper) {
        let Some(location) = self.location(entity) else { return };
        let chunk = self.chunks.chunk_mut(location.chunk);
        let archetype: &Archetype = self.archetypes.archetype(chunk.archetype());

        for column in &archetype.columns[1..] {
            let Some(desc) = self.catalog.desc(column.type_index) else { continue };
            if desc.entity_offsets.is_empty() { continue; }

            let slot = chunk.slot_bytes_mut(column, location.slot as usize);
            match column.category {
                ComponentCategory::Data => remapper.remap_elements(slot, desc.size, &desc.entity_offsets),
                ComponentCategory::Buffer => {
                    let elements = storage::buffer_elements_mut(slot, &mut self.buffers, desc.size);
                    remapper.remap_elements(elements, desc.size, &desc.entity_offsets);
                }
                _ => {}
            }
        }
    }
}
