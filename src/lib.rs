//! # Chunk ECS
//!
//! Storage core of an Entity-Component-System: entities grouped by exact
//! component set into fixed-size chunk pages, with a lock-free identity
//! allocator and per-component job dependency tracking.
//!
//! ## Design Goals
//! - Archetype/chunk storage with deterministic column layouts
//! - Dense chunks: structural changes compact slots in place
//! - Identity allocation safe from many threads without a global lock
//! - Explicit read/write dependencies between parallel jobs
//!
//! Query matching, system scheduling and serialization are collaborators
//! built on top of [`EntityManager`]; they observe archetype creation through
//! [`ArchetypeObserver`] and synchronize through [`JobHandle`]s.

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod engine;
pub mod profiling;

pub use profiling::profiler;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Core storage types

pub use engine::manager::{
    ChunkColumn,
    EntityManager,
};

pub use engine::entity::{
    Entity,
    EntityIdAllocator,
    EntityLocation,
};

pub use engine::component::{
    ComponentCategory,
    ComponentDesc,
    ComponentOptions,
    TypeCatalog,
    CleanupEntity,
    LinkedEntityGroup,
    Prefab,
};

pub use engine::signature::{
    ComponentType,
    TypeSignature,
};

pub use engine::archetype::{
    Archetype,
    ArchetypeObserver,
    ArchetypeRegistry,
    Column,
};

pub use engine::chunk::{
    Chunk,
    ChunkStore,
};

pub use engine::page::{
    Page,
    PageAllocator,
    SystemPageAllocator,
};

pub use engine::shared::{
    SharedValue,
    SharedValueTable,
};

pub use engine::remap::EntityRemapper;

// Jobs

pub use engine::jobs::JobHandle;
pub use engine::dependency::DependencyTracker;

pub use engine::config::EngineConfig;

pub use engine::error::{
    ECSResult,
    ECSError,
    CapacityError,
    IncompleteLinkedGroupError,
    InvalidSignatureError,
    MissingComponentError,
    SignatureTooLargeError,
    StaleEntityError,
    TypeMismatchError,
};

pub use engine::types::{
    ArchetypeID,
    ChunkID,
    TypeIndex,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used storage types.
///
/// Import with:
/// ```rust
/// use chunk_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        EntityManager,
        Entity,
        TypeCatalog,
        ComponentOptions,
        ComponentType,
        TypeSignature,
        SharedValue,
        JobHandle,
        EngineConfig,
        ECSResult,
        ECSError,
    };
}
