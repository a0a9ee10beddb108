//! Error types for signature registration, identity allocation and
//! structural changes.
//!
//! This module declares focused, composable error types used across the
//! storage engine. Each error carries enough context to make failures
//! actionable while remaining small and cheap to pass around or convert into
//! the aggregate [`ECSError`].
//!
//! ## Goals
//! * **Specificity:** each error type models a single failure mode (a
//!   malformed signature, an exhausted identity space, a stale handle).
//! * **Ergonomics:** every error implements [`std::error::Error`] and
//!   [`fmt::Display`] and converts into [`ECSError`] via `From`, so callers
//!   can use `?` throughout.
//! * **Fail before mutating:** all of these errors are raised while
//!   validating a request. Once a batch mutation has started it cannot fail;
//!   broken internal invariants are assertions, not errors.
//!
//! ## Typical flow
//! ```ignore
//! match manager.destroy_entities(&batch) {
//!     Ok(()) => {}
//!     Err(ECSError::IncompleteLinkedGroupDestroy(e)) => {
//!         eprintln!("group member {:?} of {:?} was not in the batch", e.missing, e.root);
//!     }
//!     Err(other) => return Err(other),
//! }
//! ```
//!
//! ## Display vs. Debug
//! * [`fmt::Display`] is short and suitable for logs.
//! * [`fmt::Debug`] (derived) retains full structure for diagnostics.

use std::fmt;
use std::any::TypeId;

use crate::engine::entity::Entity;
use crate::engine::types::{ArchetypeID, ChunkID, TypeIndex};


/// Why a signature was rejected by the archetype registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidSignatureReason {
    /// The signature contains no types at all.
    Empty,

    /// The identity component is not the first entry.
    IdentityNotFirst,

    /// A type index appears more than once.
    DuplicateType(TypeIndex),

    /// Entries are not in ascending type-index order.
    Unsorted,

    /// A type index is not registered in the catalog.
    UnregisteredType(TypeIndex),

    /// A registered type cannot be laid out inside a chunk.
    NotChunkEligible(TypeIndex),
}

/// Returned when a type signature is malformed.
///
/// Raised before any archetype, chunk or identity is allocated.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSignatureError {
    /// What was wrong with the signature.
    pub reason: InvalidSignatureReason,
}

impl fmt::Display for InvalidSignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            InvalidSignatureReason::Empty => f.write_str("invalid signature: no component types"),
            InvalidSignatureReason::IdentityNotFirst => {
                f.write_str("invalid signature: identity component must be first")
            }
            InvalidSignatureReason::DuplicateType(t) => {
                write!(f, "invalid signature: type {t} appears more than once")
            }
            InvalidSignatureReason::Unsorted => {
                f.write_str("invalid signature: types are not in ascending order")
            }
            InvalidSignatureReason::UnregisteredType(t) => {
                write!(f, "invalid signature: type {t} is not registered")
            }
            InvalidSignatureReason::NotChunkEligible(t) => {
                write!(f, "invalid signature: type {t} cannot be stored in a chunk")
            }
        }
    }
}

impl std::error::Error for InvalidSignatureError {}

/// Returned when a single entity's payload cannot fit in one chunk.
///
/// ### Fields
/// * `bytes_per_entity`: column bytes one entity needs.
/// * `chunk_payload`: bytes available to columns in one page.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureTooLargeError {
    /// Column bytes required per entity.
    pub bytes_per_entity: usize,

    /// Column bytes available per chunk.
    pub chunk_payload: usize,
}

impl fmt::Display for SignatureTooLargeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "signature too large: {} bytes per entity, {} bytes per chunk",
            self.bytes_per_entity, self.chunk_payload
        )
    }
}

impl std::error::Error for SignatureTooLargeError {}

/// Returned when the identity space cannot satisfy an allocation.
///
/// ### Fields
/// * `entities_needed`: identities the call asked for.
/// * `capacity`: the total identity capacity of the allocator.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityError {
    /// Total entities the operation attempted to allocate.
    pub entities_needed: u64,

    /// Capacity limiting the operation.
    pub capacity: u64,
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entity limit reached ({} needed; capacity {})",
            self.entities_needed, self.capacity
        )
    }
}

impl std::error::Error for CapacityError {}

/// Returned when a destroy batch contains a linked-group root but not all
/// of its group members.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncompleteLinkedGroupError {
    /// Root whose group was incomplete.
    pub root: Entity,

    /// First live group member missing from the batch.
    pub missing: Entity,
}

impl fmt::Display for IncompleteLinkedGroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "destroying {:?} requires destroying its linked group member {:?} in the same batch",
            self.root, self.missing
        )
    }
}

impl std::error::Error for IncompleteLinkedGroupError {}

/// Returned when an `Entity` handle is no longer valid, typically because
/// it was destroyed and its generation no longer matches.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleEntityError {
    /// The offending handle.
    pub entity: Entity,
}

impl fmt::Display for StaleEntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stale or dead entity reference {:?}", self.entity)
    }
}

impl std::error::Error for StaleEntityError {}

/// Returned when an entity does not carry a requested component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingComponentError {
    /// Entity that was queried.
    pub entity: Entity,

    /// Component type that was requested.
    pub type_index: TypeIndex,
}

impl fmt::Display for MissingComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity {:?} has no component of type {}", self.entity, self.type_index)
    }
}

impl std::error::Error for MissingComponentError {}

/// Returned when a typed accessor is used with the wrong Rust type or the
/// wrong component category.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMismatchError {
    /// Component type the accessor resolved to.
    pub type_index: TypeIndex,

    /// Rust type the catalog recorded, if any.
    pub expected: Option<TypeId>,

    /// Rust type the caller supplied.
    pub actual: TypeId,
}

impl fmt::Display for TypeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type mismatch for component {}: expected {:?}, actual {:?}",
            self.type_index, self.expected, self.actual
        )
    }
}

impl std::error::Error for TypeMismatchError {}

/// Errors raised by the type catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The catalog has no free type indices left.
    CapacityExceeded {
        /// Number of types the catalog can hold.
        capacity: usize,
    },

    /// A Rust type was used without being registered.
    NotRegistered {
        /// Rust type name.
        name: &'static str,
    },

    /// A descriptor was rejected.
    InvalidDescriptor {
        /// Name of the rejected type.
        name: String,
        /// What was wrong with it.
        reason: &'static str,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::CapacityExceeded { capacity } => {
                write!(f, "component catalog full (capacity {capacity})")
            }
            RegistryError::NotRegistered { name } => write!(f, "component {name} is not registered"),
            RegistryError::InvalidDescriptor { name, reason } => {
                write!(f, "invalid component descriptor for {name}: {reason}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Aggregate error for every fallible engine operation.
///
/// `From<T>` conversions allow `?` from the focused error types:
/// ```ignore
/// fn spawn_pair(manager: &mut EntityManager, archetype: ArchetypeID) -> ECSResult<Vec<Entity>> {
///     let entities = manager.create_entities(archetype, 2)?; // CapacityError -> ECSError
///     Ok(entities)
/// }
/// ```

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ECSError {
    /// A signature was malformed.
    InvalidSignature(InvalidSignatureError),

    /// A single entity would not fit in one chunk.
    SignatureTooLarge(SignatureTooLargeError),

    /// The identity space is exhausted.
    OutOfCapacity(CapacityError),

    /// A destroy batch split a linked group.
    IncompleteLinkedGroupDestroy(IncompleteLinkedGroupError),

    /// An entity handle was stale or never existed.
    StaleEntity(StaleEntityError),

    /// The entity does not have the requested component.
    MissingComponent(MissingComponentError),

    /// A typed accessor does not match the registered component.
    TypeMismatch(TypeMismatchError),

    /// Type catalog failure.
    Registry(RegistryError),

    /// Exclusive transaction latch misuse.
    ExclusiveTransaction(&'static str),

    /// No archetype with this id exists.
    UnknownArchetype(ArchetypeID),

    /// No live chunk with this id exists.
    UnknownChunk(ChunkID),
}

impl fmt::Display for ECSError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ECSError::InvalidSignature(e) => write!(f, "{e}"),
            ECSError::SignatureTooLarge(e) => write!(f, "{e}"),
            ECSError::OutOfCapacity(e) => write!(f, "{e}"),
            ECSError::IncompleteLinkedGroupDestroy(e) => write!(f, "{e}"),
            ECSError::StaleEntity(e) => write!(f, "{e}"),
            ECSError::MissingComponent(e) => write!(f, "{e}"),
            ECSError::TypeMismatch(e) => write!(f, "{e}"),
            ECSError::Registry(e) => write!(f, "{e}"),
            ECSError::ExclusiveTransaction(msg) => write!(f, "exclusive transaction: {msg}"),
            ECSError::UnknownArchetype(id) => write!(f, "archetype {id} does not exist"),
            ECSError::UnknownChunk(id) => write!(f, "chunk {id} is not live"),
        }
    }
}

impl std::error::Error for ECSError {}

impl From<InvalidSignatureError> for ECSError {
    fn from(e: InvalidSignatureError) -> Self { ECSError::InvalidSignature(e) }
}
impl From<SignatureTooLargeError> for ECSError {
    fn from(e: SignatureTooLargeError) -> Self { ECSError::SignatureTooLarge(e) }
}
impl From<CapacityError> for ECSError {
    fn from(e: CapacityError) -> Self { ECSError::OutOfCapacity(e) }
}
impl From<IncompleteLinkedGroupError> for ECSError {
    fn from(e: IncompleteLinkedGroupError) -> Self { ECSError::IncompleteLinkedGroupDestroy(e) }
}
impl From<StaleEntityError> for ECSError {
    fn from(e: StaleEntityError) -> Self { ECSError::StaleEntity(e) }
}
impl From<MissingComponentError> for ECSError {
    fn from(e: MissingComponentError) -> Self { ECSError::MissingComponent(e) }
}
impl From<TypeMismatchError> for ECSError {
    fn from(e: TypeMismatchError) -> Self { ECSError::TypeMismatch(e) }
}
impl From<RegistryError> for ECSError {
    fn from(e: RegistryError) -> Self { ECSError::Registry(e) }
}

/// Result alias used across the engine.
pub type ECSResult<T> = Result<T, ECSError>;
