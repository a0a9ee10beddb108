//! Type signatures: the key under which archetypes are registered.
//!
//! A [`TypeSignature`] is an immutable, sorted list of [`ComponentType`]
//! entries. The identity component is always first. Two constructors exist:
//!
//! - [`TypeSignature::new`] normalizes its input (sorts, deduplicates,
//!   prepends the identity type) and is what callers normally use;
//! - [`TypeSignature::from_raw`] keeps the input verbatim so the registry can
//!   reject malformed signatures from external collaborators.

use std::fmt;

use smallvec::SmallVec;

use crate::engine::types::{TypeIndex, IDENTITY_TYPE};


/// One entry of a signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentType {
    /// Catalog index of the component.
    pub type_index: TypeIndex,

    /// Number of elements for fixed-array components, `0` otherwise.
    pub fixed_array_length: u16,
}

impl ComponentType {
    /// Plain component entry.
    #[inline]
    pub const fn of(type_index: TypeIndex) -> Self {
        Self { type_index, fixed_array_length: 0 }
    }

    /// Fixed-array component entry holding `length` elements.
    #[inline]
    pub const fn array(type_index: TypeIndex, length: u16) -> Self {
        Self { type_index, fixed_array_length: length }
    }
}

/// Sorted list of component types identifying an archetype.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TypeSignature {
    types: SmallVec<[ComponentType; 8]>,
}

impl TypeSignature {
    /// Builds a normalized signature.
    ///
    /// ## Behavior
    /// - Sorts by type index.
    /// - Keeps the first entry for duplicated indices.
    /// - Inserts the identity component if missing.

    pub fn new(types: &[ComponentType]) -> Self {
        let mut sorted: SmallVec<[ComponentType; 8]> = SmallVec::with_capacity(types.len() + 1);
        sorted.push(ComponentType::of(IDENTITY_TYPE));
        sorted.extend(types.iter().copied().filter(|t| t.type_index != IDENTITY_TYPE));
        sorted[1..].sort_by_key(|t| t.type_index);
        sorted.dedup_by_key(|t| t.type_index);
        Self { types: sorted }
    }

    /// Builds a normalized signature from plain type indices.
    pub fn from_indices(indices: &[TypeIndex]) -> Self {
        let types: SmallVec<[ComponentType; 8]> = indices.iter().map(|&i| ComponentType::of(i)).collect();
        Self::new(&types)
    }

    /// Keeps `types` verbatim; validated by the registry.
    pub fn from_raw(types: &[ComponentType]) -> Self {
        Self { types: types.iter().copied().collect() }
    }

    /// Entries in signature order.
    #[inline]
    pub fn types(&self) -> &[ComponentType] {
        &self.types
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize { self.types.len() }

    /// Returns `true` for the empty signature.
    #[inline]
    pub fn is_empty(&self) -> bool { self.types.is_empty() }

    /// Position of `type_index` in the signature.
    #[inline]
    pub fn position_of(&self, type_index: TypeIndex) -> Option<usize> {
        self.types.binary_search_by_key(&type_index, |t| t.type_index).ok()
    }

    /// Returns `true` if the signature contains `type_index`.
    #[inline]
    pub fn has(&self, type_index: TypeIndex) -> bool {
        self.position_of(type_index).is_some()
    }

    /// Returns `true` if every index in `required` is present.
    pub fn contains_all(&self, required: &[TypeIndex]) -> bool {
        required.iter().all(|&t| self.has(t))
    }

    /// Returns `true` if no index in `excluded` is present.
    pub fn contains_none(&self, excluded: &[TypeIndex]) -> bool {
        !excluded.iter().any(|&t| self.has(t))
    }

    /// Returns a normalized copy with `added` inserted.
    pub fn with(&self, added: ComponentType) -> Self {
        let mut types: SmallVec<[ComponentType; 8]> = self.types.clone();
        types.push(added);
        Self::new(&types)
    }

    /// Returns a normalized copy without `removed`.
    pub fn without(&self, removed: TypeIndex) -> Self {
        let types: SmallVec<[ComponentType; 8]> =
            self.types.iter().copied().filter(|t| t.type_index != removed).collect();
        Self::new(&types)
    }

    /// Returns a normalized copy keeping only entries accepted by `keep`.
    pub fn filtered(&self, mut keep: impl FnMut(ComponentType) -> bool) -> Self {
        let types: SmallVec<[ComponentType; 8]> = self.types.iter().copied().filter(|&t| keep(t)).collect();
        Self::new(&types)
    }

    /// Fletcher-32 checksum of the signature's little-endian words.
    pub fn hash32(&self) -> u32 {
        let mut words: SmallVec<[u16; 16]> = SmallVec::with_capacity(self.types.len() * 2);
        for t in &self.types {
            words.push(t.type_index);
            words.push(t.fixed_array_length);
        }
        fletcher32(&words)
    }
}

impl fmt::Debug for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.types.iter().map(|t| {
                if t.fixed_array_length == 0 {
                    format!("{}", t.type_index)
                } else {
                    format!("{}[{}]", t.type_index, t.fixed_array_length)
                }
            }))
            .finish()
    }
}

/// Fletcher-32 over 16-bit words.
pub fn fletcher32(words: &[u16]) -> u32 {
    let mut sum1: u32 = 0xffff;
    let mut sum2: u32 = 0xffff;

    for block in words.chunks(359) {
        for &word in block {
            sum1 += word as u32;
            sum2 += sum1;
        }
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    }

    sum1 = (sum1 & 0xffff) + (sum1 >> 16);
    sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    (sum2 << 16) | sum1
}
