//! # Engine Module
//!
//! Chunked archetype storage and its services.
//!
//! This module contains the storage building blocks:
//! - Component type catalog and signatures
//! - Archetype layouts and chunk pages
//! - Entity identities and locations
//! - Shared, buffer and managed component payloads
//! - Structural changes (create, destroy, move, instantiate)
//! - Job dependency tracking
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod config;
pub mod error;
pub mod component;
pub mod signature;
pub mod page;
pub mod entity;
pub mod archetype;
pub mod chunk;
pub mod shared;
pub mod storage;
pub mod remap;
pub mod jobs;
pub mod dependency;
pub mod manager;
mod structural;
