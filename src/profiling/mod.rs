//! Chrome Trace execution profiler.
//!
//! Feature-gated behind `profiling`. When enabled, structural operations and
//! synchronization points record spans that are written as a Chrome Trace
//! Event JSON file on [`profiler::shutdown`], viewable in
//! `chrome://tracing` or <https://ui.perfetto.dev>.
//!
//! When the feature is disabled every call compiles to a no-op and the span
//! guard is zero-sized.
//!
//! ```no_run
//! use chunk_ecs::profiler;
//!
//! profiler::init("profile/trace.json");
//! {
//!     let _g = profiler::span("EntityManager::create_entities");
//!     // ...
//! }
//! profiler::shutdown();
//! ```

pub mod profiler;
