//! Persistent response cache namespaced by cache generation.
//!
//! This module provides:
//! - Request identities keyed by method + URL
//! - Immutable stored responses, replaced only by re-storing the same identity
//! - Atomic batch seeding (`Cache::add_all`) for install-time assets
//! - A no-op backend used when caching is disabled

mod layer;
mod storage;
mod traits;

pub use layer::{Cache, CacheStore};
pub use storage::{CacheStorage, GenerationInfo, NoopStorage, SqliteStorage};
#[cfg(test)]
pub use storage::FullDiskStorage;
pub use traits::{CacheResult, CacheSource};
