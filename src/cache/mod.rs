//! Persisted, per-identity cache of knowledge point record sets.
//!
//! This module provides the offline half of the sync layer:
//! - Stores ordered snapshots of the active and archived sets
//! - Keeps one namespace per identity (user id or guest)
//! - Network-first reads that fall back to the last snapshot
//! - A prefix sweep for wiping every namespace on logout

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{snapshot_key, CacheStorage, CachedSnapshot, SqliteStorage, CACHE_KEY_PREFIX};
pub use traits::{CacheKind, CacheNamespace, CacheResult, CacheSource, Cacheable};

#[cfg(test)]
pub(crate) use storage::testing;
