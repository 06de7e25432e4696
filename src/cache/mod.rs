//! Versioned cache partitions for offline support.
//!
//! This module provides the storage side of the proxy:
//! - Named partitions holding request -> response snapshots
//! - Network-first and cache-first fetch primitives over those partitions
//! - A durable queue of failed mutations for background sync

mod layer;
mod partitions;
mod storage;
mod traits;

pub use layer::{CacheLayer, Partition};
pub use partitions::*;
pub use storage::{MemoryStore, SqliteStore};
pub use traits::{CacheResult, CacheSource, CacheStore, CachedResponse, PendingTask, SyncQueue};
