#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Content-addressed cache store with version-token invalidation.
//!
//! Entries are stamped with the [`VersionToken`] of the configuration subtree
//! they were derived from. A lookup supplying a different token is a miss and
//! marks the entry invalidated in place; the memory-pressure cleanup removes
//! invalidated entries first and then the least recently used ones.

pub mod store;
pub mod version;

pub use store::{
    CacheEntry, CacheKey, CacheSettings, CacheStats, CacheStore, CleanupReport, EstimateSize,
    Lookup, MemoryCache, Namespace, ResultKey,
};
pub use version::{canonical_bytes, version_token, CanonicalError, VersionToken};
