//! Cache Module
//!
//! Provides the in-memory keyed row store with TTL expiration and per-key versions.

mod entry;
mod key;
mod mutation;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::CacheEntry;
pub use key::{PrimaryKey, Row, RowKey, KEY_SEPARATOR};
pub use mutation::Mutation;
pub use stats::{CacheStats, StatsSnapshot};
pub use store::KeyedStore;
