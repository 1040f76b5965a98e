//! CacheDB - A write-behind row cache
//!
//! Serves reads and writes of table rows from memory, logs every mutation to a
//! write-ahead log, and persists rows to a backing store after they expire.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod flush;
pub mod models;
pub mod schema;
pub mod tasks;
pub mod wal;

pub use api::AppState;
pub use backend::{BackingStore, MemoryBackend};
pub use cache::{PrimaryKey, Row, StatsSnapshot};
pub use config::Config;
pub use error::{BackendError, CacheError, Result};
pub use facade::CacheDb;
pub use flush::FailedMutation;
