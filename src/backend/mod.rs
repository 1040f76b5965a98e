//! Backing Store Module
//!
//! Contract between the flush pipeline and the relational store behind the cache.
//!
//! # Operations
//! - Upsert a row by primary key
//! - Delete a row by primary key
//! - Describe a table (primary-key columns and full column set)

mod memory;

pub use memory::{BackendWrite, MemoryBackend};

use async_trait::async_trait;

use crate::cache::Row;
use crate::error::BackendError;

// == Statement Shapes ==
/// Upsert of one row: key columns locate it, value columns are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowWrite {
    pub table: String,
    pub key: Row,
    pub values: Row,
}

/// Deletion of one row by its key columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDelete {
    pub table: String,
    pub key: Row,
}

/// Raw catalog output for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDescription {
    /// Primary-key columns in key order, empty if the table has none
    pub primary_key: Vec<String>,
    /// Every column of the table, key columns included
    pub columns: Vec<String>,
}

// == Backing Store Trait ==
/// A relational store the cache writes behind.
///
/// Implementations own connection handling; every call is expected to be
/// independently retryable.
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    /// Inserts the row or overwrites its value columns.
    async fn upsert(&self, write: &RowWrite) -> Result<(), BackendError>;

    /// Deletes the row; deleting a missing row is not an error.
    async fn delete(&self, delete: &RowDelete) -> Result<(), BackendError>;

    /// Introspects the catalog for `table`.
    async fn describe(&self, table: &str) -> Result<TableDescription, BackendError>;
}
