//! Mutation Module
//!
//! The unit of work carried by the write-ahead log and the flush pipeline.

use serde::{Deserialize, Serialize};

use crate::cache::{PrimaryKey, Row, RowKey};

// == Mutation ==
/// A versioned upsert or deletion of one row.
///
/// Mutations are plain values: once captured they never alias the cache
/// entry they were taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub table: String,
    pub primary_key: PrimaryKey,
    /// New non-key values, `None` for a tombstone
    pub columns: Option<Row>,
    pub version: u64,
}

impl Mutation {
    pub fn upsert(
        table: impl Into<String>,
        primary_key: PrimaryKey,
        columns: Row,
        version: u64,
    ) -> Self {
        Self {
            table: table.into(),
            primary_key,
            columns: Some(columns),
            version,
        }
    }

    pub fn tombstone(table: impl Into<String>, primary_key: PrimaryKey, version: u64) -> Self {
        Self {
            table: table.into(),
            primary_key,
            columns: None,
            version,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.columns.is_none()
    }

    pub fn row_key(&self) -> RowKey {
        RowKey::new(self.table.clone(), &self.primary_key)
    }

    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        if self.is_tombstone() {
            "delete"
        } else {
            "upsert"
        }
    }
}
