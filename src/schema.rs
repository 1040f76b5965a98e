//! Schema Cache Module
//!
//! Loads and memoizes per-table key/column metadata, and shapes mutations into
//! backing store statements.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::backend::{BackingStore, RowDelete, RowWrite, TableDescription};
use crate::cache::{Mutation, PrimaryKey, Row};
use crate::error::{CacheError, Result};

// == Table Schema ==
/// Primary-key columns (in key order) and the full column set of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub primary_key: Vec<String>,
    pub columns: BTreeSet<String>,
}

impl TableSchema {
    /// Validates catalog output; a table without a primary key is rejected.
    pub fn from_description(table: &str, desc: TableDescription) -> Result<Self> {
        if desc.primary_key.is_empty() {
            return Err(CacheError::MissingPrimaryKey(table.to_string()));
        }

        let mut columns: BTreeSet<String> = desc.columns.into_iter().collect();
        columns.extend(desc.primary_key.iter().cloned());

        Ok(Self {
            table: table.to_string(),
            primary_key: desc.primary_key,
            columns,
        })
    }

    pub fn is_key_column(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }

    /// Value columns, in sorted order.
    pub fn value_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(|c| !self.is_key_column(c))
    }

    // == Statement Shaping ==
    /// Builds the backing store call for `mutation`.
    pub fn shape(&self, mutation: &Mutation) -> Result<Statement> {
        match &mutation.columns {
            Some(columns) => self
                .shape_upsert(&mutation.primary_key, columns)
                .map(Statement::Upsert),
            None => self
                .shape_delete(&mutation.primary_key)
                .map(Statement::Delete),
        }
    }

    /// Upsert keyed by the primary key, carrying every non-key column of the
    /// table.
    ///
    /// The cached row replaces the stored one, so a value column missing
    /// from `columns` is written as null. Key columns repeated among
    /// `columns` are ignored; unknown columns are rejected.
    pub fn shape_upsert(&self, key: &PrimaryKey, columns: &Row) -> Result<RowWrite> {
        self.check_key(key)?;

        if let Some(unknown) = columns.keys().find(|c| !self.columns.contains(*c)) {
            return Err(self.mismatch(format!("unknown column '{}'", unknown)));
        }

        let values = self
            .value_columns()
            .map(|column| {
                let value = columns.get(column).cloned().unwrap_or(Value::Null);
                (column.to_string(), value)
            })
            .collect();

        Ok(RowWrite {
            table: self.table.clone(),
            key: key.as_row().clone(),
            values,
        })
    }

    pub fn shape_delete(&self, key: &PrimaryKey) -> Result<RowDelete> {
        self.check_key(key)?;
        Ok(RowDelete {
            table: self.table.clone(),
            key: key.as_row().clone(),
        })
    }

    fn check_key(&self, key: &PrimaryKey) -> Result<()> {
        let given: BTreeSet<&str> = key.columns().collect();
        let expected: BTreeSet<&str> = self.primary_key.iter().map(String::as_str).collect();

        if given != expected {
            return Err(self.mismatch(format!(
                "key columns {:?} do not match primary key {:?}",
                given, self.primary_key
            )));
        }
        Ok(())
    }

    fn mismatch(&self, reason: String) -> CacheError {
        CacheError::SchemaMismatch {
            table: self.table.clone(),
            reason,
        }
    }
}

/// A shaped backing store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Upsert(RowWrite),
    Delete(RowDelete),
}

// == Schema Cache ==
/// Process-lifetime memo of table schemas with single-flight loading.
///
/// Concurrent callers asking for the same unloaded table wait on one load.
/// A failed load is not memoized, so the next caller tries again.
pub struct SchemaCache {
    backend: Arc<dyn BackingStore>,
    schemas: DashMap<String, Arc<OnceCell<Arc<TableSchema>>>>,
    loads: AtomicU64,
}

impl SchemaCache {
    pub fn new(backend: Arc<dyn BackingStore>) -> Self {
        Self {
            backend,
            schemas: DashMap::new(),
            loads: AtomicU64::new(0),
        }
    }

    /// Returns the schema of `table`, loading it on first use.
    pub async fn get(&self, table: &str) -> Result<Arc<TableSchema>> {
        let cell = self
            .schemas
            .entry(table.to_string())
            .or_default()
            .value()
            .clone();

        let schema = cell
            .get_or_try_init(|| async {
                self.loads.fetch_add(1, Ordering::SeqCst);
                debug!(table, "Loading table schema");

                let desc = self.backend.describe(table).await?;
                let schema = TableSchema::from_description(table, desc)?;
                info!(
                    table,
                    primary_key = ?schema.primary_key,
                    columns = schema.columns.len(),
                    "Table schema loaded"
                );
                Ok::<_, CacheError>(Arc::new(schema))
            })
            .await?;

        Ok(schema.clone())
    }

    /// Number of catalog loads actually executed.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }
}
