//! In-Memory Backing Store
//!
//! A catalog plus row tables held in process memory. Records every write it
//! accepts and can inject latency or failures, which makes it the backend of
//! the demo server and of the write-behind tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BackingStore, RowDelete, RowWrite, TableDescription};
use crate::cache::{PrimaryKey, Row};
use crate::error::BackendError;

/// One write accepted by the backend, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendWrite {
    Upsert(RowWrite),
    Delete(RowDelete),
}

#[derive(Debug, Default)]
struct MemTable {
    description: TableDescription,
    /// Canonical key -> full row (key and value columns)
    rows: BTreeMap<String, Row>,
}

// == Memory Backend ==
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<String, MemTable>>,
    history: Mutex<Vec<BackendWrite>>,
    /// Tables whose writes always fail as unavailable
    broken_tables: Mutex<HashSet<String>>,
    /// Number of upcoming writes to fail as unavailable
    fail_next: AtomicU32,
    latency: Mutex<Duration>,
    describe_calls: AtomicU64,
}

impl MemoryBackend {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryBackend::add_table`].
    pub fn with_table(self, name: &str, primary_key: &[&str], columns: &[&str]) -> Self {
        self.add_table(name, primary_key, columns);
        self
    }

    /// Registers a table in the catalog.
    ///
    /// `columns` lists the value columns; key columns are added to the full
    /// column set automatically.
    pub fn add_table(&self, name: &str, primary_key: &[&str], columns: &[&str]) {
        let mut all: Vec<String> = primary_key.iter().map(|c| c.to_string()).collect();
        all.extend(columns.iter().map(|c| c.to_string()));

        self.tables.lock().insert(
            name.to_string(),
            MemTable {
                description: TableDescription {
                    primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
                    columns: all,
                },
                rows: BTreeMap::new(),
            },
        );
    }

    // == Fault Injection ==
    /// Delay applied before every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Fails the next `count` writes with [`BackendError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Makes every write to `table` fail until [`MemoryBackend::heal_table`].
    pub fn break_table(&self, table: &str) {
        self.broken_tables.lock().insert(table.to_string());
    }

    pub fn heal_table(&self, table: &str) {
        self.broken_tables.lock().remove(table);
    }

    // == Inspection ==
    /// Returns the stored row (key and value columns) if present.
    pub fn row(&self, table: &str, key: &PrimaryKey) -> Option<Row> {
        self.tables
            .lock()
            .get(table)
            .and_then(|t| t.rows.get(&key.canonical()).cloned())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, |t| t.rows.len())
    }

    /// Every accepted write, oldest first.
    pub fn history(&self) -> Vec<BackendWrite> {
        self.history.lock().clone()
    }

    /// Accepted writes that touched `table`/`key`.
    pub fn writes_for(&self, table: &str, key: &PrimaryKey) -> Vec<BackendWrite> {
        self.history
            .lock()
            .iter()
            .filter(|w| match w {
                BackendWrite::Upsert(u) => u.table == table && &u.key == key.as_row(),
                BackendWrite::Delete(d) => d.table == table && &d.key == key.as_row(),
            })
            .cloned()
            .collect()
    }

    pub fn describe_calls(&self) -> u64 {
        self.describe_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_writable(&self, table: &str) -> Result<(), BackendError> {
        if self.broken_tables.lock().contains(table) {
            return Err(BackendError::Unavailable(format!(
                "table '{}' is not accepting writes",
                table
            )));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BackendError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BackingStore for MemoryBackend {
    async fn upsert(&self, write: &RowWrite) -> Result<(), BackendError> {
        self.simulate_latency().await;
        self.check_writable(&write.table)?;

        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(&write.table)
            .ok_or_else(|| BackendError::UnknownTable(write.table.clone()))?;

        let canonical = PrimaryKey::new(write.key.clone()).canonical();
        let row = table
            .rows
            .entry(canonical)
            .or_insert_with(|| write.key.clone());
        row.extend(write.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        drop(tables);

        self.history.lock().push(BackendWrite::Upsert(write.clone()));
        Ok(())
    }

    async fn delete(&self, delete: &RowDelete) -> Result<(), BackendError> {
        self.simulate_latency().await;
        self.check_writable(&delete.table)?;

        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(&delete.table)
            .ok_or_else(|| BackendError::UnknownTable(delete.table.clone()))?;
        table
            .rows
            .remove(&PrimaryKey::new(delete.key.clone()).canonical());
        drop(tables);

        self.history.lock().push(BackendWrite::Delete(delete.clone()));
        Ok(())
    }

    async fn describe(&self, table: &str) -> Result<TableDescription, BackendError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        self.tables
            .lock()
            .get(table)
            .map(|t| t.description.clone())
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))
    }
}
