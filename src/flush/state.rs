//! Flush ledger and failed set
//!
//! State shared between the flush consumer and the cache facade.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::{Mutation, RowKey};
use crate::error::CacheError;

/// A mutation the pipeline gave up on.
#[derive(Debug, Clone, Serialize)]
pub struct FailedMutation {
    pub mutation: Mutation,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl FailedMutation {
    pub fn new(mutation: Mutation, error: &CacheError, attempts: u32) -> Self {
        Self {
            mutation,
            error: error.to_string(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}

// == Flush State ==
/// Highest settled version per key, plus mutations awaiting an operator.
#[derive(Debug, Default)]
pub struct FlushState {
    ledger: Mutex<HashMap<RowKey, u64>>,
    failed: Mutex<Vec<FailedMutation>>,
}

impl FlushState {
    /// Seeds the ledger from recovered settle markers.
    pub fn seed(&self, settled: HashMap<RowKey, u64>) {
        let mut ledger = self.ledger.lock();
        for (key, version) in settled {
            let slot = ledger.entry(key).or_default();
            *slot = (*slot).max(version);
        }
    }

    /// Highest settled version of `row_key`, 0 if none.
    pub fn settled_version(&self, row_key: &RowKey) -> u64 {
        self.ledger.lock().get(row_key).copied().unwrap_or(0)
    }

    /// Raises the settled version of `row_key` and forgets failures it supersedes.
    pub fn settle(&self, row_key: &RowKey, version: u64) {
        {
            let mut ledger = self.ledger.lock();
            let slot = ledger.entry(row_key.clone()).or_default();
            *slot = (*slot).max(version);
        }
        self.failed.lock().retain(|f| {
            f.mutation.version > version || &f.mutation.row_key() != row_key
        });
    }

    pub fn ledger(&self) -> HashMap<RowKey, u64> {
        self.ledger.lock().clone()
    }

    /// Drops `row_key` from the ledger if it is still settled at `version`.
    pub fn forget(&self, row_key: &RowKey, version: u64) {
        let mut ledger = self.ledger.lock();
        if ledger.get(row_key) == Some(&version) {
            ledger.remove(row_key);
        }
    }

    pub fn push_failed(&self, failed: FailedMutation) {
        self.failed.lock().push(failed);
    }

    pub fn failed(&self) -> Vec<FailedMutation> {
        self.failed.lock().clone()
    }

    /// Empties the failed set, oldest first.
    pub fn take_failed(&self) -> Vec<FailedMutation> {
        std::mem::take(&mut *self.failed.lock())
    }

    /// Puts mutations back into the failed set, ahead of newer failures.
    pub fn restore_failed(&self, mut returned: Vec<FailedMutation>) {
        let mut failed = self.failed.lock();
        returned.append(&mut failed);
        *failed = returned;
    }
}
