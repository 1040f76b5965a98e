//! Flush Pipeline
//!
//! Single consumer that drains the flush queue in FIFO order and applies each
//! mutation to the backing store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{FailedMutation, FlushState};
use crate::backend::BackingStore;
use crate::cache::{CacheStats, KeyedStore, Mutation, RowKey};
use crate::config::Config;
use crate::error::{BackendError, CacheError, Result};
use crate::schema::{SchemaCache, Statement};
use crate::wal::{DurableLog, SettleOutcome};

/// Retry and timeout settings for backing store calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.retry_base,
            timeout: config.backend_timeout,
        }
    }

    /// Delay before the attempt following failed attempt number `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

// == Flush Pipeline ==
/// Applies queued mutations to the backing store.
pub struct FlushPipeline {
    backend: Arc<dyn BackingStore>,
    schemas: Arc<SchemaCache>,
    store: Arc<KeyedStore>,
    log: Arc<DurableLog>,
    stats: Arc<CacheStats>,
    state: Arc<FlushState>,
    policy: RetryPolicy,
    compact_every: u64,
    confirmed: u64,
}

impl FlushPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn BackingStore>,
        schemas: Arc<SchemaCache>,
        store: Arc<KeyedStore>,
        log: Arc<DurableLog>,
        stats: Arc<CacheStats>,
        state: Arc<FlushState>,
        policy: RetryPolicy,
        compact_every: u64,
    ) -> Self {
        Self {
            backend,
            schemas,
            store,
            log,
            stats,
            state,
            policy,
            compact_every,
            confirmed: 0,
        }
    }

    /// Runs the consumer until every sender of `queue` is dropped and the
    /// queue is empty.
    pub fn spawn(mut self, mut queue: mpsc::Receiver<Mutation>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                max_attempts = self.policy.max_attempts,
                timeout_ms = self.policy.timeout.as_millis() as u64,
                "Flush pipeline started"
            );

            while let Some(mutation) = queue.recv().await {
                self.process(mutation).await;
            }

            info!(confirmed = self.confirmed, "Flush pipeline stopped");
        })
    }

    /// Applies one mutation, retrying transient failures.
    pub async fn process(&mut self, mutation: Mutation) {
        let row_key = mutation.row_key();
        let settled = self.state.settled_version(&row_key);

        if mutation.version <= settled {
            debug!(
                key = %row_key,
                version = mutation.version,
                settled,
                "Skipping already applied mutation"
            );
            self.stats.record_skipped();
            return;
        }

        match self.apply_with_retry(&mutation).await {
            Ok(()) => self.confirm(&row_key, mutation.version).await,
            Err((err, attempts)) => self.set_aside(mutation, err, attempts),
        }
    }

    async fn apply_with_retry(
        &self,
        mutation: &Mutation,
    ) -> std::result::Result<(), (CacheError, u32)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.apply(mutation).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        table = %mutation.table,
                        key = %mutation.primary_key,
                        version = mutation.version,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Backing store write failed, retrying"
                    );
                    self.stats.record_retry();
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err((err, attempt)),
            }
        }
    }

    async fn apply(&self, mutation: &Mutation) -> Result<()> {
        let schema = self.schemas.get(&mutation.table).await?;
        let statement = schema.shape(mutation)?;

        let call = async {
            match &statement {
                Statement::Upsert(write) => self.backend.upsert(write).await,
                Statement::Delete(delete) => self.backend.delete(delete).await,
            }
        };

        match tokio::time::timeout(self.policy.timeout, call).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(BackendError::Timeout(self.policy.timeout.as_millis() as u64).into()),
        }
    }

    async fn confirm(&mut self, row_key: &RowKey, version: u64) {
        self.state.settle(row_key, version);
        self.store.mark_clean(row_key, version);

        // A lost marker only means the row may be written again after a crash
        if let Err(e) = self.log.append_settled(row_key, version, SettleOutcome::Applied) {
            warn!(key = %row_key, version, error = %e, "Failed to log flush confirmation");
        }

        self.stats.record_flushed();
        debug!(key = %row_key, version, "Mutation flushed");

        self.confirmed += 1;
        if self.compact_every > 0 && self.confirmed % self.compact_every == 0 {
            compact_log(&self.log, &self.state, &self.store).await;
        }
    }

    fn set_aside(&self, mutation: Mutation, err: CacheError, attempts: u32) {
        error!(
            table = %mutation.table,
            key = %mutation.primary_key,
            kind = mutation.kind(),
            version = mutation.version,
            attempts,
            error = %err,
            "Giving up on mutation, kept for retry or discard"
        );
        self.stats.record_failure();
        self.state
            .push_failed(FailedMutation::new(mutation, &err, attempts));
    }
}

/// Compacts the log on a blocking thread against the current ledger, then
/// retires the version history of settled keys that are no longer cached.
///
/// Failures are logged; the log simply stays larger until the next pass.
pub async fn compact_log(log: &Arc<DurableLog>, state: &FlushState, store: &KeyedStore) {
    let log = log.clone();
    let ledger = state.ledger();

    match tokio::task::spawn_blocking(move || log.compact(&ledger)).await {
        Ok(Ok(done)) => debug!(
            before = done.records_before,
            after = done.records_after,
            "Log compaction finished"
        ),
        Ok(Err(e)) => warn!(error = %e, "Log compaction failed"),
        Err(e) => warn!(error = %e, "Log compaction task panicked"),
    }

    let retired = retire_settled_keys(state, store);
    if retired > 0 {
        debug!(retired, "Retired version history of evicted keys");
    }
}

/// Drops ledger and version-floor entries for keys with no live entry and
/// nothing left to flush.
fn retire_settled_keys(state: &FlushState, store: &KeyedStore) -> usize {
    state
        .ledger()
        .into_iter()
        .filter(|(row_key, settled)| {
            store.retire_settled(row_key, *settled, || state.forget(row_key, *settled))
        })
        .count()
}
