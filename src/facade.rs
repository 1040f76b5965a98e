//! Cache Facade
//!
//! The public entry point: synchronous set/get/delete over the keyed store,
//! with durability through the write-ahead log and write-behind persistence
//! through the sweeper and flush pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::BackingStore;
use crate::cache::{
    CacheEntry, CacheStats, KeyedStore, Mutation, PrimaryKey, Row, StatsSnapshot,
};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::flush::{compact_log, FailedMutation, FlushPipeline, FlushState, RetryPolicy};
use crate::schema::SchemaCache;
use crate::tasks::spawn_sweeper_task;
use crate::wal::{DurableLog, SettleOutcome};

struct Workers {
    shutdown: watch::Sender<bool>,
    sweeper: JoinHandle<()>,
    pipeline: JoinHandle<()>,
}

/// Counts of what recovery found in the log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Upserts recreated as dirty entries
    pub restored: usize,
    /// Tombstones handed straight to the flush pipeline
    pub forwarded: usize,
}

// == Cache Facade ==
/// Write-behind row cache in front of a [`BackingStore`].
///
/// `set` and `delete` return once the mutation is in the write-ahead log and
/// the keyed store; the backing store is written later, when the entry
/// expires, on [`CacheDb::flush`], or during [`CacheDb::shutdown`].
pub struct CacheDb {
    config: Config,
    store: Arc<KeyedStore>,
    stats: Arc<CacheStats>,
    log: Arc<DurableLog>,
    schemas: Arc<SchemaCache>,
    flush_state: Arc<FlushState>,
    queue: Mutex<Option<mpsc::Sender<Mutation>>>,
    workers: Mutex<Option<Workers>>,
    recovery: RecoveryReport,
    closed: AtomicBool,
    /// Held shared by `set`/`delete`, exclusively by `shutdown` before it
    /// drains the store
    writes: RwLock<()>,
}

impl CacheDb {
    // == Open ==
    /// Opens the cache, replaying the write-ahead log before returning.
    ///
    /// Must be called inside a tokio runtime; the sweeper and the flush
    /// consumer are spawned on it.
    pub async fn open(config: Config, backend: Arc<dyn BackingStore>) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(KeyedStore::new(config.ttl));
        let stats = Arc::new(CacheStats::new());
        let log = Arc::new(DurableLog::open(&config.wal_path, config.sync_writes)?);
        let schemas = Arc::new(SchemaCache::new(backend.clone()));
        let flush_state = Arc::new(FlushState::default());

        let replay = log.replay()?;
        flush_state.seed(replay.settled_versions());
        for (row_key, version) in replay.last_versions() {
            store.seed_version(row_key, version);
        }

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let pipeline = FlushPipeline::new(
            backend,
            schemas.clone(),
            store.clone(),
            log.clone(),
            stats.clone(),
            flush_state.clone(),
            RetryPolicy::from_config(&config),
            config.compact_every,
        )
        .spawn(rx);

        let mut recovery = RecoveryReport::default();
        for mutation in replay.pending() {
            if mutation.is_tombstone() {
                tx.send(mutation).await.map_err(|_| {
                    CacheError::Internal("flush pipeline stopped during recovery".into())
                })?;
                recovery.forwarded += 1;
            } else {
                store.restore(&mutation, config.replay_grace);
                recovery.restored += 1;
            }
        }
        if recovery != RecoveryReport::default() {
            info!(
                restored = recovery.restored,
                forwarded = recovery.forwarded,
                "Recovered unflushed mutations from write-ahead log"
            );
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let sweeper = spawn_sweeper_task(
            store.clone(),
            stats.clone(),
            tx.clone(),
            config.sweep_interval,
            shutdown_rx,
        );

        info!(
            ttl_ms = config.ttl.as_millis() as u64,
            wal = %config.wal_path.display(),
            "Cache opened"
        );

        Ok(Self {
            config,
            store,
            stats,
            log,
            schemas,
            flush_state,
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(Some(Workers {
                shutdown,
                sweeper,
                pipeline,
            })),
            recovery,
            closed: AtomicBool::new(false),
            writes: RwLock::new(()),
        })
    }

    // == Set ==
    /// Creates or replaces a row.
    ///
    /// Fails without touching the cache if the mutation cannot be logged.
    pub fn set(&self, table: &str, primary_key: PrimaryKey, columns: Row) -> Result<()> {
        let _writing = self.writes.read();
        self.ensure_open()?;
        validate_target(table, &primary_key)?;

        let log = &self.log;
        let mutation = self.store.upsert_with(table, primary_key, columns, |m| {
            log.append_mutation(m).map(|_| ())
        })?;

        self.stats.record_set();
        debug!(
            table,
            key = %mutation.primary_key,
            version = mutation.version,
            "Row set"
        );
        Ok(())
    }

    // == Get ==
    /// Returns the row if it is cached and not expired.
    ///
    /// Never consults the backing store.
    pub fn get(&self, table: &str, primary_key: &PrimaryKey) -> Option<Row> {
        let row = self.store.get(table, primary_key);
        match row {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        row
    }

    // == Delete ==
    /// Hides the row immediately; the backing store row is deleted on the
    /// next sweep, whether or not the row was cached.
    pub fn delete(&self, table: &str, primary_key: PrimaryKey) -> Result<()> {
        let _writing = self.writes.read();
        self.ensure_open()?;
        validate_target(table, &primary_key)?;

        let log = &self.log;
        let mutation = self.store.delete_with(table, primary_key, |m| {
            log.append_mutation(m).map(|_| ())
        })?;

        self.stats.record_delete();
        debug!(
            table,
            key = %mutation.primary_key,
            version = mutation.version,
            "Row deleted"
        );
        Ok(())
    }

    /// Copy of the held entry, expired or pending deletion included.
    ///
    /// Not counted as a read.
    pub fn entry(&self, table: &str, primary_key: &PrimaryKey) -> Option<CacheEntry> {
        self.store.entry(table, primary_key)
    }

    // == Monitoring ==
    pub fn stats(&self) -> StatsSnapshot {
        self.stats
            .snapshot(self.store.len(), self.queue_depth(), self.log.size_bytes())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn recovery(&self) -> RecoveryReport {
        self.recovery
    }

    /// Number of schema loads executed against the backing store.
    pub fn schema_loads(&self) -> u64 {
        self.schemas.loads()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn queue_depth(&self) -> usize {
        self.queue
            .lock()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    // == Checkpoint ==
    /// Enqueues every dirty entry without evicting it.
    ///
    /// Returns the number of mutations enqueued; entries turn clean once the
    /// backing store confirms them.
    pub async fn flush(&self) -> Result<usize> {
        let tx = self.sender()?;
        let pending = self.store.dirty_snapshot();
        let count = pending.len();

        for mutation in pending {
            tx.send(mutation).await.map_err(|_| CacheError::Closed)?;
        }

        debug!(count, "Checkpoint enqueued");
        Ok(count)
    }

    // == Failed Mutations ==
    /// Mutations the pipeline gave up on, oldest first.
    pub fn failed_mutations(&self) -> Vec<FailedMutation> {
        self.flush_state.failed()
    }

    /// Hands every failed mutation back to the flush pipeline.
    pub async fn retry_failed(&self) -> Result<usize> {
        let tx = self.sender()?;
        let mut failed = self.flush_state.take_failed().into_iter();
        let mut count = 0;

        while let Some(entry) = failed.next() {
            if tx.send(entry.mutation.clone()).await.is_err() {
                let mut rest = vec![entry];
                rest.extend(failed);
                self.flush_state.restore_failed(rest);
                return Err(CacheError::Closed);
            }
            count += 1;
        }

        info!(count, "Failed mutations re-enqueued");
        Ok(count)
    }

    /// Gives up on every failed mutation for good.
    ///
    /// Each one is marked settled in the log so compaction can drop it and
    /// replay will not bring it back.
    pub fn discard_failed(&self) -> Result<usize> {
        let mut failed = self.flush_state.take_failed().into_iter();
        let mut count = 0;

        while let Some(entry) = failed.next() {
            let row_key = entry.mutation.row_key();
            let version = entry.mutation.version;

            if let Err(e) = self
                .log
                .append_settled(&row_key, version, SettleOutcome::Discarded)
            {
                let mut rest = vec![entry];
                rest.extend(failed);
                self.flush_state.restore_failed(rest);
                return Err(e);
            }

            self.flush_state.settle(&row_key, version);
            warn!(key = %row_key, version, "Discarded failed mutation");
            count += 1;
        }

        Ok(count)
    }

    // == Shutdown ==
    /// Stops accepting mutations and drains everything to the backing store.
    ///
    /// Order: stop the sweeper, enqueue every dirty entry, wait for the flush
    /// consumer to empty the queue, compact the log. Calling it again is a
    /// no-op.
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down cache");

        let workers = self.workers.lock().take();
        let Some(workers) = workers else {
            return Ok(());
        };

        // Receiver gone means the sweeper already exited
        let _ = workers.shutdown.send(true);
        if let Err(e) = workers.sweeper.await {
            warn!(error = %e, "Expiration sweeper ended abnormally");
        }

        let sender = self.queue.lock().take();
        if let Some(tx) = sender {
            // Writers that got past the closed check finish before the drain
            let pending = {
                let _drained = self.writes.write();
                self.store.drain()
            };
            let count = pending.len();
            for mutation in pending {
                if tx.send(mutation).await.is_err() {
                    warn!("Flush pipeline stopped before drain finished");
                    break;
                }
            }
            debug!(count, "Remaining dirty entries enqueued");
        }

        workers
            .pipeline
            .await
            .map_err(|e| CacheError::Internal(format!("flush pipeline failed: {}", e)))?;

        compact_log(&self.log, &self.flush_state, &self.store).await;

        let stats = self.stats();
        info!(
            flushed = stats.flushed,
            failures = stats.failures,
            log_bytes = stats.log_bytes,
            "Cache shut down"
        );
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Mutation>> {
        self.queue.lock().clone().ok_or(CacheError::Closed)
    }
}

impl Drop for CacheDb {
    /// Without a shutdown the background tasks are stopped where they are;
    /// whatever they had not flushed is still in the log for the next open.
    fn drop(&mut self) {
        if let Some(workers) = self.workers.get_mut().take() {
            workers.sweeper.abort();
            workers.pipeline.abort();
        }
    }
}

/// Rejects an empty table name or primary key.
pub(crate) fn validate_target(table: &str, primary_key: &PrimaryKey) -> Result<()> {
    if table.trim().is_empty() {
        return Err(CacheError::InvalidRequest("table cannot be empty".into()));
    }
    if primary_key.is_empty() {
        return Err(CacheError::InvalidRequest(
            "primary key must have at least one column".into(),
        ));
    }
    Ok(())
}
