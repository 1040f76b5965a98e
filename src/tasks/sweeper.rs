//! Expiration Sweeper Task
//!
//! Background task that periodically evicts expired entries and hands dirty
//! ones to the flush pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, KeyedStore, Mutation};

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries removed from the store
    pub evicted: usize,
    /// Dirty entries handed to the flush queue
    pub enqueued: usize,
    /// Expired entries left in place because the queue was full
    pub deferred: usize,
}

/// Runs a single sweep over the store.
///
/// A queue slot is reserved before each removal, so a full queue ends the
/// pass early and the remaining expired entries wait for the next tick.
pub fn sweep_once(
    store: &KeyedStore,
    stats: &CacheStats,
    queue: &mpsc::Sender<Mutation>,
) -> SweepReport {
    let now = Instant::now();
    let expired = store.expired_keys(now);
    let mut report = SweepReport::default();

    for (idx, row_key) in expired.iter().enumerate() {
        let permit = match queue.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) | Err(TrySendError::Closed(())) => {
                report.deferred = expired.len() - idx;
                break;
            }
        };

        // A concurrent set may have refreshed the entry since capture
        let Some(entry) = store.remove_expired(row_key, now) else {
            continue;
        };

        report.evicted += 1;
        if entry.columns.is_some() {
            stats.record_expiration();
        }
        if entry.dirty {
            permit.send(entry.to_mutation(&row_key.table));
            report.enqueued += 1;
        }
    }

    report
}

/// Spawns the sweeper, which runs every `interval` until `shutdown` flips
/// to true or its sender is dropped.
///
/// Returns the task handle so shutdown can wait for the last pass to end.
pub fn spawn_sweeper_task(
    store: Arc<KeyedStore>,
    stats: Arc<CacheStats>,
    queue: mpsc::Sender<Mutation>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting expiration sweeper"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = sweep_once(&store, &stats, &queue);
                    if report.deferred > 0 {
                        warn!(
                            deferred = report.deferred,
                            "Flush queue full, holding expired entries until next pass"
                        );
                    }
                    if report.evicted > 0 {
                        debug!(
                            evicted = report.evicted,
                            enqueued = report.enqueued,
                            "Sweep pass finished"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Expiration sweeper stopped");
    })
}
