//! Write-Ahead Log for crash recovery
//!
//! Every mutation accepted by the cache is appended here before it becomes
//! visible; the flush pipeline appends settle markers once the backing store
//! confirms a version, and compaction drops what is settled.

mod log;
mod record;

pub use log::{Compaction, DurableLog, Replay};
pub use record::{LogEntry, LogRecord, SettleOutcome};
