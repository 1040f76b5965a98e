//! Background Tasks Module
//!
//! Contains background tasks that run periodically for the cache lifetime.
//!
//! # Tasks
//! - Expiration sweeper: evicts expired entries and feeds the flush queue

mod sweeper;

pub use sweeper::{spawn_sweeper_task, sweep_once, SweepReport};
