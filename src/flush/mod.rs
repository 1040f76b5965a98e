//! Flush Module
//!
//! Moves mutations from the flush queue to the backing store and tracks what
//! has been settled.

mod pipeline;
mod state;

pub use pipeline::{compact_log, FlushPipeline, RetryPolicy};
pub use state::{FailedMutation, FlushState};
