//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `OriginState`: per-origin adaptive throttle (delay and concurrency allowance)
//! - `RunCounters`: atomic run-level counters shared by all workers
//! - `RunSummary`: snapshot of the counters, reported at the end of a run

mod counters;
mod origin_state;

pub use counters::{RunCounters, RunSummary};
pub use origin_state::{OriginState, ThrottleSignal};
