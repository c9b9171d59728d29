use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Run-level counters shared by all workers
///
/// Every field is an independent atomic; a [`RunSummary`] is a point-in-time snapshot
/// and is not guaranteed to be consistent across fields while the run is live.
#[derive(Debug, Default)]
pub struct RunCounters {
    /// Fetch attempts issued, including retries
    pub requests: AtomicU64,
    /// Targets fetched successfully and handed to extraction
    pub fetched: AtomicU64,
    /// Deal records newly upserted
    pub ingested: AtomicU64,
    /// Child rows (images, categories, related links) newly upserted
    pub ingested_children: AtomicU64,
    /// Targets dropped by a terminal status
    pub skipped_terminal: AtomicU64,
    /// Targets dropped because the retry limit was reached
    pub retries_exhausted: AtomicU64,
    /// Retries scheduled
    pub retries: AtomicU64,
    /// Records short-circuited by the dedup gate
    pub duplicates: AtomicU64,
    /// Records dropped after all upsert attempts failed
    pub storage_drops: AtomicU64,
    /// Targets accepted into the frontier
    pub discovered: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a counter by one and returns the new value
    pub fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Takes a snapshot of the counters
    pub fn snapshot(&self, proxy_disabled: bool, elapsed: Duration) -> RunSummary {
        RunSummary {
            requests: self.requests.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            ingested_children: self.ingested_children.load(Ordering::Relaxed),
            skipped_terminal: self.skipped_terminal.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            storage_drops: self.storage_drops.load(Ordering::Relaxed),
            discovered: self.discovered.load(Ordering::Relaxed),
            proxy_disabled,
            elapsed,
        }
    }
}

/// Final (or intermediate) counts of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub requests: u64,
    pub fetched: u64,
    pub ingested: u64,
    pub ingested_children: u64,
    pub skipped_terminal: u64,
    pub retries_exhausted: u64,
    pub retries: u64,
    pub duplicates: u64,
    pub storage_drops: u64,
    pub discovered: u64,
    pub proxy_disabled: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Successful fetches per second over the run
    pub fn fetch_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.fetched as f64 / secs
        } else {
            0.0
        }
    }
}
