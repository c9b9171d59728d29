//! Shared crawl context
//!
//! Everything a fetch worker needs, passed explicitly instead of living in globals. Only
//! concurrency-safe pieces are shared: the dedup gate, the counters, the rotation
//! manager's proxy flag and the store behind the sink.

use crate::crawler::dedup::DedupGate;
use crate::crawler::extract::Extractor;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::identity::RotationManager;
use crate::crawler::retry::RetryPolicy;
use crate::crawler::sink::IngestionSink;
use crate::state::{RunCounters, RunSummary};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

pub struct CrawlContext {
    pub gate: Arc<DedupGate>,
    pub counters: Arc<RunCounters>,
    pub identity: RotationManager,
    pub policy: RetryPolicy,
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<dyn Extractor>,
    pub sink: IngestionSink,
    pub started: Instant,
}

impl CrawlContext {
    /// Snapshot of the run counters
    pub fn summary(&self) -> RunSummary {
        self.counters
            .snapshot(self.identity.proxy_was_disabled(), self.started.elapsed())
    }
}

#[derive(Debug, Default)]
struct StopState {
    stopped: AtomicBool,
    notify: Notify,
}

/// Cloneable handle that asks a running crawl to stop
///
/// Stopping only prevents new dispatches; fetches already in flight finish.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopState>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_one();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Resolves once `stop` has been called
    pub async fn stopped(&self) {
        while !self.is_stopped() {
            self.inner.notify.notified().await;
        }
    }
}
