//! Fetch scheduling state
//!
//! This module handles:
//! - Global concurrency limiting via a semaphore
//! - Per-origin adaptive throttling (concurrency allowance and delay)
//! - Deadline-ordered re-entry of retried targets

use crate::config::{CrawlerConfig, ThrottleConfig};
use crate::crawler::target::CrawlTarget;
use crate::state::{OriginState, ThrottleSignal};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A target waiting out its retry delay
#[derive(Debug)]
struct DelayedTarget {
    ready_at: Instant,
    /// Insertion order, breaks ties between equal deadlines
    seq: u64,
    target: CrawlTarget,
}

// Earliest deadline is popped first from the max-heap
impl Ord for DelayedTarget {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for DelayedTarget {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DelayedTarget {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for DelayedTarget {}

/// Scheduler state owned by the coordinator
///
/// The scheduler coordinates:
/// - The global in-flight cap (semaphore permits held by running fetches)
/// - Per-origin concurrency and spacing, adapted from response latency and errors
/// - Retries, which re-enter the dispatch path once their deadline has passed
pub struct Scheduler {
    global_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    max_per_origin: u32,
    throttle: ThrottleConfig,
    origins: HashMap<String, OriginState>,
    delayed: BinaryHeap<DelayedTarget>,
    seq: u64,
}

impl Scheduler {
    /// Creates a scheduler from the crawler and throttle configuration
    pub fn new(crawler: &CrawlerConfig, throttle: ThrottleConfig) -> Self {
        let max_concurrent = crawler.max_concurrent_requests.max(1) as usize;
        Self {
            global_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_per_origin: crawler.max_requests_per_origin.max(1),
            throttle,
            origins: HashMap::new(),
            delayed: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Tries to reserve a dispatch slot for `origin`
    ///
    /// # Returns
    ///
    /// * `Some(permit)` - The fetch may start; the permit must live until it ends
    /// * `None` - The origin is throttled or the global cap is reached
    pub fn try_acquire(&mut self, origin: &str, now: Instant) -> Option<OwnedSemaphorePermit> {
        let state = self
            .origins
            .entry(origin.to_string())
            .or_insert_with(|| OriginState::new(&self.throttle));

        if !state.can_dispatch(now) {
            return None;
        }

        let permit = Arc::clone(&self.global_semaphore).try_acquire_owned().ok()?;
        state.record_dispatch(now);
        Some(permit)
    }

    /// Returns how long `origin` must wait before its spacing allows a dispatch
    pub fn origin_wait(&self, origin: &str, now: Instant) -> Option<Duration> {
        self.origins
            .get(origin)
            .and_then(|state| state.time_until_ready(now))
    }

    /// Feeds a completed fetch into the origin's throttle
    pub fn record_completion(&mut self, origin: &str, latency: Duration, signal: ThrottleSignal) {
        if let Some(state) = self.origins.get_mut(origin) {
            let before = (state.concurrency, state.delay);
            state.record_completion(latency, signal, &self.throttle, self.max_per_origin);
            if before != (state.concurrency, state.delay) {
                tracing::trace!(
                    "Throttle for {}: concurrency {}, delay {:?}",
                    origin,
                    state.concurrency,
                    state.delay
                );
            }
        }
    }

    /// Schedules a target to become eligible again after `delay`
    pub fn schedule_retry(&mut self, target: CrawlTarget, delay: Duration, now: Instant) {
        self.seq += 1;
        self.delayed.push(DelayedTarget {
            ready_at: now + delay,
            seq: self.seq,
            target,
        });
    }

    /// Takes the earliest retry whose deadline has passed
    pub fn pop_ready(&mut self, now: Instant) -> Option<CrawlTarget> {
        if self.delayed.peek()?.ready_at > now {
            return None;
        }
        self.delayed.pop().map(|delayed| delayed.target)
    }

    /// Deadline of the earliest pending retry
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.delayed.peek().map(|delayed| delayed.ready_at)
    }

    /// Number of targets waiting out a retry delay
    pub fn pending_retries(&self) -> usize {
        self.delayed.len()
    }

    /// Number of fetches currently holding a global permit
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.global_semaphore.available_permits()
    }

    /// Throttle state of an origin, if it was ever contacted
    #[cfg(test)]
    pub fn origin_state(&self, origin: &str) -> Option<&OriginState> {
        self.origins.get(origin)
    }
}
