use crate::config::ThrottleConfig;
use std::time::{Duration, Instant};

/// How a completed fetch should move the adaptive throttle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleSignal {
    /// 2xx/3xx answer
    Clean,
    /// A definitive answer that says nothing about load (404, 400)
    Neutral,
    /// Transport failure, timeout, 5xx, 429 or 403
    Error,
}

/// Tracks the adaptive throttle of one origin
///
/// The delay follows the usual auto-throttle rule: aim for `latency / target_concurrency`
/// between requests, move halfway there on each response, and never shrink on a
/// non-clean response. Concurrency grows by one after a streak of clean responses and
/// is halved on every error.
#[derive(Debug, Clone)]
pub struct OriginState {
    /// Requests currently in flight to this origin
    pub in_flight: u32,

    /// Current concurrency allowance, between 1 and the configured per-origin cap
    pub concurrency: u32,

    /// Current minimum spacing between two dispatches
    pub delay: Duration,

    /// When the last request to this origin was dispatched
    pub last_request_time: Option<Instant>,

    /// Consecutive clean responses since the last adjustment
    pub clean_streak: u32,

    pub request_count: u64,
    pub error_count: u64,
}

impl OriginState {
    /// Creates the state of a not yet contacted origin
    pub fn new(throttle: &ThrottleConfig) -> Self {
        let start = throttle
            .start_delay_ms
            .clamp(throttle.min_delay_ms, throttle.max_delay_ms);
        Self {
            in_flight: 0,
            concurrency: 1,
            delay: Duration::from_millis(start),
            last_request_time: None,
            clean_streak: 0,
            request_count: 0,
            error_count: 0,
        }
    }

    /// Checks if a request can be dispatched to this origin now
    ///
    /// # Arguments
    ///
    /// * `now` - The current time instant
    ///
    /// # Returns
    ///
    /// * `true` - The concurrency allowance has room and the delay has elapsed
    /// * `false` - The dispatch must wait
    pub fn can_dispatch(&self, now: Instant) -> bool {
        self.in_flight < self.concurrency && self.time_until_ready(now).is_none()
    }

    /// Returns how long until the delay since the last dispatch has elapsed
    ///
    /// Returns None if the delay has already elapsed. A full concurrency allowance is not
    /// reflected here; the coordinator wakes up on completions for that.
    pub fn time_until_ready(&self, now: Instant) -> Option<Duration> {
        let last = self.last_request_time?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < self.delay {
            Some(self.delay - elapsed)
        } else {
            None
        }
    }

    /// Records that a request was dispatched to this origin
    pub fn record_dispatch(&mut self, now: Instant) {
        self.in_flight += 1;
        self.request_count += 1;
        self.last_request_time = Some(now);
    }

    /// Records a completed request and adjusts delay and concurrency
    ///
    /// # Arguments
    ///
    /// * `latency` - Time from dispatch to response (or failure)
    /// * `signal` - Classification of the outcome
    /// * `throttle` - Throttle tuning
    /// * `max_concurrency` - Per-origin concurrency cap
    pub fn record_completion(
        &mut self,
        latency: Duration,
        signal: ThrottleSignal,
        throttle: &ThrottleConfig,
        max_concurrency: u32,
    ) {
        self.in_flight = self.in_flight.saturating_sub(1);

        let min = Duration::from_millis(throttle.min_delay_ms);
        let max = Duration::from_millis(throttle.max_delay_ms);
        let target = latency.div_f64(throttle.target_concurrency);

        match signal {
            ThrottleSignal::Clean => {
                let averaged = (self.delay + target) / 2;
                self.delay = averaged.max(target).clamp(min, max);

                self.clean_streak += 1;
                if self.clean_streak >= throttle.clean_streak {
                    self.clean_streak = 0;
                    self.concurrency = (self.concurrency + 1).min(max_concurrency.max(1));
                }
            }
            ThrottleSignal::Neutral => {
                let averaged = ((self.delay + target) / 2).max(target).clamp(min, max);
                if averaged > self.delay {
                    self.delay = averaged;
                }
            }
            ThrottleSignal::Error => {
                self.error_count += 1;
                self.clean_streak = 0;
                self.concurrency = (self.concurrency / 2).max(1);
                self.delay = (self.delay * 2).max(target).clamp(min, max);
            }
        }
    }
}
