//! Retry/backoff policy
//!
//! A pure decision table from the status of one attempt and the target's retry history
//! to the action the scheduler takes next:
//!
//! | Outcome | Action |
//! |---------|--------|
//! | transport failure | rotate identity, retry after the transport delay |
//! | 407 / proxy auth failure | retry the same target once without delay |
//! | 429 | rotate identity, retry after the rate-limit delay |
//! | 403 | rotate identity, retry after `base * 2^n`; terminal after the configured count |
//! | 404, 400 | terminal |
//! | 500, 502, 503, 504, 408, 522, 524 | retry the same target after the server-error delay |
//! | 2xx/3xx | proceed to extraction |
//! | anything else | terminal |
//!
//! Every retry counts against the global retry limit; a retry decided once the limit is
//! reached becomes a terminal skip.

use crate::config::RetryConfig;
use crate::crawler::fetcher::{FetchStatus, NetworkErrorKind};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Key under which transport failures are counted in `status_retries`
const TRANSPORT_KEY: u16 = 0;

const SERVER_RETRY_CODES: &[u16] = &[500, 502, 503, 504, 408, 522, 524];

/// What to do with a target after an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Retry with the same identity after the delay
    RetrySameTarget(Duration),
    /// Retry with a freshly rotated identity after the delay
    RetryWithNewIdentity(Duration),
    /// Drop the target for the rest of the run
    TerminalSkip(SkipReason),
    /// Hand the body to extraction
    Proceed,
}

impl RetryAction {
    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            Self::RetrySameTarget(_) | Self::RetryWithNewIdentity(_)
        )
    }
}

/// Why a target was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    /// 400; also ends pagination for the URL family
    BadRequest,
    /// 403 after the configured number of retries
    Forbidden,
    /// Proxy authentication failed again after the proxy was dropped
    ProxyAuth,
    UnexpectedStatus(u16),
    /// The global retry limit was reached
    RetriesExhausted,
    /// The task handling the attempt panicked
    WorkerFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found (404)"),
            Self::BadRequest => write!(f, "bad request (400)"),
            Self::Forbidden => write!(f, "forbidden (403), retries used up"),
            Self::ProxyAuth => write!(f, "proxy authentication failed twice"),
            Self::UnexpectedStatus(code) => write!(f, "unexpected status {}", code),
            Self::RetriesExhausted => write!(f, "retry limit reached"),
            Self::WorkerFailed => write!(f, "fetch task failed"),
        }
    }
}

/// Per-target retry bookkeeping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    /// Retries taken across all causes
    pub retries: u32,
    /// Retries taken per HTTP status; transport failures are counted under 0
    pub status_retries: HashMap<u16, u32>,
    /// Delay applied before the most recent retry
    pub last_delay: Duration,
    /// Whether the next attempt must use a rotated identity
    pub rotate_identity: bool,
}

impl RetryState {
    /// Retries already taken for the given status
    pub fn count_for(&self, status: &FetchStatus) -> u32 {
        self.status_retries
            .get(&status_key(status))
            .copied()
            .unwrap_or(0)
    }

    /// Returns true if a 403 has been retried before
    pub fn seen_forbidden(&self) -> bool {
        self.status_retries.get(&403).copied().unwrap_or(0) > 0
    }

    /// Updates the state with the action taken for an attempt
    ///
    /// `Proceed` resets all counters.
    pub fn record(&mut self, status: &FetchStatus, action: &RetryAction) {
        match action {
            RetryAction::RetrySameTarget(delay) | RetryAction::RetryWithNewIdentity(delay) => {
                self.retries += 1;
                *self.status_retries.entry(status_key(status)).or_insert(0) += 1;
                self.last_delay = *delay;
                self.rotate_identity = matches!(action, RetryAction::RetryWithNewIdentity(_));
            }
            RetryAction::Proceed => *self = Self::default(),
            RetryAction::TerminalSkip(_) => {}
        }
    }
}

fn status_key(status: &FetchStatus) -> u16 {
    match status {
        FetchStatus::Http(code) => *code,
        FetchStatus::Network(NetworkErrorKind::ProxyAuth) => 407,
        FetchStatus::Network(_) => TRANSPORT_KEY,
    }
}

/// The decision table, parameterized by the retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retry_limit: u32,
    forbidden_base_delay: Duration,
    forbidden_max_retries: u32,
    transport_delay: Duration,
    rate_limit_delay: Duration,
    server_error_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            retry_limit: config.retry_limit,
            forbidden_base_delay: Duration::from_millis(config.forbidden_base_delay_ms),
            forbidden_max_retries: config.forbidden_max_retries,
            transport_delay: Duration::from_millis(config.transport_delay_ms),
            rate_limit_delay: Duration::from_millis(config.rate_limit_delay_ms),
            server_error_delay: Duration::from_millis(config.server_error_delay_ms),
        }
    }

    /// Decides the action for an attempt
    ///
    /// Deterministic: the same status and state always produce the same action.
    pub fn decide(&self, status: &FetchStatus, state: &RetryState) -> RetryAction {
        let action = self.classify(status, state);

        if action.is_retry() && state.retries >= self.retry_limit {
            return RetryAction::TerminalSkip(SkipReason::RetriesExhausted);
        }
        action
    }

    fn classify(&self, status: &FetchStatus, state: &RetryState) -> RetryAction {
        match status {
            FetchStatus::Network(NetworkErrorKind::ProxyAuth) | FetchStatus::Http(407) => {
                if state.count_for(status) == 0 {
                    RetryAction::RetrySameTarget(Duration::ZERO)
                } else {
                    RetryAction::TerminalSkip(SkipReason::ProxyAuth)
                }
            }
            FetchStatus::Network(_) => RetryAction::RetryWithNewIdentity(self.transport_delay),
            FetchStatus::Http(code) => match *code {
                200..=399 => RetryAction::Proceed,
                429 => RetryAction::RetryWithNewIdentity(self.rate_limit_delay),
                403 => {
                    let n = state.count_for(status);
                    if n >= self.forbidden_max_retries {
                        RetryAction::TerminalSkip(SkipReason::Forbidden)
                    } else {
                        RetryAction::RetryWithNewIdentity(self.forbidden_delay(n))
                    }
                }
                404 => RetryAction::TerminalSkip(SkipReason::NotFound),
                400 => RetryAction::TerminalSkip(SkipReason::BadRequest),
                code if SERVER_RETRY_CODES.contains(&code) => {
                    RetryAction::RetrySameTarget(self.server_error_delay)
                }
                code => RetryAction::TerminalSkip(SkipReason::UnexpectedStatus(code)),
            },
        }
    }

    fn forbidden_delay(&self, n: u32) -> Duration {
        self.forbidden_base_delay
            .saturating_mul(2u32.saturating_pow(n.min(16)))
    }
}
