//! Crawler coordinator - main crawl orchestration logic
//!
//! A single owner loop drives the run:
//! - Seeds the dedup gate from the store and opens a run row
//! - Pulls ready retries first, then frontier targets, and dispatches them as tasks
//!   while the global and per-origin bounds allow
//! - Routes each finished attempt: throttle feedback, retry scheduling, terminal skips,
//!   and on success new targets back into the frontier
//! - Stops on frontier exhaustion, the record cap, the run deadline or a stop request,
//!   letting in-flight fetches finish
//!
//! Workers own one attempt each: prepare the identity, fetch, decide, extract and
//! ingest. Targets never share retry state.

use crate::config::Config;
use crate::crawler::context::{CrawlContext, StopHandle};
use crate::crawler::dedup::DedupGate;
use crate::crawler::extract::{Extractor, HtmlExtractor};
use crate::crawler::fetcher::{FetchStatus, Fetcher, HttpFetcher, NetworkErrorKind};
use crate::crawler::frontier::Frontier;
use crate::crawler::identity::RotationManager;
use crate::crawler::retry::{RetryAction, RetryPolicy, SkipReason};
use crate::crawler::scheduler::Scheduler;
use crate::crawler::sink::IngestionSink;
use crate::crawler::target::CrawlTarget;
use crate::records::DiscoveredLink;
use crate::state::{RunCounters, RunSummary, ThrottleSignal};
use crate::storage::{lock_storage, share, RunStatus, SharedStorage, SqliteStorage};
use crate::url::{extract_domain, normalize_url, origin_key};
use crate::SweepError;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinSet;

/// Idle poll interval used when nothing else can wake the loop
const IDLE_WAKEUP: Duration = Duration::from_millis(50);

/// What a worker reports back after one attempt
struct AttemptResult {
    target: CrawlTarget,
    origin: String,
    status: FetchStatus,
    elapsed: Duration,
    action: RetryAction,
    error: Option<String>,
    deal_count: usize,
    links: Vec<DiscoveredLink>,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    storage: SharedStorage,
    context: Arc<CrawlContext>,
    frontier: Frontier,
    scheduler: Scheduler,
    stop: StopHandle,
}

impl Coordinator {
    /// Creates a coordinator with the SQLite store, reqwest fetcher and HTML extractor
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Hash of the configuration file, recorded on the run row
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(SweepError)` - The database or HTTP client could not be set up
    pub fn new(config: Config, config_hash: impl Into<String>) -> Result<Self, SweepError> {
        let storage = SqliteStorage::new(Path::new(&config.storage.database_path))?;
        let fetcher = HttpFetcher::new(Duration::from_secs(config.crawler.request_timeout_secs))?;
        let extractor = HtmlExtractor::new(scope_domains(&config), config.pagination.parameter.clone());

        Self::with_parts(
            config,
            config_hash,
            share(storage),
            Arc::new(fetcher),
            Arc::new(extractor),
        )
    }

    /// Creates a coordinator from explicit collaborators
    pub fn with_parts(
        config: Config,
        config_hash: impl Into<String>,
        storage: SharedStorage,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self, SweepError> {
        let frontier = Frontier::from_config(&config)?;
        let scheduler = Scheduler::new(&config.crawler, config.throttle.clone());

        let gate = Arc::new(DedupGate::new());
        let counters = Arc::new(RunCounters::new());
        let sink = IngestionSink::new(
            Arc::clone(&storage),
            Arc::clone(&gate),
            Arc::clone(&counters),
            &config.storage,
            config.crawler.max_records,
        );

        let context = CrawlContext {
            gate,
            counters,
            identity: RotationManager::new(&config.identity, &config.proxy),
            policy: RetryPolicy::new(&config.retry),
            fetcher,
            extractor,
            sink,
            started: Instant::now(),
        };

        Ok(Self {
            config: Arc::new(config),
            config_hash: config_hash.into(),
            storage,
            context: Arc::new(context),
            frontier,
            scheduler,
            stop: StopHandle::new(),
        })
    }

    /// Handle that stops the run from another task (e.g. on Ctrl-C)
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs the crawl to completion
    ///
    /// Fetch and ingestion failures are counted and logged, never returned.
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - Final counts of the run
    /// * `Err(SweepError)` - The run row could not be created
    pub async fn run(&mut self) -> Result<RunSummary, SweepError> {
        let known = self.context.gate.seed_from_store(&self.storage);
        let run_id = lock_storage(&self.storage).create_run(&self.config_hash)?;

        tracing::info!(
            "Starting crawl run {} with {} seed(s), {} known deal URL(s)",
            run_id,
            self.frontier.len(),
            known
        );

        let deadline = self
            .config
            .crawler
            .max_run_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let progress_interval = self.config.crawler.progress_interval.max(1);
        let stop = self.stop.clone();

        let mut tasks: JoinSet<AttemptResult> = JoinSet::new();
        let mut pending: Option<CrawlTarget> = None;
        let mut stopping = false;
        let mut completed: u64 = 0;

        loop {
            if !stopping {
                if let Some(reason) = self.stop_reason(deadline) {
                    tracing::info!("Stopping: {}; waiting for {} in-flight fetch(es)", reason, tasks.len());
                    stopping = true;
                }
            }

            if !stopping {
                self.dispatch_ready(&mut tasks, &mut pending);
            }

            let drained = pending.is_none()
                && self.frontier.is_empty()
                && self.scheduler.pending_retries() == 0;
            if tasks.is_empty() && (stopping || drained) {
                break;
            }

            let wake_at = if stopping {
                None
            } else {
                self.next_wakeup(pending.as_ref(), deadline, tasks.is_empty())
            };

            tokio::select! {
                joined = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Some(Ok(result)) => {
                            self.handle_result(result);
                            completed += 1;
                            if completed % progress_interval == 0 {
                                self.log_progress();
                            }
                        }
                        Some(Err(e)) => tracing::error!("Fetch task failed: {}", e),
                        None => {}
                    }
                }
                _ = sleep_until_opt(wake_at), if wake_at.is_some() => {}
                _ = stop.stopped(), if !stopping => {}
            }
        }

        let summary = self.context.summary();
        let status = if stop.is_stopped() {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };

        if let Err(e) = lock_storage(&self.storage).complete_run(run_id, status, &summary) {
            tracing::warn!("Failed to record completion of run {}: {}", run_id, e);
        }

        tracing::info!(
            "Crawl run {} {}: {} fetched, {} ingested, {} skipped, {} retries exhausted, {} storage drops",
            run_id,
            status.to_db_string(),
            summary.fetched,
            summary.ingested,
            summary.skipped_terminal,
            summary.retries_exhausted,
            summary.storage_drops
        );

        Ok(summary)
    }

    fn stop_reason(&self, deadline: Option<Instant>) -> Option<&'static str> {
        if self.stop.is_stopped() {
            Some("stop requested")
        } else if self.context.sink.limit_reached() {
            Some("record cap reached")
        } else if deadline.is_some_and(|d| Instant::now() >= d) {
            Some("run deadline reached")
        } else {
            None
        }
    }

    /// Starts fetches until the frontier is empty or a bound blocks the next target
    ///
    /// A blocked target is parked in `pending` and tried first next time.
    fn dispatch_ready(&mut self, tasks: &mut JoinSet<AttemptResult>, pending: &mut Option<CrawlTarget>) {
        loop {
            let now = Instant::now();
            let target = match pending.take().or_else(|| self.next_target(now)) {
                Some(target) => target,
                None => return,
            };

            let origin = origin_key(&target.url);
            match self.scheduler.try_acquire(&origin, now) {
                Some(permit) => {
                    let context = Arc::clone(&self.context);
                    tasks.spawn(supervised_attempt(context, target, origin, permit));
                }
                None => {
                    *pending = Some(target);
                    return;
                }
            }
        }
    }

    /// Next target to dispatch: ready retries first, then the frontier
    ///
    /// Frontier targets claim their page key; a target another path already claimed
    /// is dropped here.
    fn next_target(&mut self, now: Instant) -> Option<CrawlTarget> {
        if let Some(retry) = self.scheduler.pop_ready(now) {
            return Some(retry);
        }

        while let Some(target) = self.frontier.pop() {
            if self
                .context
                .gate
                .try_claim_page(&target.key, !target.kind.is_listing())
            {
                return Some(target);
            }
            tracing::trace!("Skipping already known {}", target.url);
        }
        None
    }

    fn next_wakeup(
        &self,
        pending: Option<&CrawlTarget>,
        deadline: Option<Instant>,
        idle: bool,
    ) -> Option<Instant> {
        let now = Instant::now();

        let origin_ready = pending
            .and_then(|target| self.scheduler.origin_wait(&origin_key(&target.url), now))
            .map(|wait| now + wait);
        let retry_ready = self.scheduler.next_retry_at();

        let wake = [origin_ready, retry_ready, deadline].into_iter().flatten().min();

        // Nothing in flight can wake us, so poll
        match wake {
            None if idle && pending.is_some() => Some(now + IDLE_WAKEUP),
            wake => wake,
        }
    }

    fn handle_result(&mut self, result: AttemptResult) {
        let counters = &self.context.counters;
        let gate = &self.context.gate;

        self.scheduler
            .record_completion(&result.origin, result.elapsed, throttle_signal(&result.status));

        let target = result.target;
        match result.action {
            RetryAction::Proceed => {
                RunCounters::bump(&counters.fetched);
                let continued = self
                    .frontier
                    .continue_pagination(&target, result.deal_count, gate);
                let added = self.frontier.add_discovered(&target, result.links, gate)
                    + usize::from(continued);
                counters.discovered.fetch_add(added as u64, Ordering::Relaxed);

                tracing::debug!(
                    "Fetched {} in {:?}: {} deal(s), {} new target(s)",
                    target.url,
                    result.elapsed,
                    result.deal_count,
                    added
                );
            }
            RetryAction::RetrySameTarget(delay) | RetryAction::RetryWithNewIdentity(delay) => {
                RunCounters::bump(&counters.retries);
                tracing::warn!(
                    "Retrying {} in {:?} after {} (retry {}){}",
                    target.url,
                    delay,
                    result.status,
                    target.retry_count(),
                    result.error.map(|e| format!(": {}", e)).unwrap_or_default()
                );
                self.scheduler.schedule_retry(target, delay, Instant::now());
            }
            RetryAction::TerminalSkip(SkipReason::RetriesExhausted) => {
                RunCounters::bump(&counters.retries_exhausted);
                tracing::error!(
                    "Giving up on {} after {} retries (last: {})",
                    target.url,
                    target.retry_count(),
                    result.status
                );
            }
            RetryAction::TerminalSkip(reason) => {
                RunCounters::bump(&counters.skipped_terminal);
                if reason == SkipReason::BadRequest {
                    self.frontier.mark_family_exhausted(&target.url);
                }
                match result.error {
                    Some(e) if reason == SkipReason::WorkerFailed => {
                        tracing::error!("Skipping {}: {}: {}", target.url, reason, e)
                    }
                    _ => tracing::warn!("Skipping {}: {}", target.url, reason),
                }
            }
        }
    }

    fn log_progress(&self) {
        let summary = self.context.summary();
        tracing::info!(
            "Progress: {} fetched, {} ingested, {} queued, {} in flight, {} retries pending, {:.2} pages/sec",
            summary.fetched,
            summary.ingested,
            self.frontier.len(),
            self.scheduler.in_flight(),
            self.scheduler.pending_retries(),
            summary.fetch_rate()
        );
    }
}

/// Runs an attempt in its own task so a panic still reports back
///
/// A failed task comes back as a terminal skip of its target, which releases the
/// origin's in-flight slot like any other completion.
async fn supervised_attempt(
    context: Arc<CrawlContext>,
    target: CrawlTarget,
    origin: String,
    permit: OwnedSemaphorePermit,
) -> AttemptResult {
    let fallback = target.clone();
    let fallback_origin = origin.clone();

    match tokio::spawn(run_attempt(context, target, origin, permit)).await {
        Ok(result) => result,
        Err(e) => AttemptResult {
            target: fallback,
            origin: fallback_origin,
            status: FetchStatus::Network(NetworkErrorKind::Other),
            elapsed: Duration::ZERO,
            action: RetryAction::TerminalSkip(SkipReason::WorkerFailed),
            error: Some(e.to_string()),
            deal_count: 0,
            links: Vec::new(),
        },
    }
}

/// Executes one attempt of a target
async fn run_attempt(
    context: Arc<CrawlContext>,
    mut target: CrawlTarget,
    origin: String,
    permit: OwnedSemaphorePermit,
) -> AttemptResult {
    let request = context.identity.prepare(&target);
    RunCounters::bump(&context.counters.requests);
    tracing::debug!(
        "Fetching {} ({}, attempt {}, proxy: {})",
        target.url,
        target.kind,
        target.retry_count() + 1,
        request
            .identity
            .proxy
            .as_ref()
            .map(|p| p.masked())
            .unwrap_or_else(|| "none".to_string())
    );

    let outcome = context.fetcher.fetch(&request).await;
    drop(permit);

    let action = match outcome.status {
        FetchStatus::Http(code) => {
            context
                .identity
                .on_response(&request, code, &context.policy, &target.retry)
        }
        FetchStatus::Network(kind) => {
            context
                .identity
                .on_exception(&request, kind, &context.policy, &target.retry)
        }
    };
    target.retry.record(&outcome.status, &action);
    target.last_identity = Some(request.identity);

    let mut deal_count = 0;
    let mut links = Vec::new();

    if action == RetryAction::Proceed {
        let extractor = Arc::clone(&context.extractor);
        let url = target.url.clone();
        let body = outcome.body.unwrap_or_default();

        match tokio::task::spawn_blocking(move || extractor.extract(&url, &body)).await {
            Ok(extraction) => {
                deal_count = extraction.deal_count();
                links = extraction.links;
                let report = context.sink.ingest(extraction.records).await;
                tracing::trace!("Ingestion for {}: {:?}", target.url, report);
            }
            Err(e) => tracing::error!("Extraction of {} failed: {}", target.url, e),
        }
    }

    AttemptResult {
        target,
        origin,
        status: outcome.status,
        elapsed: outcome.elapsed,
        action,
        error: outcome.error,
        deal_count,
        links,
    }
}

/// Maps an attempt's status onto the adaptive throttle
fn throttle_signal(status: &FetchStatus) -> ThrottleSignal {
    match status {
        status if status.is_success() => ThrottleSignal::Clean,
        FetchStatus::Http(400 | 404 | 407) => ThrottleSignal::Neutral,
        FetchStatus::Network(NetworkErrorKind::ProxyAuth) => ThrottleSignal::Neutral,
        _ => ThrottleSignal::Error,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    if let Some(at) = at {
        tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;
    }
}

/// Domain patterns defining the crawl scope
///
/// Falls back to the seed hosts (without `www.`) when none are configured.
pub fn scope_domains(config: &Config) -> Vec<String> {
    if !config.crawler.allowed_domains.is_empty() {
        return config.crawler.allowed_domains.clone();
    }

    let mut domains: Vec<String> = config
        .crawler
        .seeds
        .iter()
        .filter_map(|seed| normalize_url(seed).ok())
        .filter_map(|url| extract_domain(&url))
        .map(|host| host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
        .collect();
    domains.sort();
    domains.dedup();
    domains
}
