//! Crawler module: orchestration and resilience
//!
//! This module contains the core crawling logic, including:
//! - The dedup gate shared by scheduling and ingestion
//! - Identity/proxy rotation and the retry/backoff decision table
//! - The frontier with its discovery caps
//! - Fetch scheduling with an adaptive per-origin throttle
//! - Extraction and ingestion of deal records
//! - Overall crawl coordination

mod context;
mod coordinator;
mod dedup;
mod extract;
mod fetcher;
mod frontier;
mod identity;
mod retry;
mod scheduler;
mod sink;
mod target;

pub use context::{CrawlContext, StopHandle};
pub use coordinator::{scope_domains, Coordinator};
pub use dedup::DedupGate;
pub use extract::{Extraction, Extractor, HtmlExtractor};
pub use fetcher::{FetchOutcome, FetchStatus, Fetcher, HttpFetcher, NetworkErrorKind};
pub use frontier::{Frontier, FrontierLimits};
pub use identity::{
    Identity, PreparedRequest, ProxyEndpoint, RotationManager, DEFAULT_USER_AGENTS,
};
pub use retry::{RetryAction, RetryPolicy, RetryState, SkipReason};
pub use scheduler::Scheduler;
pub use sink::{IngestReport, IngestionSink};
pub use target::{CrawlTarget, SourceKind};

use crate::config::Config;
use crate::state::RunSummary;
use crate::SweepError;

/// Runs a complete crawl with the default store, fetcher and extractor
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `config_hash` - Hash of the configuration file
///
/// # Returns
///
/// * `Ok(RunSummary)` - Final counts of the run
/// * `Err(SweepError)` - Startup failed
pub async fn crawl(config: Config, config_hash: &str) -> Result<RunSummary, SweepError> {
    let mut coordinator = Coordinator::new(config, config_hash)?;
    coordinator.run().await
}
