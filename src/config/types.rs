use serde::Deserialize;

/// Main configuration structure for Dealsweep
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub storage: StorageConfig,
}

/// Crawl scope, caps and concurrency bounds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Ordered list of absolute seed URLs
    pub seeds: Vec<String>,

    /// Domain patterns that discovered links must match (e.g. "dealnews.com", "*.dealnews.com")
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// Global cap on in-flight fetches
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: u32,

    /// Upper bound of the adaptive per-origin concurrency
    #[serde(default = "default_max_requests_per_origin")]
    pub max_requests_per_origin: u32,

    /// Stop the run once this many deals have been ingested
    #[serde(default = "default_max_records")]
    pub max_records: u64,

    /// Total budget of related-item (detail page) fetches
    #[serde(default = "default_max_detail_visits")]
    pub max_detail_visits: u64,

    /// Stop discovering categories after this many
    #[serde(default = "default_max_categories")]
    pub max_categories: u64,

    /// Stop discovering stores after this many
    #[serde(default = "default_max_stores")]
    pub max_stores: u64,

    /// Maximum related-item recursion depth along one branch
    #[serde(default = "default_max_related_depth")]
    pub max_related_depth: u32,

    /// Maximum related links followed from a single page
    #[serde(default = "default_max_related_fanout")]
    pub max_related_fanout: usize,

    /// Per-fetch timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Optional wall-clock deadline for the whole run
    #[serde(default)]
    pub max_run_secs: Option<u64>,

    /// Log a progress line every this many completed fetches
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

/// Pagination convention of the target site
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PaginationConfig {
    /// Query parameter carrying the listing offset
    #[serde(default = "default_pagination_parameter")]
    pub parameter: String,

    /// Offset increment between consecutive pages
    #[serde(default = "default_pagination_stride")]
    pub stride: u64,
}

/// Retry/backoff tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Global cap on retries per target, regardless of cause
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Base delay of the 403 exponential backoff (milliseconds)
    #[serde(default = "default_forbidden_base_delay_ms")]
    pub forbidden_base_delay_ms: u64,

    /// Number of 403 retries before the target is dropped
    #[serde(default = "default_forbidden_max_retries")]
    pub forbidden_max_retries: u32,

    /// Delay before retrying after a transport exception (milliseconds)
    #[serde(default = "default_transport_delay_ms")]
    pub transport_delay_ms: u64,

    /// Delay before retrying after a 429 (milliseconds)
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,

    /// Delay before retrying after a 5xx/408 (milliseconds)
    #[serde(default = "default_server_error_delay_ms")]
    pub server_error_delay_ms: u64,
}

/// Adaptive throttle tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThrottleConfig {
    /// Initial delay between requests to one origin (milliseconds)
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,

    /// Lower bound of the per-origin delay (milliseconds)
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound of the per-origin delay (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Average number of requests the throttle aims to keep in flight per origin
    #[serde(default = "default_target_concurrency")]
    pub target_concurrency: f64,

    /// Clean responses required before the per-origin concurrency grows by one
    #[serde(default = "default_clean_streak")]
    pub clean_streak: u32,
}

/// Browser identity configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IdentityConfig {
    /// User agents to rotate through; the built-in pool is used when empty
    #[serde(default)]
    pub user_agents: Vec<String>,
}

/// Proxy configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyConfig {
    /// Per-run switch; false means no request ever goes through a proxy
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Explicit proxy pool, chosen uniformly per request
    #[serde(default)]
    pub pool: Vec<String>,

    /// Single rotating gateway used when the pool is empty
    #[serde(default)]
    pub gateway: Option<String>,

    /// Proxy username
    #[serde(default)]
    pub username: Option<String>,

    /// Proxy password
    #[serde(default)]
    pub password: Option<String>,
}

/// Persistent store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// Attempts per upsert before the record is dropped
    #[serde(default = "default_upsert_attempts")]
    pub upsert_attempts: u32,

    /// Fixed delay between upsert attempts (milliseconds)
    #[serde(default = "default_upsert_retry_delay_ms")]
    pub upsert_retry_delay_ms: u64,
}

impl ProxyConfig {
    /// Returns true if a proxy endpoint is configured at all
    pub fn has_endpoints(&self) -> bool {
        !self.pool.is_empty() || self.gateway.is_some()
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            parameter: default_pagination_parameter(),
            stride: default_pagination_stride(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            forbidden_base_delay_ms: default_forbidden_base_delay_ms(),
            forbidden_max_retries: default_forbidden_max_retries(),
            transport_delay_ms: default_transport_delay_ms(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            server_error_delay_ms: default_server_error_delay_ms(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            start_delay_ms: default_start_delay_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            target_concurrency: default_target_concurrency(),
            clean_streak: default_clean_streak(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pool: Vec::new(),
            gateway: None,
            username: None,
            password: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_requests() -> u32 {
    8
}

fn default_max_requests_per_origin() -> u32 {
    3
}

fn default_max_records() -> u64 {
    100_000
}

fn default_max_detail_visits() -> u64 {
    5_000
}

fn default_max_categories() -> u64 {
    200
}

fn default_max_stores() -> u64 {
    200
}

fn default_max_related_depth() -> u32 {
    2
}

fn default_max_related_fanout() -> usize {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_progress_interval() -> u64 {
    25
}

fn default_pagination_parameter() -> String {
    "start".to_string()
}

fn default_pagination_stride() -> u64 {
    20
}

fn default_retry_limit() -> u32 {
    5
}

fn default_forbidden_base_delay_ms() -> u64 {
    5_000
}

fn default_forbidden_max_retries() -> u32 {
    3
}

fn default_transport_delay_ms() -> u64 {
    10_000
}

fn default_rate_limit_delay_ms() -> u64 {
    1_000
}

fn default_server_error_delay_ms() -> u64 {
    2_000
}

fn default_start_delay_ms() -> u64 {
    3_000
}

fn default_min_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    20_000
}

fn default_target_concurrency() -> f64 {
    1.0
}

fn default_clean_streak() -> u32 {
    10
}

fn default_upsert_attempts() -> u32 {
    3
}

fn default_upsert_retry_delay_ms() -> u64 {
    2_000
}
