use crate::crawler::identity::Identity;
use crate::crawler::retry::RetryState;
use crate::url::canonical_key;
use std::fmt;
use url::Url;

/// How a target entered the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Seed,
    Pagination,
    CategoryDiscovery,
    StoreDiscovery,
    RelatedRecursion,
    Sitemap,
}

impl SourceKind {
    /// Returns true for listing pages, the only pages that continue pagination
    pub fn is_listing(&self) -> bool {
        matches!(
            self,
            Self::Seed | Self::Pagination | Self::CategoryDiscovery | Self::StoreDiscovery
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Pagination => "pagination",
            Self::CategoryDiscovery => "category",
            Self::StoreDiscovery => "store",
            Self::RelatedRecursion => "related",
            Self::Sitemap => "sitemap",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A URL to crawl together with the metadata needed to schedule and bound it
#[derive(Debug, Clone)]
pub struct CrawlTarget {
    /// Normalized URL to fetch
    pub url: Url,

    /// Deduplication key derived from `url`
    pub key: String,

    pub kind: SourceKind,

    /// Related-item recursion depth; 0 for everything else
    pub depth: u32,

    /// Retry bookkeeping, owned by this target only
    pub retry: RetryState,

    /// Identity used by the previous attempt, if any
    pub last_identity: Option<Identity>,
}

impl CrawlTarget {
    /// Creates a target from an already normalized URL
    pub fn new(url: Url, kind: SourceKind, depth: u32) -> Self {
        let key = canonical_key(&url);
        Self {
            url,
            key,
            kind,
            depth,
            retry: RetryState::default(),
            last_identity: None,
        }
    }

    /// Number of retries taken so far
    pub fn retry_count(&self) -> u32 {
        self.retry.retries
    }
}
