//! Frontier and discovery engine
//!
//! Four logical queues feed the scheduler, drained in this order:
//! 1. seeds, enqueued once at start
//! 2. pagination continuations, exactly one next page per successful listing page
//! 3. category/store/sitemap discoveries, capped per kind
//! 4. related-item recursion, capped by depth, per-page fan-out and a total visit budget
//!
//! A URL is enqueued at most once per run. Links whose key the dedup gate already knows
//! are refused before they are enqueued.

use crate::config::Config;
use crate::crawler::dedup::DedupGate;
use crate::crawler::target::{CrawlTarget, SourceKind};
use crate::records::DiscoveredLink;
use crate::url::{family_key, has_page_param, next_page_url, normalize_url};
use crate::SweepError;
use std::collections::{HashSet, VecDeque};
use url::Url;

/// Discovery caps and the pagination convention
#[derive(Debug, Clone)]
pub struct FrontierLimits {
    pub max_detail_visits: u64,
    pub max_categories: u64,
    pub max_stores: u64,
    pub max_related_depth: u32,
    pub max_related_fanout: usize,
    pub page_param: String,
    pub stride: u64,
}

impl FrontierLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_detail_visits: config.crawler.max_detail_visits,
            max_categories: config.crawler.max_categories,
            max_stores: config.crawler.max_stores,
            max_related_depth: config.crawler.max_related_depth,
            max_related_fanout: config.crawler.max_related_fanout,
            page_param: config.pagination.parameter.clone(),
            stride: config.pagination.stride,
        }
    }
}

/// Pending crawl targets plus the bookkeeping that bounds discovery
#[derive(Debug)]
pub struct Frontier {
    limits: FrontierLimits,
    seeds: VecDeque<CrawlTarget>,
    pagination: VecDeque<CrawlTarget>,
    discovery: VecDeque<CrawlTarget>,
    related: VecDeque<CrawlTarget>,
    /// Keys ever enqueued this run
    enqueued: HashSet<String>,
    /// Pagination families with a stream already started
    families: HashSet<String>,
    /// Families whose pagination ended (empty page or 400)
    exhausted: HashSet<String>,
    categories: u64,
    stores: u64,
    detail_visits: u64,
}

impl Frontier {
    pub fn new(limits: FrontierLimits) -> Self {
        Self {
            limits,
            seeds: VecDeque::new(),
            pagination: VecDeque::new(),
            discovery: VecDeque::new(),
            related: VecDeque::new(),
            enqueued: HashSet::new(),
            families: HashSet::new(),
            exhausted: HashSet::new(),
            categories: 0,
            stores: 0,
            detail_visits: 0,
        }
    }

    /// Creates a frontier holding the configured seeds
    pub fn from_config(config: &Config) -> Result<Self, SweepError> {
        let mut frontier = Self::new(FrontierLimits::from_config(config));
        for seed in &config.crawler.seeds {
            let url = normalize_url(seed)?;
            frontier.add_seed(url);
        }
        Ok(frontier)
    }

    /// Adds a seed URL; duplicate seeds collapse to one target
    pub fn add_seed(&mut self, url: Url) -> bool {
        let family = family_key(&url, &self.limits.page_param);
        let target = CrawlTarget::new(url, SourceKind::Seed, 0);
        if !self.enqueued.insert(target.key.clone()) {
            return false;
        }
        self.families.insert(family);
        self.seeds.push_back(target);
        true
    }

    /// Takes the next target in priority order
    pub fn pop(&mut self) -> Option<CrawlTarget> {
        self.seeds
            .pop_front()
            .or_else(|| self.pagination.pop_front())
            .or_else(|| self.discovery.pop_front())
            .or_else(|| self.related.pop_front())
    }

    /// Number of queued targets
    pub fn len(&self) -> usize {
        self.seeds.len() + self.pagination.len() + self.discovery.len() + self.related.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Related/sitemap pages admitted so far
    pub fn detail_visits(&self) -> u64 {
        self.detail_visits
    }

    /// Returns true if pagination of the URL's family has ended
    pub fn is_family_exhausted(&self, url: &Url) -> bool {
        self.exhausted
            .contains(&family_key(url, &self.limits.page_param))
    }

    /// Ends pagination for the URL's family (a 400 answer or an empty page)
    pub fn mark_family_exhausted(&mut self, url: &Url) {
        let family = family_key(url, &self.limits.page_param);
        if self.exhausted.insert(family.clone()) {
            tracing::debug!("Pagination ended for {}", family);
        }
    }

    /// Generates the page following a successfully fetched listing page
    ///
    /// # Arguments
    ///
    /// * `target` - The fetched target
    /// * `deal_count` - Deal records extracted from the page
    /// * `gate` - Dedup gate consulted before enqueueing
    ///
    /// # Returns
    ///
    /// `true` if a next page was enqueued. A page that carries the offset parameter
    /// and yielded no deals ends its stream instead.
    pub fn continue_pagination(
        &mut self,
        target: &CrawlTarget,
        deal_count: usize,
        gate: &DedupGate,
    ) -> bool {
        if !target.kind.is_listing() || self.is_family_exhausted(&target.url) {
            return false;
        }

        if deal_count == 0 && has_page_param(&target.url, &self.limits.page_param) {
            self.mark_family_exhausted(&target.url);
            return false;
        }

        let next = next_page_url(&target.url, &self.limits.page_param, self.limits.stride);
        self.admit(CrawlTarget::new(next, SourceKind::Pagination, 0), gate)
    }

    /// Routes links discovered on `parent` into the kind-specific queues
    ///
    /// # Returns
    ///
    /// The number of targets enqueued
    pub fn add_discovered(
        &mut self,
        parent: &CrawlTarget,
        links: Vec<DiscoveredLink>,
        gate: &DedupGate,
    ) -> usize {
        let parent_family = family_key(&parent.url, &self.limits.page_param);
        let mut related_taken = 0;
        let mut added = 0;

        for link in links {
            let accepted = match link {
                DiscoveredLink::Pagination(url) => {
                    let family = family_key(&url, &self.limits.page_param);
                    // The parent's own stream only advances through continue_pagination
                    if family == parent_family || self.families.contains(&family) {
                        false
                    } else {
                        self.admit_listing(url, family, SourceKind::Pagination, gate)
                    }
                }
                DiscoveredLink::Category(url) => {
                    self.add_listing(url, SourceKind::CategoryDiscovery, gate)
                }
                DiscoveredLink::Store(url) => {
                    self.add_listing(url, SourceKind::StoreDiscovery, gate)
                }
                DiscoveredLink::Related(url) => {
                    let depth = parent.depth + 1;
                    if depth > self.limits.max_related_depth
                        || related_taken >= self.limits.max_related_fanout
                    {
                        false
                    } else if self.add_detail(url, SourceKind::RelatedRecursion, depth, gate) {
                        related_taken += 1;
                        true
                    } else {
                        false
                    }
                }
                DiscoveredLink::Sitemap(url) => {
                    self.add_detail(url, SourceKind::Sitemap, 0, gate)
                }
            };

            if accepted {
                added += 1;
            }
        }

        added
    }

    fn add_listing(&mut self, url: Url, kind: SourceKind, gate: &DedupGate) -> bool {
        let family = family_key(&url, &self.limits.page_param);
        if self.families.contains(&family) {
            return false;
        }

        let (count, cap) = match kind {
            SourceKind::StoreDiscovery => (self.stores, self.limits.max_stores),
            _ => (self.categories, self.limits.max_categories),
        };
        if count >= cap {
            tracing::trace!("{} cap reached, skipping {}", kind, url);
            return false;
        }

        if !self.admit_listing(url, family, kind, gate) {
            return false;
        }
        match kind {
            SourceKind::StoreDiscovery => self.stores += 1,
            _ => self.categories += 1,
        }
        true
    }

    fn admit_listing(&mut self, url: Url, family: String, kind: SourceKind, gate: &DedupGate) -> bool {
        if self.admit(CrawlTarget::new(url, kind, 0), gate) {
            self.families.insert(family);
            true
        } else {
            false
        }
    }

    fn add_detail(&mut self, url: Url, kind: SourceKind, depth: u32, gate: &DedupGate) -> bool {
        if self.detail_visits >= self.limits.max_detail_visits {
            tracing::trace!("Detail visit budget used up, skipping {}", url);
            return false;
        }
        if self.admit(CrawlTarget::new(url, kind, depth), gate) {
            self.detail_visits += 1;
            true
        } else {
            false
        }
    }

    /// Enqueues a target unless it was enqueued before or the gate already knows it
    fn admit(&mut self, target: CrawlTarget, gate: &DedupGate) -> bool {
        if gate.is_known_page(&target.key) {
            return false;
        }
        if !target.kind.is_listing() && gate.seen(&target.key) {
            return false;
        }
        if !self.enqueued.insert(target.key.clone()) {
            return false;
        }

        tracing::trace!("Enqueued {} ({}, depth {})", target.url, target.kind, target.depth);
        match target.kind {
            SourceKind::Seed => self.seeds.push_back(target),
            SourceKind::Pagination => self.pagination.push_back(target),
            SourceKind::CategoryDiscovery | SourceKind::StoreDiscovery | SourceKind::Sitemap => {
                self.discovery.push_back(target)
            }
            SourceKind::RelatedRecursion => self.related.push_back(target),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_limits() -> FrontierLimits {
        FrontierLimits {
            max_detail_visits: 3,
            max_categories: 2,
            max_stores: 1,
            max_related_depth: 2,
            max_related_fanout: 2,
            page_param: "start".to_string(),
            stride: 20,
        }
    }

    fn url(s: &str) -> Url {
        normalize_url(s).unwrap()
    }

    fn seeded() -> (Frontier, CrawlTarget) {
        let mut frontier = Frontier::new(create_test_limits());
        frontier.add_seed(url("https://www.dealnews.com/"));
        let seed = frontier.pop().unwrap();
        (frontier, seed)
    }

    #[test]
    fn test_duplicate_seeds_collapse() {
        let mut frontier = Frontier::new(create_test_limits());
        assert!(frontier.add_seed(url("https://www.dealnews.com/")));
        assert!(!frontier.add_seed(url("https://dealnews.com")));
        assert_eq!(frontier.len(), 1);
    }

    #[test]
    fn test_one_next_page_per_response() {
        let (mut frontier, seed) = seeded();
        let gate = DedupGate::new();

        assert!(frontier.continue_pagination(&seed, 5, &gate));
        assert!(!frontier.continue_pagination(&seed, 5, &gate));

        let next = frontier.pop().unwrap();
        assert_eq!(next.kind, SourceKind::Pagination);
        assert_eq!(next.url.as_str(), "https://www.dealnews.com/?start=20");
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_empty_offset_page_ends_stream() {
        let (mut frontier, seed) = seeded();
        let gate = DedupGate::new();
        frontier.continue_pagination(&seed, 5, &gate);
        let page2 = frontier.pop().unwrap();

        assert!(!frontier.continue_pagination(&page2, 0, &gate));
        assert!(frontier.is_empty());
        assert!(frontier.is_family_exhausted(&seed.url));
    }

    #[test]
    fn test_empty_first_page_still_continues() {
        let (mut frontier, seed) = seeded();
        assert!(frontier.continue_pagination(&seed, 0, &DedupGate::new()));
    }

    #[test]
    fn test_bad_request_exhausts_family_but_not_others() {
        let (mut frontier, seed) = seeded();
        let gate = DedupGate::new();
        frontier.mark_family_exhausted(&url("https://www.dealnews.com/?start=400"));
        assert!(!frontier.continue_pagination(&seed, 5, &gate));

        let added = frontier.add_discovered(
            &seed,
            vec![DiscoveredLink::Category(url("https://www.dealnews.com/c142/Electronics"))],
            &gate,
        );
        assert_eq!(added, 1);
        let category = frontier.pop().unwrap();
        assert!(frontier.continue_pagination(&category, 5, &gate));
    }

    #[test]
    fn test_details_never_paginate() {
        let (mut frontier, seed) = seeded();
        let gate = DedupGate::new();
        frontier.add_discovered(
            &seed,
            vec![DiscoveredLink::Related(url("https://www.dealnews.com/deal/1"))],
            &gate,
        );
        let detail = frontier.pop().unwrap();
        assert!(!frontier.continue_pagination(&detail, 3, &gate));
    }

    #[test]
    fn test_own_pagination_links_are_ignored() {
        let (mut frontier, seed) = seeded();
        let gate = DedupGate::new();
        let added = frontier.add_discovered(
            &seed,
            vec![
                DiscoveredLink::Pagination(url("https://www.dealnews.com/?start=20")),
                DiscoveredLink::Pagination(url("https://www.dealnews.com/?start=40")),
                DiscoveredLink::Pagination(url("https://www.dealnews.com/?sort=hot&start=20")),
            ],
            &gate,
        );
        // only the stream of another family is started
        assert_eq!(added, 1);
    }

    #[test]
    fn test_category_and_store_caps() {
        let (mut frontier, seed) = seeded();
        let gate = DedupGate::new();
        let links = vec![
            DiscoveredLink::Category(url("https://www.dealnews.com/c1/A")),
            DiscoveredLink::Category(url("https://www.dealnews.com/c1/A?start=20")),
            DiscoveredLink::Category(url("https://www.dealnews.com/c2/B")),
            DiscoveredLink::Category(url("https://www.dealnews.com/c3/C")),
            DiscoveredLink::Store(url("https://www.dealnews.com/s1/X")),
            DiscoveredLink::Store(url("https://www.dealnews.com/s2/Y")),
        ];
        assert_eq!(frontier.add_discovered(&seed, links, &gate), 3);
    }

    #[test]
    fn test_related_depth_fanout_and_budget() {
        let (mut frontier, seed) = seeded();
        let gate = DedupGate::new();

        let links = (1..=4)
            .map(|i| DiscoveredLink::Related(url(&format!("https://www.dealnews.com/deal/{}", i))))
            .collect();
        assert_eq!(frontier.add_discovered(&seed, links, &gate), 2);

        let first = frontier.pop().unwrap();
        assert_eq!(first.depth, 1);
        let second = frontier.pop().unwrap();

        let deeper = vec![DiscoveredLink::Related(url("https://www.dealnews.com/deal/10"))];
        assert_eq!(frontier.add_discovered(&first, deeper, &gate), 1);
        let depth_two = frontier.pop().unwrap();
        assert_eq!(depth_two.depth, 2);

        // depth limit
        let too_deep = vec![DiscoveredLink::Related(url("https://www.dealnews.com/deal/20"))];
        assert_eq!(frontier.add_discovered(&depth_two, too_deep, &gate), 0);

        // visit budget (3) is used up
        let more = vec![DiscoveredLink::Related(url("https://www.dealnews.com/deal/30"))];
        assert_eq!(frontier.add_discovered(&second, more, &gate), 0);
        assert_eq!(frontier.detail_visits(), 3);
    }

    #[test]
    fn test_gate_refuses_known_urls() {
        let (mut frontier, seed) = seeded();
        let gate = DedupGate::new();
        gate.mark_seen("dealnews.com/deal/1");
        gate.try_claim_page("dealnews.com/c5/Known", false);

        let links = vec![
            DiscoveredLink::Related(url("https://www.dealnews.com/deal/1")),
            DiscoveredLink::Category(url("https://www.dealnews.com/c5/Known")),
            DiscoveredLink::Related(url("https://www.dealnews.com/deal/2")),
        ];
        assert_eq!(frontier.add_discovered(&seed, links, &gate), 1);
    }

    #[test]
    fn test_priority_order() {
        let (mut frontier, seed) = seeded();
        let gate = DedupGate::new();
        frontier.add_discovered(
            &seed,
            vec![
                DiscoveredLink::Related(url("https://www.dealnews.com/deal/1")),
                DiscoveredLink::Category(url("https://www.dealnews.com/c1/A")),
            ],
            &gate,
        );
        frontier.continue_pagination(&seed, 1, &gate);
        frontier.add_seed(url("https://www.dealnews.com/c9/Seeded"));

        let kinds: Vec<SourceKind> = std::iter::from_fn(|| frontier.pop()).map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SourceKind::Seed,
                SourceKind::Pagination,
                SourceKind::CategoryDiscovery,
                SourceKind::RelatedRecursion
            ]
        );
    }
}
