//! Default extraction adapter
//!
//! Turns a fetched page into candidate records and discovered links:
//! - JSON-LD `Offer`/`Product` objects become deals with image and category children
//! - Elements carrying `data-deal-id` with a link become deals
//! - `/c<id>/...` links are category discoveries, `/s<id>/...` links store discoveries
//! - Anchors inside `.related`, `.related-deals` or `.similar` are related items
//! - Anchors carrying the pagination parameter are pagination links
//! - `<loc>` entries of XML sitemaps are sitemap discoveries
//!
//! Excluded: off-scope hosts, `javascript:`, `mailto:`, `tel:`, `data:`, fragment-only
//! links and static assets.

use crate::records::{CandidateRecord, DealRecord, DiscoveredLink};
use crate::url::{canonical_key, has_page_param, is_in_scope, normalize_url};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

const STATIC_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico", ".css", ".js", ".pdf", ".zip",
    ".woff", ".woff2", ".ttf", ".mp4",
];

const RELATED_SELECTOR: &str = ".related a[href], .related-deals a[href], .similar a[href]";

/// Output of one extraction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub records: Vec<CandidateRecord>,
    pub links: Vec<DiscoveredLink>,
}

impl Extraction {
    /// Number of deal records, the unit that decides whether a listing page was empty
    pub fn deal_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_deal()).count()
    }
}

/// Extraction adapter contract
///
/// Must be pure with respect to crawl state: it only reads the page.
pub trait Extractor: Send + Sync {
    fn extract(&self, url: &Url, body: &str) -> Extraction;
}

/// HTML/JSON-LD/sitemap extractor for deal listing sites
#[derive(Debug, Clone)]
pub struct HtmlExtractor {
    allowed_domains: Vec<String>,
    page_param: String,
}

impl HtmlExtractor {
    /// Creates an extractor
    ///
    /// # Arguments
    ///
    /// * `allowed_domains` - Domain patterns discovered links must match
    /// * `page_param` - Name of the pagination query parameter
    pub fn new(allowed_domains: Vec<String>, page_param: impl Into<String>) -> Self {
        Self {
            allowed_domains,
            page_param: page_param.into(),
        }
    }

    fn extract_sitemap(&self, body: &str) -> Extraction {
        let document = Html::parse_document(body);
        let mut links = Vec::new();

        if let Some(loc) = selector("loc") {
            for element in document.select(&loc) {
                let text = element.text().collect::<String>();
                if let Some(url) = self.in_scope(text.trim()) {
                    links.push(DiscoveredLink::Sitemap(url));
                }
            }
        }

        tracing::debug!("Sitemap yielded {} entries", links.len());
        Extraction {
            records: Vec::new(),
            links,
        }
    }

    fn extract_html(&self, page: &Url, body: &str) -> Extraction {
        let document = Html::parse_document(body);
        let mut records = Vec::new();
        let mut deal_keys = HashSet::new();

        let found = json_ld_deals(&document, page)
            .into_iter()
            .chain(card_deals(&document, page));
        for (deal, children) in found {
            if push_deal(deal, &mut records, &mut deal_keys) {
                records.extend(children);
            }
        }

        let links = self.discover_links(&document, page);

        // A detail page records its related deals as child rows
        let page_key = canonical_key(page);
        if deal_keys.contains(&page_key) {
            for link in &links {
                if let DiscoveredLink::Related(related) = link {
                    records.push(CandidateRecord::Related {
                        deal_url: page.to_string(),
                        related_url: related.to_string(),
                    });
                }
            }
        }

        Extraction { records, links }
    }

    fn discover_links(&self, document: &Html, page: &Url) -> Vec<DiscoveredLink> {
        let mut links = Vec::new();
        let mut seen = HashSet::new();

        if let Some(related) = selector(RELATED_SELECTOR) {
            for element in document.select(&related) {
                if let Some(url) = self.resolve(element, page) {
                    if seen.insert(canonical_key(&url)) {
                        links.push(DiscoveredLink::Related(url));
                    }
                }
            }
        }

        let Some(anchors) = selector("a[href]") else {
            return links;
        };

        for element in document.select(&anchors) {
            let Some(url) = self.resolve(element, page) else {
                continue;
            };
            if !seen.insert(canonical_key(&url)) {
                continue;
            }

            let link = match first_segment_kind(&url) {
                Some('c') => DiscoveredLink::Category(url),
                Some('s') => DiscoveredLink::Store(url),
                _ if has_page_param(&url, &self.page_param) => DiscoveredLink::Pagination(url),
                _ => continue,
            };
            links.push(link);
        }

        links
    }

    fn resolve(&self, element: ElementRef<'_>, page: &Url) -> Option<Url> {
        if element.value().attr("download").is_some() {
            return None;
        }
        let href = element.value().attr("href")?;
        let absolute = resolve_href(href, page)?;
        self.in_scope(absolute.as_str())
    }

    fn in_scope(&self, raw: &str) -> Option<Url> {
        let url = normalize_url(raw).ok()?;
        if is_static_asset(&url) || !is_in_scope(&url, &self.allowed_domains) {
            return None;
        }
        Some(url)
    }
}

impl Extractor for HtmlExtractor {
    fn extract(&self, url: &Url, body: &str) -> Extraction {
        if looks_like_sitemap(body) {
            self.extract_sitemap(body)
        } else {
            self.extract_html(url, body)
        }
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Adds a deal unless the page already produced one with the same key
fn push_deal(deal: DealRecord, records: &mut Vec<CandidateRecord>, keys: &mut HashSet<String>) -> bool {
    let Ok(url) = normalize_url(&deal.url) else {
        return false;
    };
    if !keys.insert(canonical_key(&url)) {
        return false;
    }
    records.push(CandidateRecord::Deal(deal));
    true
}

fn looks_like_sitemap(body: &str) -> bool {
    let head: String = body.chars().take(512).collect();
    head.contains("<urlset") || head.contains("<sitemapindex")
}

/// Resolves an href against the page, rejecting non-navigational schemes
fn resolve_href(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let url = base.join(href).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url),
        _ => None,
    }
}

fn is_static_asset(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Returns 'c' or 's' when the first path segment is `c<digits>` or `s<digits>`
fn first_segment_kind(url: &Url) -> Option<char> {
    let segment = url.path_segments()?.next()?;
    let mut chars = segment.chars();
    let prefix = chars.next()?;
    let rest = chars.as_str();
    if matches!(prefix, 'c' | 's') && !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
    {
        Some(prefix)
    } else {
        None
    }
}

fn json_ld_deals(document: &Html, page: &Url) -> Vec<(DealRecord, Vec<CandidateRecord>)> {
    let Some(scripts) = selector(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };

    let mut deals = Vec::new();
    for script in document.select(&scripts) {
        let text = script.text().collect::<String>();
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => collect_offers(&value, page, &mut deals),
            Err(e) => tracing::trace!("Skipping malformed JSON-LD on {}: {}", page, e),
        }
    }
    deals
}

fn collect_offers(value: &Value, page: &Url, out: &mut Vec<(DealRecord, Vec<CandidateRecord>)>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_offers(item, page, out);
            }
        }
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                collect_offers(graph, page, out);
            }
            if let Some(list) = map.get("itemListElement") {
                collect_offers(list, page, out);
            }
            if let Some(item) = map.get("item") {
                collect_offers(item, page, out);
            }
            if has_type(value, &["Offer", "Product"]) {
                if let Some(deal) = deal_from_json(value, page) {
                    out.push(deal);
                }
            }
        }
        _ => {}
    }
}

fn has_type(value: &Value, wanted: &[&str]) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => wanted.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| wanted.contains(&t)),
        _ => false,
    }
}

fn json_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(map) => return json_text(map.get("name")),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn deal_from_json(value: &Value, page: &Url) -> Option<(DealRecord, Vec<CandidateRecord>)> {
    let offer = value.get("offers").map(|o| match o {
        Value::Array(items) => items.first().unwrap_or(o),
        _ => o,
    });

    let raw_url = json_text(value.get("url")).or_else(|| json_text(offer?.get("url")))?;
    let url = page.join(&raw_url).ok()?;
    let title = json_text(value.get("name"))?;

    let deal_url = url.to_string();
    let deal = DealRecord {
        url: deal_url.clone(),
        deal_id: json_text(value.get("sku"))
            .or_else(|| json_text(value.get("productID")))
            .or_else(|| json_text(value.get("@id"))),
        title,
        price: json_text(value.get("price")).or_else(|| json_text(offer?.get("price"))),
        store: json_text(value.get("seller")).or_else(|| json_text(offer?.get("seller"))),
        category: json_text(value.get("category")),
        brand: json_text(value.get("brand")),
        condition: json_text(value.get("itemCondition"))
            .map(|c| c.rsplit('/').next().unwrap_or_default().to_string()),
        description: json_text(value.get("description")),
        deal_link: offer.and_then(|o| json_text(o.get("url"))).filter(|u| *u != raw_url),
        published: json_text(value.get("datePublished"))
            .or_else(|| json_text(value.get("validFrom"))),
        ..Default::default()
    };

    let mut children = Vec::new();
    let images = match value.get("image") {
        Some(Value::Array(items)) => items.iter().filter_map(|i| json_text(Some(i))).collect(),
        other => json_text(other).into_iter().collect::<Vec<_>>(),
    };
    for image in images {
        children.push(CandidateRecord::Image {
            deal_url: deal_url.clone(),
            image_url: image,
        });
    }
    if let Some(name) = &deal.category {
        children.push(CandidateRecord::Category {
            deal_url: deal_url.clone(),
            name: name.clone(),
            url: None,
        });
    }

    Some((deal, children))
}

fn element_text(element: ElementRef<'_>, css: &str) -> Option<String> {
    let sel = selector(css)?;
    element
        .select(&sel)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn card_deals(document: &Html, page: &Url) -> Vec<(DealRecord, Vec<CandidateRecord>)> {
    let (Some(cards), Some(anchor)) = (selector("[data-deal-id]"), selector("a[href]")) else {
        return Vec::new();
    };

    let mut deals = Vec::new();
    for card in document.select(&cards) {
        let link = card
            .value()
            .attr("href")
            .or_else(|| card.select(&anchor).next()?.value().attr("href"));
        let Some(url) = link.and_then(|href| resolve_href(href, page)) else {
            continue;
        };

        let title = card
            .value()
            .attr("data-title")
            .map(str::to_string)
            .or_else(|| element_text(card, ".title, h2, h3"))
            .or_else(|| element_text(card, "a[href]"));
        let Some(title) = title else {
            continue;
        };

        let deal_url = url.to_string();
        let deal = DealRecord {
            url: deal_url.clone(),
            deal_id: card.value().attr("data-deal-id").map(str::to_string),
            title,
            price: element_text(card, ".price"),
            promo: element_text(card, ".promo, .promotion"),
            store: element_text(card, ".store"),
            category: element_text(card, ".category"),
            description: element_text(card, ".deal-description, .deal-summary"),
            published: element_text(card, ".published, .date"),
            staff_pick: selector(".staff-pick, .featured")
                .map(|sel| card.select(&sel).next().is_some())
                .unwrap_or(false),
            ..Default::default()
        };

        let mut children = Vec::new();
        if let Some(img) = selector("img[src]") {
            for image in card.select(&img) {
                if let Some(src) = image.value().attr("src").and_then(|s| resolve_href(s, page)) {
                    children.push(CandidateRecord::Image {
                        deal_url: deal_url.clone(),
                        image_url: src.to_string(),
                    });
                }
            }
        }
        if let Some(name) = &deal.category {
            children.push(CandidateRecord::Category {
                deal_url: deal_url.clone(),
                name: name.clone(),
                url: None,
            });
        }

        deals.push((deal, children));
    }
    deals
}
