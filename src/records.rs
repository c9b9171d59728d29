//! Payloads exchanged between the Extraction Adapter, the Frontier and the Ingestion Sink
//!
//! - [`CandidateRecord`] is what gets persisted; its natural key drives deduplication
//! - [`DiscoveredLink`] is what gets crawled next; its kind drives the Frontier caps

use crate::crawler::SourceKind;
use crate::url::canonical_key_str;
use url::Url;

/// A single deal as extracted from a listing or detail page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DealRecord {
    /// Canonical deal URL (natural key)
    pub url: String,
    /// Site identifier of the deal, when the page exposes one
    pub deal_id: Option<String>,
    pub title: String,
    pub price: Option<String>,
    pub promo: Option<String>,
    pub store: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub condition: Option<String>,
    pub description: Option<String>,
    /// Outbound link to the retailer
    pub deal_link: Option<String>,
    pub published: Option<String>,
    pub staff_pick: bool,
}

/// A record candidate for ingestion
///
/// Child rows reference their deal by URL; their natural key combines the deal URL
/// with the child value.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateRecord {
    Deal(DealRecord),
    Image {
        deal_url: String,
        image_url: String,
    },
    Category {
        deal_url: String,
        name: String,
        url: Option<String>,
    },
    Related {
        deal_url: String,
        related_url: String,
    },
}

impl CandidateRecord {
    /// Returns the natural key used for deduplication
    ///
    /// For deals this is the canonical deal URL, matching what
    /// `Store::load_all_known_urls` yields once passed through `canonical_key_str`.
    pub fn natural_key(&self) -> String {
        match self {
            Self::Deal(deal) => canonical_key_str(&deal.url),
            Self::Image {
                deal_url,
                image_url,
            } => format!("image|{}|{}", canonical_key_str(deal_url), image_url),
            Self::Category { deal_url, name, .. } => {
                format!("category|{}|{}", canonical_key_str(deal_url), name)
            }
            Self::Related {
                deal_url,
                related_url,
            } => format!(
                "related|{}|{}",
                canonical_key_str(deal_url),
                canonical_key_str(related_url)
            ),
        }
    }

    /// Returns true for deal rows, the unit counted against `max-records`
    pub fn is_deal(&self) -> bool {
        matches!(self, Self::Deal(_))
    }

    /// Natural key of the deal a child row belongs to; `None` for deals
    pub fn parent_key(&self) -> Option<String> {
        match self {
            Self::Deal(_) => None,
            Self::Image { deal_url, .. }
            | Self::Category { deal_url, .. }
            | Self::Related { deal_url, .. } => Some(canonical_key_str(deal_url)),
        }
    }

    /// Returns a short label for logging
    pub fn label(&self) -> &'static str {
        match self {
            Self::Deal(_) => "deal",
            Self::Image { .. } => "image",
            Self::Category { .. } => "category",
            Self::Related { .. } => "related",
        }
    }
}

/// A link found on a page, tagged with how the Frontier should treat it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveredLink {
    /// A listing page of the same or another pagination family
    Pagination(Url),
    /// A category listing (`/c<id>/...`)
    Category(Url),
    /// A store listing (`/s<id>/...`)
    Store(Url),
    /// A related deal detail page
    Related(Url),
    /// An entry of an XML sitemap
    Sitemap(Url),
}

impl DiscoveredLink {
    pub fn url(&self) -> &Url {
        match self {
            Self::Pagination(url)
            | Self::Category(url)
            | Self::Store(url)
            | Self::Related(url)
            | Self::Sitemap(url) => url,
        }
    }

    /// Returns the source kind a target created from this link carries
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Pagination(_) => SourceKind::Pagination,
            Self::Category(_) => SourceKind::CategoryDiscovery,
            Self::Store(_) => SourceKind::StoreDiscovery,
            Self::Related(_) => SourceKind::RelatedRecursion,
            Self::Sitemap(_) => SourceKind::Sitemap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deal_natural_key_is_canonical_url() {
        let record = CandidateRecord::Deal(DealRecord {
            url: "https://www.dealnews.com/deal/1/".to_string(),
            title: "TV".to_string(),
            ..Default::default()
        });
        assert_eq!(record.natural_key(), "dealnews.com/deal/1");
        assert!(record.is_deal());
    }

    #[test]
    fn test_child_keys_do_not_collide_with_deals() {
        let image = CandidateRecord::Image {
            deal_url: "https://dealnews.com/deal/1".to_string(),
            image_url: "https://img.dealnews.com/1.jpg".to_string(),
        };
        let related = CandidateRecord::Related {
            deal_url: "https://dealnews.com/deal/1".to_string(),
            related_url: "https://img.dealnews.com/1.jpg".to_string(),
        };
        assert_ne!(image.natural_key(), related.natural_key());
        assert!(!image.is_deal());
    }

    #[test]
    fn test_child_parent_key_matches_deal_key() {
        let deal = CandidateRecord::Deal(DealRecord {
            url: "https://www.dealnews.com/deal/1/".to_string(),
            ..Default::default()
        });
        let category = CandidateRecord::Category {
            deal_url: "https://dealnews.com/deal/1".to_string(),
            name: "TVs".to_string(),
            url: None,
        };
        assert_eq!(deal.parent_key(), None);
        assert_eq!(category.parent_key(), Some(deal.natural_key()));
    }

    #[test]
    fn test_link_kinds() {
        let url = Url::parse("https://dealnews.com/c142/Electronics").unwrap();
        assert_eq!(
            DiscoveredLink::Category(url.clone()).kind(),
            SourceKind::CategoryDiscovery
        );
        assert_eq!(
            DiscoveredLink::Related(url.clone()).kind(),
            SourceKind::RelatedRecursion
        );
        assert_eq!(DiscoveredLink::Sitemap(url.clone()).url(), &url);
    }
}
