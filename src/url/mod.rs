//! URL handling module for Dealsweep
//!
//! This module provides:
//! - URL normalization and the deduplication key derived from it
//! - Domain and origin extraction
//! - Wildcard domain matching for crawl scope
//! - Helpers for the offset-based pagination convention

mod domain;
mod matcher;
mod normalize;
mod pagination;

use url::Url;

pub use domain::{extract_domain, origin_key};
pub use matcher::{matches_any, matches_wildcard};
pub use normalize::{canonical_key, canonical_key_str, normalize_url};
pub use pagination::{family_key, has_page_param, next_page_url, page_offset};

/// Returns true if the URL is an HTTP(S) URL whose host is within the allowed patterns
///
/// # Arguments
///
/// * `url` - A normalized URL
/// * `allowed` - Domain patterns in the `matches_wildcard` syntax
pub fn is_in_scope(url: &Url, allowed: &[String]) -> bool {
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }

    match extract_domain(url) {
        Some(host) => matches_any(allowed, &host),
        None => false,
    }
}
