/// Checks if a domain matches a wildcard pattern
///
/// `"dealnews.com"` matches only `dealnews.com` and `www.dealnews.com`;
/// `"*.dealnews.com"` matches the bare domain and any subdomain.
///
/// # Examples
///
/// ```
/// use dealsweep::url::matches_wildcard;
///
/// assert!(matches_wildcard("dealnews.com", "www.dealnews.com"));
/// assert!(!matches_wildcard("dealnews.com", "images.dealnews.com"));
/// assert!(matches_wildcard("*.dealnews.com", "images.dealnews.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base || candidate.ends_with(&format!(".{}", base))
    } else {
        candidate == pattern || candidate.strip_prefix("www.") == Some(pattern)
    }
}

/// Returns true if `host` matches any of the patterns
pub fn matches_any(patterns: &[String], host: &str) -> bool {
    patterns.iter().any(|p| matches_wildcard(p, host))
}
