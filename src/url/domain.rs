use url::Url;

/// Extracts the lowercase host of a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use dealsweep::url::extract_domain;
///
/// let url = Url::parse("https://WWW.DealNews.com/c142/Electronics").unwrap();
/// assert_eq!(extract_domain(&url), Some("www.dealnews.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the origin key (`host[:port]`) used for per-origin throttling
pub fn origin_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}
