use crate::UrlError;
use url::Url;

/// Query parameters that only carry tracking or referral data
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
    "iref",
    "cmpid",
];

/// Normalizes a URL into the form the crawler fetches and stores
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Lowercase the host
/// 3. Normalize path:
///    - Remove dot segments (. and ..) and empty segments
///    - Remove trailing slash (except for root /)
/// 4. Remove fragment (everything after #)
/// 5. Remove tracking query parameters
/// 6. Sort remaining query parameters by name
/// 7. Remove empty query string (trailing ?)
///
/// The scheme and any `www.` prefix are kept so the result can be fetched as is;
/// [`canonical_key`] folds those away for deduplication.
///
/// # Examples
///
/// ```
/// use dealsweep::url::normalize_url;
///
/// let url = normalize_url("https://WWW.DEALNEWS.COM/c142/Electronics/?b=2&a=1#top").unwrap();
/// assert_eq!(url.as_str(), "https://www.dealnews.com/c142/Electronics?a=1&b=2");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) => {
            let lowered = host.to_lowercase();
            url.set_host(Some(&lowered))
                .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
        }
        None => return Err(UrlError::MissingDomain),
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        set_query_pairs(&mut url, &params);
    }

    Ok(url)
}

/// Returns the deduplication key of an already normalized URL
///
/// The key drops the scheme and a leading `www.` so that the same page reached over
/// http/https or with/without `www` collapses to one entry.
pub fn canonical_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);

    let mut key = String::with_capacity(url.as_str().len());
    key.push_str(host);
    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    key.push_str(url.path());
    if let Some(query) = url.query() {
        key.push('?');
        key.push_str(query);
    }
    key
}

/// Normalizes a raw URL string and returns its deduplication key
///
/// Strings that cannot be parsed are used verbatim, so stored values from older runs
/// still take part in deduplication.
pub fn canonical_key_str(raw: &str) -> String {
    match normalize_url(raw) {
        Ok(url) => canonical_key(&url),
        Err(_) => raw.trim().to_string(),
    }
}

/// Replaces the query of `url` with the given pairs, dropping it when empty
pub(crate) fn set_query_pairs(url: &mut Url, params: &[(String, String)]) {
    if params.is_empty() {
        url.set_query(None);
        return;
    }

    let mut serializer = url.query_pairs_mut();
    serializer.clear();
    for (k, v) in params {
        serializer.append_pair(k, v);
    }
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", segments.join("/"))
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
