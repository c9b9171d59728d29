use super::normalize::{canonical_key, set_query_pairs};
use url::Url;

/// Returns true if the URL carries the pagination parameter at all
pub fn has_page_param(url: &Url, param: &str) -> bool {
    url.query_pairs().any(|(k, _)| k == param)
}

/// Returns the numeric pagination offset, if present and well-formed
pub fn page_offset(url: &Url, param: &str) -> Option<u64> {
    url.query_pairs()
        .find(|(k, _)| k == param)
        .and_then(|(_, v)| v.trim().parse().ok())
}

/// Returns the key identifying the pagination family of a URL
///
/// All pages of one listing share a family: the canonical key of the URL with the
/// pagination parameter removed.
pub fn family_key(url: &Url, param: &str) -> String {
    canonical_key(&without_param(url, param))
}

/// Builds the URL of the page following `url`
///
/// A URL without the parameter is the first page, so its successor is at offset `stride`.
pub fn next_page_url(url: &Url, param: &str, stride: u64) -> Url {
    let next = page_offset(url, param).unwrap_or(0).saturating_add(stride);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.push((param.to_string(), next.to_string()));
    params.sort();

    let mut next_url = url.clone();
    set_query_pairs(&mut next_url, &params);
    next_url
}

fn without_param(url: &Url, param: &str) -> Url {
    let params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut stripped = url.clone();
    set_query_pairs(&mut stripped, &params);
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_offset_absent_means_first_page() {
        let first = url("https://dealnews.com/c142/Electronics");
        assert!(!has_page_param(&first, "start"));
        assert_eq!(page_offset(&first, "start"), None);
        assert_eq!(
            next_page_url(&first, "start", 20).as_str(),
            "https://dealnews.com/c142/Electronics?start=20"
        );
    }

    #[test]
    fn test_next_page_increments_offset_and_keeps_other_params() {
        let page = url("https://dealnews.com/?sort=time&start=40");
        assert_eq!(page_offset(&page, "start"), Some(40));
        assert_eq!(
            next_page_url(&page, "start", 20).as_str(),
            "https://dealnews.com/?sort=time&start=60"
        );
    }

    #[test]
    fn test_malformed_offset_is_present_but_unparsed() {
        let page = url("https://dealnews.com/?start=abc");
        assert!(has_page_param(&page, "start"));
        assert_eq!(page_offset(&page, "start"), None);
    }

    #[test]
    fn test_family_key_ignores_offset() {
        let a = url("https://www.dealnews.com/c142/Electronics?start=20");
        let b = url("https://dealnews.com/c142/Electronics");
        let c = url("https://dealnews.com/c200/Home?start=20");
        assert_eq!(family_key(&a, "start"), family_key(&b, "start"));
        assert_ne!(family_key(&a, "start"), family_key(&c, "start"));
    }
}
