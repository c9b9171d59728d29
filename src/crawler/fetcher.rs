//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients, one per proxy endpoint plus a direct one
//! - Sending a prepared request with its browser identity
//! - Classifying transport failures (timeout, connect, proxy auth)
//!
//! The fetcher never retries; every attempt is reported back as a [`FetchOutcome`]
//! and the retry policy decides what happens next.

use crate::crawler::identity::{PreparedRequest, ProxyEndpoint};
use crate::SweepError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{redirect::Policy, Client, Proxy};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Transport-level failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkErrorKind {
    /// The attempt exceeded its timeout
    Timeout,
    /// Connection refused, reset or DNS failure
    Connect,
    /// The proxy rejected our credentials
    ProxyAuth,
    Other,
}

/// Status of a single fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Http(u16),
    Network(NetworkErrorKind),
}

impl FetchStatus {
    /// Returns true for 2xx/3xx answers
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Http(code) if (200..400).contains(code))
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(code) => write!(f, "HTTP {}", code),
            Self::Network(NetworkErrorKind::Timeout) => f.write_str("timeout"),
            Self::Network(NetworkErrorKind::Connect) => f.write_str("connection error"),
            Self::Network(NetworkErrorKind::ProxyAuth) => f.write_str("proxy authentication failure"),
            Self::Network(NetworkErrorKind::Other) => f.write_str("transport error"),
        }
    }
}

/// Result of one fetch attempt, consumed immediately by the retry policy
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: FetchStatus,
    /// Response body, present for HTTP answers whose body could be read
    pub body: Option<String>,
    pub elapsed: Duration,
    /// Error description for transport failures
    pub error: Option<String>,
}

impl FetchOutcome {
    pub fn http(code: u16, body: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: FetchStatus::Http(code),
            body: Some(body.into()),
            elapsed,
            error: None,
        }
    }

    pub fn network(kind: NetworkErrorKind, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: FetchStatus::Network(kind),
            body: None,
            elapsed,
            error: Some(error.into()),
        }
    }
}

/// Executes prepared requests
///
/// Implementations must not panic on network failures; every failure is an outcome.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &PreparedRequest) -> FetchOutcome;
}

/// reqwest-based fetcher
///
/// reqwest binds proxies at client construction, so one client is kept per proxy
/// endpoint and built lazily on first use.
pub struct HttpFetcher {
    timeout: Duration,
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
}

impl HttpFetcher {
    /// Creates a fetcher whose attempts time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, SweepError> {
        let direct = client_builder(timeout).no_proxy().build()?;
        Ok(Self {
            timeout,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client, SweepError> {
        let Some(endpoint) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut clients = self
            .proxied
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(client) = clients.get(&endpoint.url) {
            return Ok(client.clone());
        }

        let client = build_proxied_client(self.timeout, endpoint)?;
        clients.insert(endpoint.url.clone(), client.clone());
        Ok(client)
    }

    async fn send(&self, client: &Client, request: &PreparedRequest) -> FetchOutcome {
        let started = Instant::now();

        let response = match client
            .get(request.url.clone())
            .header(USER_AGENT, request.identity.user_agent.as_str())
            .headers(header_map(&request.headers))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let kind = classify_reqwest_error(&e);
                return FetchOutcome::network(kind, error_chain(&e), started.elapsed());
            }
        };

        let status = response.status().as_u16();

        match response.text().await {
            Ok(body) => FetchOutcome::http(status, body, started.elapsed()),
            Err(e) => {
                let kind = classify_reqwest_error(&e);
                FetchOutcome::network(kind, error_chain(&e), started.elapsed())
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &PreparedRequest) -> FetchOutcome {
        let client = match self.client_for(request.identity.proxy.as_ref()) {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("Failed to build proxy client: {}", e);
                return FetchOutcome::network(NetworkErrorKind::Other, e.to_string(), Duration::ZERO);
            }
        };

        match tokio::time::timeout(self.timeout, self.send(&client, request)).await {
            Ok(outcome) => outcome,
            Err(_) => FetchOutcome::network(
                NetworkErrorKind::Timeout,
                format!("request timed out after {:?}", self.timeout),
                self.timeout,
            ),
        }
    }
}

fn client_builder(timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
}

fn build_proxied_client(timeout: Duration, endpoint: &ProxyEndpoint) -> Result<Client, SweepError> {
    let mut proxy = Proxy::all(endpoint.url.as_str()).map_err(|e| SweepError::Proxy {
        proxy: endpoint.masked(),
        message: e.to_string(),
    })?;

    if let (Some(user), Some(pass)) = (&endpoint.username, &endpoint.password) {
        proxy = proxy.basic_auth(user, pass);
    }

    Ok(client_builder(timeout).proxy(proxy).build()?)
}

fn header_map(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::debug!("Skipping invalid header {}: {}", name, value),
        }
    }
    map
}

fn classify_reqwest_error(error: &reqwest::Error) -> NetworkErrorKind {
    classify_error(&error_chain(error), error.is_timeout(), error.is_connect())
}

/// Classifies a transport failure from its message and reqwest's flags
///
/// Proxy authentication failures surface as connect errors whose text mentions 407,
/// so the text is checked first.
pub(crate) fn classify_error(message: &str, is_timeout: bool, is_connect: bool) -> NetworkErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("407") || lower.contains("proxy authentication required") {
        NetworkErrorKind::ProxyAuth
    } else if is_timeout {
        NetworkErrorKind::Timeout
    } else if is_connect {
        NetworkErrorKind::Connect
    } else {
        NetworkErrorKind::Other
    }
}

/// Formats an error together with all of its sources
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_fetcher() {
        assert!(HttpFetcher::new(Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn test_proxied_client_is_cached() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let endpoint = ProxyEndpoint {
            url: "http://10.0.0.1:3128".to_string(),
            username: Some("alice".to_string()),
            password: Some("secret".to_string()),
        };

        fetcher.client_for(Some(&endpoint)).unwrap();
        fetcher.client_for(Some(&endpoint)).unwrap();
        fetcher.client_for(None).unwrap();

        assert_eq!(fetcher.proxied.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_classify_proxy_auth_text() {
        assert_eq!(
            classify_error("error trying to connect: 407 Proxy Authentication Required", false, true),
            NetworkErrorKind::ProxyAuth
        );
        assert_eq!(
            classify_error("proxy authentication required", false, false),
            NetworkErrorKind::ProxyAuth
        );
    }

    #[test]
    fn test_classify_flags() {
        assert_eq!(
            classify_error("operation timed out", true, false),
            NetworkErrorKind::Timeout
        );
        assert_eq!(
            classify_error("connection refused", false, true),
            NetworkErrorKind::Connect
        );
        assert_eq!(
            classify_error("body decode failed", false, false),
            NetworkErrorKind::Other
        );
    }

    #[test]
    fn test_success_statuses() {
        assert!(FetchStatus::Http(200).is_success());
        assert!(FetchStatus::Http(304).is_success());
        assert!(!FetchStatus::Http(404).is_success());
        assert!(!FetchStatus::Network(NetworkErrorKind::Timeout).is_success());
    }

    #[test]
    fn test_header_map_skips_invalid() {
        let map = header_map(&[
            ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
            ("Bad Header".to_string(), "x".to_string()),
        ]);
        assert_eq!(map.len(), 1);
        assert_eq!(map["accept-language"], "en-US,en;q=0.9");
    }
}
