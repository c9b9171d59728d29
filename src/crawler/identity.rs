//! Identity/proxy rotation
//!
//! This module handles:
//! - Choosing a browser user agent and browser-like headers per request
//! - Attaching a proxy from the configured pool or gateway while the proxy is active
//! - The run-wide `Active -> Disabled` proxy transition on authentication failures
//! - Forced rotation to a different user agent and pool entry

use crate::config::{IdentityConfig, ProxyConfig};
use crate::crawler::fetcher::{FetchStatus, NetworkErrorKind};
use crate::crawler::retry::{RetryAction, RetryPolicy, RetryState};
use crate::crawler::target::CrawlTarget;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

/// Built-in desktop and mobile browser user agents
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPad; CPU OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1",
];

const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Upgrade-Insecure-Requests", "1"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Cache-Control", "max-age=0"),
    ("DNT", "1"),
];

const CLIENT_HINT_HEADERS: &[(&str, &str)] = &[
    (
        "Sec-Ch-Ua",
        "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\"",
    ),
    ("Sec-Ch-Ua-Mobile", "?0"),
    ("Sec-Ch-Ua-Platform", "\"Windows\""),
];

/// Share of requests that also carry client hint headers
const CLIENT_HINT_PROBABILITY: f64 = 0.3;

/// A proxy endpoint with optional basic-auth credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Returns the endpoint URL with any credentials replaced for logging
    pub fn masked(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
                let _ = url.set_username("***");
                let _ = url.set_password(None);
                url.to_string()
            }
            Ok(url) => url.to_string(),
            Err(_) => "<invalid proxy>".to_string(),
        }
    }
}

/// The (user agent, proxy) pair attached to one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub proxy: Option<ProxyEndpoint>,
}

/// A request ready to be sent
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: Url,
    pub identity: Identity,
    /// Extra headers besides `User-Agent`
    pub headers: Vec<(String, String)>,
}

/// Assigns identities to requests and owns the run-wide proxy state
///
/// The proxy flag only ever goes from active to disabled; it is read without locking
/// and written with a compare-and-set.
pub struct RotationManager {
    user_agents: Vec<String>,
    proxies: Vec<ProxyEndpoint>,
    proxy_active: AtomicBool,
    /// Set when a proxy that was in use got disabled mid-run
    proxy_revoked: AtomicBool,
}

impl RotationManager {
    /// Creates a manager from the identity and proxy configuration
    ///
    /// The proxy starts active only when it is enabled and an endpoint exists.
    pub fn new(identity: &IdentityConfig, proxy: &ProxyConfig) -> Self {
        let user_agents = if identity.user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect()
        } else {
            identity.user_agents.clone()
        };

        let endpoint = |url: &String| ProxyEndpoint {
            url: url.clone(),
            username: proxy.username.clone(),
            password: proxy.password.clone(),
        };

        let proxies: Vec<ProxyEndpoint> = if !proxy.pool.is_empty() {
            proxy.pool.iter().map(endpoint).collect()
        } else {
            proxy.gateway.iter().map(endpoint).collect()
        };

        let active = proxy.enabled && !proxies.is_empty();
        if active {
            tracing::info!(
                "Proxy active with {} endpoint(s), first: {}",
                proxies.len(),
                proxies[0].masked()
            );
        } else {
            tracing::info!("Proxy disabled for this run; requests go direct");
        }

        Self {
            user_agents,
            proxies,
            proxy_active: AtomicBool::new(active),
            proxy_revoked: AtomicBool::new(false),
        }
    }

    /// Returns true while requests are still sent through a proxy
    pub fn proxy_active(&self) -> bool {
        self.proxy_active.load(Ordering::Acquire)
    }

    /// Returns true if an active proxy was disabled during this run
    ///
    /// A run that never had a proxy reports false.
    pub fn proxy_was_disabled(&self) -> bool {
        self.proxy_revoked.load(Ordering::Acquire)
    }

    /// Disables the proxy for the rest of the run
    ///
    /// Returns true if this call performed the transition.
    pub fn disable_proxy(&self) -> bool {
        let transitioned = self
            .proxy_active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if transitioned {
            self.proxy_revoked.store(true, Ordering::Release);
            tracing::warn!("Proxy authentication failed; proxy disabled for the rest of the run");
        }
        transitioned
    }

    /// Prepares the next attempt of a target
    ///
    /// A target whose retry state asks for rotation gets a user agent and proxy entry
    /// different from its previous attempt. Targets that were answered 403 before also
    /// carry a search-engine referer and a random forwarded-for address.
    pub fn prepare(&self, target: &CrawlTarget) -> PreparedRequest {
        let previous = target
            .last_identity
            .as_ref()
            .filter(|_| target.retry.rotate_identity);

        let mut rng = rand::thread_rng();

        let user_agent = pick_different(
            &self.user_agents,
            previous.map(|p| &p.user_agent),
            &mut rng,
        )
        .cloned()
        .unwrap_or_default();

        let proxy = if self.proxy_active() {
            pick_different(
                &self.proxies,
                previous.and_then(|p| p.proxy.as_ref()),
                &mut rng,
            )
            .cloned()
        } else {
            None
        };

        let mut headers: Vec<(String, String)> = BROWSER_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        if rng.gen_bool(CLIENT_HINT_PROBABILITY) {
            headers.extend(
                CLIENT_HINT_HEADERS
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string())),
            );
        }

        if target.retry.seen_forbidden() {
            headers.push(("Referer".to_string(), "https://www.google.com/".to_string()));
            let forwarded = format!(
                "{}.{}.{}.{}",
                rng.gen_range(1..=255),
                rng.gen_range(1..=255),
                rng.gen_range(1..=255),
                rng.gen_range(1..=255)
            );
            headers.push(("X-Forwarded-For".to_string(), forwarded));
        }

        PreparedRequest {
            url: target.url.clone(),
            identity: Identity { user_agent, proxy },
            headers,
        }
    }

    /// Observes an HTTP answer and returns the retry decision for it
    pub fn on_response(
        &self,
        request: &PreparedRequest,
        status: u16,
        policy: &RetryPolicy,
        state: &RetryState,
    ) -> RetryAction {
        if status == 407 {
            self.on_proxy_auth_failure(request);
        }
        policy.decide(&FetchStatus::Http(status), state)
    }

    /// Observes a transport failure and returns the retry decision for it
    pub fn on_exception(
        &self,
        request: &PreparedRequest,
        kind: NetworkErrorKind,
        policy: &RetryPolicy,
        state: &RetryState,
    ) -> RetryAction {
        if kind == NetworkErrorKind::ProxyAuth {
            self.on_proxy_auth_failure(request);
        }
        policy.decide(&FetchStatus::Network(kind), state)
    }

    fn on_proxy_auth_failure(&self, request: &PreparedRequest) {
        match &request.identity.proxy {
            Some(proxy) => tracing::debug!(
                "Proxy auth failure via {} for {}",
                proxy.masked(),
                request.url
            ),
            None => tracing::debug!("407 without proxy for {}", request.url),
        }
        self.disable_proxy();
    }
}

/// Picks an element uniformly, avoiding `avoid` when there is an alternative
fn pick_different<'a, T: PartialEq, R: Rng>(
    items: &'a [T],
    avoid: Option<&T>,
    rng: &mut R,
) -> Option<&'a T> {
    match avoid {
        Some(avoid) if items.len() > 1 => {
            let candidates: Vec<&T> = items.iter().filter(|item| *item != avoid).collect();
            if candidates.is_empty() {
                items.choose(rng)
            } else {
                candidates.choose(rng).copied()
            }
        }
        _ => items.choose(rng),
    }
}
