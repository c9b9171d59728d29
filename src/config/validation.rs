use crate::config::types::{
    Config, CrawlerConfig, PaginationConfig, ProxyConfig, RetryConfig, StorageConfig,
    ThrottleConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_pagination_config(&config.pagination)?;
    validate_retry_config(&config.retry)?;
    validate_throttle_config(&config.throttle)?;
    validate_proxy_config(&config.proxy)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_requests < 1 || config.max_concurrent_requests > 256 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_requests must be between 1 and 256, got {}",
            config.max_concurrent_requests
        )));
    }

    if config.max_requests_per_origin < 1
        || config.max_requests_per_origin > config.max_concurrent_requests
    {
        return Err(ConfigError::Validation(format!(
            "max_requests_per_origin must be between 1 and max_concurrent_requests ({}), got {}",
            config.max_concurrent_requests, config.max_requests_per_origin
        )));
    }

    if config.seeds.is_empty() {
        return Err(ConfigError::Validation(
            "at least one seed URL is required".to_string(),
        ));
    }

    for seed in &config.seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use HTTP or HTTPS",
                seed
            )));
        }
    }

    for pattern in &config.allowed_domains {
        validate_domain_pattern(pattern)?;
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.progress_interval == 0 {
        return Err(ConfigError::Validation(
            "progress_interval must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_pagination_config(config: &PaginationConfig) -> Result<(), ConfigError> {
    if config.parameter.trim().is_empty() {
        return Err(ConfigError::Validation(
            "pagination parameter cannot be empty".to_string(),
        ));
    }

    if config.stride == 0 {
        return Err(ConfigError::Validation(
            "pagination stride must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.retry_limit == 0 {
        return Err(ConfigError::Validation(
            "retry_limit must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_throttle_config(config: &ThrottleConfig) -> Result<(), ConfigError> {
    if config.min_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "min_delay_ms ({}) cannot exceed max_delay_ms ({})",
            config.min_delay_ms, config.max_delay_ms
        )));
    }

    if !(config.target_concurrency > 0.0) {
        return Err(ConfigError::Validation(format!(
            "target_concurrency must be positive, got {}",
            config.target_concurrency
        )));
    }

    if config.clean_streak == 0 {
        return Err(ConfigError::Validation(
            "clean_streak must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    for proxy in config.pool.iter().chain(config.gateway.iter()) {
        let url = Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(format!(
                "Proxy '{}' has no host",
                proxy
            )));
        }
    }

    if config.username.is_some() != config.password.is_some() {
        return Err(ConfigError::Validation(
            "proxy username and password must be set together".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.upsert_attempts == 0 {
        return Err(ConfigError::Validation(
            "upsert_attempts must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    match pattern.strip_prefix("*.") {
        Some(domain) => validate_domain_string(domain),
        None => validate_domain_string(pattern),
    }
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if !domain.contains('.') && domain != "localhost" {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}
