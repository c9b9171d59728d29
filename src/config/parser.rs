use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// Proxy settings from the process environment (`DISABLE_PROXY`, `PROXY_LIST`,
/// `PROXY_URL`, `PROXY_USER`, `PROXY_PASS`) override the file before validation.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let mut config: Config = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate(&config)?;

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is stored on every run row so runs made with different settings can be told apart.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Applies proxy-related environment variables on top of a parsed configuration
///
/// `lookup` resolves a variable name to its value; `load_config` passes the process
/// environment, tests pass a map.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(flag) = lookup("DISABLE_PROXY") {
        if matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes") {
            config.proxy.enabled = false;
        }
    }

    if let Some(list) = lookup("PROXY_LIST") {
        let pool = parse_proxy_list(&list);
        if !pool.is_empty() {
            config.proxy.pool = pool;
        }
    }

    if let Some(gateway) = lookup("PROXY_URL").filter(|v| !v.trim().is_empty()) {
        config.proxy.gateway = Some(gateway.trim().to_string());
    }

    if let Some(user) = lookup("PROXY_USER").filter(|v| !v.is_empty()) {
        config.proxy.username = Some(user);
    }

    if let Some(pass) = lookup("PROXY_PASS").filter(|v| !v.is_empty()) {
        config.proxy.password = Some(pass);
    }
}

/// Parses a comma or newline separated proxy list
///
/// Entries without a scheme are assumed to be plain HTTP proxies.
pub fn parse_proxy_list(raw: &str) -> Vec<String> {
    raw.replace('\r', "\n")
        .split(['\n', ','])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            if entry.starts_with("http://") || entry.starts_with("https://") {
                entry.to_string()
            } else {
                format!("http://{}", entry)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID_CONFIG: &str = r#"
[crawler]
seeds = ["https://www.dealnews.com/", "https://www.dealnews.com/c142/Electronics/"]
allowed-domains = ["dealnews.com"]
max-concurrent-requests = 8
max-requests-per-origin = 3

[pagination]
parameter = "start"
stride = 20

[proxy]
gateway = "http://p.webshare.io:80"

[storage]
database-path = "./deals.db"
"#;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID_CONFIG);
        let config: Config = toml::from_str(VALID_CONFIG).unwrap();
        validate(&config).unwrap();

        assert_eq!(config.crawler.seeds.len(), 2);
        assert_eq!(config.crawler.max_requests_per_origin, 3);
        assert_eq!(config.pagination.stride, 20);
        assert_eq!(config.retry.retry_limit, 5);
        assert_eq!(config.retry.forbidden_base_delay_ms, 5_000);
        assert_eq!(config.storage.upsert_attempts, 3);
        assert!(config.proxy.enabled);

        // Loading through the file path applies the same parse
        assert!(compute_config_hash(file.path()).is_ok());
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/crawl.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
[crawler]
seeds = ["https://www.dealnews.com/"]
max-concurrent-requests = 0

[storage]
database-path = "./deals.db"
"#;

        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_disable_proxy_env() {
        let mut config: Config = toml::from_str(VALID_CONFIG).unwrap();
        apply_env_overrides(&mut config, lookup_from(&[("DISABLE_PROXY", "Yes")]));
        assert!(!config.proxy.enabled);
    }

    #[test]
    fn test_disable_proxy_env_false_keeps_proxy() {
        let mut config: Config = toml::from_str(VALID_CONFIG).unwrap();
        apply_env_overrides(&mut config, lookup_from(&[("DISABLE_PROXY", "false")]));
        assert!(config.proxy.enabled);
    }

    #[test]
    fn test_proxy_credentials_from_env() {
        let mut config: Config = toml::from_str(VALID_CONFIG).unwrap();
        apply_env_overrides(
            &mut config,
            lookup_from(&[
                ("PROXY_USER", "alice"),
                ("PROXY_PASS", "secret"),
                ("PROXY_URL", "http://gw.example.net:8080"),
            ]),
        );

        assert_eq!(config.proxy.username.as_deref(), Some("alice"));
        assert_eq!(config.proxy.password.as_deref(), Some("secret"));
        assert_eq!(
            config.proxy.gateway.as_deref(),
            Some("http://gw.example.net:8080")
        );
    }

    #[test]
    fn test_parse_proxy_list() {
        let pool = parse_proxy_list("10.0.0.1:3128,\nhttps://10.0.0.2:443\r\n, ,10.0.0.3:80");
        assert_eq!(
            pool,
            vec![
                "http://10.0.0.1:3128".to_string(),
                "https://10.0.0.2:443".to_string(),
                "http://10.0.0.3:80".to_string(),
            ]
        );
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
