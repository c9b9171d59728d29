//! Configuration module for Dealsweep
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and layering the proxy environment variables of the deployment on top.
//!
//! # Example
//!
//! ```no_run
//! use dealsweep::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawl.toml")).unwrap();
//! println!("Crawler will start from {} seeds", config.crawler.seeds.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, IdentityConfig, PaginationConfig, ProxyConfig, RetryConfig,
    StorageConfig, ThrottleConfig,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, compute_config_hash, load_config, load_config_with_hash,
    parse_proxy_list,
};
pub use validation::validate;
