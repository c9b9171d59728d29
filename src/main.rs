//! Dealsweep main entry point
//!
//! This is the command-line interface for the dealsweep deal crawler.

use anyhow::Context;
use clap::Parser;
use dealsweep::config::{load_config_with_hash, validate, Config};
use dealsweep::crawler::{scope_domains, Coordinator};
use dealsweep::output::{load_statistics, print_run_report, print_statistics};
use dealsweep::storage::open_storage;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Dealsweep: a resilient deals-site crawler
///
/// Dealsweep walks listing pages, categories, stores and related deals,
/// rotating identities and proxies when the site pushes back, and upserts
/// every deal it finds into a local SQLite database.
#[derive(Parser, Debug)]
#[command(name = "dealsweep")]
#[command(version)]
#[command(about = "A resilient deals-site crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Never route requests through a proxy for this run
    #[arg(long)]
    no_proxy: bool,

    /// Override the deal cap of the run
    #[arg(long, value_name = "N")]
    max_records: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    apply_cli_overrides(&mut config, &cli);
    validate(&config).context("invalid configuration after command-line overrides")?;

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG` wins over the flags when it is set.
fn setup_logging(verbose: u8, quiet: bool) {
    let default = if quiet {
        "error"
    } else {
        match verbose {
            0 => "dealsweep=info,warn",
            1 => "dealsweep=debug,info",
            2 => "dealsweep=trace,debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if cli.no_proxy {
        config.proxy.enabled = false;
    }
    if let Some(max_records) = cli.max_records {
        config.crawler.max_records = max_records;
    }
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== Dealsweep Dry Run ===\n");

    println!("Crawler:");
    println!("  Seeds ({}):", config.crawler.seeds.len());
    for seed in &config.crawler.seeds {
        println!("    * {}", seed);
    }
    println!("  Scope: {}", scope_domains(config).join(", "));
    println!(
        "  Concurrency: {} global, {} per origin",
        config.crawler.max_concurrent_requests, config.crawler.max_requests_per_origin
    );
    println!("  Max records: {}", config.crawler.max_records);
    println!(
        "  Caps: {} categories, {} stores, {} detail visits",
        config.crawler.max_categories, config.crawler.max_stores, config.crawler.max_detail_visits
    );
    println!(
        "  Related: depth {}, fanout {}",
        config.crawler.max_related_depth, config.crawler.max_related_fanout
    );
    if let Some(secs) = config.crawler.max_run_secs {
        println!("  Deadline: {}s", secs);
    }

    println!("\nPagination:");
    println!(
        "  ?{}= stride {}",
        config.pagination.parameter, config.pagination.stride
    );

    println!("\nRetry:");
    println!("  Retry limit: {}", config.retry.retry_limit);
    println!(
        "  403 backoff: {}ms base, {} retries",
        config.retry.forbidden_base_delay_ms, config.retry.forbidden_max_retries
    );

    println!("\nThrottle:");
    println!(
        "  Delay: start {}ms, min {}ms, max {}ms",
        config.throttle.start_delay_ms, config.throttle.min_delay_ms, config.throttle.max_delay_ms
    );

    println!("\nProxy:");
    if !config.proxy.enabled {
        println!("  Disabled");
    } else if !config.proxy.pool.is_empty() {
        println!("  Pool of {} endpoints", config.proxy.pool.len());
    } else if config.proxy.gateway.is_some() {
        println!("  Rotating gateway");
    } else {
        println!("  Enabled but no endpoint configured");
    }

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: String) -> anyhow::Result<()> {
    tracing::info!(
        "Starting crawl: {} seeds, scope {:?}",
        config.crawler.seeds.len(),
        scope_domains(&config)
    );

    let mut coordinator = Coordinator::new(config, config_hash)?;

    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, draining in-flight requests");
            stop.stop();
        }
    });

    let summary = coordinator.run().await.context("crawl failed")?;
    print_run_report(&summary);

    Ok(())
}
