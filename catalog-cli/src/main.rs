//! Catalog CLI
//!
//! Command-line access to the cached, rate-limited catalog fetch layer.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use catalog_core::CacheCategory;
use catalog_fetch::{FetchClient, FetchConfig, Source};

/// Cache file used when neither the config nor the command line names one.
const DEFAULT_CACHE_FILE: &str = "catalog-cache.json";

/// Catalog - cached, rate-limited access to the catalog API
#[derive(Parser)]
#[command(name = "catalog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML config file (defaults to CATALOG_* environment variables)
    #[arg(short, long, global = true, env = "CATALOG_CONFIG")]
    config: Option<PathBuf>,

    /// Cache file, overriding the config
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a key, serving from the cache when possible
    Get {
        /// Cache key
        key: String,
        /// URL to fetch on a miss
        url: String,
        /// Category whose max age applies
        #[arg(short = 't', long, default_value = "item-detail")]
        category: CacheCategory,
        /// Explicit max age in seconds, overriding the category
        #[arg(long)]
        max_age: Option<u64>,
        /// Use the slower search retry tuning
        #[arg(long)]
        search: bool,
        /// Attempts per request, including the first
        #[arg(long)]
        attempts: Option<u32>,
        /// Print compact JSON
        #[arg(long)]
        compact: bool,
    },

    /// Inspect or maintain the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry counts
    Stats,
    /// List cached keys with their age
    Keys,
    /// Remove one key
    Remove {
        /// Cache key
        key: String,
    },
    /// Remove every cached entry
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "catalog=debug,info"
    } else {
        "catalog=info,warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(cli.config.as_deref(), cli.cache)?;

    match cli.command {
        Commands::Get {
            key,
            url,
            category,
            max_age,
            search,
            attempts,
            compact,
        } => {
            let options = GetOptions {
                category,
                max_age: max_age.map(Duration::from_secs),
                search,
                attempts,
                compact,
            };
            cmd_get(&config, &key, &url, options).await
        }
        Commands::Cache { action } => cmd_cache(&config, action).await,
        Commands::Config => cmd_config(&config),
    }
}

fn load_config(path: Option<&std::path::Path>, cache: Option<PathBuf>) -> Result<FetchConfig> {
    let mut config = match path {
        Some(path) => FetchConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FetchConfig::from_env().context("Invalid CATALOG_* environment")?,
    };

    if let Some(cache) = cache {
        config = config.with_cache_path(cache);
    }
    if config.cache_path.is_none() {
        config = config.with_cache_path(DEFAULT_CACHE_FILE);
    }

    debug!(?config, "Effective configuration");
    Ok(config)
}

struct GetOptions {
    category: CacheCategory,
    max_age: Option<Duration>,
    search: bool,
    attempts: Option<u32>,
    compact: bool,
}

/// Resolve one key
async fn cmd_get(config: &FetchConfig, key: &str, url: &str, options: GetOptions) -> Result<()> {
    let client = FetchClient::from_config(config)
        .await
        .context("Failed to start fetch client")?;

    let mut request = client.request_for(key, url, options.category);
    if let Some(max_age) = options.max_age {
        request.max_age = max_age;
    }
    if options.search {
        request = request.with_tuning(config.search_retry.clone());
    }
    if let Some(attempts) = options.attempts {
        request = request.with_max_attempts(attempts);
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(format!("Resolving {key}..."));
    pb.enable_steady_tick(Duration::from_millis(120));

    let resolved = client.fetch_detailed(request).await;
    pb.finish_and_clear();

    let resolved = resolved.with_context(|| format!("Failed to resolve {key}"))?;

    let label = match resolved.source {
        Source::Fresh => "fresh".green(),
        Source::Network => "network".cyan(),
        Source::Stale => "stale, refreshing".yellow(),
        Source::Offline => "offline".yellow(),
        Source::Fallback => "fallback".red(),
    };
    eprintln!("{} {} ({})", "✅".green(), key.bold(), label);

    let body = if options.compact {
        serde_json::to_string(&resolved.data)?
    } else {
        serde_json::to_string_pretty(&resolved.data)?
    };
    println!("{body}");

    // A stale hit refreshes in the background; give it a chance to land
    // before the process exits.
    if resolved.source == Source::Stale {
        wait_for_refresh(&client).await;
    }

    Ok(())
}

async fn wait_for_refresh(client: &FetchClient) {
    let pb = ProgressBar::new_spinner();
    pb.set_message("Refreshing cache...");
    pb.enable_steady_tick(Duration::from_millis(120));

    while client.in_flight() > 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    pb.finish_and_clear();
}

/// Cache maintenance
async fn cmd_cache(config: &FetchConfig, action: CacheAction) -> Result<()> {
    let client = FetchClient::from_config(config)
        .await
        .context("Failed to open cache")?;
    let cache = client.cache();

    match action {
        CacheAction::Stats => {
            let stats = cache.stats();
            println!("{}", "📦 Cache".cyan().bold());
            if let Some(path) = &config.cache_path {
                println!("   {} {}", "File:".dimmed(), path.display());
            }
            println!("   {} {}", "Entries:".dimmed(), stats.total_entries);
            println!("   {} {}", "Corrupt:".dimmed(), stats.corrupt_entries);
            match stats.capacity {
                Some(capacity) => println!("   {} {}", "Capacity:".dimmed(), capacity),
                None => println!("   {} unbounded", "Capacity:".dimmed()),
            }
        }
        CacheAction::Keys => {
            let now = Utc::now();
            for key in cache.keys() {
                match cache.get(&key) {
                    Some(entry) => println!("{}  {}", key, format_age(entry.age_at(now)).dimmed()),
                    None => println!("{}  {}", key, "corrupt".red()),
                }
            }
        }
        CacheAction::Remove { key } => {
            if client.invalidate(&key).await.context("Failed to update cache")? {
                println!("{} Removed {}", "✅".green(), key.bold());
            } else {
                println!("{} {} was not cached", "⚠️".yellow(), key.bold());
            }
        }
        CacheAction::Clear => {
            let removed = client.clear_cache().await.context("Failed to clear cache")?;
            println!("{} Removed {} entries", "✅".green(), removed);
        }
    }

    Ok(())
}

/// Print the effective configuration
fn cmd_config(config: &FetchConfig) -> Result<()> {
    print!("{}", toml::to_string_pretty(config).context("Failed to render config")?);
    Ok(())
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}
