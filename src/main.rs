//! Onion Crawler main entry point
//!
//! This is the command-line interface for the Tor hidden-service crawler.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use onion_crawler::config::{load_or_default, Config, MAX_THREAD_COUNT};
use onion_crawler::crawler::{run_crawl, CrawlMode, CrawlOptions};
use onion_crawler::output::load_recovery;
use onion_crawler::storage::{RunStatus, SqliteStorage, Storage};
use onion_crawler::CrawlerError;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Onion Crawler: a fair, restartable Tor hidden-service crawler
///
/// URLs are served one per domain per round from a persistent queue, so a
/// crawl can be interrupted with Ctrl-C and restored later exactly where it
/// stopped.
#[derive(Parser, Debug)]
#[command(name = "onion-crawler")]
#[command(version = "1.0.0")]
#[command(about = "A fair, restartable Tor hidden-service crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults are used without one)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new crawl from the seed file, discarding any persisted queue
    Create {
        /// Send the cookies from the cookie file (true or false)
        #[arg(value_name = "USE_COOKIES", action = clap::ArgAction::Set)]
        cookies: bool,

        /// Number of worker threads
        #[arg(value_name = "THREADS", value_parser = clap::value_parser!(u16).range(1..=i64::from(MAX_THREAD_COUNT)))]
        threads: u16,
    },

    /// Continue the persisted crawl
    Restore {
        /// Send the cookies from the cookie file (true or false)
        #[arg(value_name = "USE_COOKIES", action = clap::ArgAction::Set)]
        cookies: bool,
    },

    /// Show the last recorded crawl status and archive counts
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let (config, config_hash) = load_or_default(cli.config.as_deref()).with_context(|| {
        match &cli.config {
            Some(path) => format!("Failed to load configuration from {}", path.display()),
            None => "Default configuration is invalid".to_string(),
        }
    })?;

    match &config_hash {
        Some(hash) => tracing::info!("Configuration loaded successfully (hash: {})", hash),
        None => tracing::info!("No configuration file given, using defaults"),
    }

    match cli.command {
        Command::Create { cookies, threads } => {
            let mode = CrawlMode::Create {
                thread_count: threads,
            };
            handle_crawl(config, mode, cookies, config_hash).await
        }
        Command::Restore { cookies } => {
            handle_crawl(config, CrawlMode::Restore, cookies, config_hash).await
        }
        Command::Status => handle_status(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("onion_crawler=info,warn"),
            1 => EnvFilter::new("onion_crawler=debug,info"),
            2 => EnvFilter::new("onion_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .init();
}

/// Runs a crawl until Ctrl-C or a fatal queue error
async fn handle_crawl(
    config: Config,
    mode: CrawlMode,
    use_cookies: bool,
    config_hash: Option<String>,
) -> anyhow::Result<()> {
    tracing::info!(
        "Queue folder: {}, seeds: {}, proxy: {}",
        config.paths.queue_dir.display(),
        config.paths.seeds_file.display(),
        config.crawler.proxy().unwrap_or("none")
    );

    let options = CrawlOptions {
        mode,
        use_cookies,
        config_hash,
    };

    let status = run_crawl(config, options).await.map_err(|e| match e {
        CrawlerError::RecoveryNotFound(path) => anyhow::anyhow!(
            "Cannot restore: no crawl status at {} (start with `create` first)",
            path.display()
        ),
        other => anyhow::Error::new(other).context("Crawl failed"),
    })?;

    if status == RunStatus::Failed {
        bail!("Crawl stopped after a worker failure; see the log for details");
    }
    Ok(())
}

/// Prints the recovery record and archive counts
fn handle_status(config: &Config) -> anyhow::Result<()> {
    let recovery_path = config.paths.recovery_path();
    match load_recovery(&recovery_path) {
        Ok(record) => {
            println!("Crawl status ({}):", recovery_path.display());
            println!("  Saved at: {}", record.saved_at.to_rfc3339());
            println!("  Thread count: {}", record.thread_count);
            println!("  Pages correctly fetched: {}", record.pages_fetched);
            println!("  Pages with fetch error: {}", record.fetch_errors);
            println!("  Valid URLs discovered: {}", record.urls_discovered);
            println!("  Crawl time: {} min", record.crawl_time_secs / 60);
        }
        Err(CrawlerError::RecoveryNotFound(path)) => {
            println!("No crawl status at {}", path.display());
        }
        Err(e) => return Err(e.into()),
    }

    let database_path = config.paths.database_path();
    if !database_path.exists() {
        println!("\nNo archive at {}", database_path.display());
        return Ok(());
    }

    let storage = SqliteStorage::new(&database_path)
        .with_context(|| format!("Failed to open archive {}", database_path.display()))?;

    println!("\nArchive ({}):", database_path.display());
    println!("  Discovered URLs: {}", storage.count_discovered()?);
    println!("  Pages: {}", storage.count_pages()?);
    println!("  Page links: {}", storage.count_page_links()?);
    println!("  Fetch errors: {}", storage.count_fetch_errors()?);

    if let Some(run) = storage.latest_run()? {
        println!(
            "  Latest run: #{} ({}, {}), started {}",
            run.id, run.mode, run.status, run.started_at
        );
    }

    Ok(())
}
