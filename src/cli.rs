//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use crate::config::{Settings, DEFAULT_CONFIG_PATH, SAMPLE_CONFIG};
use crate::models::{Retailer, RunReport, TaskOutcome};
use crate::orchestrator::{LiveAdapterFactory, Orchestrator};
use crate::rate_limit::RateLimiter;
use crate::scrapers::HttpClient;
use crate::storage::{ReviewFilter, ReviewStore};

#[derive(Parser)]
#[command(name = "reviews")]
#[command(about = "Customer review collection for retail product pages")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file and initialize the database
    Init,

    /// Scrape reviews from product pages
    Scrape {
        /// Product URLs (falls back to config targets when empty)
        urls: Vec<String>,
        /// Max pages to walk per product (overrides config)
        #[arg(long)]
        max_pages: Option<u32>,
        /// Retries per page beyond the first attempt (overrides config)
        #[arg(long)]
        max_retries: Option<u32>,
        /// Concurrent sessions (overrides config)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show database statistics
    Status,

    /// Export stored reviews as JSON
    Export {
        /// Output file
        #[arg(short, long, default_value = "exports/reviews.json")]
        output: PathBuf,
        /// Only this retailer (walmart, target, ulta)
        #[arg(long)]
        retailer: Option<String>,
        /// Only reviews at or above this rating
        #[arg(long)]
        min_rating: Option<f64>,
        /// Only verified purchases
        #[arg(long)]
        verified_only: bool,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.database.path = db;
    }

    match cli.command {
        Commands::Init => cmd_init(&settings).await,
        Commands::Scrape {
            urls,
            max_pages,
            max_retries,
            workers,
        } => {
            if let Some(pages) = max_pages {
                settings.scraping.max_pages = pages;
            }
            if let Some(retries) = max_retries {
                settings.scraping.max_retries = retries;
            }
            if let Some(workers) = workers {
                settings.scraping.max_concurrent = workers;
            }
            cmd_scrape(&settings, &urls).await
        }
        Commands::Status => cmd_status(&settings).await,
        Commands::Export {
            output,
            retailer,
            min_rating,
            verified_only,
        } => cmd_export(&settings, &output, retailer, min_rating, verified_only).await,
    }
}

async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    let config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    if config_path.exists() {
        println!(
            "{} Config already exists at {}",
            style("!").yellow(),
            config_path.display()
        );
    } else {
        std::fs::write(&config_path, SAMPLE_CONFIG)?;
        println!(
            "  {} Wrote starter config to {}",
            style("✓").green(),
            config_path.display()
        );
    }

    ReviewStore::open(&settings.database.path)?;
    println!(
        "{} Initialized review database at {}",
        style("✓").green(),
        settings.database.path.display()
    );
    Ok(())
}

async fn cmd_scrape(settings: &Settings, urls: &[String]) -> anyhow::Result<()> {
    let targets = settings.resolve_targets(urls)?;
    let store = ReviewStore::open(&settings.database.path)?;

    let limiter = RateLimiter::new(settings.rate_limit_config());
    let client = HttpClient::new(limiter.clone(), settings.request_timeout())?;
    let orchestrator = Orchestrator::new(
        store,
        limiter,
        Arc::new(LiveAdapterFactory::new(client)),
        settings.session_config(),
        settings.scraping.max_concurrent,
    );

    // Ctrl-C ends the run gracefully; sessions report Cancelled.
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Scraping {} product page(s)...", targets.len()));
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    let report = orchestrator.run(targets).await?;
    spinner.finish_and_clear();

    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    for task in &report.outcomes {
        match &task.outcome {
            TaskOutcome::Succeeded => println!(
                "  {} {} ({} pages, {} reviews)",
                style("✓").green(),
                task.url,
                task.pages_fetched,
                task.reviews_found
            ),
            TaskOutcome::Failed(reason) => {
                println!("  {} {} ({})", style("✗").red(), task.url, reason)
            }
            TaskOutcome::Cancelled => {
                println!("  {} {} (cancelled)", style("-").yellow(), task.url)
            }
        }
    }
    println!(
        "{} {} succeeded, {} failed, {} cancelled in {:.1}s",
        style("Done:").bold(),
        report.succeeded,
        report.failed,
        report.cancelled,
        report.elapsed.as_secs_f64()
    );
    println!(
        "  {} new, {} duplicate, {} rejected",
        style(report.reviews_persisted).green(),
        report.reviews_duplicate,
        report.reviews_rejected
    );
}

async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let store = ReviewStore::open(&settings.database.path)?;
    let stats = store.stats().await?;

    println!("{}", style("Review database").bold());
    println!("  Path:           {}", settings.database.path.display());
    println!("  Total reviews:  {}", stats.total_reviews);
    println!("  Last 24 hours:  {}", stats.recent_reviews_24h);
    println!("  Scrape runs:    {}", stats.total_runs);

    if !stats.by_retailer.is_empty() {
        println!("\n{}", style("By retailer").bold());
        for (retailer, count) in &stats.by_retailer {
            println!("  {retailer:<10} {count}");
        }
    }
    if !stats.by_rating.is_empty() {
        println!("\n{}", style("By rating").bold());
        for (rating, count) in &stats.by_rating {
            println!("  {rating:<4} {count}");
        }
    }

    let products = store.products().await?;
    if !products.is_empty() {
        println!("\n{}", style("Products").bold());
        for (product_id, name, retailer) in &products {
            println!("  {retailer:<8} {product_id:<12} {name}");
        }
    }
    Ok(())
}

async fn cmd_export(
    settings: &Settings,
    output: &std::path::Path,
    retailer: Option<String>,
    min_rating: Option<f64>,
    verified_only: bool,
) -> anyhow::Result<()> {
    let store = ReviewStore::open(&settings.database.path)?;

    let retailer = match retailer {
        Some(name) => Some(
            Retailer::parse(&name)
                .ok_or_else(|| anyhow::anyhow!("unknown retailer: {name}"))?,
        ),
        None => None,
    };

    let filtered = retailer.is_some() || min_rating.is_some() || verified_only;
    let count = if filtered {
        let reviews = store
            .get_reviews(&ReviewFilter {
                retailer,
                min_rating,
                verified_only,
                ..Default::default()
            })
            .await?;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(output)?;
        serde_json::to_writer_pretty(file, &reviews)?;
        reviews.len()
    } else {
        store.export_json(output).await?
    };

    println!(
        "{} Exported {} review(s) to {}",
        style("✓").green(),
        count,
        output.display()
    );
    Ok(())
}
