//! Gleaner main entry point
//!
//! This is the command-line interface for the Gleaner listings crawler.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use gleaner::challenge::{FileOperatorChannel, OperatorDecision};
use gleaner::config::{load_config_with_hash, Config, QueryEntry};
use gleaner::egress::EgressPool;
use gleaner::output::{
    load_statistics, print_run_report, print_statistics, write_markdown_report, RunReport,
};
use gleaner::storage::{open_storage, ListingStore};
use gleaner::Orchestrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Gleaner: a resilient listings crawler
///
/// Gleaner walks the paginated search results of a listings marketplace,
/// rotating egress points, reacting to challenge pages, and stopping early on
/// queries whose results are already stored.
#[derive(Parser, Debug)]
#[command(name = "gleaner")]
#[command(version = "1.0.0")]
#[command(about = "A resilient listings crawler", long_about = None)]
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

    /// Only run the named queries (repeatable)
    #[arg(long = "query", value_name = "NAME")]
    queries: Vec<String>,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "pending", "resolve", "skip"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "pending", "resolve", "skip"])]
    stats: bool,

    /// List challenges waiting for an operator decision and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "resolve", "skip"])]
    pending: bool,

    /// Mark a pending challenge as solved so its session retries
    #[arg(long, value_name = "KEY", conflicts_with_all = ["dry_run", "stats", "pending", "skip"])]
    resolve: Option<String>,

    /// Tell a pending challenge's session to give up on that target
    #[arg(long, value_name = "KEY", conflicts_with_all = ["dry_run", "stats", "pending", "resolve"])]
    skip: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config, &cli.queries)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.pending {
        handle_pending(&config)?;
    } else if let Some(key) = &cli.resolve {
        handle_decision(&config, key, OperatorDecision::Resolved)?;
    } else if let Some(key) = &cli.skip {
        handle_decision(&config, key, OperatorDecision::Skip)?;
    } else {
        handle_crawl(config, config_hash, &cli.queries).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG` takes precedence over the verbosity flags when set.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("error")
        } else {
            match verbose {
                0 => EnvFilter::new("gleaner=info,warn"),
                1 => EnvFilter::new("gleaner=debug,info"),
                2 => EnvFilter::new("gleaner=trace,debug"),
                _ => EnvFilter::new("trace"),
            }
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Picks the queries to run, in configuration order
fn select_queries(config: &Config, names: &[String]) -> anyhow::Result<Vec<QueryEntry>> {
    if names.is_empty() {
        return Ok(config.queries.clone());
    }

    for name in names {
        if !config.queries.iter().any(|q| &q.name == name) {
            bail!("Unknown query '{}'", name);
        }
    }

    Ok(config
        .queries
        .iter()
        .filter(|q| names.contains(&q.name))
        .cloned()
        .collect())
}

fn operator_channel(config: &Config) -> FileOperatorChannel {
    FileOperatorChannel::new(
        &config.challenge.manual_dir,
        Duration::from_millis(config.challenge.operator_poll_ms),
    )
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, names: &[String]) -> anyhow::Result<()> {
    let queries = select_queries(config, names)?;
    let pool = EgressPool::from_config(&config.egress)?;

    println!("=== Gleaner Dry Run ===\n");

    println!("Source: {}", config.source.id);

    println!("\nSession:");
    println!("  Max pages: {}", config.session.max_pages);
    println!(
        "  Concurrent sessions: {}",
        config.session.max_concurrent_sessions
    );
    println!(
        "  In-flight fetches: {}",
        config.session.max_in_flight_fetches
    );
    println!(
        "  Pacing: {}-{}ms",
        config.session.pacing_min_ms, config.session.pacing_max_ms
    );
    println!(
        "  Duplicate threshold: {} (min sample {}, sample {}, {} page(s))",
        config.session.duplicate_threshold,
        config.session.min_sample_size,
        config.session.sample_size,
        config.session.sample_pages
    );

    println!("\nBackoff:");
    println!(
        "  {}ms base, {}ms cap, x{}",
        config.backoff.base_ms, config.backoff.cap_ms, config.backoff.multiplier
    );
    println!(
        "  {} transient / {} blocked attempts",
        config.backoff.max_transient_attempts, config.backoff.max_blocked_attempts
    );

    println!("\nEgress Pool ({}):", pool.len());
    for point in pool.snapshot() {
        println!("  - {}", point.endpoint.label());
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    if let Some(report) = &config.output.report_path {
        println!("  Report: {}", report);
    }
    println!("  Challenges: {}", config.challenge.manual_dir);

    println!("\nQueries ({}):", queries.len());
    for query in &queries {
        println!("  - {}: {}", query.name, query.url);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would start {} session(s)", queries.len());

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&store)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --pending mode: lists challenges awaiting a decision
fn handle_pending(config: &Config) -> anyhow::Result<()> {
    let channel = operator_channel(config);
    let pending = channel.pending()?;

    if pending.is_empty() {
        println!("No pending challenges in {}", channel.dir().display());
        return Ok(());
    }

    println!("Pending challenges ({}):", pending.len());
    for challenge in &pending {
        println!("  {}  {}", challenge.key, challenge.url);
        println!("      page: {}", challenge.body_path.display());
    }

    Ok(())
}

/// Handles --resolve and --skip: records an operator decision
fn handle_decision(config: &Config, key: &str, decision: OperatorDecision) -> anyhow::Result<()> {
    operator_channel(config)
        .decide(key, decision)
        .with_context(|| format!("Failed to record decision for {}", key))?;

    println!("✓ Challenge {} marked {}", key, decision.as_str());
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: String, names: &[String]) -> anyhow::Result<()> {
    let queries = select_queries(&config, names)?;
    if queries.is_empty() {
        bail!("No queries to run");
    }

    let store: Arc<dyn ListingStore> =
        Arc::new(open_storage(Path::new(&config.output.database_path))?);
    let run_id = store.create_run(&config_hash)?;
    let started_at = Utc::now();

    let source_id = config.source.id.clone();
    let report_path = config.output.report_path.clone();

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping sessions");
            shutdown.cancel();
        }
    });

    tracing::info!(
        "Run {}: {} queries against {}",
        run_id,
        queries.len(),
        source_id
    );

    let orchestrator = match Orchestrator::from_config(config, store.clone(), cancel) {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(e) => {
            store.finish_run(run_id, gleaner::storage::RunStatus::Failed)?;
            return Err(e.into());
        }
    };
    let pool = orchestrator.pool().clone();

    let sessions = orchestrator.run_queries(queries).await;

    let report = RunReport::new(
        Some(run_id),
        &source_id,
        &config_hash,
        started_at,
        sessions,
        pool.stats(),
    );
    store.finish_run(run_id, report.status())?;

    print_run_report(&report);

    if let Some(path) = report_path {
        write_markdown_report(&report, Path::new(&path))?;
        println!("\n✓ Report written to: {}", path);
    }

    Ok(())
}
