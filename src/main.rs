//! RxNorm cache builder: file-backed RxNav metadata cache.
//!
//! Single-binary Tokio application that:
//! 1. Enumerates the RxNorm code universe by status category
//! 2. Fetches related concepts, history, NDC and class data concurrently
//! 3. Appends every remote response to an append-only cache file
//! 4. Verifies at the end that the build is reproducible from cache alone

mod config;

use std::time::Instant;

use cache_store::{CacheStore, Mode};
use clap::Parser;
use tracing::{error, info};

use pipeline::CacheBuilder;

/// RxNorm cache builder
#[derive(Parser)]
#[command(name = "rxnorm-cache-builder", about = "File-backed RxNav metadata cache builder")]
struct Cli {
    /// Config file path (defaults to config.toml when present).
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Cache file path (overrides config and RXNORM_CACHE).
    #[arg(long)]
    cache: Option<std::path::PathBuf>,

    /// Worker count per phase (overrides config and RXNORM_WORKERS).
    #[arg(long)]
    workers: Option<usize>,

    /// Load and validate the cache file, print stats, then exit.
    #[arg(long)]
    check_cache: bool,

    /// Run only the status-enumeration phase, then exit.
    #[arg(long)]
    enumerate_only: bool,
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "rxnorm_cache_builder=info,pipeline=info,rxnav_client=info,cache_store=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("RxNorm cache builder starting up...");

    // Load configuration.
    let mut cfg = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(cache) = cli.cache {
        cfg.cache_path = cache;
    }
    if let Some(workers) = cli.workers {
        if workers == 0 {
            error!("--workers must be > 0");
            std::process::exit(1);
        }
        cfg.workers = workers;
    }

    info!("Cache file: {}", cfg.cache_path.display());
    info!(
        "Remote: {} ({} req/s, retry {}x{}s)",
        cfg.base_url,
        cfg.throttle.requests_per_sec,
        cfg.retry.max_attempts,
        cfg.retry.delay_secs,
    );
    info!("Workers per phase: {}", cfg.workers);

    // ── Check-cache mode ─────────────────────────────────────────────
    if cli.check_cache {
        info!("Validating cache file...");
        let mut store = match CacheStore::open(&cfg.cache_path, Mode::ReadOnly) {
            Ok(s) => s,
            Err(e) => {
                error!("Cannot open cache: {}", e);
                std::process::exit(1);
            }
        };
        match store.load_index() {
            Ok(()) => {
                info!(
                    "Cache OK: {} keys in {}",
                    store.len(),
                    cfg.cache_path.display()
                );
            }
            Err(e) => {
                error!("Cache is malformed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let builder = CacheBuilder::new(cfg);
    let started = Instant::now();

    // ── Enumerate-only mode ──────────────────────────────────────────
    if cli.enumerate_only {
        info!("Running status enumeration only...");
        if let Err(e) = builder.run_enumeration_only().await {
            error!("Enumeration failed: {}", e);
            std::process::exit(1);
        }
        info!("Enumeration done in {:.1}s", started.elapsed().as_secs_f64());
        return;
    }

    // ── Full build ───────────────────────────────────────────────────
    match builder.run().await {
        Ok(()) => {
            info!(
                "Cache build complete in {:.1}s",
                started.elapsed().as_secs_f64()
            );
        }
        Err(e) => {
            error!("Cache build failed: {}", e);
            std::process::exit(1);
        }
    }
}
