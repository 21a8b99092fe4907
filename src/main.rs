mod api;
mod config;
mod fallback;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::api::AppState;
use crate::config::AppConfig;
use crate::fallback::FallbackProvider;
use crate::pipeline::Aggregator;
use crate::scraper::{HttpNavigator, PageNavigator};
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "brvm-feed", about = "BRVM market data feed", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the JSON API
    Serve {
        /// Listen address (overrides server.bind_addr)
        #[arg(short, long, env = "BRVM_BIND")]
        bind: Option<String>,
    },

    /// Run one aggregation cycle and print the snapshot as JSON
    Snapshot {
        /// Commodity prices instead of market indices
        #[arg(long)]
        commodities: bool,
    },

    /// Show stored history and recent scrape runs
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Apply schema migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "brvm_market_feed=info,warn",
        1 => "brvm_market_feed=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind_addr.clone());
            let aggregator = build_aggregator(&config);
            let app = api::create_router(Arc::new(AppState::new(Arc::clone(&aggregator))));

            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("Could not bind {}", bind))?;
            info!("Listening on {} ({:?} mode)", bind, config.scraper.mode);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Server error")?;

            aggregator.shutdown().await;
            info!("Shut down cleanly");
        }

        Command::Snapshot { commodities } => {
            let aggregator = build_aggregator(&config);
            let json = if commodities {
                serde_json::to_string_pretty(aggregator.get_commodities().await.as_ref())?
            } else {
                serde_json::to_string_pretty(aggregator.get_snapshot().await.as_ref())?
            };
            aggregator.shutdown().await;
            println!("{}", json);
        }

        Command::History { limit } => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            let last = repo.last_live_capture()?;
            println!("─────────────────────────────────────────────");
            println!("  BRVM feed — stored history");
            println!("─────────────────────────────────────────────");
            println!("  Live values : {}", utils::fmt_count(repo.metric_count()?));
            println!("  Scrape runs : {}", utils::fmt_count(repo.run_count()?));
            println!(
                "  Last live   : {}",
                last.map(|t| t.to_string()).unwrap_or("—".into())
            );
            println!("─────────────────────────────────────────────");
            for run in repo.recent_runs(limit)? {
                println!(
                    "  {}  {:<11} {:<8} live {:>3}  fallback {:>3}",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.kind,
                    run.status,
                    run.live_fields,
                    run.fallback_fields,
                );
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

fn build_aggregator(config: &AppConfig) -> Arc<Aggregator> {
    let history = open_history(config);

    let mut fallback = FallbackProvider::new(config.fallback.clone());
    if let Some(repo) = &history {
        fallback = fallback.with_history(Arc::clone(repo));
    }

    let navigator: Arc<dyn PageNavigator> = Arc::new(HttpNavigator::new(&config.scraper));
    let aggregator = Aggregator::new(config, navigator, Arc::new(fallback));
    Arc::new(match history {
        Some(repo) => aggregator.with_history(repo),
        None => aggregator,
    })
}

/// History is optional: a broken database only costs last-known-good values.
fn open_history(config: &AppConfig) -> Option<Arc<Repository>> {
    if !config.storage.enabled {
        return None;
    }
    let repo = match Repository::open(&config.storage.db_path) {
        Ok(repo) => repo,
        Err(e) => {
            warn!("History disabled: {:#}", e);
            return None;
        }
    };
    if config.storage.run_migrations {
        if let Err(e) = repo.run_migrations() {
            warn!("History disabled: {:#}", e);
            return None;
        }
    }
    Some(Arc::new(repo))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
