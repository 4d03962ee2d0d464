//! Marketplace Sweeper
//!
//! Maintenance worker for the Q&A marketplace. Releases expired claims and
//! refunds their charges, retries expert payouts and not-helpful credits left
//! pending after a downstream failure, and refreshes expert reputation. Runs one-shot or on a cron
//! schedule.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::Environment;
use domain_marketplace::{gateway_from_config, MarketplaceService, PgMarketplaceStore};
use eyre::{Result, WrapErr};
use migration::{Migrator, MigratorTrait};
use tracing::info;
use uuid::Uuid;

mod config;
mod db;
mod runner;

use config::Config;
use runner::Sweeper;

#[derive(Parser)]
#[command(name = "marketplace-sweeper")]
#[command(about = "Marketplace maintenance: claim sweeps, payout retries, reputation")]
struct Cli {
    /// Print the Prometheus metrics snapshot after a one-shot command
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Release expired claims once
    Sweep,

    /// Retry pending expert payouts once
    RetryPayouts,

    /// Issue not-helpful credits whose ledger write failed
    RetryCredits,

    /// Sweep, then retry payouts and credits
    Cycle,

    /// Recompute reputation for one expert
    Recalculate {
        /// Expert user ID
        #[arg(short, long)]
        expert: Uuid,
    },

    /// Run as a scheduled service
    Schedule {
        /// Cron expression for the claim sweep (default: every minute)
        #[arg(long, default_value = "0 * * * * *")]
        sweep_cron: String,

        /// Cron expression for payout and credit retries (default: every 15 minutes)
        #[arg(long, default_value = "0 */15 * * * *")]
        payout_cron: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    let environment = Environment::from_env();
    init_tracing(&environment);

    let cli = Cli::parse();
    let config = Config::from_env()?;

    observability::init_metrics().wrap_err("Failed to install metrics recorder")?;

    info!("Connecting to database...");
    let db = db::connect_with_retry(&config.database, config.connect_attempts)
        .await
        .wrap_err("Database connection failed")?;

    if config.run_migrations {
        info!("Running marketplace migrations...");
        Migrator::up(&db, None).await?;
    }

    let gateway = gateway_from_config(&config.marketplace)?;
    info!(gateway = gateway.name(), "Payment gateway selected");

    let store = Arc::new(PgMarketplaceStore::new(db));
    let service = Arc::new(MarketplaceService::new(
        store,
        gateway,
        config.marketplace.clone(),
    ));
    let sweeper = Sweeper::new(service.clone());

    match cli.command {
        Commands::Sweep => {
            let report = sweeper.sweep().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::RetryPayouts => {
            let report = sweeper.retry_payouts().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::RetryCredits => {
            let report = sweeper.retry_credits().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Cycle => {
            let report = sweeper.run_cycle().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Recalculate { expert } => {
            let reputation = service.recalculate_reputation(expert).await?;
            println!("{}", serde_json::to_string_pretty(&reputation)?);
        }

        Commands::Schedule {
            sweep_cron,
            payout_cron,
        } => {
            sweeper.run_scheduled(&sweep_cron, &payout_cron).await?;
        }
    }

    if cli.metrics {
        print!("{}", observability::render_metrics());
    }

    Ok(())
}
