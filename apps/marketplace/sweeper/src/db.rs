//! Database connection with retry

use std::time::Duration;

use core_config::database::DatabaseConfig;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tracing::{info, log::LevelFilter, warn};

const INITIAL_DELAY_MS: u64 = 200;
const MAX_DELAY_MS: u64 = 5_000;

pub fn connect_options(config: &DatabaseConfig) -> ConnectOptions {
    let timeout = Duration::from_secs(config.connect_timeout_secs);
    let mut opt = ConnectOptions::new(&config.url);
    opt.max_connections(config.max_connections)
        .min_connections(1)
        .connect_timeout(timeout)
        .acquire_timeout(timeout)
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Debug);
    opt
}

/// Connect with exponential backoff, giving up after `attempts` tries.
pub async fn connect_with_retry(
    config: &DatabaseConfig,
    attempts: u32,
) -> Result<DatabaseConnection, DbErr> {
    let options = connect_options(config);
    let mut delay = INITIAL_DELAY_MS;
    let mut attempt = 1;

    loop {
        match Database::connect(options.clone()).await {
            Ok(db) => {
                info!(attempt, "Connected to PostgreSQL");
                return Ok(db);
            }
            Err(e) if attempt < attempts.max(1) => {
                warn!(attempt, delay_ms = delay, error = %e, "Database connection failed, retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay = (delay * 2).min(MAX_DELAY_MS);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
