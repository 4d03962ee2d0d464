//! Schema CLI for the marketplace tables (`up`, `down`, `status`, `fresh`).
//!
//! Reads `DATABASE_URL` the same way the sweeper does.

use migration::Migrator;
use sea_orm_migration::cli;

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}
