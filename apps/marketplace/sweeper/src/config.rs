//! Configuration for the marketplace sweeper

use core_config::database::DatabaseConfig;
use core_config::{env_parse, FromEnv};
use domain_marketplace::MarketplaceConfig;
use eyre::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub marketplace: MarketplaceConfig,
    /// Apply pending migrations before running any command
    pub run_migrations: bool,
    /// Connection attempts before giving up at startup
    pub connect_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            marketplace: MarketplaceConfig::from_env()?,
            run_migrations: env_parse("SWEEPER_RUN_MIGRATIONS", false)?,
            connect_attempts: env_parse("SWEEPER_CONNECT_ATTEMPTS", 5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        temp_env::with_vars(
            [
                ("DATABASE_URL", Some("postgres://localhost/marketplace")),
                ("SWEEPER_RUN_MIGRATIONS", None),
                ("SWEEPER_CONNECT_ATTEMPTS", None),
                ("PAYMENT_GATEWAY", None),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.database.url, "postgres://localhost/marketplace");
                assert!(!config.run_migrations);
                assert_eq!(config.connect_attempts, 5);
            },
        );
    }

    #[test]
    fn test_config_requires_database_url() {
        temp_env::with_var_unset("DATABASE_URL", || {
            let err = Config::from_env().unwrap_err();
            assert!(err.to_string().contains("DATABASE_URL"));
        });
    }

    #[test]
    fn test_config_rejects_bad_flag() {
        temp_env::with_vars(
            [
                ("DATABASE_URL", Some("postgres://localhost/marketplace")),
                ("SWEEPER_RUN_MIGRATIONS", Some("sometimes")),
            ],
            || {
                let err = Config::from_env().unwrap_err();
                assert!(err.to_string().contains("SWEEPER_RUN_MIGRATIONS"));
            },
        );
    }
}
