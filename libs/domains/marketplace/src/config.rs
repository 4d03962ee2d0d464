//! Engine configuration loaded from `MARKETPLACE_*` environment variables.

use chrono::Duration;
use core_config::{env_or_default, env_parse, ConfigError, FromEnv};

use crate::pricing::PricingPolicy;
use crate::tier_gate::TierGatePolicy;

/// Which payment gateway implementation the process runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentGatewayKind {
    #[default]
    Fake,
    Stripe,
}

impl std::str::FromStr for PaymentGatewayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fake" | "test" => Ok(PaymentGatewayKind::Fake),
            "stripe" => Ok(PaymentGatewayKind::Stripe),
            other => Err(format!("unknown payment gateway '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    pub claim_window_minutes: i64,
    pub bid_window_minutes: i64,
    pub pricing: PricingPolicy,
    pub tiers: TierGatePolicy,
    pub gateway: PaymentGatewayKind,
    pub gateway_timeout_ms: u64,
    pub queue_limit: usize,
    /// Percentage of users (0-100) that see bidding mode
    pub bidding_rollout_percent: u8,
    /// Percentage of users (0-100) whose prices use the difficulty multiplier
    pub dynamic_pricing_rollout_percent: u8,
}

impl MarketplaceConfig {
    pub fn claim_window(&self) -> Duration {
        Duration::minutes(self.claim_window_minutes)
    }

    pub fn bid_window(&self) -> Duration {
        Duration::minutes(self.bid_window_minutes)
    }

    pub fn gateway_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.gateway_timeout_ms)
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            claim_window_minutes: 120,
            bid_window_minutes: 120,
            pricing: PricingPolicy::default(),
            tiers: TierGatePolicy::default(),
            gateway: PaymentGatewayKind::Fake,
            gateway_timeout_ms: 10_000,
            queue_limit: 50,
            bidding_rollout_percent: 100,
            dynamic_pricing_rollout_percent: 100,
        }
    }
}

impl FromEnv for MarketplaceConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let gateway = env_or_default("PAYMENT_GATEWAY", "fake")
            .parse()
            .map_err(|details| ConfigError::ParseError {
                key: "PAYMENT_GATEWAY".to_string(),
                details,
            })?;

        Ok(Self {
            claim_window_minutes: env_parse(
                "MARKETPLACE_CLAIM_WINDOW_MINUTES",
                defaults.claim_window_minutes,
            )?,
            bid_window_minutes: env_parse(
                "MARKETPLACE_BID_WINDOW_MINUTES",
                defaults.bid_window_minutes,
            )?,
            pricing: PricingPolicy {
                platform_fee_bps: env_parse(
                    "MARKETPLACE_PLATFORM_FEE_BPS",
                    defaults.pricing.platform_fee_bps,
                )?,
                base_price_cents: env_parse(
                    "MARKETPLACE_BASE_PRICE_CENTS",
                    defaults.pricing.base_price_cents,
                )?,
                min_price_cents: env_parse(
                    "MARKETPLACE_MIN_PRICE_CENTS",
                    defaults.pricing.min_price_cents,
                )?,
                max_price_cents: env_parse(
                    "MARKETPLACE_MAX_PRICE_CENTS",
                    defaults.pricing.max_price_cents,
                )?,
                first_question_free: env_parse(
                    "MARKETPLACE_FIRST_QUESTION_FREE",
                    defaults.pricing.first_question_free,
                )?,
            },
            tiers: TierGatePolicy {
                tier2_at: env_parse("MARKETPLACE_TIER2_AT", defaults.tiers.tier2_at)?,
                tier3_at: env_parse("MARKETPLACE_TIER3_AT", defaults.tiers.tier3_at)?,
                tier2_cost_cents: env_parse(
                    "MARKETPLACE_TIER2_COST_CENTS",
                    defaults.tiers.tier2_cost_cents,
                )?,
                tier3_cost_cents: env_parse(
                    "MARKETPLACE_TIER3_COST_CENTS",
                    defaults.tiers.tier3_cost_cents,
                )?,
            },
            gateway,
            gateway_timeout_ms: env_parse(
                "MARKETPLACE_GATEWAY_TIMEOUT_MS",
                defaults.gateway_timeout_ms,
            )?,
            queue_limit: env_parse("MARKETPLACE_QUEUE_LIMIT", defaults.queue_limit)?,
            bidding_rollout_percent: env_parse(
                "MARKETPLACE_BIDDING_ROLLOUT_PERCENT",
                defaults.bidding_rollout_percent,
            )?,
            dynamic_pricing_rollout_percent: env_parse(
                "MARKETPLACE_DYNAMIC_PRICING_ROLLOUT_PERCENT",
                defaults.dynamic_pricing_rollout_percent,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        temp_env::with_vars_unset(
            [
                "MARKETPLACE_CLAIM_WINDOW_MINUTES",
                "MARKETPLACE_PLATFORM_FEE_BPS",
                "PAYMENT_GATEWAY",
            ],
            || {
                let config = MarketplaceConfig::from_env().unwrap();
                assert_eq!(config.claim_window_minutes, 120);
                assert_eq!(config.pricing.platform_fee_bps, 2000);
                assert_eq!(config.gateway, PaymentGatewayKind::Fake);
                assert_eq!(config.tiers.tier2_at, 3);
                assert_eq!(config.tiers.tier3_at, 6);
            },
        );
    }

    #[test]
    fn test_overrides_from_env() {
        temp_env::with_vars(
            [
                ("MARKETPLACE_CLAIM_WINDOW_MINUTES", Some("30")),
                ("MARKETPLACE_TIER2_AT", Some("4")),
                ("PAYMENT_GATEWAY", Some("Stripe")),
            ],
            || {
                let config = MarketplaceConfig::from_env().unwrap();
                assert_eq!(config.claim_window(), Duration::minutes(30));
                assert_eq!(config.tiers.tier2_at, 4);
                assert_eq!(config.gateway, PaymentGatewayKind::Stripe);
            },
        );
    }

    #[test]
    fn test_invalid_values_are_reported_with_key() {
        temp_env::with_var("MARKETPLACE_QUEUE_LIMIT", Some("lots"), || {
            let err = MarketplaceConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("MARKETPLACE_QUEUE_LIMIT"));
        });

        temp_env::with_var("PAYMENT_GATEWAY", Some("paypal"), || {
            let err = MarketplaceConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("PAYMENT_GATEWAY"));
        });
    }
}
