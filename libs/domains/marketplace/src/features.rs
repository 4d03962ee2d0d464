//! Per-user feature toggles.

use sha2::{Digest, Sha256};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Feature {
    Bidding,
    DynamicPricing,
}

pub trait FeatureToggle: Send + Sync {
    fn is_enabled(&self, feature: Feature, user_id: Uuid) -> bool;
}

/// Percentage rollout with stable per-user buckets.
#[derive(Debug, Clone, Copy)]
pub struct RolloutToggle {
    bidding_percent: u8,
    dynamic_pricing_percent: u8,
}

impl RolloutToggle {
    pub fn new(bidding_percent: u8, dynamic_pricing_percent: u8) -> Self {
        Self {
            bidding_percent: bidding_percent.min(100),
            dynamic_pricing_percent: dynamic_pricing_percent.min(100),
        }
    }

    pub fn all_enabled() -> Self {
        Self::new(100, 100)
    }

    pub fn all_disabled() -> Self {
        Self::new(0, 0)
    }

    /// Bucket in `0..100` derived from `sha256("{feature}:{user_id}")`.
    pub fn bucket(feature: Feature, user_id: Uuid) -> u8 {
        let digest = Sha256::digest(format!("{}:{}", feature, user_id).as_bytes());
        let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        (head % 100) as u8
    }
}

impl FeatureToggle for RolloutToggle {
    fn is_enabled(&self, feature: Feature, user_id: Uuid) -> bool {
        let percent = match feature {
            Feature::Bidding => self.bidding_percent,
            Feature::DynamicPricing => self.dynamic_pricing_percent,
        };
        Self::bucket(feature, user_id) < percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_and_zero_rollouts() {
        let user = Uuid::now_v7();
        assert!(RolloutToggle::all_enabled().is_enabled(Feature::Bidding, user));
        assert!(!RolloutToggle::all_disabled().is_enabled(Feature::DynamicPricing, user));
    }

    #[test]
    fn test_bucket_is_stable_per_user() {
        let user = Uuid::now_v7();
        let first = RolloutToggle::bucket(Feature::Bidding, user);
        assert_eq!(first, RolloutToggle::bucket(Feature::Bidding, user));
        assert!(first < 100);
    }

    #[test]
    fn test_partial_rollout_splits_population() {
        let toggle = RolloutToggle::new(50, 50);
        let enabled = (0..400)
            .filter(|_| toggle.is_enabled(Feature::Bidding, Uuid::new_v4()))
            .count();
        assert!(enabled > 100 && enabled < 300, "enabled = {}", enabled);
    }
}
