//! Pricing & Difficulty Engine
//!
//! Pure functions: the same question always scores, tiers and prices the same.
//! Amounts are integer cents; the fee split is computed once and frozen on the
//! question, and later adjustments derive from the frozen numbers.

use serde::{Deserialize, Serialize};

use crate::models::{PriceTier, ProjectContext};

/// Difficulty score (out of 10) at which a pool question opens for bids
pub const BIDDING_THRESHOLD: u8 = 7;

const MAX_SCORE: u8 = 10;
const RICH_CONTEXT_TURNS: u32 = 6;
const RICH_CONTEXT_SUMMARY_CHARS: usize = 400;
const LONG_QUESTION_CHARS: usize = 600;
const MEDIUM_QUESTION_CHARS: usize = 250;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingPolicy {
    /// Platform fee rate in basis points (2000 = 20%)
    pub platform_fee_bps: i64,
    pub base_price_cents: i64,
    pub min_price_cents: i64,
    pub max_price_cents: i64,
    pub first_question_free: bool,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            platform_fee_bps: 2000,
            base_price_cents: 3000,
            min_price_cents: 1500,
            max_price_cents: 15000,
            first_question_free: true,
        }
    }
}

pub struct DifficultyInput<'a> {
    pub body: &'a str,
    pub category: &'a str,
    pub context: Option<&'a ProjectContext>,
    pub photo_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Difficulty {
    pub score: u8,
    pub tier: PriceTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeSplit {
    pub platform_fee_cents: i64,
    pub expert_payout_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    pub price_cents: i64,
    pub platform_fee_cents: i64,
    pub expert_payout_cents: i64,
    pub difficulty: Difficulty,
    pub free: bool,
}

fn category_weight(category: &str) -> u8 {
    match category.trim().to_ascii_lowercase().as_str() {
        "electrical" | "hvac" | "structural" => 3,
        "plumbing" | "roofing" => 2,
        "appliance" | "carpentry" | "general" => 1,
        _ => 0,
    }
}

/// Score a question's difficulty from 0 to 10.
pub fn score(input: &DifficultyInput<'_>) -> Difficulty {
    let mut points: u8 = 0;

    if let Some(context) = input.context {
        points += 2;
        if context.conversation_turns >= RICH_CONTEXT_TURNS
            || context.summary.chars().count() >= RICH_CONTEXT_SUMMARY_CHARS
        {
            points += 1;
        }
    }

    points += category_weight(input.category);

    let length = input.body.trim().chars().count();
    if length >= LONG_QUESTION_CHARS {
        points += 2;
    } else if length >= MEDIUM_QUESTION_CHARS {
        points += 1;
    }

    points += match input.photo_count {
        0 => 0,
        1..=2 => 1,
        _ => 2,
    };

    let score = points.min(MAX_SCORE);
    Difficulty {
        score,
        tier: tier_for(score),
    }
}

pub fn tier_for(score: u8) -> PriceTier {
    match score {
        0..=3 => PriceTier::Basic,
        4..=6 => PriceTier::Standard,
        7..=8 => PriceTier::Complex,
        _ => PriceTier::Expert,
    }
}

/// Multiplier in hundredths applied to the base price under dynamic pricing.
fn tier_multiplier(tier: PriceTier) -> i64 {
    match tier {
        PriceTier::Basic => 100,
        PriceTier::Standard => 125,
        PriceTier::Complex => 160,
        PriceTier::Expert => 200,
    }
}

/// Integer rounding of `value * numerator / denominator`, half away from zero.
fn round_ratio(value: i64, numerator: i64, denominator: i64) -> i64 {
    if denominator == 0 {
        return 0;
    }
    let product = value * numerator;
    let half = denominator / 2;
    if product >= 0 {
        (product + half) / denominator
    } else {
        (product - half) / denominator
    }
}

/// `fee = round(P * r)`, `payout = P - fee`.
pub fn split_fee(price_cents: i64, platform_fee_bps: i64) -> FeeSplit {
    let platform_fee_cents = round_ratio(price_cents, platform_fee_bps, 10_000);
    FeeSplit {
        platform_fee_cents,
        expert_payout_cents: price_cents - platform_fee_cents,
    }
}

/// Split a price increase using the ratio frozen on the question.
pub fn split_increase(frozen_price_cents: i64, frozen_fee_cents: i64, delta_cents: i64) -> FeeSplit {
    let platform_fee_cents = round_ratio(delta_cents, frozen_fee_cents, frozen_price_cents);
    FeeSplit {
        platform_fee_cents,
        expert_payout_cents: delta_cents - platform_fee_cents,
    }
}

/// Undo a [`split_increase`]: the frozen price split before `delta_cents`
/// was added to `price_cents`. `None` if no frozen fee produces `fee_cents`.
pub fn revert_increase(price_cents: i64, fee_cents: i64, delta_cents: i64) -> Option<FeeSplit> {
    let base_price = price_cents - delta_cents;
    if base_price <= 0 {
        return None;
    }
    // Fee after the increase is strictly increasing in the frozen fee, so at
    // most one candidate near the proportional guess matches.
    let guess = round_ratio(fee_cents, base_price, price_cents);
    ((guess - 2)..=(guess + 2))
        .filter(|fee| (0..=base_price).contains(fee))
        .find(|fee| fee + split_increase(base_price, *fee, delta_cents).platform_fee_cents == fee_cents)
        .map(|fee| FeeSplit {
            platform_fee_cents: fee,
            expert_payout_cents: base_price - fee,
        })
}

/// Price a question at creation time.
pub fn quote(
    difficulty: Difficulty,
    policy: &PricingPolicy,
    dynamic_pricing: bool,
    free: bool,
) -> PriceQuote {
    if free {
        return PriceQuote {
            price_cents: 0,
            platform_fee_cents: 0,
            expert_payout_cents: 0,
            difficulty,
            free: true,
        };
    }

    let price_cents = if dynamic_pricing {
        let raw = round_ratio(policy.base_price_cents, tier_multiplier(difficulty.tier), 100);
        let rounded = round_ratio(raw, 1, 100) * 100;
        rounded.clamp(policy.min_price_cents, policy.max_price_cents)
    } else {
        policy.base_price_cents
    };

    let split = split_fee(price_cents, policy.platform_fee_bps);
    PriceQuote {
        price_cents,
        platform_fee_cents: split.platform_fee_cents,
        expert_payout_cents: split.expert_payout_cents,
        difficulty,
        free: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(body: &'a str, category: &'a str, photos: u32) -> DifficultyInput<'a> {
        DifficultyInput {
            body,
            category,
            context: None,
            photo_count: photos,
        }
    }

    #[test]
    fn test_simple_question_scores_basic() {
        let difficulty = score(&input("How do I patch drywall?", "painting", 0));
        assert_eq!(difficulty.score, 0);
        assert_eq!(difficulty.tier, PriceTier::Basic);
    }

    #[test]
    fn test_rich_electrical_question_reaches_bidding_threshold() {
        let body = "x".repeat(700);
        let context = ProjectContext {
            summary: "Rewiring a 1950s panel".to_string(),
            conversation_turns: 8,
        };
        let difficulty = score(&DifficultyInput {
            body: &body,
            category: "Electrical",
            context: Some(&context),
            photo_count: 4,
        });

        // 3 context + 3 category + 2 length + 2 photos
        assert_eq!(difficulty.score, 10);
        assert_eq!(difficulty.tier, PriceTier::Expert);
        assert!(difficulty.score >= BIDDING_THRESHOLD);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let body = "My water heater pilot light keeps going out after a few minutes";
        let a = score(&input(body, "plumbing", 2));
        let b = score(&input(body, "plumbing", 2));
        assert_eq!(a, b);
        assert_eq!(a.score, 3);
    }

    #[test]
    fn test_fee_split_rounds_and_sums() {
        let split = split_fee(6000, 2000);
        assert_eq!(split.platform_fee_cents, 1200);
        assert_eq!(split.expert_payout_cents, 4800);

        // 20% of 1999 = 399.8 -> 400
        let split = split_fee(1999, 2000);
        assert_eq!(split.platform_fee_cents, 400);
        assert_eq!(split.platform_fee_cents + split.expert_payout_cents, 1999);
    }

    #[test]
    fn test_increase_uses_frozen_ratio() {
        // Frozen at 25% even though the live rate might differ.
        let split = split_increase(4000, 1000, 1000);
        assert_eq!(split.platform_fee_cents, 250);
        assert_eq!(split.expert_payout_cents, 750);
    }

    #[test]
    fn test_revert_increase_recovers_frozen_split() {
        let base = split_fee(3000, 2000);
        let tier2 = split_increase(3000, base.platform_fee_cents, 1000);
        let fee_after = base.platform_fee_cents + tier2.platform_fee_cents;

        let reverted = revert_increase(4000, fee_after, 1000).unwrap();
        assert_eq!(reverted, base);

        // Uneven ratios round on the way up; the way down still lands exactly.
        let odd = split_increase(3333, 667, 2000);
        let reverted = revert_increase(5333, 667 + odd.platform_fee_cents, 2000).unwrap();
        assert_eq!(reverted.platform_fee_cents, 667);
        assert_eq!(reverted.expert_payout_cents, 2666);
    }

    #[test]
    fn test_revert_increase_rejects_impossible_amounts() {
        assert_eq!(revert_increase(1000, 200, 1000), None);
        assert_eq!(revert_increase(4000, 2, 1000), None);
    }

    #[test]
    fn test_free_quote_is_zero() {
        let difficulty = tier_difficulty(9);
        let quote = quote(difficulty, &PricingPolicy::default(), true, true);
        assert!(quote.free);
        assert_eq!(quote.price_cents, 0);
        assert_eq!(quote.expert_payout_cents, 0);
    }

    #[test]
    fn test_dynamic_quote_scales_and_clamps() {
        let policy = PricingPolicy::default();

        let basic = quote(tier_difficulty(2), &policy, true, false);
        assert_eq!(basic.price_cents, 3000);

        let complex = quote(tier_difficulty(7), &policy, true, false);
        assert_eq!(complex.price_cents, 4800);
        assert_eq!(complex.platform_fee_cents, 960);

        let capped = PricingPolicy {
            max_price_cents: 5000,
            ..PricingPolicy::default()
        };
        let expert = quote(tier_difficulty(10), &capped, true, false);
        assert_eq!(expert.price_cents, 5000);
    }

    #[test]
    fn test_fixed_quote_ignores_difficulty() {
        let policy = PricingPolicy::default();
        let quote = quote(tier_difficulty(10), &policy, false, false);
        assert_eq!(quote.price_cents, policy.base_price_cents);
    }

    fn tier_difficulty(score: u8) -> Difficulty {
        Difficulty {
            score,
            tier: tier_for(score),
        }
    }
}
