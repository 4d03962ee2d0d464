//! Tier Gate
//!
//! Decides whether a DIYer's next message is covered by the question's
//! current conversation tier. Side-effect free; the caller persists either
//! the message or the upgrade.

use serde::{Deserialize, Serialize};

use crate::models::AuthorRole;

pub const MAX_TIER: u8 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierGatePolicy {
    /// DIYer message number that requires tier 2
    pub tier2_at: u32,
    /// DIYer message number that requires tier 3
    pub tier3_at: u32,
    pub tier2_cost_cents: i64,
    pub tier3_cost_cents: i64,
}

impl Default for TierGatePolicy {
    fn default() -> Self {
        Self {
            tier2_at: 3,
            tier3_at: 6,
            tier2_cost_cents: 1000,
            tier3_cost_cents: 2000,
        }
    }
}

impl TierGatePolicy {
    /// Flat cost of moving up to `tier`.
    pub fn upgrade_cost(&self, tier: u8) -> i64 {
        match tier {
            2 => self.tier2_cost_cents,
            3 => self.tier3_cost_cents,
            _ => 0,
        }
    }

    fn required_tier(&self, message_number: u32) -> u8 {
        if message_number >= self.tier3_at {
            3
        } else if message_number >= self.tier2_at {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GateInput {
    pub author: AuthorRole,
    pub current_tier: u8,
    /// DIYer-authored messages already on the question
    pub diyer_messages_so_far: u32,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub blocked: bool,
    pub next_tier: Option<u8>,
    pub upgrade_cost_cents: i64,
}

impl GateDecision {
    fn allowed() -> Self {
        Self {
            blocked: false,
            next_tier: None,
            upgrade_cost_cents: 0,
        }
    }
}

pub fn evaluate(policy: &TierGatePolicy, input: GateInput) -> GateDecision {
    // Expert messages and free questions are never gated.
    if input.author == AuthorRole::Expert || input.price_cents <= 0 {
        return GateDecision::allowed();
    }

    let required = policy.required_tier(input.diyer_messages_so_far.saturating_add(1));
    if input.current_tier >= required {
        return GateDecision::allowed();
    }

    let next_tier = input.current_tier.saturating_add(1).min(MAX_TIER);
    GateDecision {
        blocked: true,
        next_tier: Some(next_tier),
        upgrade_cost_cents: policy.upgrade_cost(next_tier),
    }
}
