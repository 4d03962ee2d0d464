//! Fixtures shared by unit tests.

use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    ExpertProfile, PayoutStatus, PriceTier, PricingMode, Question, QuestionStatus,
};
use crate::pricing;

/// Open pool question at `price_cents` with a 20% fee split.
pub fn open_question(diyer_id: Uuid, price_cents: i64) -> Question {
    let now = Utc::now();
    let split = pricing::split_fee(price_cents, 2000);
    Question {
        id: Uuid::now_v7(),
        diyer_id,
        category: "general".to_string(),
        body: "The bathroom fan makes a grinding noise".to_string(),
        photo_count: 0,
        expert_id: None,
        target_expert_id: None,
        status: QuestionStatus::Open,
        marked_not_helpful: false,
        payout_status: if price_cents == 0 {
            PayoutStatus::Free
        } else {
            PayoutStatus::Pending
        },
        claimed_at: None,
        claim_expires_at: None,
        answered_at: None,
        accepted_at: None,
        answer: None,
        rating: None,
        price_cents,
        platform_fee_cents: split.platform_fee_cents,
        expert_payout_cents: split.expert_payout_cents,
        pricing_mode: PricingMode::Fixed,
        difficulty_score: 1,
        price_tier: PriceTier::Basic,
        bid_deadline: None,
        bid_count: 0,
        accepted_bid_id: None,
        current_tier: 1,
        credit_applied_cents: 0,
        credit_owed_cents: 0,
        charge_ref: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn expert(specialties: &[&str]) -> ExpertProfile {
    let mut profile = ExpertProfile::new(
        Uuid::now_v7(),
        specialties.iter().map(|s| s.to_string()).collect(),
    );
    profile.payout_account_ref = Some(format!("acct_{}", profile.expert_id.simple()));
    profile
}
