//! Marketplace-specific metrics.

use metrics::{counter, gauge, histogram};

/// Marketplace metrics recorder
pub struct MarketplaceMetrics;

impl MarketplaceMetrics {
    // =========================================================================
    // Transition Metrics
    // =========================================================================

    /// Record a claim attempt (`won`, `lost`, `reverted`)
    pub fn record_claim(outcome: &str) {
        counter!("marketplace_claims_total", "outcome" => outcome.to_string()).increment(1);
    }

    /// Record a bid operation, e.g. `submit`/`accepted` or `submit`/`closed`
    pub fn record_bid(action: &str, outcome: &str) {
        counter!(
            "marketplace_bids_total",
            "action" => action.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    pub fn record_question_submitted(pricing_mode: &str, free: bool) {
        counter!(
            "marketplace_questions_submitted_total",
            "pricing_mode" => pricing_mode.to_string(),
            "free" => free.to_string()
        )
        .increment(1);
    }

    pub fn record_tier_upgrade(tier: u8, outcome: &str) {
        counter!(
            "marketplace_tier_upgrades_total",
            "tier" => tier.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    // =========================================================================
    // Payment Metrics
    // =========================================================================

    /// Record one gateway call and how long it took
    pub fn record_payment(kind: &str, outcome: &str, duration_ms: u64) {
        counter!(
            "marketplace_payment_attempts_total",
            "kind" => kind.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
        histogram!("marketplace_payment_duration_seconds", "kind" => kind.to_string())
            .record(duration_ms as f64 / 1000.0);

        tracing::debug!(
            kind = kind,
            outcome = outcome,
            duration_ms = duration_ms,
            "Payment gateway call completed"
        );
    }

    // =========================================================================
    // Sweep & Background Metrics
    // =========================================================================

    pub fn record_claims_released(count: usize) {
        counter!("marketplace_claims_released_total").increment(count as u64);
        gauge!("marketplace_claims_released_last_sweep").set(count as f64);
    }

    pub fn record_notification_failed(kind: &str) {
        counter!("marketplace_notifications_failed_total", "kind" => kind.to_string())
            .increment(1);
    }

    pub fn record_reputation(level: &str) {
        counter!("marketplace_reputation_recalculations_total", "level" => level.to_string())
            .increment(1);
    }
}
