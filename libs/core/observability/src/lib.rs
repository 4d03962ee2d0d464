//! Observability utilities for the marketplace engine.
//!
//! This crate provides:
//! - Prometheus metrics recorder installation and rendering
//! - Marketplace counters for claims, bids, payments, sweeps and notifications
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, MarketplaceMetrics};
//!
//! let handle = init_metrics()?;
//!
//! MarketplaceMetrics::record_claim("won");
//! MarketplaceMetrics::record_claims_released(3);
//!
//! println!("{}", handle.render());
//! ```

pub mod marketplace;

pub use marketplace::MarketplaceMetrics;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus metrics recorder.
///
/// Safe to call more than once; only the first call installs the recorder.
pub fn init_metrics() -> Result<&'static PrometheusHandle, BuildError> {
    METRICS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;

        info!("Prometheus metrics recorder initialized");

        register_metric_descriptions();

        Ok(handle)
    })
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Render the current metrics in Prometheus text format
pub fn render_metrics() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

/// Register metric descriptions for documentation
fn register_metric_descriptions() {
    use metrics::describe_counter;
    use metrics::describe_gauge;
    use metrics::describe_histogram;

    describe_counter!(
        "marketplace_claims_total",
        "Claim attempts by outcome"
    );
    describe_counter!(
        "marketplace_bids_total",
        "Bid operations by action and outcome"
    );
    describe_counter!(
        "marketplace_questions_submitted_total",
        "Questions submitted by pricing mode"
    );
    describe_counter!(
        "marketplace_payment_attempts_total",
        "Payment gateway calls by kind and outcome"
    );
    describe_histogram!(
        "marketplace_payment_duration_seconds",
        "Payment gateway call duration in seconds"
    );
    describe_counter!(
        "marketplace_claims_released_total",
        "Expired claims released by sweeps"
    );
    describe_gauge!(
        "marketplace_claims_released_last_sweep",
        "Expired claims released in the most recent sweep"
    );
    describe_counter!(
        "marketplace_tier_upgrades_total",
        "Conversation tier upgrades by target tier and outcome"
    );
    describe_counter!(
        "marketplace_notifications_failed_total",
        "Notifications the sink failed to deliver"
    );
    describe_counter!(
        "marketplace_reputation_recalculations_total",
        "Reputation recalculations by resulting level"
    );
}
