//! Payment gateway contract and implementations.
//!
//! The gateway is chosen once at process start by [`gateway_from_config`];
//! nothing downstream branches on whether it is real or fake.

mod fake;
mod orchestrator;
mod stripe;

pub use fake::{FakeCall, FakeGateway};
pub use orchestrator::{PaymentOrchestrator, PayoutOutcome};
pub use stripe::{StripeConfig, StripeGateway};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use core_config::ConfigError;
use thiserror::Error;

use crate::config::{MarketplaceConfig, PaymentGatewayKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("card declined: {0}")]
    Declined(String),

    #[error("no saved payment method")]
    NoPaymentMethod,

    #[error("expert has no connected payout account")]
    NoPayoutAccount,

    #[error("gateway error: {0}")]
    Gateway(String),

    /// The call did not finish in time; the money may or may not have moved.
    #[error("gateway call timed out after {0} ms")]
    Timeout(u64),
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        PaymentError::Gateway(err.to_string())
    }
}

/// Off-session charge against a saved payment method
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub amount_cents: i64,
    pub customer_ref: String,
    pub payment_method_ref: String,
    pub idempotency_key: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub amount_cents: i64,
    pub destination_ref: String,
    pub transfer_group: String,
    pub idempotency_key: String,
    pub metadata: HashMap<String, String>,
}

/// Full refund of a previous charge
#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    pub charge_ref: String,
    pub idempotency_key: String,
    pub metadata: HashMap<String, String>,
}

/// External payment gateway. Each call returns the gateway's reference.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: ChargeRequest) -> Result<String, PaymentError>;

    async fn transfer(&self, request: TransferRequest) -> Result<String, PaymentError>;

    async fn refund(&self, request: RefundRequest) -> Result<String, PaymentError>;

    /// Gateway name for logging.
    fn name(&self) -> &'static str;
}

/// Build the gateway selected by configuration.
pub fn gateway_from_config(
    config: &MarketplaceConfig,
) -> Result<Arc<dyn PaymentGateway>, ConfigError> {
    match config.gateway {
        PaymentGatewayKind::Fake => Ok(Arc::new(FakeGateway::new())),
        PaymentGatewayKind::Stripe => {
            let stripe = StripeConfig::from_env()?;
            Ok(Arc::new(StripeGateway::new(stripe)))
        }
    }
}

/// Metadata attached to every gateway call for one question.
pub(crate) fn question_metadata(question_id: uuid::Uuid) -> HashMap<String, String> {
    HashMap::from([("question_id".to_string(), question_id.to_string())])
}
