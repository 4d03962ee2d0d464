//! In-process gateway for development and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{ChargeRequest, PaymentError, PaymentGateway, RefundRequest, TransferRequest};

/// One call the fake gateway accepted
#[derive(Debug, Clone, PartialEq)]
pub struct FakeCall {
    pub reference: String,
    pub amount_cents: i64,
    /// Customer, destination account, or refunded charge
    pub target: String,
    pub idempotency_key: String,
}

/// Scriptable gateway. Calls are idempotent by key, like the real one.
#[derive(Debug, Default)]
pub struct FakeGateway {
    charges: RwLock<HashMap<String, FakeCall>>,
    transfers: RwLock<HashMap<String, FakeCall>>,
    refunds: RwLock<HashMap<String, FakeCall>>,
    decline_charges: AtomicBool,
    fail_transfers: AtomicBool,
    fail_refunds: AtomicBool,
    delay: RwLock<Option<Duration>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_decline_charges(&self, decline: bool) {
        self.decline_charges.store(decline, Ordering::SeqCst);
    }

    pub fn set_fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long before answering any call
    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().await = delay;
    }

    pub async fn charges(&self) -> Vec<FakeCall> {
        self.charges.read().await.values().cloned().collect()
    }

    pub async fn transfers(&self) -> Vec<FakeCall> {
        self.transfers.read().await.values().cloned().collect()
    }

    pub async fn refunds(&self) -> Vec<FakeCall> {
        self.refunds.read().await.values().cloned().collect()
    }

    async fn pause(&self) {
        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn record(
        calls: &RwLock<HashMap<String, FakeCall>>,
        prefix: &str,
        key: &str,
        amount_cents: i64,
        target: &str,
    ) -> String {
        let mut calls = calls.write().await;
        let call = calls.entry(key.to_string()).or_insert_with(|| FakeCall {
            reference: format!("{}_{}", prefix, Uuid::now_v7().simple()),
            amount_cents,
            target: target.to_string(),
            idempotency_key: key.to_string(),
        });
        call.reference.clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<String, PaymentError> {
        self.pause().await;
        if self.decline_charges.load(Ordering::SeqCst) {
            return Err(PaymentError::Declined("card_declined".to_string()));
        }
        let reference = Self::record(
            &self.charges,
            "pi",
            &request.idempotency_key,
            request.amount_cents,
            &request.customer_ref,
        )
        .await;
        debug!(%reference, amount_cents = request.amount_cents, "Fake charge");
        Ok(reference)
    }

    async fn transfer(&self, request: TransferRequest) -> Result<String, PaymentError> {
        self.pause().await;
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(PaymentError::Gateway("transfer failed".to_string()));
        }
        let reference = Self::record(
            &self.transfers,
            "tr",
            &request.idempotency_key,
            request.amount_cents,
            &request.destination_ref,
        )
        .await;
        debug!(%reference, amount_cents = request.amount_cents, "Fake transfer");
        Ok(reference)
    }

    async fn refund(&self, request: RefundRequest) -> Result<String, PaymentError> {
        self.pause().await;
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(PaymentError::Gateway("refund failed".to_string()));
        }
        let amount_cents = self
            .charges
            .read()
            .await
            .values()
            .find(|c| c.reference == request.charge_ref)
            .map_or(0, |c| c.amount_cents);
        let reference = Self::record(
            &self.refunds,
            "re",
            &request.idempotency_key,
            amount_cents,
            &request.charge_ref,
        )
        .await;
        Ok(reference)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge(key: &str) -> ChargeRequest {
        ChargeRequest {
            amount_cents: 3000,
            customer_ref: "cus_1".to_string(),
            payment_method_ref: "pm_1".to_string(),
            idempotency_key: key.to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_same_key_returns_same_reference() {
        let gateway = FakeGateway::new();
        let first = gateway.charge(charge("claim-a")).await.unwrap();
        let second = gateway.charge(charge("claim-a")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(gateway.charges().await.len(), 1);
    }

    #[tokio::test]
    async fn test_declined_charges() {
        let gateway = FakeGateway::new();
        gateway.set_decline_charges(true);
        let err = gateway.charge(charge("claim-b")).await.unwrap_err();
        assert!(matches!(err, PaymentError::Declined(_)));
        assert!(gateway.charges().await.is_empty());
    }

    #[tokio::test]
    async fn test_refund_amount_matches_charge() {
        let gateway = FakeGateway::new();
        let charge_ref = gateway.charge(charge("claim-c")).await.unwrap();
        gateway
            .refund(RefundRequest {
                charge_ref: charge_ref.clone(),
                idempotency_key: format!("refund-{}", charge_ref),
                metadata: HashMap::new(),
            })
            .await
            .unwrap();

        let refunds = gateway.refunds().await;
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount_cents, 3000);
    }
}
