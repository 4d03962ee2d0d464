//! Payment Orchestrator
//!
//! Sequences gateway calls for the question lifecycle. Every call is bounded
//! by the configured timeout and appended to the payment attempt log. Charges
//! return errors so the caller can revert the tentative transition; transfers
//! and refunds return a [`PayoutOutcome`] the caller logs and moves past.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use observability::MarketplaceMetrics;
use tracing::{info, warn};
use uuid::Uuid;

use super::{ChargeRequest, PaymentError, PaymentGateway, RefundRequest, TransferRequest};
use crate::error::{MarketError, MarketResult};
use crate::models::{CreditReason, CreditTransaction, PaymentAttempt, PaymentKind, PaymentOutcome};
use crate::repository::{CreditLedger, PaymentAttemptLog};

/// Result of a money movement made after the status transition committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    Completed { reference: String },
    Failed { detail: String },
    /// Timed out; left pending for retry
    Unknown { detail: String },
    Skipped { reason: &'static str },
}

impl PayoutOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PayoutOutcome::Completed { .. })
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            PayoutOutcome::Completed { reference } => Some(reference),
            _ => None,
        }
    }

    /// The downstream failure to record, if the movement did not happen.
    pub fn as_downstream_error(&self, operation: &'static str) -> Option<MarketError> {
        match self {
            PayoutOutcome::Failed { detail } | PayoutOutcome::Unknown { detail } => {
                Some(MarketError::Downstream {
                    operation,
                    detail: detail.clone(),
                })
            }
            PayoutOutcome::Completed { .. } | PayoutOutcome::Skipped { .. } => None,
        }
    }
}

impl From<Result<String, PaymentError>> for PayoutOutcome {
    fn from(result: Result<String, PaymentError>) -> Self {
        match result {
            Ok(reference) => PayoutOutcome::Completed { reference },
            Err(e @ PaymentError::Timeout(_)) => PayoutOutcome::Unknown {
                detail: e.to_string(),
            },
            Err(e) => PayoutOutcome::Failed {
                detail: e.to_string(),
            },
        }
    }
}

pub struct PaymentOrchestrator<L: PaymentAttemptLog + CreditLedger + ?Sized> {
    gateway: Arc<dyn PaymentGateway>,
    log: Arc<L>,
    timeout: Duration,
}

impl<L: PaymentAttemptLog + CreditLedger + ?Sized> PaymentOrchestrator<L> {
    pub fn new(gateway: Arc<dyn PaymentGateway>, log: Arc<L>, timeout: Duration) -> Self {
        Self {
            gateway,
            log,
            timeout,
        }
    }

    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }

    async fn call<F>(
        &self,
        question_id: Uuid,
        kind: PaymentKind,
        amount_cents: i64,
        idempotency_key: &str,
        call: F,
    ) -> Result<String, PaymentError>
    where
        F: Future<Output = Result<String, PaymentError>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::Timeout(self.timeout.as_millis() as u64)),
        };

        let (outcome, reference, detail) = match &result {
            Ok(reference) => (PaymentOutcome::Succeeded, Some(reference.clone()), None),
            Err(e @ PaymentError::Timeout(_)) => (PaymentOutcome::Unknown, None, Some(e.to_string())),
            Err(e) => (PaymentOutcome::Failed, None, Some(e.to_string())),
        };

        MarketplaceMetrics::record_payment(
            &kind.to_string(),
            &outcome.to_string(),
            started.elapsed().as_millis() as u64,
        );

        let attempt = PaymentAttempt {
            id: Uuid::now_v7(),
            question_id,
            kind,
            amount_cents,
            idempotency_key: idempotency_key.to_string(),
            reference,
            outcome,
            detail,
            created_at: Utc::now(),
        };
        if let Err(e) = self.log.record_attempt(attempt).await {
            warn!(%question_id, %kind, error = %e, "Failed to record payment attempt");
        }

        result
    }

    /// Charge before value is delivered. Any error must revert the transition.
    pub async fn charge(
        &self,
        question_id: Uuid,
        request: ChargeRequest,
    ) -> Result<String, PaymentError> {
        let key = request.idempotency_key.clone();
        let amount = request.amount_cents;
        let result = self
            .call(
                question_id,
                PaymentKind::Charge,
                amount,
                &key,
                self.gateway.charge(request),
            )
            .await;

        match &result {
            Ok(reference) => info!(%question_id, %reference, amount, "Charge succeeded"),
            Err(e) => warn!(%question_id, amount, error = %e, "Charge failed"),
        }
        result
    }

    /// Payout after the status change committed. Failures are returned, not raised.
    pub async fn transfer(&self, question_id: Uuid, request: TransferRequest) -> PayoutOutcome {
        if request.amount_cents <= 0 {
            return PayoutOutcome::Skipped {
                reason: "nothing to transfer",
            };
        }
        let key = request.idempotency_key.clone();
        let amount = request.amount_cents;
        let outcome: PayoutOutcome = self
            .call(
                question_id,
                PaymentKind::Transfer,
                amount,
                &key,
                self.gateway.transfer(request),
            )
            .await
            .into();

        if let Some(e) = outcome.as_downstream_error("transfer") {
            warn!(%question_id, amount, error = %e, "Transfer not completed, payout left pending");
        }
        outcome
    }

    /// Full refund of `charge_ref`, at most once per charge. The attempt is
    /// logged with the amount recorded for the original charge.
    pub async fn refund(&self, question_id: Uuid, charge_ref: &str) -> PayoutOutcome {
        let key = format!("refund-{}", charge_ref);

        let mut amount_cents = 0;
        match self.log.attempts_for(question_id).await {
            Ok(attempts) => {
                if attempts.iter().any(|a| {
                    a.kind == PaymentKind::Refund
                        && a.idempotency_key == key
                        && a.outcome == PaymentOutcome::Succeeded
                }) {
                    return PayoutOutcome::Skipped {
                        reason: "already refunded",
                    };
                }
                match attempts.iter().find(|a| {
                    a.kind == PaymentKind::Charge && a.reference.as_deref() == Some(charge_ref)
                }) {
                    Some(charge) => amount_cents = charge.amount_cents,
                    None => warn!(%question_id, %charge_ref, "No recorded charge for refund"),
                }
            }
            // The gateway key still prevents a double refund.
            Err(e) => warn!(%question_id, error = %e, "Could not read payment attempts"),
        }

        let request = RefundRequest {
            charge_ref: charge_ref.to_string(),
            idempotency_key: key.clone(),
            metadata: super::question_metadata(question_id),
        };
        let outcome: PayoutOutcome = self
            .call(
                question_id,
                PaymentKind::Refund,
                amount_cents,
                &key,
                self.gateway.refund(request),
            )
            .await
            .into();

        if let Some(e) = outcome.as_downstream_error("refund") {
            warn!(%question_id, %charge_ref, error = %e, "Refund not completed");
        }
        outcome
    }

    /// References of successful charges whose idempotency key starts with
    /// `key_prefix`, oldest first.
    pub async fn charges_with_key_prefix(
        &self,
        question_id: Uuid,
        key_prefix: &str,
    ) -> MarketResult<Vec<String>> {
        let attempts = self.log.attempts_for(question_id).await?;
        Ok(attempts
            .into_iter()
            .filter(|a| {
                a.kind == PaymentKind::Charge
                    && a.outcome == PaymentOutcome::Succeeded
                    && a.idempotency_key.starts_with(key_prefix)
            })
            .filter_map(|a| a.reference)
            .collect())
    }

    /// Append a credit entry. Returns the DIYer's new balance.
    pub async fn issue_credit(
        &self,
        diyer_id: Uuid,
        amount_cents: i64,
        reason: CreditReason,
        question_id: Option<Uuid>,
    ) -> MarketResult<i64> {
        let balance = self
            .log
            .append_credit(CreditTransaction::new(
                diyer_id,
                amount_cents,
                reason,
                question_id,
            ))
            .await?;
        info!(%diyer_id, amount_cents, %reason, balance, "Credit ledger updated");
        Ok(balance)
    }

    pub async fn credit_balance(&self, diyer_id: Uuid) -> MarketResult<i64> {
        self.log.credit_balance(diyer_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::memory::InMemoryMarketplaceStore;
    use crate::payments::MockPaymentGateway;

    fn transfer_request(amount_cents: i64) -> TransferRequest {
        TransferRequest {
            amount_cents,
            destination_ref: "acct_1".to_string(),
            transfer_group: "question_1".to_string(),
            idempotency_key: "transfer-1".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_transfer_failure_is_reported_not_raised() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_transfer()
            .times(1)
            .returning(|_| Err(PaymentError::Gateway("account restricted".into())));

        let store = Arc::new(InMemoryMarketplaceStore::new());
        let orchestrator =
            PaymentOrchestrator::new(Arc::new(gateway), store.clone(), Duration::from_secs(1));

        let question_id = Uuid::now_v7();
        let outcome = orchestrator
            .transfer(question_id, transfer_request(4800))
            .await;

        assert!(matches!(outcome, PayoutOutcome::Failed { .. }));
        let attempts = store.attempts_for(question_id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, PaymentOutcome::Failed);
    }

    #[tokio::test]
    async fn test_timeout_records_unknown_outcome() {
        let gateway = Arc::new(crate::payments::FakeGateway::new());
        gateway.set_delay(Some(Duration::from_millis(200))).await;

        let store = Arc::new(InMemoryMarketplaceStore::new());
        let orchestrator =
            PaymentOrchestrator::new(gateway, store.clone(), Duration::from_millis(20));

        let question_id = Uuid::now_v7();
        let outcome = orchestrator
            .transfer(question_id, transfer_request(2400))
            .await;

        assert!(matches!(outcome, PayoutOutcome::Unknown { .. }));
        let attempts = store.attempts_for(question_id).await.unwrap();
        assert_eq!(attempts[0].outcome, PaymentOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_zero_transfer_skips_gateway() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_transfer().never();

        let store = Arc::new(InMemoryMarketplaceStore::new());
        let orchestrator =
            PaymentOrchestrator::new(Arc::new(gateway), store, Duration::from_secs(1));

        let outcome = orchestrator
            .transfer(Uuid::now_v7(), transfer_request(0))
            .await;
        assert!(matches!(outcome, PayoutOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_refund_runs_once_per_charge() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_refund()
            .times(1)
            .returning(|_| Ok("re_1".to_string()));

        let store = Arc::new(InMemoryMarketplaceStore::new());
        let orchestrator =
            PaymentOrchestrator::new(Arc::new(gateway), store, Duration::from_secs(1));

        let question_id = Uuid::now_v7();
        let first = orchestrator.refund(question_id, "pi_1").await;
        let second = orchestrator.refund(question_id, "pi_1").await;

        assert!(first.is_completed());
        assert_eq!(
            second,
            PayoutOutcome::Skipped {
                reason: "already refunded"
            }
        );
    }

    #[tokio::test]
    async fn test_refund_logs_the_original_charge_amount() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_charge()
            .returning(|request| Ok(format!("pi_{}", request.amount_cents)));
        gateway
            .expect_refund()
            .returning(|request| Ok(format!("re_{}", request.charge_ref)));

        let store = Arc::new(InMemoryMarketplaceStore::new());
        let orchestrator =
            PaymentOrchestrator::new(Arc::new(gateway), store.clone(), Duration::from_secs(1));

        let question_id = Uuid::now_v7();
        for (amount_cents, key) in [(3000, "claim-1"), (1000, "tier-1-2")] {
            orchestrator
                .charge(
                    question_id,
                    ChargeRequest {
                        amount_cents,
                        customer_ref: "cus_1".to_string(),
                        payment_method_ref: "pm_1".to_string(),
                        idempotency_key: key.to_string(),
                        metadata: HashMap::new(),
                    },
                )
                .await
                .unwrap();
        }

        let tier_charges = orchestrator
            .charges_with_key_prefix(question_id, "tier-1-")
            .await
            .unwrap();
        assert_eq!(tier_charges, vec!["pi_1000".to_string()]);

        assert!(orchestrator.refund(question_id, "pi_1000").await.is_completed());
        let attempts = store.attempts_for(question_id).await.unwrap();
        let refund = attempts
            .iter()
            .find(|a| a.kind == PaymentKind::Refund)
            .unwrap();
        assert_eq!(refund.amount_cents, 1000);
    }

    #[test]
    fn test_downstream_error_only_for_unfinished_movements() {
        let failed = PayoutOutcome::Failed {
            detail: "boom".into(),
        };
        assert!(matches!(
            failed.as_downstream_error("transfer"),
            Some(MarketError::Downstream {
                operation: "transfer",
                ..
            })
        ));
        assert!(
            PayoutOutcome::Completed {
                reference: "tr_1".into()
            }
            .as_downstream_error("transfer")
            .is_none()
        );
    }
}
