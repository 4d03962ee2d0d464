//! Maintenance jobs run against the marketplace service

use std::sync::Arc;

use domain_marketplace::{
    CreditRetryReport, MarketplaceRepository, MarketplaceService, PayoutRetryReport, SweepReport,
};
use eyre::Result;
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Combined result of one maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub sweep: SweepReport,
    pub payouts: PayoutRetryReport,
    pub credits: CreditRetryReport,
}

pub struct Sweeper<R: MarketplaceRepository + ?Sized + 'static> {
    service: Arc<MarketplaceService<R>>,
}

impl<R: MarketplaceRepository + ?Sized + 'static> Clone for Sweeper<R> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

impl<R: MarketplaceRepository + ?Sized + 'static> Sweeper<R> {
    pub fn new(service: Arc<MarketplaceService<R>>) -> Self {
        Self { service }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        Ok(self.service.release_expired_claims().await?)
    }

    pub async fn retry_payouts(&self) -> Result<PayoutRetryReport> {
        Ok(self.service.retry_pending_payouts().await?)
    }

    pub async fn retry_credits(&self) -> Result<CreditRetryReport> {
        Ok(self.service.retry_owed_credits().await?)
    }

    /// Sweep first so freshly released questions are not mistaken for settled ones.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let sweep = self.sweep().await?;
        let payouts = self.retry_payouts().await?;
        let credits = self.retry_credits().await?;
        Ok(CycleReport {
            sweep,
            payouts,
            credits,
        })
    }

    /// Run the sweep and the payout/credit retries on their own cron schedules
    /// until Ctrl-C.
    pub async fn run_scheduled(&self, sweep_cron: &str, payout_cron: &str) -> Result<()> {
        info!(sweep_cron, payout_cron, "Starting scheduled marketplace maintenance");

        let mut sched = JobScheduler::new().await?;

        let sweeper = self.clone();
        let sweep_job = Job::new_async(sweep_cron, move |_uuid, _l| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                match sweeper.sweep().await {
                    Ok(report) => info!(
                        released = report.released,
                        refunded = report.refunded,
                        refund_failures = report.refund_failures,
                        "Scheduled sweep complete"
                    ),
                    Err(e) => error!(error = %e, "Scheduled sweep failed"),
                }
            })
        })?;

        let sweeper = self.clone();
        let payout_job = Job::new_async(payout_cron, move |_uuid, _l| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                match sweeper.retry_payouts().await {
                    Ok(report) => info!(
                        attempted = report.attempted,
                        transferred = report.transferred,
                        "Scheduled payout retry complete"
                    ),
                    Err(e) => error!(error = %e, "Scheduled payout retry failed"),
                }
                match sweeper.retry_credits().await {
                    Ok(report) => info!(
                        attempted = report.attempted,
                        issued = report.issued,
                        "Scheduled credit retry complete"
                    ),
                    Err(e) => error!(error = %e, "Scheduled credit retry failed"),
                }
            })
        })?;

        sched.add(sweep_job).await?;
        sched.add(payout_job).await?;
        sched.start().await?;

        info!("Scheduler started, waiting for jobs...");
        tokio::signal::ctrl_c().await?;

        info!("Shutdown signal received, stopping scheduler");
        sched.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_marketplace::{
        BillingProfile, CreateQuestion, ExpertProfile, FakeGateway, InMemoryMarketplaceStore,
        MarketplaceConfig, QuestionStatus,
    };
    use uuid::Uuid;

    async fn setup(claim_window_minutes: i64) -> (
        Sweeper<InMemoryMarketplaceStore>,
        Arc<MarketplaceService<InMemoryMarketplaceStore>>,
        Arc<FakeGateway>,
    ) {
        let store = Arc::new(InMemoryMarketplaceStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let config = MarketplaceConfig {
            claim_window_minutes,
            bidding_rollout_percent: 0,
            dynamic_pricing_rollout_percent: 0,
            ..Default::default()
        };
        let service = Arc::new(MarketplaceService::new(store, gateway.clone(), config));
        (Sweeper::new(service.clone()), service, gateway)
    }

    async fn claimed_paid_question(
        service: &MarketplaceService<InMemoryMarketplaceStore>,
    ) -> (Uuid, Uuid) {
        let diyer = Uuid::now_v7();
        service
            .save_billing_profile(BillingProfile {
                diyer_id: diyer,
                customer_ref: "cus_1".to_string(),
                payment_method_ref: Some("pm_1".to_string()),
            })
            .await
            .unwrap();

        // First question is free; the second one is charged.
        for body in ["Is my outlet wired right?", "Why does the breaker trip?"] {
            service
                .submit_question(CreateQuestion {
                    diyer_id: diyer,
                    category: "electrical".to_string(),
                    body: body.to_string(),
                    photo_count: 0,
                    context: None,
                    target_expert_id: None,
                    apply_credit: false,
                })
                .await
                .unwrap();
        }
        let paid = service
            .list_my_questions(diyer)
            .await
            .unwrap()
            .into_iter()
            .find(|q| q.price_cents > 0)
            .unwrap();

        let expert = ExpertProfile::new(Uuid::now_v7(), vec!["electrical".to_string()]);
        let expert_id = expert.expert_id;
        service.save_expert_profile(expert).await.unwrap();
        service.claim_question(paid.id, expert_id).await.unwrap();
        (paid.id, diyer)
    }

    #[tokio::test]
    async fn test_cycle_releases_expired_claim_and_refunds() {
        let (sweeper, service, gateway) = setup(0).await;
        let (question_id, diyer) = claimed_paid_question(&service).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let report = sweeper.run_cycle().await.unwrap();

        assert_eq!(report.sweep.released, 1);
        assert_eq!(report.sweep.refunded, 1);
        assert_eq!(report.payouts.attempted, 0);
        assert_eq!(gateway.refunds().await.len(), 1);

        let question = service
            .list_my_questions(diyer)
            .await
            .unwrap()
            .into_iter()
            .find(|q| q.id == question_id)
            .unwrap();
        assert_eq!(question.status, QuestionStatus::Open);
        assert_eq!(question.expert_id, None);
    }

    #[tokio::test]
    async fn test_cycle_leaves_active_claims_alone() {
        let (sweeper, service, gateway) = setup(30).await;
        claimed_paid_question(&service).await;

        let report = sweeper.run_cycle().await.unwrap();

        assert_eq!(report.sweep, SweepReport::default());
        assert_eq!(report.credits, CreditRetryReport::default());
        assert!(gateway.refunds().await.is_empty());
    }
}
