use std::sync::Arc;

use chrono::Utc;
use observability::MarketplaceMetrics;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::bidding::{self, BiddingAuctioneer};
use crate::claims::ClaimCoordinator;
use crate::config::MarketplaceConfig;
use crate::error::{ConflictReason, MarketError, MarketResult};
use crate::features::{Feature, FeatureToggle, RolloutToggle};
use crate::models::{
    AuthorRole, Bid, BillingProfile, ClaimReceipt, CreateQuestion, CreditReason, ExpertProfile,
    Message, PayoutStatus, PricingMode, Question, QuestionStatus, Reputation,
};
use crate::notifications::{Notification, NotificationKind, Notifier};
use crate::payments::{
    ChargeRequest, PaymentError, PaymentGateway, PaymentOrchestrator, PayoutOutcome,
    TransferRequest, question_metadata,
};
use crate::pricing::{self, DifficultyInput};
use crate::queue::{ExpertQueue, QueueBuilder};
use crate::repository::{
    MarketplaceRepository, QuestionPatch, QuestionPredicate, QuestionQuery, UserScopedQuestions,
};
use crate::reputation;
use crate::tier_gate::{self, GateDecision, GateInput, MAX_TIER};

/// Result of accepting an answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptOutcome {
    pub question: Question,
    #[serde(skip)]
    pub payout: PayoutOutcome,
}

/// Result of marking an answer not helpful
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotHelpfulOutcome {
    pub question: Question,
    pub credit_added_cents: i64,
    /// New balance, or `None` if the ledger write failed
    pub credit_balance_cents: Option<i64>,
    pub partial_payout_cents: i64,
    #[serde(skip)]
    pub partial_payout: PayoutOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    Posted(Message),
    /// The DIYer must upgrade before this message can be sent
    UpgradeRequired(GateDecision),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierUpgrade {
    pub question: Question,
    pub tier: u8,
    pub cost_cents: i64,
    pub charge_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub released: usize,
    pub refunded: usize,
    pub refund_failures: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PayoutRetryReport {
    pub attempted: usize,
    pub transferred: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreditRetryReport {
    pub attempted: usize,
    pub issued: usize,
}

/// Debits that lose a race for the balance re-read it this many times.
const CREDIT_DEBIT_ATTEMPTS: usize = 3;

fn claim_instant_ms(question: &Question) -> i64 {
    question.claimed_at.map_or(0, |at| at.timestamp_millis())
}

/// Scoped to the claim instant so a re-claim is charged afresh.
fn claim_charge_key(question: &Question, expert_id: Uuid) -> String {
    format!("claim-{}-{}-{}", question.id, expert_id, claim_instant_ms(question))
}

fn tier_charge_prefix(question: &Question) -> String {
    format!("tier-{}-{}-", question.id, claim_instant_ms(question))
}

/// Service layer for the question lifecycle
pub struct MarketplaceService<R: MarketplaceRepository + ?Sized> {
    repository: Arc<R>,
    config: MarketplaceConfig,
    claims: ClaimCoordinator<R>,
    auctioneer: BiddingAuctioneer<R>,
    payments: PaymentOrchestrator<R>,
    queue: QueueBuilder<R>,
    toggles: Arc<dyn FeatureToggle>,
    notifier: Notifier,
}

impl<R: MarketplaceRepository + ?Sized> MarketplaceService<R> {
    pub fn new(
        repository: Arc<R>,
        gateway: Arc<dyn PaymentGateway>,
        config: MarketplaceConfig,
    ) -> Self {
        let toggles = Arc::new(RolloutToggle::new(
            config.bidding_rollout_percent,
            config.dynamic_pricing_rollout_percent,
        ));
        Self {
            claims: ClaimCoordinator::new(repository.clone(), config.claim_window())
                .with_tier_policy(config.tiers.clone()),
            auctioneer: BiddingAuctioneer::new(
                repository.clone(),
                config.claim_window(),
                config.pricing.platform_fee_bps,
            ),
            payments: PaymentOrchestrator::new(
                gateway,
                repository.clone(),
                config.gateway_timeout(),
            ),
            queue: QueueBuilder::new(repository.clone(), config.queue_limit),
            repository,
            config,
            toggles,
            notifier: Notifier::default(),
        }
    }

    pub fn with_toggles(mut self, toggles: Arc<dyn FeatureToggle>) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load(&self, question_id: Uuid) -> MarketResult<Question> {
        self.repository
            .get_question(question_id)
            .await?
            .ok_or_else(|| MarketError::question_not_found(question_id))
    }

    async fn require_expert(&self, expert_id: Uuid) -> MarketResult<ExpertProfile> {
        match self.repository.get_expert(expert_id).await? {
            Some(profile) if profile.onboarding_complete => Ok(profile),
            Some(_) => Err(MarketError::Permission(
                "expert onboarding is not complete".to_string(),
            )),
            None => Err(MarketError::Permission("caller is not an expert".to_string())),
        }
    }

    fn expect_status(question: &Question, expected: QuestionStatus) -> MarketResult<()> {
        if question.status != expected {
            return Err(MarketError::Conflict(ConflictReason::InvalidStatus {
                expected,
                actual: question.status,
            }));
        }
        Ok(())
    }

    async fn notify(&self, notification: Notification) {
        self.notifier.send(notification).await;
    }

    /// Off-session charge against the DIYer's saved payment method.
    async fn charge_diyer(
        &self,
        question: &Question,
        amount_cents: i64,
        idempotency_key: String,
    ) -> MarketResult<String> {
        let billing = self
            .repository
            .billing_profile(question.diyer_id)
            .await?
            .ok_or(PaymentError::NoPaymentMethod)?;
        let payment_method_ref = billing
            .payment_method_ref
            .ok_or(PaymentError::NoPaymentMethod)?;

        let reference = self
            .payments
            .charge(
                question.id,
                ChargeRequest {
                    amount_cents,
                    customer_ref: billing.customer_ref,
                    payment_method_ref,
                    idempotency_key,
                    metadata: question_metadata(question.id),
                },
            )
            .await?;
        Ok(reference)
    }

    /// Attach the charge to the claim it paid for. Returns the affected
    /// count; 0 means the claim was released while the charge was in flight.
    async fn store_charge_ref(
        &self,
        question: &Question,
        expert_id: Uuid,
        charge_ref: &str,
    ) -> MarketResult<u64> {
        let mut predicates = vec![
            QuestionPredicate::StatusIs(QuestionStatus::Claimed),
            QuestionPredicate::ExpertIs(expert_id),
        ];
        if let Some(claimed_at) = question.claimed_at {
            predicates.push(QuestionPredicate::ClaimedAtIs(claimed_at));
        }
        self.repository
            .conditional_update(
                question.id,
                &predicates,
                QuestionPatch {
                    charge_ref: Some(Some(charge_ref.to_string())),
                    ..Default::default()
                },
            )
            .await
    }

    /// Give back a charge whose claim is gone.
    async fn refund_orphaned_charge(&self, question_id: Uuid, charge_ref: &str) {
        let outcome = self.payments.refund(question_id, charge_ref).await;
        if outcome.as_downstream_error("refund").is_some() {
            error!(%question_id, %charge_ref, "Charge outlived its claim and the refund failed");
        } else {
            warn!(%question_id, %charge_ref, "Charge outlived its claim, refunded");
        }
    }

    /// Every successful charge taken for the claim in `question`: the claim
    /// or bid charge plus the tier upgrades bought during it.
    async fn claim_charges(&self, question: &Question) -> Vec<String> {
        let mut prefixes = vec![tier_charge_prefix(question)];
        if let Some(expert_id) = question.expert_id {
            prefixes.push(claim_charge_key(question, expert_id));
        }
        if let Some(bid_id) = question.accepted_bid_id {
            prefixes.push(format!("bid-{}", bid_id));
        }

        let mut charges: Vec<String> = question.charge_ref.iter().cloned().collect();
        for prefix in prefixes {
            match self
                .payments
                .charges_with_key_prefix(question.id, &prefix)
                .await
            {
                Ok(found) => charges.extend(found),
                Err(e) => {
                    warn!(question_id = %question.id, error = %e, "Could not read charges to refund")
                }
            }
        }
        charges.sort();
        charges.dedup();
        charges
    }

    /// Spend up to `price_cents` of the DIYer's credit on a new question.
    async fn apply_credit(
        &self,
        diyer_id: Uuid,
        question_id: Uuid,
        price_cents: i64,
    ) -> MarketResult<i64> {
        for _ in 0..CREDIT_DEBIT_ATTEMPTS {
            let balance = self.payments.credit_balance(diyer_id).await?;
            let amount = balance.min(price_cents).max(0);
            if amount == 0 {
                return Ok(0);
            }
            match self
                .payments
                .issue_credit(
                    diyer_id,
                    -amount,
                    CreditReason::AppliedToQuestion,
                    Some(question_id),
                )
                .await
            {
                Ok(_) => return Ok(amount),
                Err(MarketError::Conflict(ConflictReason::InsufficientCredit)) => continue,
                Err(e) => return Err(e),
            }
        }
        warn!(%diyer_id, "Credit balance kept moving, submitting without credit");
        Ok(0)
    }

    /// Write the not-helpful credit still owed on a resolved question, then
    /// clear the debt. An existing ledger entry for the question counts as
    /// issued, so a retry after a lost clear never credits twice.
    async fn issue_owed_credit(&self, question: &Question) -> MarketResult<Option<i64>> {
        let owed = question.credit_owed_cents;
        if owed <= 0 {
            return Ok(None);
        }

        let already_issued = self
            .repository
            .credit_history(question.diyer_id)
            .await?
            .iter()
            .any(|t| t.reason == CreditReason::NotHelpful && t.question_id == Some(question.id));
        let balance = if already_issued {
            None
        } else {
            Some(
                self.payments
                    .issue_credit(
                        question.diyer_id,
                        owed,
                        CreditReason::NotHelpful,
                        Some(question.id),
                    )
                    .await?,
            )
        };

        self.repository
            .conditional_update(
                question.id,
                &[QuestionPredicate::CreditOwedIs(owed)],
                QuestionPatch {
                    credit_owed_cents: Some(0),
                    ..Default::default()
                },
            )
            .await?;
        Ok(balance)
    }

    /// Transfer whatever the expert is still owed on a settled question.
    ///
    /// Not-helpful questions owe half of the frozen payout; accepted ones owe
    /// all of it. The idempotency key is stable so retries never pay twice.
    async fn settle_payout(&self, question: &Question) -> PayoutOutcome {
        if question.payout_status != PayoutStatus::Pending {
            return PayoutOutcome::Skipped {
                reason: "payout not pending",
            };
        }
        let Some(expert_id) = question.expert_id else {
            return PayoutOutcome::Skipped {
                reason: "no assigned expert",
            };
        };

        let (amount_cents, idempotency_key) = if question.marked_not_helpful {
            (
                question.expert_payout_cents / 2,
                format!("partial-{}", question.id),
            )
        } else {
            (
                question.expert_payout_cents,
                format!("transfer-{}", question.id),
            )
        };
        if amount_cents <= 0 {
            return PayoutOutcome::Skipped {
                reason: "nothing to transfer",
            };
        }

        let destination_ref = match self.repository.get_expert(expert_id).await {
            Ok(Some(ExpertProfile {
                payout_account_ref: Some(account),
                ..
            })) => account,
            Ok(_) => {
                warn!(question_id = %question.id, %expert_id, "Expert has no payout account, payout left pending");
                return PayoutOutcome::Skipped {
                    reason: "no payout account",
                };
            }
            Err(e) => {
                return PayoutOutcome::Failed {
                    detail: e.to_string(),
                };
            }
        };

        let outcome = self
            .payments
            .transfer(
                question.id,
                TransferRequest {
                    amount_cents,
                    destination_ref,
                    transfer_group: question.transfer_group(),
                    idempotency_key,
                    metadata: question_metadata(question.id),
                },
            )
            .await;

        if outcome.is_completed() {
            let marked = self
                .repository
                .conditional_update(
                    question.id,
                    &[QuestionPredicate::PayoutStatusIs(PayoutStatus::Pending)],
                    QuestionPatch {
                        payout_status: Some(PayoutStatus::Transferred),
                        ..Default::default()
                    },
                )
                .await;
            if let Err(e) = marked {
                warn!(question_id = %question.id, error = %e, "Transfer succeeded but payout status not updated");
            }
        }
        outcome
    }

    async fn sweep_before_read(&self) {
        if let Err(e) = self.release_expired_claims().await {
            warn!(error = %e, "Expired claim sweep failed, continuing with read");
        }
    }

    // =========================================================================
    // Questions
    // =========================================================================

    /// Price, score and store a new question
    #[instrument(skip(self, input), fields(diyer_id = %input.diyer_id))]
    pub async fn submit_question(&self, input: CreateQuestion) -> MarketResult<Question> {
        input
            .validate()
            .map_err(|e| MarketError::Validation(e.to_string()))?;

        if let Some(target) = input.target_expert_id {
            if target == input.diyer_id {
                return Err(MarketError::Validation(
                    "a question cannot target its own author".to_string(),
                ));
            }
            self.repository
                .get_expert(target)
                .await?
                .ok_or_else(|| MarketError::expert_not_found(target))?;
        }

        let prior = self
            .repository
            .count_questions_by_diyer(input.diyer_id)
            .await?;
        let free = self.config.pricing.first_question_free && prior == 0;

        let difficulty = pricing::score(&DifficultyInput {
            body: &input.body,
            category: &input.category,
            context: input.context.as_ref(),
            photo_count: input.photo_count,
        });
        let dynamic = self
            .toggles
            .is_enabled(Feature::DynamicPricing, input.diyer_id);
        let quote = pricing::quote(difficulty, &self.config.pricing, dynamic, free);

        let direct = input.target_expert_id.is_some();
        let bidding_enabled = self.toggles.is_enabled(Feature::Bidding, input.diyer_id);
        let bidding = bidding::qualifies_for_bidding(difficulty, free, direct, bidding_enabled);

        let now = Utc::now();
        let question_id = Uuid::now_v7();

        let credit_applied_cents = if input.apply_credit && !free && !bidding {
            self.apply_credit(input.diyer_id, question_id, quote.price_cents)
                .await?
        } else {
            0
        };

        let question = Question {
            id: question_id,
            diyer_id: input.diyer_id,
            category: input.category.trim().to_string(),
            body: input.body,
            photo_count: input.photo_count,
            expert_id: None,
            target_expert_id: input.target_expert_id,
            status: QuestionStatus::Open,
            marked_not_helpful: false,
            payout_status: if quote.free {
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
            price_cents: quote.price_cents,
            platform_fee_cents: quote.platform_fee_cents,
            expert_payout_cents: quote.expert_payout_cents,
            pricing_mode: if bidding {
                PricingMode::Bidding
            } else {
                PricingMode::Fixed
            },
            difficulty_score: difficulty.score,
            price_tier: difficulty.tier,
            bid_deadline: bidding.then(|| now + self.config.bid_window()),
            bid_count: 0,
            accepted_bid_id: None,
            current_tier: 1,
            credit_applied_cents,
            credit_owed_cents: 0,
            charge_ref: None,
            created_at: now,
            updated_at: now,
        };

        let stored = match self.repository.insert_question(question).await {
            Ok(stored) => stored,
            Err(e) => {
                if credit_applied_cents > 0 {
                    // Give the credit back; the question never existed.
                    if let Err(refund) = self
                        .payments
                        .issue_credit(
                            input.diyer_id,
                            credit_applied_cents,
                            CreditReason::AppliedToQuestion,
                            None,
                        )
                        .await
                    {
                        warn!(error = %refund, "Failed to restore applied credit");
                    }
                }
                return Err(e);
            }
        };

        MarketplaceMetrics::record_question_submitted(&stored.pricing_mode.to_string(), quote.free);
        info!(
            question_id = %stored.id,
            price_cents = stored.price_cents,
            difficulty = stored.difficulty_score,
            pricing_mode = %stored.pricing_mode,
            "Question submitted"
        );
        Ok(stored)
    }

    /// Claim a question and take the charge for it
    #[instrument(skip(self), fields(question_id = %question_id, expert_id = %expert_id))]
    pub async fn claim_question(
        &self,
        question_id: Uuid,
        expert_id: Uuid,
    ) -> MarketResult<ClaimReceipt> {
        self.require_expert(expert_id).await?;

        let mut receipt = match self.claims.try_claim(question_id, expert_id).await {
            Ok(receipt) => receipt,
            Err(e) => {
                if e.is_retryable_race() {
                    MarketplaceMetrics::record_claim("lost");
                }
                return Err(e);
            }
        };

        let amount = receipt.question.chargeable_cents();
        if amount > 0 {
            let key = claim_charge_key(&receipt.question, expert_id);

            match self.charge_diyer(&receipt.question, amount, key).await {
                Ok(charge_ref) => {
                    let stored = self
                        .store_charge_ref(&receipt.question, expert_id, &charge_ref)
                        .await?;
                    if stored == 0 {
                        self.refund_orphaned_charge(question_id, &charge_ref).await;
                        MarketplaceMetrics::record_claim("expired");
                        return Err(MarketError::Conflict(ConflictReason::ClaimExpired));
                    }
                    receipt.question.charge_ref = Some(charge_ref);
                }
                Err(e) => {
                    self.claims.revert_claim(question_id, expert_id).await?;
                    MarketplaceMetrics::record_claim("reverted");
                    return Err(e);
                }
            }
        }

        MarketplaceMetrics::record_claim("won");
        self.notify(
            Notification::new(
                receipt.question.diyer_id,
                NotificationKind::QuestionClaimed,
                "An expert is on your question",
                "Your question was claimed and is being answered.",
            )
            .for_question(question_id),
        )
        .await;

        Ok(receipt)
    }

    /// Answer a claimed question before its claim window ends
    #[instrument(skip(self, answer), fields(question_id = %question_id, expert_id = %expert_id))]
    pub async fn submit_answer(
        &self,
        question_id: Uuid,
        expert_id: Uuid,
        answer: String,
    ) -> MarketResult<Question> {
        if answer.trim().is_empty() {
            return Err(MarketError::Validation("answer cannot be empty".to_string()));
        }

        let question = self.load(question_id).await?;
        if question.expert_id != Some(expert_id) {
            return Err(MarketError::Permission(
                "only the assigned expert can answer".to_string(),
            ));
        }
        Self::expect_status(&question, QuestionStatus::Claimed)?;

        let now = Utc::now();
        if question.claim_expired(now) {
            return Err(MarketError::Conflict(ConflictReason::ClaimExpired));
        }

        let affected = self
            .repository
            .conditional_update(
                question_id,
                &[
                    QuestionPredicate::StatusIs(QuestionStatus::Claimed),
                    QuestionPredicate::ExpertIs(expert_id),
                    QuestionPredicate::ClaimActiveAt(now),
                ],
                QuestionPatch {
                    status: Some(QuestionStatus::Answered),
                    answered_at: Some(Some(now)),
                    answer: Some(Some(answer)),
                    claim_expires_at: Some(None),
                    ..Default::default()
                },
            )
            .await?;

        if affected == 0 {
            let current = self.load(question_id).await?;
            Self::expect_status(&current, QuestionStatus::Claimed)?;
            return Err(MarketError::Conflict(ConflictReason::ClaimExpired));
        }

        let answered = self.load(question_id).await?;
        self.notify(
            Notification::new(
                answered.diyer_id,
                NotificationKind::AnswerSubmitted,
                "Your answer is ready",
                "An expert answered your question.",
            )
            .for_question(question_id),
        )
        .await;

        info!("Answer submitted");
        Ok(answered)
    }

    /// Accept an answer and pay the expert
    #[instrument(skip(self), fields(question_id = %question_id, diyer_id = %diyer_id))]
    pub async fn accept_answer(
        &self,
        question_id: Uuid,
        diyer_id: Uuid,
        rating: Option<u8>,
    ) -> MarketResult<AcceptOutcome> {
        if let Some(rating) = rating {
            if !(1..=5).contains(&rating) {
                return Err(MarketError::Validation(format!(
                    "rating must be between 1 and 5, got {}",
                    rating
                )));
            }
        }

        let scoped = UserScopedQuestions::new(self.repository.as_ref(), diyer_id);
        let question = scoped.get(question_id).await?;
        Self::expect_status(&question, QuestionStatus::Answered)?;

        let affected = self
            .repository
            .conditional_update(
                question_id,
                &[QuestionPredicate::StatusIs(QuestionStatus::Answered)],
                QuestionPatch {
                    status: Some(QuestionStatus::Accepted),
                    accepted_at: Some(Some(Utc::now())),
                    rating: Some(rating),
                    ..Default::default()
                },
            )
            .await?;
        if affected == 0 {
            let current = self.load(question_id).await?;
            Self::expect_status(&current, QuestionStatus::Answered)?;
        }

        let accepted = self.load(question_id).await?;
        info!("Answer accepted");

        let payout = self.settle_payout(&accepted).await;
        let question = if payout.is_completed() {
            self.load(question_id).await?
        } else {
            accepted
        };

        if let Some(expert_id) = question.expert_id {
            self.notify(
                Notification::new(
                    expert_id,
                    NotificationKind::AnswerAccepted,
                    "Your answer was accepted",
                    "The DIYer accepted your answer.",
                )
                .for_question(question_id),
            )
            .await;
        }

        Ok(AcceptOutcome { question, payout })
    }

    /// Close an answered question as not helpful: credit the DIYer and pay
    /// the expert half of the frozen payout.
    #[instrument(skip(self), fields(question_id = %question_id, diyer_id = %diyer_id))]
    pub async fn mark_not_helpful(
        &self,
        question_id: Uuid,
        diyer_id: Uuid,
    ) -> MarketResult<NotHelpfulOutcome> {
        let scoped = UserScopedQuestions::new(self.repository.as_ref(), diyer_id);
        let question = scoped.get(question_id).await?;
        Self::expect_status(&question, QuestionStatus::Answered)?;

        // The owed credit commits with the status change; issuing it is a
        // separate step that `retry_owed_credits` can finish.
        let credit_added_cents = (question.price_cents - question.credit_applied_cents).max(0);
        let affected = self
            .repository
            .conditional_update(
                question_id,
                &[
                    QuestionPredicate::StatusIs(QuestionStatus::Answered),
                    QuestionPredicate::TierIs(question.current_tier),
                ],
                QuestionPatch {
                    status: Some(QuestionStatus::Resolved),
                    marked_not_helpful: Some(true),
                    credit_owed_cents: Some(credit_added_cents),
                    ..Default::default()
                },
            )
            .await?;
        if affected == 0 {
            let current = self.load(question_id).await?;
            Self::expect_status(&current, QuestionStatus::Answered)?;
            return Err(MarketError::Conflict(ConflictReason::TierChanged));
        }

        let resolved = self.load(question_id).await?;

        let credit_balance_cents = match self.issue_owed_credit(&resolved).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(error = %e, "Failed to issue not-helpful credit, left owed for retry");
                None
            }
        };

        let partial_payout_cents = resolved.expert_payout_cents / 2;
        let partial_payout = self.settle_payout(&resolved).await;
        let question = if partial_payout.is_completed() {
            self.load(question_id).await?
        } else {
            resolved
        };

        if let Some(expert_id) = question.expert_id {
            self.notify(
                Notification::new(
                    expert_id,
                    NotificationKind::MarkedNotHelpful,
                    "Answer marked not helpful",
                    "The DIYer marked your answer as not helpful.",
                )
                .for_question(question_id),
            )
            .await;
        }

        info!(credit_added_cents, partial_payout_cents, "Question marked not helpful");
        Ok(NotHelpfulOutcome {
            question,
            credit_added_cents,
            credit_balance_cents,
            partial_payout_cents,
            partial_payout,
        })
    }

    /// Questions the caller owns, after sweeping expired claims
    #[instrument(skip(self), fields(diyer_id = %diyer_id))]
    pub async fn list_my_questions(&self, diyer_id: Uuid) -> MarketResult<Vec<Question>> {
        self.sweep_before_read().await;
        UserScopedQuestions::new(self.repository.as_ref(), diyer_id)
            .list()
            .await
    }

    // =========================================================================
    // Bidding
    // =========================================================================

    #[instrument(skip(self), fields(question_id = %question_id, expert_id = %expert_id))]
    pub async fn submit_bid(
        &self,
        question_id: Uuid,
        expert_id: Uuid,
        proposed_price_cents: i64,
    ) -> MarketResult<Bid> {
        bidding::validate_bid_price(proposed_price_cents)?;
        self.require_expert(expert_id).await?;

        let bid = match self
            .auctioneer
            .submit_bid(question_id, expert_id, proposed_price_cents)
            .await
        {
            Ok(bid) => bid,
            Err(e) => {
                MarketplaceMetrics::record_bid("submit", "rejected");
                return Err(e);
            }
        };
        MarketplaceMetrics::record_bid("submit", "accepted");

        let question = self.load(question_id).await?;
        self.notify(
            Notification::new(
                question.diyer_id,
                NotificationKind::BidReceived,
                "New bid on your question",
                format!(
                    "An expert offered to answer for ${:.2}.",
                    proposed_price_cents as f64 / 100.0
                ),
            )
            .for_question(question_id),
        )
        .await;

        Ok(bid)
    }

    #[instrument(skip(self), fields(bid_id = %bid_id, expert_id = %expert_id))]
    pub async fn withdraw_bid(&self, bid_id: Uuid, expert_id: Uuid) -> MarketResult<Bid> {
        let bid = self.auctioneer.withdraw_bid(bid_id, expert_id).await?;
        MarketplaceMetrics::record_bid("withdraw", "accepted");
        Ok(bid)
    }

    /// Bids on a question, for its owner
    pub async fn list_bids(&self, question_id: Uuid, diyer_id: Uuid) -> MarketResult<Vec<Bid>> {
        UserScopedQuestions::new(self.repository.as_ref(), diyer_id)
            .get(question_id)
            .await?;
        self.repository.list_bids(question_id).await
    }

    /// Accept a bid, claiming the question for the bidder and charging the
    /// DIYer the bid price
    #[instrument(skip(self), fields(question_id = %question_id, bid_id = %bid_id))]
    pub async fn accept_bid(
        &self,
        question_id: Uuid,
        bid_id: Uuid,
        diyer_id: Uuid,
    ) -> MarketResult<ClaimReceipt> {
        UserScopedQuestions::new(self.repository.as_ref(), diyer_id)
            .get(question_id)
            .await?;

        let (before, mut after, bid) = self.auctioneer.accept_bid(question_id, bid_id).await?;

        let amount = after.chargeable_cents();
        if amount > 0 {
            match self
                .charge_diyer(&after, amount, format!("bid-{}", bid.id))
                .await
            {
                Ok(charge_ref) => {
                    let stored = self
                        .store_charge_ref(&after, bid.expert_id, &charge_ref)
                        .await?;
                    if stored == 0 {
                        self.refund_orphaned_charge(question_id, &charge_ref).await;
                        MarketplaceMetrics::record_bid("accept", "expired");
                        return Err(MarketError::Conflict(ConflictReason::ClaimExpired));
                    }
                    after.charge_ref = Some(charge_ref);
                }
                Err(e) => {
                    self.auctioneer.revert_acceptance(&before, bid.id).await?;
                    MarketplaceMetrics::record_bid("accept", "reverted");
                    return Err(e);
                }
            }
        }

        MarketplaceMetrics::record_bid("accept", "accepted");
        self.notify(
            Notification::new(
                bid.expert_id,
                NotificationKind::BidAccepted,
                "Your bid was accepted",
                "The question is now claimed by you.",
            )
            .for_question(question_id),
        )
        .await;

        let claim_expires_at = after.claim_expires_at.unwrap_or_else(Utc::now);
        Ok(ClaimReceipt {
            question: after,
            claim_expires_at,
        })
    }

    // =========================================================================
    // Conversation
    // =========================================================================

    /// Post a conversation message. DIYer messages pass the tier gate first.
    #[instrument(skip(self, body), fields(question_id = %question_id, author_id = %author_id))]
    pub async fn post_message(
        &self,
        question_id: Uuid,
        author_id: Uuid,
        body: String,
    ) -> MarketResult<MessageOutcome> {
        if body.trim().is_empty() {
            return Err(MarketError::Validation("message cannot be empty".to_string()));
        }

        let question = self.load(question_id).await?;
        let author_role = if question.diyer_id == author_id {
            AuthorRole::Diyer
        } else if question.expert_id == Some(author_id) {
            AuthorRole::Expert
        } else {
            return Err(MarketError::Permission(
                "only the DIYer and the assigned expert can post".to_string(),
            ));
        };

        if !matches!(
            question.status,
            QuestionStatus::Claimed | QuestionStatus::Answered
        ) {
            return Err(MarketError::Conflict(ConflictReason::InvalidStatus {
                expected: QuestionStatus::Answered,
                actual: question.status,
            }));
        }

        if author_role == AuthorRole::Diyer {
            let so_far = self
                .repository
                .count_messages(question_id, AuthorRole::Diyer)
                .await?;
            let decision = tier_gate::evaluate(
                &self.config.tiers,
                GateInput {
                    author: author_role,
                    current_tier: question.current_tier,
                    diyer_messages_so_far: u32::try_from(so_far).unwrap_or(u32::MAX),
                    price_cents: question.price_cents,
                },
            );
            if decision.blocked {
                info!(next_tier = ?decision.next_tier, "Message requires tier upgrade");
                return Ok(MessageOutcome::UpgradeRequired(decision));
            }
        }

        let message = self
            .repository
            .insert_message(Message {
                id: Uuid::now_v7(),
                question_id,
                author_id,
                author_role,
                body,
                created_at: Utc::now(),
            })
            .await?;
        Ok(MessageOutcome::Posted(message))
    }

    /// Move the conversation up one tier and charge the flat upgrade cost
    #[instrument(skip(self), fields(question_id = %question_id, diyer_id = %diyer_id))]
    pub async fn request_tier_upgrade(
        &self,
        question_id: Uuid,
        diyer_id: Uuid,
    ) -> MarketResult<TierUpgrade> {
        let question = UserScopedQuestions::new(self.repository.as_ref(), diyer_id)
            .get(question_id)
            .await?;

        if !matches!(
            question.status,
            QuestionStatus::Claimed | QuestionStatus::Answered
        ) {
            return Err(MarketError::Conflict(ConflictReason::InvalidStatus {
                expected: QuestionStatus::Answered,
                actual: question.status,
            }));
        }
        if question.price_cents <= 0 {
            return Err(MarketError::Validation(
                "free questions have no conversation tiers".to_string(),
            ));
        }
        if question.current_tier >= MAX_TIER {
            return Err(MarketError::Conflict(ConflictReason::MaxTierReached));
        }

        let from_tier = question.current_tier;
        let tier = from_tier + 1;
        let cost_cents = self.config.tiers.upgrade_cost(tier);
        let split = pricing::split_increase(
            question.price_cents,
            question.platform_fee_cents,
            cost_cents,
        );

        let affected = self
            .repository
            .conditional_update(
                question_id,
                &[
                    QuestionPredicate::TierIs(from_tier),
                    QuestionPredicate::StatusIn(vec![
                        QuestionStatus::Claimed,
                        QuestionStatus::Answered,
                    ]),
                ],
                QuestionPatch {
                    current_tier: Some(tier),
                    price_cents: Some(question.price_cents + cost_cents),
                    platform_fee_cents: Some(question.platform_fee_cents + split.platform_fee_cents),
                    expert_payout_cents: Some(
                        question.expert_payout_cents + split.expert_payout_cents,
                    ),
                    ..Default::default()
                },
            )
            .await?;
        if affected == 0 {
            MarketplaceMetrics::record_tier_upgrade(tier, "conflict");
            return Err(MarketError::Conflict(ConflictReason::TierChanged));
        }

        let charge_ref = if cost_cents > 0 {
            let key = format!("{}{}", tier_charge_prefix(&question), tier);
            match self.charge_diyer(&question, cost_cents, key).await {
                Ok(reference) => Some(reference),
                Err(e) => {
                    self.repository
                        .conditional_update(
                            question_id,
                            &[QuestionPredicate::TierIs(tier)],
                            QuestionPatch {
                                current_tier: Some(from_tier),
                                price_cents: Some(question.price_cents),
                                platform_fee_cents: Some(question.platform_fee_cents),
                                expert_payout_cents: Some(question.expert_payout_cents),
                                ..Default::default()
                            },
                        )
                        .await?;
                    MarketplaceMetrics::record_tier_upgrade(tier, "reverted");
                    return Err(e);
                }
            }
        } else {
            None
        };

        // A sweep that released the claim mid-charge has already unwound
        // the tier; the charge then has nothing to pay for.
        if let (Some(reference), Some(claimed_at)) = (&charge_ref, question.claimed_at) {
            let still_claimed = self
                .repository
                .conditional_update(
                    question_id,
                    &[QuestionPredicate::ClaimedAtIs(claimed_at)],
                    QuestionPatch::default(),
                )
                .await?;
            if still_claimed == 0 {
                self.refund_orphaned_charge(question_id, reference).await;
                MarketplaceMetrics::record_tier_upgrade(tier, "expired");
                return Err(MarketError::Conflict(ConflictReason::ClaimExpired));
            }
        }

        MarketplaceMetrics::record_tier_upgrade(tier, "upgraded");
        let upgraded = self.load(question_id).await?;

        if let Some(expert_id) = upgraded.expert_id {
            self.notify(
                Notification::new(
                    expert_id,
                    NotificationKind::TierUpgraded,
                    "Conversation upgraded",
                    format!("The DIYer upgraded the conversation to tier {}.", tier),
                )
                .for_question(question_id),
            )
            .await;
        }

        info!(tier, cost_cents, "Conversation tier upgraded");
        Ok(TierUpgrade {
            question: upgraded,
            tier,
            cost_cents,
            charge_ref,
        })
    }

    // =========================================================================
    // Experts
    // =========================================================================

    /// Settings path for an expert's own profile
    pub async fn save_expert_profile(&self, profile: ExpertProfile) -> MarketResult<ExpertProfile> {
        self.repository.save_expert(profile).await
    }

    pub async fn save_billing_profile(
        &self,
        profile: BillingProfile,
    ) -> MarketResult<BillingProfile> {
        self.repository.save_billing_profile(profile).await
    }

    #[instrument(skip(self), fields(expert_id = %expert_id))]
    pub async fn recalculate_reputation(&self, expert_id: Uuid) -> MarketResult<Reputation> {
        self.repository
            .get_expert(expert_id)
            .await?
            .ok_or_else(|| MarketError::expert_not_found(expert_id))?;

        let metrics = self.repository.expert_metrics(expert_id).await?;
        let reputation = reputation::evaluate(&metrics);
        self.repository
            .save_reputation(expert_id, reputation)
            .await?;

        MarketplaceMetrics::record_reputation(&reputation.level.to_string());
        info!(score = reputation.score, level = %reputation.level, "Reputation recalculated");
        Ok(reputation)
    }

    pub async fn record_correction(&self, expert_id: Uuid) -> MarketResult<()> {
        self.repository.record_correction(expert_id).await
    }

    pub async fn record_graduation(&self, expert_id: Uuid) -> MarketResult<()> {
        self.repository.record_graduation(expert_id).await
    }

    /// Ranked open questions for an expert, after sweeping expired claims
    #[instrument(skip(self), fields(expert_id = %expert_id))]
    pub async fn build_queue(&self, expert_id: Uuid) -> MarketResult<ExpertQueue> {
        let profile = self
            .repository
            .get_expert(expert_id)
            .await?
            .ok_or_else(|| MarketError::expert_not_found(expert_id))?;

        self.sweep_before_read().await;
        self.queue.build(&profile).await
    }

    // =========================================================================
    // Sweeps & Payouts
    // =========================================================================

    /// Release expired claims and refund every charge taken for them
    #[instrument(skip(self))]
    pub async fn release_expired_claims(&self) -> MarketResult<SweepReport> {
        let released = self.claims.release_expired(Utc::now()).await?;
        let mut report = SweepReport {
            released: released.len(),
            ..Default::default()
        };

        for question in &released {
            for charge_ref in self.claim_charges(question).await {
                match self.payments.refund(question.id, &charge_ref).await {
                    PayoutOutcome::Completed { .. } => report.refunded += 1,
                    PayoutOutcome::Skipped { .. } => {}
                    PayoutOutcome::Failed { .. } | PayoutOutcome::Unknown { .. } => {
                        report.refund_failures += 1
                    }
                }
            }

            if let Some(expert_id) = question.expert_id {
                self.notify(
                    Notification::new(
                        expert_id,
                        NotificationKind::ClaimExpired,
                        "Your claim expired",
                        "The question went back to the queue.",
                    )
                    .for_question(question.id),
                )
                .await;
            }
        }

        MarketplaceMetrics::record_claims_released(report.released);
        if report.released > 0 {
            info!(
                released = report.released,
                refunded = report.refunded,
                refund_failures = report.refund_failures,
                "Expired claims swept"
            );
        }
        Ok(report)
    }

    /// Re-attempt transfers left pending on settled questions
    #[instrument(skip(self))]
    pub async fn retry_pending_payouts(&self) -> MarketResult<PayoutRetryReport> {
        let mut pending = Vec::new();
        for status in [QuestionStatus::Accepted, QuestionStatus::Resolved] {
            pending.extend(
                self.repository
                    .query_questions(QuestionQuery {
                        status: Some(status),
                        payout_status: Some(PayoutStatus::Pending),
                        limit: 500,
                        ..Default::default()
                    })
                    .await?,
            );
        }

        let mut report = PayoutRetryReport::default();
        for question in pending {
            // Resolved without not-helpful means nothing is owed.
            if question.status == QuestionStatus::Resolved && !question.marked_not_helpful {
                continue;
            }
            report.attempted += 1;
            if self.settle_payout(&question).await.is_completed() {
                report.transferred += 1;
            }
        }

        info!(
            attempted = report.attempted,
            transferred = report.transferred,
            "Pending payouts retried"
        );
        Ok(report)
    }

    /// Issue not-helpful credits whose ledger write failed earlier
    #[instrument(skip(self))]
    pub async fn retry_owed_credits(&self) -> MarketResult<CreditRetryReport> {
        let owed = self
            .repository
            .query_questions(QuestionQuery {
                status: Some(QuestionStatus::Resolved),
                credit_owed: true,
                limit: 500,
                ..Default::default()
            })
            .await?;

        let mut report = CreditRetryReport::default();
        for question in owed {
            report.attempted += 1;
            match self.issue_owed_credit(&question).await {
                Ok(_) => report.issued += 1,
                Err(e) => {
                    warn!(question_id = %question.id, error = %e, "Owed credit still not issued")
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                issued = report.issued,
                "Owed credits retried"
            );
        }
        Ok(report)
    }

    pub async fn credit_balance(&self, diyer_id: Uuid) -> MarketResult<i64> {
        self.payments.credit_balance(diyer_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{AccountDirectory, QuestionStore};
    use crate::memory::InMemoryMarketplaceStore;
    use crate::payments::MockPaymentGateway;
    use crate::testing::{expert, open_question};

    struct Fixture {
        store: Arc<InMemoryMarketplaceStore>,
        service: MarketplaceService<InMemoryMarketplaceStore>,
        expert: ExpertProfile,
        question: Question,
    }

    async fn fixture(gateway: MockPaymentGateway, price_cents: i64) -> Fixture {
        let store = Arc::new(InMemoryMarketplaceStore::new());
        let service = MarketplaceService::new(
            store.clone(),
            Arc::new(gateway),
            MarketplaceConfig::default(),
        );

        let expert = store.save_expert(expert(&[])).await.unwrap();
        let question = store
            .insert_question(open_question(Uuid::now_v7(), price_cents))
            .await
            .unwrap();
        store
            .save_billing_profile(BillingProfile {
                diyer_id: question.diyer_id,
                customer_ref: "cus_1".to_string(),
                payment_method_ref: Some("pm_1".to_string()),
            })
            .await
            .unwrap();

        Fixture {
            store,
            service,
            expert,
            question,
        }
    }

    #[tokio::test]
    async fn test_declined_charge_reverts_claim() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_charge()
            .times(1)
            .returning(|_| Err(PaymentError::Declined("card_declined".into())));
        gateway.expect_name().return_const("mock");

        let f = fixture(gateway, 3000).await;
        let err = f
            .service
            .claim_question(f.question.id, f.expert.expert_id)
            .await
            .unwrap_err();

        assert!(matches!(err, MarketError::Payment(PaymentError::Declined(_))));
        let stored = f.store.get_question(f.question.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QuestionStatus::Open);
        assert_eq!(stored.expert_id, None);
        assert_eq!(stored.claim_expires_at, None);
    }

    #[tokio::test]
    async fn test_charge_amount_excludes_applied_credit() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_charge()
            .withf(|request| request.amount_cents == 1000)
            .times(1)
            .returning(|_| Ok("pi_1".to_string()));
        gateway.expect_name().return_const("mock");

        let f = fixture(gateway, 3000).await;
        let mut question = open_question(f.question.diyer_id, 3000);
        question.credit_applied_cents = 2000;
        let question = f.store.insert_question(question).await.unwrap();

        let receipt = f
            .service
            .claim_question(question.id, f.expert.expert_id)
            .await
            .unwrap();
        assert_eq!(receipt.question.charge_ref.as_deref(), Some("pi_1"));
    }

    #[tokio::test]
    async fn test_free_question_skips_gateway() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_charge().never();

        let f = fixture(gateway, 0).await;
        let receipt = f
            .service
            .claim_question(f.question.id, f.expert.expert_id)
            .await
            .unwrap();
        assert_eq!(receipt.question.status, QuestionStatus::Claimed);
        assert_eq!(receipt.question.charge_ref, None);
    }

    #[tokio::test]
    async fn test_non_expert_cannot_claim() {
        let f = fixture(MockPaymentGateway::new(), 3000).await;
        let err = f
            .service
            .claim_question(f.question.id, Uuid::now_v7())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Permission(_)));
    }

    #[tokio::test]
    async fn test_failed_tier_charge_restores_amounts() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_charge()
            .withf(|request| request.idempotency_key.starts_with("claim-"))
            .returning(|_| Ok("pi_claim".to_string()));
        gateway
            .expect_charge()
            .withf(|request| request.idempotency_key.starts_with("tier-"))
            .returning(|_| Err(PaymentError::Gateway("unavailable".into())));
        gateway.expect_name().return_const("mock");

        let f = fixture(gateway, 4000).await;
        f.service
            .claim_question(f.question.id, f.expert.expert_id)
            .await
            .unwrap();

        let err = f
            .service
            .request_tier_upgrade(f.question.id, f.question.diyer_id)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Payment(_)));

        let stored = f.store.get_question(f.question.id).await.unwrap().unwrap();
        assert_eq!(stored.current_tier, 1);
        assert_eq!(stored.price_cents, 4000);
        assert_eq!(stored.platform_fee_cents, 800);
    }

    #[tokio::test]
    async fn test_tier_upgrade_splits_with_frozen_ratio() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_charge()
            .returning(|request| Ok(format!("pi_{}", request.idempotency_key)));
        gateway.expect_name().return_const("mock");

        let f = fixture(gateway, 4000).await;
        f.service
            .claim_question(f.question.id, f.expert.expert_id)
            .await
            .unwrap();

        let upgrade = f
            .service
            .request_tier_upgrade(f.question.id, f.question.diyer_id)
            .await
            .unwrap();

        assert_eq!(upgrade.tier, 2);
        assert_eq!(upgrade.cost_cents, 1000);
        assert_eq!(upgrade.question.price_cents, 5000);
        assert_eq!(upgrade.question.platform_fee_cents, 1000);
        assert_eq!(upgrade.question.expert_payout_cents, 4000);
    }

    #[tokio::test]
    async fn test_transfer_failure_keeps_acceptance() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_charge()
            .returning(|_| Ok("pi_1".to_string()));
        gateway
            .expect_transfer()
            .times(1)
            .returning(|_| Err(PaymentError::Gateway("payouts paused".into())));
        gateway.expect_name().return_const("mock");

        let f = fixture(gateway, 3000).await;
        f.service
            .claim_question(f.question.id, f.expert.expert_id)
            .await
            .unwrap();
        f.service
            .submit_answer(f.question.id, f.expert.expert_id, "Replace the capacitor".into())
            .await
            .unwrap();

        let outcome = f
            .service
            .accept_answer(f.question.id, f.question.diyer_id, Some(5))
            .await
            .unwrap();

        assert!(matches!(outcome.payout, PayoutOutcome::Failed { .. }));
        assert_eq!(outcome.question.status, QuestionStatus::Accepted);
        assert_eq!(outcome.question.payout_status, PayoutStatus::Pending);
        assert_eq!(outcome.question.rating, Some(5));
    }
}
