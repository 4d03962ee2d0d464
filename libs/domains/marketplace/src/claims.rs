//! Claim Coordinator
//!
//! A claim is one conditional update on `status = open`; the affected-row
//! count decides the winner. Expiry has no timer: readers call
//! [`ClaimCoordinator::release_expired`] before they look at the pool, and
//! each row is released under `status = claimed AND expert_id = X AND
//! claim_expires_at < now` so an answered question is never reopened.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{ConflictReason, MarketError, MarketResult};
use crate::models::{ClaimReceipt, Question, QuestionStatus};
use crate::pricing;
use crate::repository::{QuestionPatch, QuestionPredicate, QuestionQuery, QuestionStore};
use crate::tier_gate::TierGatePolicy;

/// Upper bound on rows a single sweep looks at.
const SWEEP_BATCH: usize = 500;

/// Ownership and targeting rules checked before the conditional update.
pub fn check_claimable(question: &Question, expert_id: Uuid) -> MarketResult<()> {
    if question.diyer_id == expert_id {
        return Err(MarketError::Permission(
            "experts cannot claim their own questions".to_string(),
        ));
    }
    if let Some(target) = question.target_expert_id {
        if target != expert_id {
            return Err(MarketError::Permission(
                "question was sent directly to another expert".to_string(),
            ));
        }
    }
    conflict_for_status(question.status).map_or(Ok(()), Err)
}

fn conflict_for_status(status: QuestionStatus) -> Option<MarketError> {
    match status {
        QuestionStatus::Open => None,
        QuestionStatus::Claimed => Some(MarketError::Conflict(ConflictReason::AlreadyClaimed)),
        actual => Some(MarketError::Conflict(ConflictReason::InvalidStatus {
            expected: QuestionStatus::Open,
            actual,
        })),
    }
}

/// Release patch that also drops the conversation tiers bought during the
/// claim, restoring the frozen tier-1 amounts.
pub fn release_to_base(question: &Question, tiers: &TierGatePolicy) -> QuestionPatch {
    let mut price_cents = question.price_cents;
    let mut fee_cents = question.platform_fee_cents;
    for tier in (2..=question.current_tier).rev() {
        match pricing::revert_increase(price_cents, fee_cents, tiers.upgrade_cost(tier)) {
            Some(base) => {
                price_cents = base.platform_fee_cents + base.expert_payout_cents;
                fee_cents = base.platform_fee_cents;
            }
            None => {
                warn!(question_id = %question.id, tier, "Tier amounts do not match policy, keeping them");
                return QuestionPatch::release();
            }
        }
    }

    QuestionPatch {
        current_tier: Some(1),
        price_cents: Some(price_cents),
        platform_fee_cents: Some(fee_cents),
        expert_payout_cents: Some(price_cents - fee_cents),
        ..QuestionPatch::release()
    }
}

pub struct ClaimCoordinator<S: QuestionStore + ?Sized> {
    store: Arc<S>,
    claim_window: Duration,
    tiers: TierGatePolicy,
}

impl<S: QuestionStore + ?Sized> ClaimCoordinator<S> {
    pub fn new(store: Arc<S>, claim_window: Duration) -> Self {
        Self {
            store,
            claim_window,
            tiers: TierGatePolicy::default(),
        }
    }

    /// Tier costs used to unwind upgrades when a claim expires.
    pub fn with_tier_policy(mut self, tiers: TierGatePolicy) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn claim_window(&self) -> Duration {
        self.claim_window
    }

    #[instrument(skip(self), fields(question_id = %question_id, expert_id = %expert_id))]
    pub async fn try_claim(&self, question_id: Uuid, expert_id: Uuid) -> MarketResult<ClaimReceipt> {
        let question = self
            .store
            .get_question(question_id)
            .await?
            .ok_or_else(|| MarketError::question_not_found(question_id))?;
        check_claimable(&question, expert_id)?;

        let now = Utc::now();
        let expires_at = now + self.claim_window;
        let affected = self
            .store
            .conditional_update(
                question_id,
                &[QuestionPredicate::StatusIs(QuestionStatus::Open)],
                QuestionPatch::claim(expert_id, now, expires_at),
            )
            .await?;

        if affected == 0 {
            let current = self
                .store
                .get_question(question_id)
                .await?
                .ok_or_else(|| MarketError::question_not_found(question_id))?;
            debug!(status = %current.status, "Claim race lost");
            return Err(conflict_for_status(current.status)
                .unwrap_or(MarketError::Conflict(ConflictReason::AlreadyClaimed)));
        }

        let question = self
            .store
            .get_question(question_id)
            .await?
            .ok_or_else(|| MarketError::question_not_found(question_id))?;

        info!(claim_expires_at = %expires_at, "Question claimed");
        Ok(ClaimReceipt {
            question,
            claim_expires_at: expires_at,
        })
    }

    /// Give a claim back after its charge failed. Only the claiming expert's
    /// claim is touched.
    #[instrument(skip(self), fields(question_id = %question_id, expert_id = %expert_id))]
    pub async fn revert_claim(&self, question_id: Uuid, expert_id: Uuid) -> MarketResult<u64> {
        let affected = self
            .store
            .conditional_update(
                question_id,
                &[
                    QuestionPredicate::StatusIs(QuestionStatus::Claimed),
                    QuestionPredicate::ExpertIs(expert_id),
                ],
                QuestionPatch::release(),
            )
            .await?;
        info!(affected, "Claim reverted");
        Ok(affected)
    }

    /// Reopen every claim whose window ended before `now`, back at tier 1.
    ///
    /// Returns the questions this call released, as they were just before
    /// release. Rows another sweeper got to first, or that were answered or
    /// upgraded in the meantime, are not included.
    #[instrument(skip(self))]
    pub async fn release_expired(&self, now: DateTime<Utc>) -> MarketResult<Vec<Question>> {
        let candidates = self
            .store
            .query_questions(QuestionQuery {
                status: Some(QuestionStatus::Claimed),
                claim_expired_before: Some(now),
                limit: SWEEP_BATCH,
                ..Default::default()
            })
            .await?;

        let mut released = Vec::new();
        for question in candidates {
            let Some(expert_id) = question.expert_id else {
                continue;
            };
            let affected = self
                .store
                .conditional_update(
                    question.id,
                    &[
                        QuestionPredicate::StatusIs(QuestionStatus::Claimed),
                        QuestionPredicate::ExpertIs(expert_id),
                        QuestionPredicate::ClaimExpiredBefore(now),
                        QuestionPredicate::TierIs(question.current_tier),
                    ],
                    release_to_base(&question, &self.tiers),
                )
                .await?;
            if affected == 1 {
                info!(question_id = %question.id, %expert_id, "Expired claim released");
                released.push(question);
            }
        }

        if released.is_empty() {
            debug!("No expired claims to release");
        }
        Ok(released)
    }
}
