//! Repository contracts for the engine.
//!
//! `QuestionStore` is the privileged, engine-only interface. It is the only
//! place conditional updates exist; the affected-row count it returns is the
//! sole source of truth for whether a transition happened. DIYer-facing reads
//! go through [`UserScopedQuestions`], which can only see the caller's rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{MarketError, MarketResult};
use crate::models::{
    AuthorRole, Bid, BidStatus, BillingProfile, CreditTransaction, ExpertMetrics, ExpertProfile,
    Message, PaymentAttempt, PayoutStatus, PricingMode, Question, QuestionStatus, Reputation,
};

/// One clause of a conditional update. All clauses must hold.
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionPredicate {
    StatusIs(QuestionStatus),
    StatusIn(Vec<QuestionStatus>),
    ExpertIs(Uuid),
    /// Same claim instant, so a re-claim by the same expert does not match
    ClaimedAtIs(DateTime<Utc>),
    ClaimExpiredBefore(DateTime<Utc>),
    /// Claim window still running at the instant
    ClaimActiveAt(DateTime<Utc>),
    NoAcceptedBid,
    AcceptedBidIs(Uuid),
    BidCountBelow(u32),
    /// No deadline, or the deadline is still ahead of the instant
    BidDeadlineAfter(DateTime<Utc>),
    TierIs(u8),
    PayoutStatusIs(PayoutStatus),
    CreditOwedIs(i64),
}

impl QuestionPredicate {
    pub fn matches(&self, question: &Question) -> bool {
        match self {
            QuestionPredicate::StatusIs(status) => question.status == *status,
            QuestionPredicate::StatusIn(statuses) => statuses.contains(&question.status),
            QuestionPredicate::ExpertIs(expert_id) => question.expert_id == Some(*expert_id),
            QuestionPredicate::ClaimedAtIs(at) => question.claimed_at == Some(*at),
            QuestionPredicate::ClaimExpiredBefore(now) => {
                question.claim_expires_at.is_some_and(|at| at < *now)
            }
            QuestionPredicate::ClaimActiveAt(now) => {
                question.claim_expires_at.is_some_and(|at| at >= *now)
            }
            QuestionPredicate::NoAcceptedBid => question.accepted_bid_id.is_none(),
            QuestionPredicate::AcceptedBidIs(bid_id) => question.accepted_bid_id == Some(*bid_id),
            QuestionPredicate::BidCountBelow(max) => question.bid_count < *max,
            QuestionPredicate::BidDeadlineAfter(now) => {
                question.bid_deadline.is_none_or(|deadline| *now < deadline)
            }
            QuestionPredicate::TierIs(tier) => question.current_tier == *tier,
            QuestionPredicate::PayoutStatusIs(status) => question.payout_status == *status,
            QuestionPredicate::CreditOwedIs(cents) => question.credit_owed_cents == *cents,
        }
    }
}

/// Field changes applied by a conditional update.
///
/// `Some(None)` clears a nullable column; `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionPatch {
    pub status: Option<QuestionStatus>,
    pub expert_id: Option<Option<Uuid>>,
    pub claimed_at: Option<Option<DateTime<Utc>>>,
    pub claim_expires_at: Option<Option<DateTime<Utc>>>,
    pub answered_at: Option<Option<DateTime<Utc>>>,
    pub accepted_at: Option<Option<DateTime<Utc>>>,
    pub answer: Option<Option<String>>,
    pub rating: Option<Option<u8>>,
    pub marked_not_helpful: Option<bool>,
    pub payout_status: Option<PayoutStatus>,
    pub price_cents: Option<i64>,
    pub platform_fee_cents: Option<i64>,
    pub expert_payout_cents: Option<i64>,
    pub accepted_bid_id: Option<Option<Uuid>>,
    pub current_tier: Option<u8>,
    pub charge_ref: Option<Option<String>>,
    pub credit_owed_cents: Option<i64>,
    pub increment_bid_count: bool,
}

impl QuestionPatch {
    /// Assign the question to an expert for a bounded window.
    pub fn claim(expert_id: Uuid, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(QuestionStatus::Claimed),
            expert_id: Some(Some(expert_id)),
            claimed_at: Some(Some(now)),
            claim_expires_at: Some(Some(expires_at)),
            ..Default::default()
        }
    }

    /// Return the question to the open pool.
    pub fn release() -> Self {
        Self {
            status: Some(QuestionStatus::Open),
            expert_id: Some(None),
            claimed_at: Some(None),
            claim_expires_at: Some(None),
            charge_ref: Some(None),
            ..Default::default()
        }
    }

    pub fn apply(&self, question: &mut Question, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            question.status = status;
        }
        if let Some(expert_id) = self.expert_id {
            question.expert_id = expert_id;
        }
        if let Some(claimed_at) = self.claimed_at {
            question.claimed_at = claimed_at;
        }
        if let Some(claim_expires_at) = self.claim_expires_at {
            question.claim_expires_at = claim_expires_at;
        }
        if let Some(answered_at) = self.answered_at {
            question.answered_at = answered_at;
        }
        if let Some(accepted_at) = self.accepted_at {
            question.accepted_at = accepted_at;
        }
        if let Some(answer) = &self.answer {
            question.answer = answer.clone();
        }
        if let Some(rating) = self.rating {
            question.rating = rating;
        }
        if let Some(flag) = self.marked_not_helpful {
            question.marked_not_helpful = flag;
        }
        if let Some(payout_status) = self.payout_status {
            question.payout_status = payout_status;
        }
        if let Some(price) = self.price_cents {
            question.price_cents = price;
        }
        if let Some(fee) = self.platform_fee_cents {
            question.platform_fee_cents = fee;
        }
        if let Some(payout) = self.expert_payout_cents {
            question.expert_payout_cents = payout;
        }
        if let Some(bid_id) = self.accepted_bid_id {
            question.accepted_bid_id = bid_id;
        }
        if let Some(tier) = self.current_tier {
            question.current_tier = tier;
        }
        if let Some(charge_ref) = &self.charge_ref {
            question.charge_ref = charge_ref.clone();
        }
        if let Some(owed) = self.credit_owed_cents {
            question.credit_owed_cents = owed;
        }
        if self.increment_bid_count {
            question.bid_count += 1;
        }
        question.updated_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuestionOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Filter for listing questions
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionQuery {
    pub status: Option<QuestionStatus>,
    pub diyer_id: Option<Uuid>,
    pub expert_id: Option<Uuid>,
    /// Case-insensitive category match
    pub categories: Option<Vec<String>>,
    pub exclude_diyer_id: Option<Uuid>,
    /// Pool questions plus direct questions targeted at this expert
    pub visible_to_expert: Option<Uuid>,
    pub pricing_mode: Option<PricingMode>,
    pub payout_status: Option<PayoutStatus>,
    pub claim_expired_before: Option<DateTime<Utc>>,
    /// Only questions with not-helpful credit still to issue
    pub credit_owed: bool,
    pub order: QuestionOrder,
    pub limit: usize,
}

impl Default for QuestionQuery {
    fn default() -> Self {
        Self {
            status: None,
            diyer_id: None,
            expert_id: None,
            categories: None,
            exclude_diyer_id: None,
            visible_to_expert: None,
            pricing_mode: None,
            payout_status: None,
            claim_expired_before: None,
            credit_owed: false,
            order: QuestionOrder::NewestFirst,
            limit: 100,
        }
    }
}

impl QuestionQuery {
    pub fn matches(&self, question: &Question) -> bool {
        if self.status.is_some_and(|s| question.status != s) {
            return false;
        }
        if self.diyer_id.is_some_and(|id| question.diyer_id != id) {
            return false;
        }
        if let Some(expert_id) = self.expert_id {
            if question.expert_id != Some(expert_id) {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            if !categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&question.category))
            {
                return false;
            }
        }
        if self.exclude_diyer_id.is_some_and(|id| question.diyer_id == id) {
            return false;
        }
        if let Some(expert_id) = self.visible_to_expert {
            if question
                .target_expert_id
                .is_some_and(|target| target != expert_id)
            {
                return false;
            }
        }
        if self.pricing_mode.is_some_and(|m| question.pricing_mode != m) {
            return false;
        }
        if self.payout_status.is_some_and(|p| question.payout_status != p) {
            return false;
        }
        if let Some(now) = self.claim_expired_before {
            if !question.claim_expires_at.is_some_and(|at| at < now) {
                return false;
            }
        }
        if self.credit_owed && question.credit_owed_cents <= 0 {
            return false;
        }
        true
    }
}

/// Privileged question persistence with conditional-update semantics
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuestionStore: Send + Sync {
    async fn insert_question(&self, question: Question) -> MarketResult<Question>;

    async fn get_question(&self, id: Uuid) -> MarketResult<Option<Question>>;

    /// Apply `patch` iff every predicate holds, atomically. Returns affected rows.
    async fn conditional_update(
        &self,
        id: Uuid,
        predicates: &[QuestionPredicate],
        patch: QuestionPatch,
    ) -> MarketResult<u64>;

    async fn query_questions(&self, query: QuestionQuery) -> MarketResult<Vec<Question>>;

    async fn count_questions_by_diyer(&self, diyer_id: Uuid) -> MarketResult<u64>;

    async fn insert_bid(&self, bid: Bid) -> MarketResult<Bid>;

    async fn get_bid(&self, id: Uuid) -> MarketResult<Option<Bid>>;

    async fn list_bids(&self, question_id: Uuid) -> MarketResult<Vec<Bid>>;

    /// Move a bid from one status to another. Returns affected rows.
    async fn update_bid_status(&self, id: Uuid, from: BidStatus, to: BidStatus)
    -> MarketResult<u64>;

    async fn insert_message(&self, message: Message) -> MarketResult<Message>;

    async fn count_messages(&self, question_id: Uuid, role: AuthorRole) -> MarketResult<u64>;
}

/// Expert profiles, reputation inputs and DIYer billing details
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get_expert(&self, expert_id: Uuid) -> MarketResult<Option<ExpertProfile>>;

    /// Settings path: specialties, subscription and payout account.
    async fn save_expert(&self, profile: ExpertProfile) -> MarketResult<ExpertProfile>;

    async fn save_reputation(&self, expert_id: Uuid, reputation: Reputation) -> MarketResult<()>;

    async fn expert_metrics(&self, expert_id: Uuid) -> MarketResult<ExpertMetrics>;

    async fn record_correction(&self, expert_id: Uuid) -> MarketResult<()>;

    async fn record_graduation(&self, expert_id: Uuid) -> MarketResult<()>;

    async fn billing_profile(&self, diyer_id: Uuid) -> MarketResult<Option<BillingProfile>>;

    async fn save_billing_profile(&self, profile: BillingProfile) -> MarketResult<BillingProfile>;
}

/// Append-only DIYer credit ledger
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Append an entry, lazily creating the DIYer's account. Returns the new balance.
    async fn append_credit(&self, entry: CreditTransaction) -> MarketResult<i64>;

    async fn credit_balance(&self, diyer_id: Uuid) -> MarketResult<i64>;

    async fn credit_history(&self, diyer_id: Uuid) -> MarketResult<Vec<CreditTransaction>>;
}

#[async_trait]
pub trait PaymentAttemptLog: Send + Sync {
    async fn record_attempt(&self, attempt: PaymentAttempt) -> MarketResult<()>;

    async fn attempts_for(&self, question_id: Uuid) -> MarketResult<Vec<PaymentAttempt>>;
}

/// Everything the engine needs from storage
pub trait MarketplaceRepository:
    QuestionStore + AccountDirectory + CreditLedger + PaymentAttemptLog
{
}

impl<T> MarketplaceRepository for T where
    T: QuestionStore + AccountDirectory + CreditLedger + PaymentAttemptLog
{
}

/// Read-only view of the questions one DIYer owns.
pub struct UserScopedQuestions<'a, S: QuestionStore + ?Sized> {
    store: &'a S,
    user_id: Uuid,
}

impl<'a, S: QuestionStore + ?Sized> UserScopedQuestions<'a, S> {
    pub fn new(store: &'a S, user_id: Uuid) -> Self {
        Self { store, user_id }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub async fn list(&self) -> MarketResult<Vec<Question>> {
        self.store
            .query_questions(QuestionQuery {
                diyer_id: Some(self.user_id),
                ..Default::default()
            })
            .await
    }

    /// Fetch one question; another user's row is reported as a permission error.
    pub async fn get(&self, id: Uuid) -> MarketResult<Question> {
        let question = self
            .store
            .get_question(id)
            .await?
            .ok_or_else(|| MarketError::question_not_found(id))?;

        if question.diyer_id != self.user_id {
            return Err(MarketError::Permission(format!(
                "question {} belongs to another user",
                id
            )));
        }
        Ok(question)
    }
}
