use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::Validate;

/// Question lifecycle status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QuestionStatus {
    /// Waiting for an expert
    #[default]
    Open,
    /// Exclusively assigned to one expert until the claim expires
    Claimed,
    /// Expert has answered, waiting on the DIYer
    Answered,
    /// DIYer accepted the answer
    Accepted,
    /// Closed without acceptance (e.g. marked not helpful)
    Resolved,
}

impl QuestionStatus {
    /// Statuses in which an expert is assigned to the question.
    pub fn has_expert(&self) -> bool {
        !matches!(self, QuestionStatus::Open)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QuestionStatus::Accepted | QuestionStatus::Resolved)
    }
}

/// State of the expert's payout for a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayoutStatus {
    #[default]
    Pending,
    Free,
    Transferred,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PricingMode {
    #[default]
    Fixed,
    Bidding,
}

/// Price tier derived from the difficulty score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PriceTier {
    #[default]
    Basic,
    Standard,
    Complex,
    Expert,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExpertLevel {
    #[default]
    Bronze,
    Silver,
    Gold,
    Platinum,
}

/// Queue visibility tier, ordered standard < priority < premium
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueuePriority {
    #[default]
    Standard,
    Priority,
    Premium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Pro,
    Premium,
}

impl SubscriptionTier {
    pub fn priority(&self) -> QueuePriority {
        match self {
            SubscriptionTier::Free => QueuePriority::Standard,
            SubscriptionTier::Pro => QueuePriority::Priority,
            SubscriptionTier::Premium => QueuePriority::Premium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BidStatus {
    #[default]
    Pending,
    Withdrawn,
    Accepted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthorRole {
    #[default]
    Diyer,
    Expert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CreditReason {
    /// Returned to the DIYer after a not-helpful answer
    #[default]
    NotHelpful,
    /// Spent toward a question's price at submission
    AppliedToQuestion,
    /// Manually issued by support
    Goodwill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentKind {
    #[default]
    Charge,
    Transfer,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    /// Gateway call timed out; the money may or may not have moved
    #[default]
    Unknown,
}

/// Question entity - the central record every transition mutates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub diyer_id: Uuid,
    pub category: String,
    pub body: String,
    pub photo_count: u32,
    /// Assigned expert, set while claimed and afterwards
    pub expert_id: Option<Uuid>,
    /// Direct-mode target; `None` means the question is in the open pool
    pub target_expert_id: Option<Uuid>,
    pub status: QuestionStatus,
    pub marked_not_helpful: bool,
    pub payout_status: PayoutStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub answer: Option<String>,
    /// DIYer rating (1-5) given on acceptance
    pub rating: Option<u8>,
    pub price_cents: i64,
    pub platform_fee_cents: i64,
    pub expert_payout_cents: i64,
    pub pricing_mode: PricingMode,
    pub difficulty_score: u8,
    pub price_tier: PriceTier,
    pub bid_deadline: Option<DateTime<Utc>>,
    pub bid_count: u32,
    pub accepted_bid_id: Option<Uuid>,
    pub current_tier: u8,
    pub credit_applied_cents: i64,
    /// Not-helpful credit resolved but not yet written to the ledger
    pub credit_owed_cents: i64,
    /// Gateway reference of the charge taken on claim / bid acceptance
    pub charge_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Question {
    pub fn is_direct(&self) -> bool {
        self.target_expert_id.is_some()
    }

    pub fn is_free(&self) -> bool {
        self.payout_status == PayoutStatus::Free || self.price_cents == 0
    }

    /// Amount the DIYer still owes in money once credit is applied.
    pub fn chargeable_cents(&self) -> i64 {
        (self.price_cents - self.credit_applied_cents).max(0)
    }

    /// Transfer group tagging every payout movement for this question.
    pub fn transfer_group(&self) -> String {
        format!("question_{}", self.id)
    }

    pub fn claim_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == QuestionStatus::Claimed
            && self.claim_expires_at.is_some_and(|expires| expires < now)
    }
}

/// Prior AI-generated project context attached to a question
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub summary: String,
    pub conversation_turns: u32,
}

/// DTO for submitting a new question
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateQuestion {
    pub diyer_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub category: String,
    #[validate(length(min = 10, max = 5000))]
    pub body: String,
    #[serde(default)]
    #[validate(range(max = 20))]
    pub photo_count: u32,
    #[serde(default)]
    pub context: Option<ProjectContext>,
    /// Send the question straight to one expert instead of the pool
    #[serde(default)]
    pub target_expert_id: Option<Uuid>,
    /// Spend existing credit balance toward the price
    #[serde(default)]
    pub apply_credit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: Uuid,
    pub question_id: Uuid,
    pub expert_id: Uuid,
    pub proposed_price_cents: i64,
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bid {
    pub fn new(question_id: Uuid, expert_id: Uuid, proposed_price_cents: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            question_id,
            expert_id,
            proposed_price_cents,
            status: BidStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Conversation message on a claimed or answered question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub question_id: Uuid,
    pub author_id: Uuid,
    pub author_role: AuthorRole,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertProfile {
    pub expert_id: Uuid,
    /// Composite reputation 0-100, two decimals
    pub reputation_score: f64,
    pub expert_level: ExpertLevel,
    pub subscription_tier: SubscriptionTier,
    pub specialties: Vec<String>,
    /// Connected payout account at the gateway
    pub payout_account_ref: Option<String>,
    pub onboarding_complete: bool,
    pub corrections_count: u32,
    pub graduations_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl ExpertProfile {
    pub fn new(expert_id: Uuid, specialties: Vec<String>) -> Self {
        Self {
            expert_id,
            reputation_score: 0.0,
            expert_level: ExpertLevel::Bronze,
            subscription_tier: SubscriptionTier::Free,
            specialties,
            payout_account_ref: None,
            onboarding_complete: true,
            corrections_count: 0,
            graduations_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// Empty specialties means the expert takes every category.
    pub fn covers_category(&self, category: &str) -> bool {
        self.specialties.is_empty()
            || self
                .specialties
                .iter()
                .any(|s| s.eq_ignore_ascii_case(category))
    }
}

/// Saved billing details used for off-session charges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingProfile {
    pub diyer_id: Uuid,
    pub customer_ref: String,
    pub payment_method_ref: Option<String>,
}

/// Append-only credit ledger entry. Positive amounts add balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub diyer_id: Uuid,
    pub amount_cents: i64,
    pub reason: CreditReason,
    pub question_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn new(
        diyer_id: Uuid,
        amount_cents: i64,
        reason: CreditReason,
        question_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            diyer_id,
            amount_cents,
            reason,
            question_id,
            created_at: Utc::now(),
        }
    }
}

/// Record of one gateway call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub question_id: Uuid,
    pub kind: PaymentKind,
    pub amount_cents: i64,
    pub idempotency_key: String,
    pub reference: Option<String>,
    pub outcome: PaymentOutcome,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Raw historical counters the reputation score is computed from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpertMetrics {
    pub avg_rating: Option<f64>,
    pub review_count: u32,
    pub answered_count: u32,
    pub accepted_count: u32,
    pub avg_response_minutes: Option<f64>,
    /// Answered questions where the DIYer sent at least one follow-up
    pub tier_upgrade_eligible: u32,
    pub tier_upgraded: u32,
    pub corrections: u32,
    pub graduations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reputation {
    pub score: f64,
    pub level: ExpertLevel,
}

/// Result of a successful claim
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimReceipt {
    pub question: Question,
    pub claim_expires_at: DateTime<Utc>,
}
