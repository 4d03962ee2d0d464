use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_u8(value: i16) -> u8 {
    u8::try_from(value).unwrap_or(0)
}

// ===== Questions Entity =====

pub mod questions {
    use super::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "marketplace_questions")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub diyer_id: Uuid,
        #[sea_orm(column_type = "String(StringLen::N(64))")]
        pub category: String,
        #[sea_orm(column_type = "Text")]
        pub body: String,
        pub photo_count: i32,
        pub expert_id: Option<Uuid>,
        pub target_expert_id: Option<Uuid>,
        #[sea_orm(column_type = "String(StringLen::N(20))")]
        pub status: String,
        pub marked_not_helpful: bool,
        #[sea_orm(column_type = "String(StringLen::N(20))")]
        pub payout_status: String,
        pub claimed_at: Option<DateTimeWithTimeZone>,
        pub claim_expires_at: Option<DateTimeWithTimeZone>,
        pub answered_at: Option<DateTimeWithTimeZone>,
        pub accepted_at: Option<DateTimeWithTimeZone>,
        #[sea_orm(column_type = "Text", nullable)]
        pub answer: Option<String>,
        pub rating: Option<i16>,
        pub price_cents: i64,
        pub platform_fee_cents: i64,
        pub expert_payout_cents: i64,
        #[sea_orm(column_type = "String(StringLen::N(20))")]
        pub pricing_mode: String,
        pub difficulty_score: i16,
        #[sea_orm(column_type = "String(StringLen::N(20))")]
        pub price_tier: String,
        pub bid_deadline: Option<DateTimeWithTimeZone>,
        pub bid_count: i32,
        pub accepted_bid_id: Option<Uuid>,
        pub current_tier: i16,
        pub credit_applied_cents: i64,
        pub credit_owed_cents: i64,
        #[sea_orm(column_type = "String(StringLen::N(255))", nullable)]
        pub charge_ref: Option<String>,
        pub created_at: DateTimeWithTimeZone,
        pub updated_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::bids::Entity")]
        Bids,
        #[sea_orm(has_many = "super::messages::Entity")]
        Messages,
    }

    impl Related<super::bids::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Bids.def()
        }
    }

    impl Related<super::messages::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Messages.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for crate::models::Question {
        fn from(model: Model) -> Self {
            Self {
                id: model.id,
                diyer_id: model.diyer_id,
                category: model.category,
                body: model.body,
                photo_count: to_u32(model.photo_count),
                expert_id: model.expert_id,
                target_expert_id: model.target_expert_id,
                status: model.status.parse().unwrap_or_default(),
                marked_not_helpful: model.marked_not_helpful,
                payout_status: model.payout_status.parse().unwrap_or_default(),
                claimed_at: model.claimed_at.map(Into::into),
                claim_expires_at: model.claim_expires_at.map(Into::into),
                answered_at: model.answered_at.map(Into::into),
                accepted_at: model.accepted_at.map(Into::into),
                answer: model.answer,
                rating: model.rating.map(to_u8),
                price_cents: model.price_cents,
                platform_fee_cents: model.platform_fee_cents,
                expert_payout_cents: model.expert_payout_cents,
                pricing_mode: model.pricing_mode.parse().unwrap_or_default(),
                difficulty_score: to_u8(model.difficulty_score),
                price_tier: model.price_tier.parse().unwrap_or_default(),
                bid_deadline: model.bid_deadline.map(Into::into),
                bid_count: to_u32(model.bid_count),
                accepted_bid_id: model.accepted_bid_id,
                current_tier: to_u8(model.current_tier),
                credit_applied_cents: model.credit_applied_cents,
                credit_owed_cents: model.credit_owed_cents,
                charge_ref: model.charge_ref,
                created_at: model.created_at.into(),
                updated_at: model.updated_at.into(),
            }
        }
    }

    impl From<crate::models::Question> for ActiveModel {
        fn from(q: crate::models::Question) -> Self {
            ActiveModel {
                id: Set(q.id),
                diyer_id: Set(q.diyer_id),
                category: Set(q.category),
                body: Set(q.body),
                photo_count: Set(q.photo_count as i32),
                expert_id: Set(q.expert_id),
                target_expert_id: Set(q.target_expert_id),
                status: Set(q.status.to_string()),
                marked_not_helpful: Set(q.marked_not_helpful),
                payout_status: Set(q.payout_status.to_string()),
                claimed_at: Set(q.claimed_at.map(Into::into)),
                claim_expires_at: Set(q.claim_expires_at.map(Into::into)),
                answered_at: Set(q.answered_at.map(Into::into)),
                accepted_at: Set(q.accepted_at.map(Into::into)),
                answer: Set(q.answer),
                rating: Set(q.rating.map(i16::from)),
                price_cents: Set(q.price_cents),
                platform_fee_cents: Set(q.platform_fee_cents),
                expert_payout_cents: Set(q.expert_payout_cents),
                pricing_mode: Set(q.pricing_mode.to_string()),
                difficulty_score: Set(i16::from(q.difficulty_score)),
                price_tier: Set(q.price_tier.to_string()),
                bid_deadline: Set(q.bid_deadline.map(Into::into)),
                bid_count: Set(q.bid_count as i32),
                accepted_bid_id: Set(q.accepted_bid_id),
                current_tier: Set(i16::from(q.current_tier)),
                credit_applied_cents: Set(q.credit_applied_cents),
                credit_owed_cents: Set(q.credit_owed_cents),
                charge_ref: Set(q.charge_ref),
                created_at: Set(q.created_at.into()),
                updated_at: Set(q.updated_at.into()),
            }
        }
    }
}

// ===== Bids Entity =====

pub mod bids {
    use super::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "marketplace_bids")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub question_id: Uuid,
        pub expert_id: Uuid,
        pub proposed_price_cents: i64,
        #[sea_orm(column_type = "String(StringLen::N(20))")]
        pub status: String,
        pub created_at: DateTimeWithTimeZone,
        pub updated_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::questions::Entity",
            from = "Column::QuestionId",
            to = "super::questions::Column::Id"
        )]
        Question,
    }

    impl Related<super::questions::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Question.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for crate::models::Bid {
        fn from(model: Model) -> Self {
            Self {
                id: model.id,
                question_id: model.question_id,
                expert_id: model.expert_id,
                proposed_price_cents: model.proposed_price_cents,
                status: model.status.parse().unwrap_or_default(),
                created_at: model.created_at.into(),
                updated_at: model.updated_at.into(),
            }
        }
    }

    impl From<crate::models::Bid> for ActiveModel {
        fn from(bid: crate::models::Bid) -> Self {
            ActiveModel {
                id: Set(bid.id),
                question_id: Set(bid.question_id),
                expert_id: Set(bid.expert_id),
                proposed_price_cents: Set(bid.proposed_price_cents),
                status: Set(bid.status.to_string()),
                created_at: Set(bid.created_at.into()),
                updated_at: Set(bid.updated_at.into()),
            }
        }
    }
}

// ===== Messages Entity =====

pub mod messages {
    use super::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "marketplace_messages")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub question_id: Uuid,
        pub author_id: Uuid,
        #[sea_orm(column_type = "String(StringLen::N(20))")]
        pub author_role: String,
        #[sea_orm(column_type = "Text")]
        pub body: String,
        pub created_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::questions::Entity",
            from = "Column::QuestionId",
            to = "super::questions::Column::Id"
        )]
        Question,
    }

    impl Related<super::questions::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Question.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for crate::models::Message {
        fn from(model: Model) -> Self {
            Self {
                id: model.id,
                question_id: model.question_id,
                author_id: model.author_id,
                author_role: model.author_role.parse().unwrap_or_default(),
                body: model.body,
                created_at: model.created_at.into(),
            }
        }
    }
}

// ===== Expert Profiles Entity =====

pub mod expert_profiles {
    use super::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "marketplace_expert_profiles")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub expert_id: Uuid,
        #[sea_orm(column_type = "Double")]
        pub reputation_score: f64,
        #[sea_orm(column_type = "String(StringLen::N(20))")]
        pub expert_level: String,
        #[sea_orm(column_type = "String(StringLen::N(20))")]
        pub subscription_tier: String,
        #[sea_orm(column_type = "JsonBinary")]
        pub specialties: serde_json::Value,
        #[sea_orm(column_type = "String(StringLen::N(255))", nullable)]
        pub payout_account_ref: Option<String>,
        pub onboarding_complete: bool,
        pub corrections_count: i32,
        pub graduations_count: i32,
        pub updated_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for crate::models::ExpertProfile {
        fn from(model: Model) -> Self {
            Self {
                expert_id: model.expert_id,
                reputation_score: model.reputation_score,
                expert_level: model.expert_level.parse().unwrap_or_default(),
                subscription_tier: model.subscription_tier.parse().unwrap_or_default(),
                specialties: serde_json::from_value(model.specialties).unwrap_or_default(),
                payout_account_ref: model.payout_account_ref,
                onboarding_complete: model.onboarding_complete,
                corrections_count: to_u32(model.corrections_count),
                graduations_count: to_u32(model.graduations_count),
                updated_at: model.updated_at.into(),
            }
        }
    }

    impl From<crate::models::ExpertProfile> for ActiveModel {
        fn from(profile: crate::models::ExpertProfile) -> Self {
            ActiveModel {
                expert_id: Set(profile.expert_id),
                reputation_score: Set(profile.reputation_score),
                expert_level: Set(profile.expert_level.to_string()),
                subscription_tier: Set(profile.subscription_tier.to_string()),
                specialties: Set(serde_json::to_value(&profile.specialties).unwrap_or_default()),
                payout_account_ref: Set(profile.payout_account_ref),
                onboarding_complete: Set(profile.onboarding_complete),
                corrections_count: Set(profile.corrections_count as i32),
                graduations_count: Set(profile.graduations_count as i32),
                updated_at: Set(profile.updated_at.into()),
            }
        }
    }
}

// ===== Billing Profiles Entity =====

pub mod billing_profiles {
    use super::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "marketplace_billing_profiles")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub diyer_id: Uuid,
        #[sea_orm(column_type = "String(StringLen::N(255))")]
        pub customer_ref: String,
        #[sea_orm(column_type = "String(StringLen::N(255))", nullable)]
        pub payment_method_ref: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for crate::models::BillingProfile {
        fn from(model: Model) -> Self {
            Self {
                diyer_id: model.diyer_id,
                customer_ref: model.customer_ref,
                payment_method_ref: model.payment_method_ref,
            }
        }
    }
}

// ===== Credit Accounts Entity =====

pub mod credit_accounts {
    use super::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "marketplace_credit_accounts")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub diyer_id: Uuid,
        pub balance_cents: i64,
        pub created_at: DateTimeWithTimeZone,
        pub updated_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

// ===== Credit Transactions Entity =====

pub mod credit_transactions {
    use super::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "marketplace_credit_transactions")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub diyer_id: Uuid,
        pub amount_cents: i64,
        #[sea_orm(column_type = "String(StringLen::N(50))")]
        pub reason: String,
        pub question_id: Option<Uuid>,
        pub created_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for crate::models::CreditTransaction {
        fn from(model: Model) -> Self {
            Self {
                id: model.id,
                diyer_id: model.diyer_id,
                amount_cents: model.amount_cents,
                reason: model.reason.parse().unwrap_or_default(),
                question_id: model.question_id,
                created_at: model.created_at.into(),
            }
        }
    }

    impl From<crate::models::CreditTransaction> for ActiveModel {
        fn from(entry: crate::models::CreditTransaction) -> Self {
            ActiveModel {
                id: Set(entry.id),
                diyer_id: Set(entry.diyer_id),
                amount_cents: Set(entry.amount_cents),
                reason: Set(entry.reason.to_string()),
                question_id: Set(entry.question_id),
                created_at: Set(entry.created_at.into()),
            }
        }
    }
}

// ===== Payment Attempts Entity =====

pub mod payment_attempts {
    use super::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "marketplace_payment_attempts")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub question_id: Uuid,
        #[sea_orm(column_type = "String(StringLen::N(20))")]
        pub kind: String,
        pub amount_cents: i64,
        #[sea_orm(column_type = "String(StringLen::N(255))")]
        pub idempotency_key: String,
        #[sea_orm(column_type = "String(StringLen::N(255))", nullable)]
        pub reference: Option<String>,
        #[sea_orm(column_type = "String(StringLen::N(20))")]
        pub outcome: String,
        #[sea_orm(column_type = "Text", nullable)]
        pub detail: Option<String>,
        pub created_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for crate::models::PaymentAttempt {
        fn from(model: Model) -> Self {
            Self {
                id: model.id,
                question_id: model.question_id,
                kind: model.kind.parse().unwrap_or_default(),
                amount_cents: model.amount_cents,
                idempotency_key: model.idempotency_key,
                reference: model.reference,
                outcome: model.outcome.parse().unwrap_or_default(),
                detail: model.detail,
                created_at: model.created_at.into(),
            }
        }
    }

    impl From<crate::models::PaymentAttempt> for ActiveModel {
        fn from(attempt: crate::models::PaymentAttempt) -> Self {
            ActiveModel {
                id: Set(attempt.id),
                question_id: Set(attempt.question_id),
                kind: Set(attempt.kind.to_string()),
                amount_cents: Set(attempt.amount_cents),
                idempotency_key: Set(attempt.idempotency_key),
                reference: Set(attempt.reference),
                outcome: Set(attempt.outcome.to_string()),
                detail: Set(attempt.detail),
                created_at: Set(attempt.created_at.into()),
            }
        }
    }
}

// Re-export entities for convenience
pub use bids::Entity as BidsEntity;
pub use billing_profiles::Entity as BillingProfilesEntity;
pub use credit_accounts::Entity as CreditAccountsEntity;
pub use credit_transactions::Entity as CreditTransactionsEntity;
pub use expert_profiles::Entity as ExpertProfilesEntity;
pub use messages::Entity as MessagesEntity;
pub use payment_attempts::Entity as PaymentAttemptsEntity;
pub use questions::Entity as QuestionsEntity;
