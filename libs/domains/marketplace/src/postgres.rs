use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbBackend, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
    TransactionTrait,
};
use uuid::Uuid;

use crate::entity::{
    bids, billing_profiles, credit_transactions, expert_profiles, messages, payment_attempts,
    questions, BidsEntity, BillingProfilesEntity, CreditTransactionsEntity, ExpertProfilesEntity,
    MessagesEntity, PaymentAttemptsEntity, QuestionsEntity,
};
use crate::error::{ConflictReason, MarketError, MarketResult};
use crate::models::{
    AuthorRole, Bid, BidStatus, BillingProfile, CreditTransaction, ExpertMetrics, ExpertProfile,
    Message, PaymentAttempt, Question, Reputation,
};
use crate::repository::{
    AccountDirectory, CreditLedger, PaymentAttemptLog, QuestionOrder, QuestionPatch,
    QuestionPredicate, QuestionQuery, QuestionStore,
};
use crate::reputation;

/// PostgreSQL implementation of the marketplace repository traits
#[derive(Clone)]
pub struct PgMarketplaceStore {
    db: DatabaseConnection,
}

impl PgMarketplaceStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[derive(Debug, FromQueryResult)]
struct BalanceRow {
    balance_cents: i64,
}

fn predicate_condition(predicate: &QuestionPredicate) -> Condition {
    let cond = Condition::all();
    match predicate {
        QuestionPredicate::StatusIs(status) => {
            cond.add(questions::Column::Status.eq(status.to_string()))
        }
        QuestionPredicate::StatusIn(statuses) => cond.add(
            questions::Column::Status.is_in(statuses.iter().map(ToString::to_string)),
        ),
        QuestionPredicate::ExpertIs(expert_id) => {
            cond.add(questions::Column::ExpertId.eq(*expert_id))
        }
        QuestionPredicate::ClaimedAtIs(at) => cond.add(questions::Column::ClaimedAt.eq(*at)),
        QuestionPredicate::ClaimExpiredBefore(now) => {
            cond.add(questions::Column::ClaimExpiresAt.lt(*now))
        }
        QuestionPredicate::ClaimActiveAt(now) => {
            cond.add(questions::Column::ClaimExpiresAt.gte(*now))
        }
        QuestionPredicate::NoAcceptedBid => cond.add(questions::Column::AcceptedBidId.is_null()),
        QuestionPredicate::AcceptedBidIs(bid_id) => {
            cond.add(questions::Column::AcceptedBidId.eq(*bid_id))
        }
        QuestionPredicate::BidCountBelow(max) => {
            cond.add(questions::Column::BidCount.lt(*max as i32))
        }
        QuestionPredicate::BidDeadlineAfter(now) => cond.add(
            Condition::any()
                .add(questions::Column::BidDeadline.is_null())
                .add(questions::Column::BidDeadline.gt(*now)),
        ),
        QuestionPredicate::TierIs(tier) => {
            cond.add(questions::Column::CurrentTier.eq(i16::from(*tier)))
        }
        QuestionPredicate::PayoutStatusIs(status) => {
            cond.add(questions::Column::PayoutStatus.eq(status.to_string()))
        }
        QuestionPredicate::CreditOwedIs(cents) => {
            cond.add(questions::Column::CreditOwedCents.eq(*cents))
        }
    }
}

fn patch_model(patch: &QuestionPatch, now: DateTime<Utc>) -> questions::ActiveModel {
    let mut model = questions::ActiveModel {
        updated_at: Set(now.into()),
        ..Default::default()
    };

    if let Some(status) = patch.status {
        model.status = Set(status.to_string());
    }
    if let Some(expert_id) = patch.expert_id {
        model.expert_id = Set(expert_id);
    }
    if let Some(claimed_at) = patch.claimed_at {
        model.claimed_at = Set(claimed_at.map(Into::into));
    }
    if let Some(claim_expires_at) = patch.claim_expires_at {
        model.claim_expires_at = Set(claim_expires_at.map(Into::into));
    }
    if let Some(answered_at) = patch.answered_at {
        model.answered_at = Set(answered_at.map(Into::into));
    }
    if let Some(accepted_at) = patch.accepted_at {
        model.accepted_at = Set(accepted_at.map(Into::into));
    }
    if let Some(answer) = &patch.answer {
        model.answer = Set(answer.clone());
    }
    if let Some(rating) = patch.rating {
        model.rating = Set(rating.map(i16::from));
    }
    if let Some(flag) = patch.marked_not_helpful {
        model.marked_not_helpful = Set(flag);
    }
    if let Some(payout_status) = patch.payout_status {
        model.payout_status = Set(payout_status.to_string());
    }
    if let Some(price) = patch.price_cents {
        model.price_cents = Set(price);
    }
    if let Some(fee) = patch.platform_fee_cents {
        model.platform_fee_cents = Set(fee);
    }
    if let Some(payout) = patch.expert_payout_cents {
        model.expert_payout_cents = Set(payout);
    }
    if let Some(bid_id) = patch.accepted_bid_id {
        model.accepted_bid_id = Set(bid_id);
    }
    if let Some(tier) = patch.current_tier {
        model.current_tier = Set(i16::from(tier));
    }
    if let Some(charge_ref) = &patch.charge_ref {
        model.charge_ref = Set(charge_ref.clone());
    }
    if let Some(owed) = patch.credit_owed_cents {
        model.credit_owed_cents = Set(owed);
    }

    model
}

fn query_condition(query: &QuestionQuery) -> Condition {
    let mut cond = Condition::all();

    if let Some(status) = query.status {
        cond = cond.add(questions::Column::Status.eq(status.to_string()));
    }
    if let Some(diyer_id) = query.diyer_id {
        cond = cond.add(questions::Column::DiyerId.eq(diyer_id));
    }
    if let Some(expert_id) = query.expert_id {
        cond = cond.add(questions::Column::ExpertId.eq(expert_id));
    }
    if let Some(categories) = &query.categories {
        let mut any = Condition::any();
        for category in categories {
            any = any.add(Expr::cust_with_values(
                "LOWER(category) = $1",
                [category.to_lowercase()],
            ));
        }
        cond = cond.add(any);
    }
    if let Some(diyer_id) = query.exclude_diyer_id {
        cond = cond.add(questions::Column::DiyerId.ne(diyer_id));
    }
    if let Some(expert_id) = query.visible_to_expert {
        cond = cond.add(
            Condition::any()
                .add(questions::Column::TargetExpertId.is_null())
                .add(questions::Column::TargetExpertId.eq(expert_id)),
        );
    }
    if let Some(mode) = query.pricing_mode {
        cond = cond.add(questions::Column::PricingMode.eq(mode.to_string()));
    }
    if let Some(payout_status) = query.payout_status {
        cond = cond.add(questions::Column::PayoutStatus.eq(payout_status.to_string()));
    }
    if let Some(now) = query.claim_expired_before {
        cond = cond.add(questions::Column::ClaimExpiresAt.lt(now));
    }
    if query.credit_owed {
        cond = cond.add(questions::Column::CreditOwedCents.gt(0));
    }

    cond
}

#[async_trait]
impl QuestionStore for PgMarketplaceStore {
    async fn insert_question(&self, question: Question) -> MarketResult<Question> {
        let model: questions::ActiveModel = question.into();
        let result = model.insert(&self.db).await?.into();
        Ok(result)
    }

    async fn get_question(&self, id: Uuid) -> MarketResult<Option<Question>> {
        let result = QuestionsEntity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(Into::into);
        Ok(result)
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        predicates: &[QuestionPredicate],
        patch: QuestionPatch,
    ) -> MarketResult<u64> {
        let condition = predicates
            .iter()
            .fold(Condition::all().add(questions::Column::Id.eq(id)), |cond, p| {
                cond.add(predicate_condition(p))
            });

        let mut update = QuestionsEntity::update_many()
            .set(patch_model(&patch, Utc::now()))
            .filter(condition);
        if patch.increment_bid_count {
            update = update.col_expr(questions::Column::BidCount, Expr::cust("bid_count + 1"));
        }

        let result = update.exec(&self.db).await?;
        Ok(result.rows_affected)
    }

    async fn query_questions(&self, query: QuestionQuery) -> MarketResult<Vec<Question>> {
        let select = QuestionsEntity::find().filter(query_condition(&query));
        let select = match query.order {
            QuestionOrder::NewestFirst => select
                .order_by_desc(questions::Column::CreatedAt)
                .order_by_desc(questions::Column::Id),
            QuestionOrder::OldestFirst => select
                .order_by_asc(questions::Column::CreatedAt)
                .order_by_asc(questions::Column::Id),
        };

        let results = select
            .limit(query.limit as u64)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(results)
    }

    async fn count_questions_by_diyer(&self, diyer_id: Uuid) -> MarketResult<u64> {
        let count = QuestionsEntity::find()
            .filter(questions::Column::DiyerId.eq(diyer_id))
            .count(&self.db)
            .await?;
        Ok(count)
    }

    async fn insert_bid(&self, bid: Bid) -> MarketResult<Bid> {
        let model: bids::ActiveModel = bid.into();
        let result = model.insert(&self.db).await?.into();
        Ok(result)
    }

    async fn get_bid(&self, id: Uuid) -> MarketResult<Option<Bid>> {
        let result = BidsEntity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(Into::into);
        Ok(result)
    }

    async fn list_bids(&self, question_id: Uuid) -> MarketResult<Vec<Bid>> {
        let results = BidsEntity::find()
            .filter(bids::Column::QuestionId.eq(question_id))
            .order_by_asc(bids::Column::CreatedAt)
            .order_by_asc(bids::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
        Ok(results)
    }

    async fn update_bid_status(
        &self,
        id: Uuid,
        from: BidStatus,
        to: BidStatus,
    ) -> MarketResult<u64> {
        let model = bids::ActiveModel {
            status: Set(to.to_string()),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };

        let result = BidsEntity::update_many()
            .set(model)
            .filter(bids::Column::Id.eq(id))
            .filter(bids::Column::Status.eq(from.to_string()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn insert_message(&self, message: Message) -> MarketResult<Message> {
        let model = messages::ActiveModel {
            id: Set(message.id),
            question_id: Set(message.question_id),
            author_id: Set(message.author_id),
            author_role: Set(message.author_role.to_string()),
            body: Set(message.body),
            created_at: Set(message.created_at.into()),
        };
        let result = model.insert(&self.db).await?.into();
        Ok(result)
    }

    async fn count_messages(&self, question_id: Uuid, role: AuthorRole) -> MarketResult<u64> {
        let count = MessagesEntity::find()
            .filter(messages::Column::QuestionId.eq(question_id))
            .filter(messages::Column::AuthorRole.eq(role.to_string()))
            .count(&self.db)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl AccountDirectory for PgMarketplaceStore {
    async fn get_expert(&self, expert_id: Uuid) -> MarketResult<Option<ExpertProfile>> {
        let result = ExpertProfilesEntity::find_by_id(expert_id)
            .one(&self.db)
            .await?
            .map(Into::into);
        Ok(result)
    }

    async fn save_expert(&self, profile: ExpertProfile) -> MarketResult<ExpertProfile> {
        let sql = r#"
            INSERT INTO marketplace_expert_profiles
                (expert_id, reputation_score, expert_level, subscription_tier, specialties,
                 payout_account_ref, onboarding_complete, corrections_count, graduations_count,
                 updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (expert_id) DO UPDATE SET
                reputation_score = EXCLUDED.reputation_score,
                expert_level = EXCLUDED.expert_level,
                subscription_tier = EXCLUDED.subscription_tier,
                specialties = EXCLUDED.specialties,
                payout_account_ref = EXCLUDED.payout_account_ref,
                onboarding_complete = EXCLUDED.onboarding_complete,
                corrections_count = EXCLUDED.corrections_count,
                graduations_count = EXCLUDED.graduations_count,
                updated_at = EXCLUDED.updated_at
            RETURNING *
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                profile.expert_id.into(),
                profile.reputation_score.into(),
                profile.expert_level.to_string().into(),
                profile.subscription_tier.to_string().into(),
                serde_json::to_value(&profile.specialties)?.into(),
                profile.payout_account_ref.clone().into(),
                profile.onboarding_complete.into(),
                (profile.corrections_count as i32).into(),
                (profile.graduations_count as i32).into(),
                profile.updated_at.into(),
            ],
        );

        let row = expert_profiles::Model::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .ok_or_else(|| MarketError::Internal("Failed to upsert expert profile".to_string()))?;

        Ok(row.into())
    }

    async fn save_reputation(&self, expert_id: Uuid, reputation: Reputation) -> MarketResult<()> {
        let model = expert_profiles::ActiveModel {
            reputation_score: Set(reputation.score),
            expert_level: Set(reputation.level.to_string()),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };

        let result = ExpertProfilesEntity::update_many()
            .set(model)
            .filter(expert_profiles::Column::ExpertId.eq(expert_id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(MarketError::expert_not_found(expert_id));
        }
        Ok(())
    }

    async fn expert_metrics(&self, expert_id: Uuid) -> MarketResult<ExpertMetrics> {
        let answered: Vec<Question> = QuestionsEntity::find()
            .filter(questions::Column::ExpertId.eq(expert_id))
            .filter(questions::Column::AnsweredAt.is_not_null())
            .all(&self.db)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        let ids: Vec<Uuid> = answered.iter().map(|q| q.id).collect();
        let threaded: HashSet<Uuid> = if ids.is_empty() {
            HashSet::new()
        } else {
            MessagesEntity::find()
                .filter(messages::Column::QuestionId.is_in(ids))
                .filter(messages::Column::AuthorRole.eq(AuthorRole::Diyer.to_string()))
                .all(&self.db)
                .await?
                .into_iter()
                .map(|m| m.question_id)
                .collect()
        };

        let profile = self.get_expert(expert_id).await?;
        Ok(reputation::metrics_from_history(
            expert_id,
            &answered,
            &threaded,
            profile.as_ref(),
        ))
    }

    async fn record_correction(&self, expert_id: Uuid) -> MarketResult<()> {
        let result = ExpertProfilesEntity::update_many()
            .col_expr(
                expert_profiles::Column::CorrectionsCount,
                Expr::cust("corrections_count + 1"),
            )
            .filter(expert_profiles::Column::ExpertId.eq(expert_id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(MarketError::expert_not_found(expert_id));
        }
        Ok(())
    }

    async fn record_graduation(&self, expert_id: Uuid) -> MarketResult<()> {
        let result = ExpertProfilesEntity::update_many()
            .col_expr(
                expert_profiles::Column::GraduationsCount,
                Expr::cust("graduations_count + 1"),
            )
            .filter(expert_profiles::Column::ExpertId.eq(expert_id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(MarketError::expert_not_found(expert_id));
        }
        Ok(())
    }

    async fn billing_profile(&self, diyer_id: Uuid) -> MarketResult<Option<BillingProfile>> {
        let result = BillingProfilesEntity::find_by_id(diyer_id)
            .one(&self.db)
            .await?
            .map(Into::into);
        Ok(result)
    }

    async fn save_billing_profile(&self, profile: BillingProfile) -> MarketResult<BillingProfile> {
        let sql = r#"
            INSERT INTO marketplace_billing_profiles (diyer_id, customer_ref, payment_method_ref)
            VALUES ($1, $2, $3)
            ON CONFLICT (diyer_id) DO UPDATE SET
                customer_ref = EXCLUDED.customer_ref,
                payment_method_ref = EXCLUDED.payment_method_ref
            RETURNING *
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                profile.diyer_id.into(),
                profile.customer_ref.clone().into(),
                profile.payment_method_ref.clone().into(),
            ],
        );

        let row = billing_profiles::Model::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                MarketError::Internal("Failed to upsert billing profile".to_string())
            })?;

        Ok(row.into())
    }
}

#[async_trait]
impl CreditLedger for PgMarketplaceStore {
    /// Appends the entry and moves the account balance in one transaction.
    async fn append_credit(&self, entry: CreditTransaction) -> MarketResult<i64> {
        let diyer_id = entry.diyer_id;
        let amount = entry.amount_cents;
        let txn = self.db.begin().await?;

        let model: credit_transactions::ActiveModel = entry.into();
        model.insert(&txn).await?;

        // Debits only move an existing balance that covers them; no row back
        // means the debit would overdraw, and dropping `txn` rolls back the entry.
        let sql = if amount < 0 {
            r#"
            UPDATE marketplace_credit_accounts
            SET balance_cents = balance_cents + $2, updated_at = NOW()
            WHERE diyer_id = $1 AND balance_cents + $2 >= 0
            RETURNING balance_cents
            "#
        } else {
            r#"
            INSERT INTO marketplace_credit_accounts (diyer_id, balance_cents, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (diyer_id) DO UPDATE SET
                balance_cents = marketplace_credit_accounts.balance_cents + EXCLUDED.balance_cents,
                updated_at = NOW()
            RETURNING balance_cents
            "#
        };
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [diyer_id.into(), amount.into()],
        );

        let row = BalanceRow::find_by_statement(stmt)
            .one(&txn)
            .await?
            .ok_or(MarketError::Conflict(ConflictReason::InsufficientCredit))?;

        txn.commit().await?;
        Ok(row.balance_cents)
    }

    async fn credit_balance(&self, diyer_id: Uuid) -> MarketResult<i64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT balance_cents FROM marketplace_credit_accounts WHERE diyer_id = $1",
            [diyer_id.into()],
        );

        let row = BalanceRow::find_by_statement(stmt).one(&self.db).await?;
        Ok(row.map_or(0, |r| r.balance_cents))
    }

    async fn credit_history(&self, diyer_id: Uuid) -> MarketResult<Vec<CreditTransaction>> {
        let results = CreditTransactionsEntity::find()
            .filter(credit_transactions::Column::DiyerId.eq(diyer_id))
            .order_by_asc(credit_transactions::Column::CreatedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
        Ok(results)
    }
}

#[async_trait]
impl PaymentAttemptLog for PgMarketplaceStore {
    async fn record_attempt(&self, attempt: PaymentAttempt) -> MarketResult<()> {
        let model: payment_attempts::ActiveModel = attempt.into();
        model.insert(&self.db).await?;
        Ok(())
    }

    async fn attempts_for(&self, question_id: Uuid) -> MarketResult<Vec<PaymentAttempt>> {
        let results = PaymentAttemptsEntity::find()
            .filter(payment_attempts::Column::QuestionId.eq(question_id))
            .order_by_asc(payment_attempts::Column::CreatedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
        Ok(results)
    }
}
