//! In-memory implementation of every repository trait.
//!
//! Conditional updates check their predicates and apply the patch under one
//! write lock, which gives the same all-or-nothing behaviour as a single
//! `UPDATE ... WHERE` statement.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

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

#[derive(Clone, Default)]
pub struct InMemoryMarketplaceStore {
    questions: Arc<RwLock<HashMap<Uuid, Question>>>,
    bids: Arc<RwLock<HashMap<Uuid, Bid>>>,
    messages: Arc<RwLock<Vec<Message>>>,
    experts: Arc<RwLock<HashMap<Uuid, ExpertProfile>>>,
    billing: Arc<RwLock<HashMap<Uuid, BillingProfile>>>,
    credits: Arc<RwLock<HashMap<Uuid, Vec<CreditTransaction>>>>,
    attempts: Arc<RwLock<Vec<PaymentAttempt>>>,
}

impl InMemoryMarketplaceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuestionStore for InMemoryMarketplaceStore {
    async fn insert_question(&self, question: Question) -> MarketResult<Question> {
        let mut questions = self.questions.write().await;
        if questions.contains_key(&question.id) {
            return Err(MarketError::Internal(format!(
                "question {} already exists",
                question.id
            )));
        }
        questions.insert(question.id, question.clone());

        tracing::info!(question_id = %question.id, "Created question");
        Ok(question)
    }

    async fn get_question(&self, id: Uuid) -> MarketResult<Option<Question>> {
        let questions = self.questions.read().await;
        Ok(questions.get(&id).cloned())
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        predicates: &[QuestionPredicate],
        patch: QuestionPatch,
    ) -> MarketResult<u64> {
        let mut questions = self.questions.write().await;
        let Some(question) = questions.get_mut(&id) else {
            return Ok(0);
        };
        if !predicates.iter().all(|p| p.matches(question)) {
            return Ok(0);
        }
        patch.apply(question, Utc::now());
        Ok(1)
    }

    async fn query_questions(&self, query: QuestionQuery) -> MarketResult<Vec<Question>> {
        let questions = self.questions.read().await;

        let mut result: Vec<Question> = questions
            .values()
            .filter(|q| query.matches(q))
            .cloned()
            .collect();

        match query.order {
            QuestionOrder::NewestFirst => {
                result.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)))
            }
            QuestionOrder::OldestFirst => {
                result.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)))
            }
        }
        result.truncate(query.limit);

        Ok(result)
    }

    async fn count_questions_by_diyer(&self, diyer_id: Uuid) -> MarketResult<u64> {
        let questions = self.questions.read().await;
        Ok(questions.values().filter(|q| q.diyer_id == diyer_id).count() as u64)
    }

    async fn insert_bid(&self, bid: Bid) -> MarketResult<Bid> {
        let mut bids = self.bids.write().await;
        bids.insert(bid.id, bid.clone());
        Ok(bid)
    }

    async fn get_bid(&self, id: Uuid) -> MarketResult<Option<Bid>> {
        let bids = self.bids.read().await;
        Ok(bids.get(&id).cloned())
    }

    async fn list_bids(&self, question_id: Uuid) -> MarketResult<Vec<Bid>> {
        let bids = self.bids.read().await;
        let mut result: Vec<Bid> = bids
            .values()
            .filter(|b| b.question_id == question_id)
            .cloned()
            .collect();
        result.sort_by_key(|b| (b.created_at, b.id));
        Ok(result)
    }

    async fn update_bid_status(
        &self,
        id: Uuid,
        from: BidStatus,
        to: BidStatus,
    ) -> MarketResult<u64> {
        let mut bids = self.bids.write().await;
        match bids.get_mut(&id) {
            Some(bid) if bid.status == from => {
                bid.status = to;
                bid.updated_at = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn insert_message(&self, message: Message) -> MarketResult<Message> {
        let mut messages = self.messages.write().await;
        messages.push(message.clone());
        Ok(message)
    }

    async fn count_messages(&self, question_id: Uuid, role: AuthorRole) -> MarketResult<u64> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.question_id == question_id && m.author_role == role)
            .count() as u64)
    }
}

#[async_trait]
impl AccountDirectory for InMemoryMarketplaceStore {
    async fn get_expert(&self, expert_id: Uuid) -> MarketResult<Option<ExpertProfile>> {
        let experts = self.experts.read().await;
        Ok(experts.get(&expert_id).cloned())
    }

    async fn save_expert(&self, profile: ExpertProfile) -> MarketResult<ExpertProfile> {
        let mut experts = self.experts.write().await;
        experts.insert(profile.expert_id, profile.clone());
        Ok(profile)
    }

    async fn save_reputation(&self, expert_id: Uuid, reputation: Reputation) -> MarketResult<()> {
        let mut experts = self.experts.write().await;
        let profile = experts
            .get_mut(&expert_id)
            .ok_or_else(|| MarketError::expert_not_found(expert_id))?;
        profile.reputation_score = reputation.score;
        profile.expert_level = reputation.level;
        profile.updated_at = Utc::now();
        Ok(())
    }

    async fn expert_metrics(&self, expert_id: Uuid) -> MarketResult<ExpertMetrics> {
        let answered: Vec<Question> = {
            let questions = self.questions.read().await;
            questions
                .values()
                .filter(|q| q.expert_id == Some(expert_id) && q.answered_at.is_some())
                .cloned()
                .collect()
        };

        let ids: HashSet<Uuid> = answered.iter().map(|q| q.id).collect();
        let threaded: HashSet<Uuid> = {
            let messages = self.messages.read().await;
            messages
                .iter()
                .filter(|m| m.author_role == AuthorRole::Diyer && ids.contains(&m.question_id))
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
        let mut experts = self.experts.write().await;
        let profile = experts
            .get_mut(&expert_id)
            .ok_or_else(|| MarketError::expert_not_found(expert_id))?;
        profile.corrections_count += 1;
        Ok(())
    }

    async fn record_graduation(&self, expert_id: Uuid) -> MarketResult<()> {
        let mut experts = self.experts.write().await;
        let profile = experts
            .get_mut(&expert_id)
            .ok_or_else(|| MarketError::expert_not_found(expert_id))?;
        profile.graduations_count += 1;
        Ok(())
    }

    async fn billing_profile(&self, diyer_id: Uuid) -> MarketResult<Option<BillingProfile>> {
        let billing = self.billing.read().await;
        Ok(billing.get(&diyer_id).cloned())
    }

    async fn save_billing_profile(&self, profile: BillingProfile) -> MarketResult<BillingProfile> {
        let mut billing = self.billing.write().await;
        billing.insert(profile.diyer_id, profile.clone());
        Ok(profile)
    }
}

#[async_trait]
impl CreditLedger for InMemoryMarketplaceStore {
    async fn append_credit(&self, entry: CreditTransaction) -> MarketResult<i64> {
        let mut credits = self.credits.write().await;
        let account = credits.entry(entry.diyer_id).or_default();
        let balance = account.iter().map(|t| t.amount_cents).sum::<i64>() + entry.amount_cents;
        if balance < 0 {
            return Err(MarketError::Conflict(ConflictReason::InsufficientCredit));
        }
        account.push(entry);
        Ok(balance)
    }

    async fn credit_balance(&self, diyer_id: Uuid) -> MarketResult<i64> {
        let credits = self.credits.read().await;
        Ok(credits
            .get(&diyer_id)
            .map_or(0, |account| account.iter().map(|t| t.amount_cents).sum()))
    }

    async fn credit_history(&self, diyer_id: Uuid) -> MarketResult<Vec<CreditTransaction>> {
        let credits = self.credits.read().await;
        Ok(credits.get(&diyer_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl PaymentAttemptLog for InMemoryMarketplaceStore {
    async fn record_attempt(&self, attempt: PaymentAttempt) -> MarketResult<()> {
        let mut attempts = self.attempts.write().await;
        attempts.push(attempt);
        Ok(())
    }

    async fn attempts_for(&self, question_id: Uuid) -> MarketResult<Vec<PaymentAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts
            .iter()
            .filter(|a| a.question_id == question_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreditReason, QuestionStatus};
    use crate::testing::open_question;

    #[tokio::test]
    async fn test_conditional_update_applies_only_when_predicates_hold() {
        let store = InMemoryMarketplaceStore::new();
        let question = store
            .insert_question(open_question(Uuid::now_v7(), 3000))
            .await
            .unwrap();

        let now = Utc::now();
        let expert = Uuid::now_v7();
        let patch = QuestionPatch::claim(expert, now, now);
        let predicates = [QuestionPredicate::StatusIs(QuestionStatus::Open)];

        let first = store
            .conditional_update(question.id, &predicates, patch.clone())
            .await
            .unwrap();
        let second = store
            .conditional_update(question.id, &predicates, patch)
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);

        let stored = store.get_question(question.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QuestionStatus::Claimed);
        assert_eq!(stored.expert_id, Some(expert));
    }

    #[tokio::test]
    async fn test_missing_row_affects_nothing() {
        let store = InMemoryMarketplaceStore::new();
        let affected = store
            .conditional_update(Uuid::now_v7(), &[], QuestionPatch::release())
            .await
            .unwrap();
        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn test_credit_account_is_created_lazily() {
        let store = InMemoryMarketplaceStore::new();
        let diyer = Uuid::now_v7();
        assert_eq!(store.credit_balance(diyer).await.unwrap(), 0);

        let balance = store
            .append_credit(CreditTransaction::new(diyer, 6000, CreditReason::NotHelpful, None))
            .await
            .unwrap();
        assert_eq!(balance, 6000);

        let balance = store
            .append_credit(CreditTransaction::new(
                diyer,
                -2500,
                CreditReason::AppliedToQuestion,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(balance, 3500);
        assert_eq!(store.credit_history(diyer).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overdraw() {
        let store = Arc::new(InMemoryMarketplaceStore::new());
        let diyer = Uuid::now_v7();
        store
            .append_credit(CreditTransaction::new(diyer, 3000, CreditReason::NotHelpful, None))
            .await
            .unwrap();

        let results = futures::future::join_all((0..4).map(|_| {
            let store = store.clone();
            async move {
                store
                    .append_credit(CreditTransaction::new(
                        diyer,
                        -3000,
                        CreditReason::AppliedToQuestion,
                        None,
                    ))
                    .await
            }
        }))
        .await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
            e,
            MarketError::Conflict(ConflictReason::InsufficientCredit)
        )));
        assert_eq!(store.credit_balance(diyer).await.unwrap(), 0);
        assert_eq!(store.credit_history(diyer).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_query_filters_and_orders_newest_first() {
        let store = InMemoryMarketplaceStore::new();
        let diyer = Uuid::now_v7();

        let mut older = open_question(diyer, 3000);
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        older.category = "plumbing".to_string();
        let newer = open_question(diyer, 3000);
        let other = open_question(Uuid::now_v7(), 3000);

        for q in [older.clone(), newer.clone(), other] {
            store.insert_question(q).await.unwrap();
        }

        let mine = store
            .query_questions(QuestionQuery {
                diyer_id: Some(diyer),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            mine.iter().map(|q| q.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );

        let plumbing = store
            .query_questions(QuestionQuery {
                categories: Some(vec!["Plumbing".to_string()]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(plumbing.len(), 1);
        assert_eq!(plumbing[0].id, older.id);
    }
}
