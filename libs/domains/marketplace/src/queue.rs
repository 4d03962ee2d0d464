//! Queue Builder
//!
//! Read-only composition of the expert's effective priority and the open
//! pool. Callers run the expired-claim sweep first.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::MarketResult;
use crate::models::{ExpertProfile, PricingMode, Question, QuestionStatus, QueuePriority};
use crate::repository::{QuestionOrder, QuestionQuery, QuestionStore};
use crate::reputation;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpertQueue {
    pub expert_id: Uuid,
    pub priority: QueuePriority,
    pub questions: Vec<Question>,
}

pub struct QueueBuilder<S: QuestionStore + ?Sized> {
    store: Arc<S>,
    limit: usize,
}

impl<S: QuestionStore + ?Sized> QueueBuilder<S> {
    pub fn new(store: Arc<S>, limit: usize) -> Self {
        Self { store, limit }
    }

    /// Query for the expert's default view.
    pub fn query_for(&self, profile: &ExpertProfile, priority: QueuePriority) -> QuestionQuery {
        QuestionQuery {
            status: Some(QuestionStatus::Open),
            categories: (!profile.specialties.is_empty()).then(|| profile.specialties.clone()),
            exclude_diyer_id: Some(profile.expert_id),
            visible_to_expert: Some(profile.expert_id),
            // Standard experts can still act on bidding questions they find directly.
            pricing_mode: (priority == QueuePriority::Standard).then_some(PricingMode::Fixed),
            order: QuestionOrder::NewestFirst,
            limit: self.limit,
            ..Default::default()
        }
    }

    pub async fn build(&self, profile: &ExpertProfile) -> MarketResult<ExpertQueue> {
        let priority = reputation::effective_priority(profile);
        let questions = self
            .store
            .query_questions(self.query_for(profile, priority))
            .await?;

        tracing::debug!(
            expert_id = %profile.expert_id,
            %priority,
            count = questions.len(),
            "Built expert queue"
        );

        Ok(ExpertQueue {
            expert_id: profile.expert_id,
            priority,
            questions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMarketplaceStore;
    use crate::models::{ExpertLevel, SubscriptionTier};
    use crate::testing::{expert, open_question};

    async fn seeded() -> (Arc<InMemoryMarketplaceStore>, ExpertProfile, Vec<Question>) {
        let store = Arc::new(InMemoryMarketplaceStore::new());
        let profile = expert(&["plumbing"]);

        let mut plumbing = open_question(Uuid::now_v7(), 3000);
        plumbing.category = "Plumbing".to_string();

        let mut bidding = open_question(Uuid::now_v7(), 4800);
        bidding.category = "plumbing".to_string();
        bidding.pricing_mode = PricingMode::Bidding;

        let mut electrical = open_question(Uuid::now_v7(), 3000);
        electrical.category = "electrical".to_string();

        let mut own = open_question(profile.expert_id, 3000);
        own.category = "plumbing".to_string();

        let mut direct_other = open_question(Uuid::now_v7(), 3000);
        direct_other.category = "plumbing".to_string();
        direct_other.target_expert_id = Some(Uuid::now_v7());

        let questions = vec![plumbing, bidding, electrical, own, direct_other];
        for q in &questions {
            store.insert_question(q.clone()).await.unwrap();
        }
        (store, profile, questions)
    }

    #[tokio::test]
    async fn test_standard_expert_sees_fixed_specialty_questions() {
        let (store, profile, questions) = seeded().await;
        let queue = QueueBuilder::new(store, 50).build(&profile).await.unwrap();

        assert_eq!(queue.priority, QueuePriority::Standard);
        assert_eq!(
            queue.questions.iter().map(|q| q.id).collect::<Vec<_>>(),
            vec![questions[0].id]
        );
    }

    #[tokio::test]
    async fn test_priority_expert_also_sees_bidding_questions() {
        let (store, mut profile, questions) = seeded().await;
        profile.expert_level = ExpertLevel::Bronze;
        profile.subscription_tier = SubscriptionTier::Pro;

        let queue = QueueBuilder::new(store, 50).build(&profile).await.unwrap();

        assert_eq!(queue.priority, QueuePriority::Priority);
        let ids: Vec<Uuid> = queue.questions.iter().map(|q| q.id).collect();
        // Newest first
        assert_eq!(ids, vec![questions[1].id, questions[0].id]);
    }

    #[tokio::test]
    async fn test_no_specialties_means_every_category() {
        let (store, mut profile, _) = seeded().await;
        profile.specialties.clear();

        let queue = QueueBuilder::new(store, 50).build(&profile).await.unwrap();
        assert_eq!(queue.questions.len(), 2);
    }
}
