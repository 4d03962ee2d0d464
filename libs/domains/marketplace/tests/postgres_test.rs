//! Integration tests for the Postgres store
//!
//! Each test starts its own Postgres container with the marketplace
//! migrations applied. Run with `cargo test -- --ignored` when Docker is
//! available.

use std::sync::Arc;

use chrono::{Duration, Utc};
use domain_marketplace::repository::{QuestionPatch, QuestionPredicate, QuestionQuery};
use domain_marketplace::*;
use futures::future::join_all;
use test_utils::{TestDataBuilder, TestDatabase};
use uuid::Uuid;

fn open_question(diyer_id: Uuid, category: &str, price_cents: i64) -> Question {
    let now = Utc::now();
    let fee = price_cents / 5;
    Question {
        id: Uuid::now_v7(),
        diyer_id,
        category: category.to_string(),
        body: "Ceiling drywall sags below the upstairs tub".to_string(),
        photo_count: 2,
        expert_id: None,
        target_expert_id: None,
        status: QuestionStatus::Open,
        marked_not_helpful: false,
        payout_status: PayoutStatus::Pending,
        claimed_at: None,
        claim_expires_at: None,
        answered_at: None,
        accepted_at: None,
        answer: None,
        rating: None,
        price_cents,
        platform_fee_cents: fee,
        expert_payout_cents: price_cents - fee,
        pricing_mode: PricingMode::Fixed,
        difficulty_score: 4,
        price_tier: PriceTier::Standard,
        bid_deadline: None,
        bid_count: 0,
        accepted_bid_id: None,
        current_tier: 1,
        credit_applied_cents: 0,
        credit_owed_cents: 0,
        charge_ref: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_question_round_trips_through_postgres() {
    let db = TestDatabase::new().await;
    let store = PgMarketplaceStore::new(db.connection());
    let builder = TestDataBuilder::from_test_name("pg_round_trip");

    let question = open_question(builder.user_id(), "drywall", 4500);
    let inserted = store.insert_question(question.clone()).await.unwrap();

    let fetched = store.get_question(inserted.id).await.unwrap().unwrap();
    assert_eq!(fetched.id, question.id);
    assert_eq!(fetched.status, QuestionStatus::Open);
    assert_eq!(fetched.price_tier, PriceTier::Standard);
    assert_eq!(fetched.price_cents, 4500);
    assert_eq!(fetched.expert_payout_cents, 3600);
    assert_eq!(fetched.photo_count, 2);

    assert!(store.get_question(Uuid::now_v7()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_conditional_claim_applies_once() {
    let db = TestDatabase::new().await;
    let store = Arc::new(PgMarketplaceStore::new(db.connection()));
    let builder = TestDataBuilder::from_test_name("pg_conditional_claim");

    let question = store
        .insert_question(open_question(builder.user_id(), "plumbing", 3000))
        .await
        .unwrap();

    let now = Utc::now();
    let question_id = question.id;
    let experts: Vec<Uuid> = (0..6).map(|_| Uuid::now_v7()).collect();
    let results = join_all(experts.iter().map(|expert| {
        let store = store.clone();
        let expert = *expert;
        async move {
            store
                .conditional_update(
                    question_id,
                    &[QuestionPredicate::StatusIs(QuestionStatus::Open)],
                    QuestionPatch::claim(expert, now, now + Duration::minutes(120)),
                )
                .await
                .unwrap()
        }
    }))
    .await;

    assert_eq!(results.iter().sum::<u64>(), 1);

    let claimed = store.get_question(question.id).await.unwrap().unwrap();
    assert_eq!(claimed.status, QuestionStatus::Claimed);
    assert!(claimed.expert_id.is_some_and(|e| experts.contains(&e)));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_expiry_predicates_and_release() {
    let db = TestDatabase::new().await;
    let store = PgMarketplaceStore::new(db.connection());
    let builder = TestDataBuilder::from_test_name("pg_expiry");
    let expert = builder.other_user_id("expert");

    let question = store
        .insert_question(open_question(builder.user_id(), "plumbing", 3000))
        .await
        .unwrap();
    let claimed_at = Utc::now() - Duration::minutes(200);
    store
        .conditional_update(
            question.id,
            &[QuestionPredicate::StatusIs(QuestionStatus::Open)],
            QuestionPatch::claim(expert, claimed_at, claimed_at + Duration::minutes(120)),
        )
        .await
        .unwrap();

    let now = Utc::now();
    let answered = store
        .conditional_update(
            question.id,
            &[
                QuestionPredicate::StatusIs(QuestionStatus::Claimed),
                QuestionPredicate::ClaimActiveAt(now),
            ],
            QuestionPatch {
                status: Some(QuestionStatus::Answered),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(answered, 0);

    let expired = store
        .query_questions(QuestionQuery {
            status: Some(QuestionStatus::Claimed),
            claim_expired_before: Some(now),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);

    let released = store
        .conditional_update(
            question.id,
            &[
                QuestionPredicate::StatusIs(QuestionStatus::Claimed),
                QuestionPredicate::ClaimExpiredBefore(now),
            ],
            QuestionPatch::release(),
        )
        .await
        .unwrap();
    assert_eq!(released, 1);

    let open = store.get_question(question.id).await.unwrap().unwrap();
    assert_eq!(open.status, QuestionStatus::Open);
    assert_eq!(open.expert_id, None);
    assert_eq!(open.claim_expires_at, None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_bid_slots_are_reserved_atomically() {
    let db = TestDatabase::new().await;
    let store = Arc::new(PgMarketplaceStore::new(db.connection()));
    let builder = TestDataBuilder::from_test_name("pg_bid_slots");

    let question = store
        .insert_question(Question {
            pricing_mode: PricingMode::Bidding,
            bid_deadline: Some(Utc::now() + Duration::hours(2)),
            ..open_question(builder.user_id(), "structural", 6000)
        })
        .await
        .unwrap();

    let now = Utc::now();
    let question_id = question.id;
    let reserved = join_all((0..5).map(|_| {
        let store = store.clone();
        async move {
            store
                .conditional_update(
                    question_id,
                    &[
                        QuestionPredicate::StatusIs(QuestionStatus::Open),
                        QuestionPredicate::NoAcceptedBid,
                        QuestionPredicate::BidCountBelow(3),
                        QuestionPredicate::BidDeadlineAfter(now),
                    ],
                    QuestionPatch {
                        increment_bid_count: true,
                        ..Default::default()
                    },
                )
                .await
                .unwrap()
        }
    }))
    .await;

    assert_eq!(reserved.iter().sum::<u64>(), 3);
    let stored = store.get_question(question.id).await.unwrap().unwrap();
    assert_eq!(stored.bid_count, 3);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_duplicate_pending_bid_is_rejected_by_index() {
    let db = TestDatabase::new().await;
    let store = PgMarketplaceStore::new(db.connection());
    let builder = TestDataBuilder::from_test_name("pg_duplicate_bid");
    let expert = builder.other_user_id("expert");

    let question = store
        .insert_question(Question {
            pricing_mode: PricingMode::Bidding,
            ..open_question(builder.user_id(), "structural", 6000)
        })
        .await
        .unwrap();

    let first = store
        .insert_bid(Bid::new(question.id, expert, 5000))
        .await
        .unwrap();
    assert!(
        store
            .insert_bid(Bid::new(question.id, expert, 4000))
            .await
            .is_err()
    );

    // Withdrawn bids no longer block a fresh one.
    let moved = store
        .update_bid_status(first.id, BidStatus::Pending, BidStatus::Withdrawn)
        .await
        .unwrap();
    assert_eq!(moved, 1);
    store
        .insert_bid(Bid::new(question.id, expert, 4000))
        .await
        .unwrap();

    let bids = store.list_bids(question.id).await.unwrap();
    assert_eq!(bids.len(), 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_queue_query_filters_category_and_visibility() {
    let db = TestDatabase::new().await;
    let store = PgMarketplaceStore::new(db.connection());
    let builder = TestDataBuilder::from_test_name("pg_queue_query");
    let diyer = builder.user_id();
    let expert = builder.other_user_id("expert");

    let pool = store
        .insert_question(open_question(diyer, "Plumbing", 3000))
        .await
        .unwrap();
    let direct = store
        .insert_question(Question {
            target_expert_id: Some(expert),
            ..open_question(diyer, "plumbing", 3000)
        })
        .await
        .unwrap();
    store
        .insert_question(Question {
            target_expert_id: Some(builder.other_user_id("someone-else")),
            ..open_question(diyer, "plumbing", 3000)
        })
        .await
        .unwrap();
    store
        .insert_question(open_question(diyer, "roofing", 3000))
        .await
        .unwrap();

    let visible = store
        .query_questions(QuestionQuery {
            status: Some(QuestionStatus::Open),
            categories: Some(vec!["plumbing".to_string()]),
            visible_to_expert: Some(expert),
            exclude_diyer_id: Some(expert),
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();

    let mut ids: Vec<Uuid> = visible.iter().map(|q| q.id).collect();
    ids.sort();
    let mut expected = vec![pool.id, direct.id];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_credit_balance_tracks_ledger() {
    let db = TestDatabase::new().await;
    let store = PgMarketplaceStore::new(db.connection());
    let diyer = TestDataBuilder::from_test_name("pg_credit").user_id();

    assert_eq!(store.credit_balance(diyer).await.unwrap(), 0);

    let balance = store
        .append_credit(CreditTransaction::new(
            diyer,
            6000,
            CreditReason::NotHelpful,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(balance, 6000);

    let balance = store
        .append_credit(CreditTransaction::new(
            diyer,
            -2500,
            CreditReason::AppliedToQuestion,
            Some(Uuid::now_v7()),
        ))
        .await
        .unwrap();
    assert_eq!(balance, 3500);

    // Overdrawing violates the balance check and rolls back the entry.
    let overdraw = store
        .append_credit(CreditTransaction::new(
            diyer,
            -5000,
            CreditReason::AppliedToQuestion,
            None,
        ))
        .await;
    assert!(matches!(
        overdraw,
        Err(MarketError::Conflict(ConflictReason::InsufficientCredit))
    ));
    assert_eq!(store.credit_balance(diyer).await.unwrap(), 3500);
    assert_eq!(store.credit_history(diyer).await.unwrap().len(), 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_expert_profile_upsert_and_counters() {
    let db = TestDatabase::new().await;
    let store = PgMarketplaceStore::new(db.connection());
    let expert_id = TestDataBuilder::from_test_name("pg_expert").user_id();

    let mut profile = ExpertProfile::new(expert_id, vec!["electrical".to_string()]);
    store.save_expert(profile.clone()).await.unwrap();

    profile.specialties.push("plumbing".to_string());
    profile.payout_account_ref = Some("acct_123".to_string());
    let saved = store.save_expert(profile).await.unwrap();
    assert_eq!(saved.specialties, vec!["electrical", "plumbing"]);

    store.record_correction(expert_id).await.unwrap();
    store.record_graduation(expert_id).await.unwrap();
    store.record_graduation(expert_id).await.unwrap();
    store
        .save_reputation(
            expert_id,
            Reputation {
                score: 71.5,
                level: ExpertLevel::Gold,
            },
        )
        .await
        .unwrap();

    let stored = store.get_expert(expert_id).await.unwrap().unwrap();
    assert_eq!(stored.corrections_count, 1);
    assert_eq!(stored.graduations_count, 2);
    assert_eq!(stored.expert_level, ExpertLevel::Gold);
    assert_eq!(stored.payout_account_ref.as_deref(), Some("acct_123"));

    let missing = store.record_correction(Uuid::now_v7()).await.unwrap_err();
    assert!(matches!(missing, MarketError::NotFound { .. }));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_service_claim_flow_on_postgres() {
    let db = TestDatabase::new().await;
    let store = Arc::new(PgMarketplaceStore::new(db.connection()));
    let gateway = Arc::new(FakeGateway::new());
    let service = MarketplaceService::new(
        store.clone(),
        gateway.clone(),
        MarketplaceConfig {
            bidding_rollout_percent: 0,
            dynamic_pricing_rollout_percent: 0,
            ..Default::default()
        },
    );
    let builder = TestDataBuilder::from_test_name("pg_service_flow");
    let diyer = builder.user_id();
    let expert = builder.other_user_id("expert");

    let mut profile = ExpertProfile::new(expert, vec![]);
    profile.payout_account_ref = Some("acct_pg".to_string());
    service.save_expert_profile(profile).await.unwrap();
    service
        .save_billing_profile(BillingProfile {
            diyer_id: diyer,
            customer_ref: "cus_pg".to_string(),
            payment_method_ref: Some("pm_pg".to_string()),
        })
        .await
        .unwrap();

    let question = store
        .insert_question(open_question(diyer, "plumbing", 3000))
        .await
        .unwrap();
    let receipt = service.claim_question(question.id, expert).await.unwrap();
    assert!(receipt.question.charge_ref.is_some());

    service
        .submit_answer(question.id, expert, "Shut off the supply first.".to_string())
        .await
        .unwrap();
    let outcome = service
        .accept_answer(question.id, diyer, Some(5))
        .await
        .unwrap();
    assert_eq!(outcome.question.payout_status, PayoutStatus::Transferred);

    let attempts = store.attempts_for(question.id).await.unwrap();
    let kinds: Vec<PaymentKind> = attempts.iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![PaymentKind::Charge, PaymentKind::Transfer]);
}
