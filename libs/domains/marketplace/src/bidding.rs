//! Bidding Auctioneer
//!
//! Bid windows live beside the open/claimed axis: a window is open while the
//! question is still open, nothing is accepted, fewer than
//! [`MAX_BIDS_BEFORE_CLOSE`] bids were submitted and the deadline (if any) is
//! ahead. Slot reservation and acceptance are conditional updates on the
//! question row, so acceptance and a racing claim cannot both succeed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use strum::Display;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{ConflictReason, MarketError, MarketResult};
use crate::models::{Bid, BidStatus, PricingMode, Question, QuestionStatus};
use crate::pricing::{self, BIDDING_THRESHOLD, Difficulty};
use crate::repository::{QuestionPatch, QuestionPredicate, QuestionStore};

pub const MIN_BID_CENTS: i64 = 1500;
pub const MAX_BID_CENTS: i64 = 15000;
pub const MAX_BIDS_BEFORE_CLOSE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CloseReason {
    DeadlinePassed,
    MaxBidsReached,
    BidAccepted,
    /// The question left `open` through a direct claim
    QuestionClaimed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum BidWindow {
    Open,
    Closed(CloseReason),
}

impl BidWindow {
    pub fn is_open(&self) -> bool {
        matches!(self, BidWindow::Open)
    }
}

/// Current bid window of a bidding-mode question.
pub fn window(question: &Question, now: DateTime<Utc>) -> BidWindow {
    if question.accepted_bid_id.is_some() {
        return BidWindow::Closed(CloseReason::BidAccepted);
    }
    if question.status != QuestionStatus::Open {
        return BidWindow::Closed(CloseReason::QuestionClaimed);
    }
    if question.bid_count >= MAX_BIDS_BEFORE_CLOSE {
        return BidWindow::Closed(CloseReason::MaxBidsReached);
    }
    match question.bid_deadline {
        Some(deadline) if now >= deadline => BidWindow::Closed(CloseReason::DeadlinePassed),
        _ => BidWindow::Open,
    }
}

pub fn validate_bid_price(proposed_price_cents: i64) -> MarketResult<()> {
    if !(MIN_BID_CENTS..=MAX_BID_CENTS).contains(&proposed_price_cents) {
        return Err(MarketError::Validation(format!(
            "bid must be between {} and {} cents, got {}",
            MIN_BID_CENTS, MAX_BID_CENTS, proposed_price_cents
        )));
    }
    Ok(())
}

/// Whether a new question enters bidding mode.
///
/// `enabled` is the per-user bidding toggle.
pub fn qualifies_for_bidding(
    difficulty: Difficulty,
    free: bool,
    direct: bool,
    enabled: bool,
) -> bool {
    enabled && !free && !direct && difficulty.score >= BIDDING_THRESHOLD
}

/// Bid window lifecycle over the question store
pub struct BiddingAuctioneer<S: QuestionStore + ?Sized> {
    store: Arc<S>,
    claim_window: Duration,
    platform_fee_bps: i64,
}

impl<S: QuestionStore + ?Sized> BiddingAuctioneer<S> {
    pub fn new(store: Arc<S>, claim_window: Duration, platform_fee_bps: i64) -> Self {
        Self {
            store,
            claim_window,
            platform_fee_bps,
        }
    }

    async fn load(&self, question_id: Uuid) -> MarketResult<Question> {
        self.store
            .get_question(question_id)
            .await?
            .ok_or_else(|| MarketError::question_not_found(question_id))
    }

    /// Validate and record a bid, reserving one of the window's slots.
    #[instrument(skip(self), fields(question_id = %question_id, expert_id = %expert_id))]
    pub async fn submit_bid(
        &self,
        question_id: Uuid,
        expert_id: Uuid,
        proposed_price_cents: i64,
    ) -> MarketResult<Bid> {
        validate_bid_price(proposed_price_cents)?;

        let question = self.load(question_id).await?;
        if question.pricing_mode != PricingMode::Bidding {
            return Err(MarketError::Validation(format!(
                "question {} does not accept bids",
                question_id
            )));
        }
        if question.diyer_id == expert_id {
            return Err(MarketError::Permission(
                "experts cannot bid on their own questions".to_string(),
            ));
        }

        let now = Utc::now();
        if let BidWindow::Closed(reason) = window(&question, now) {
            return Err(MarketError::Conflict(ConflictReason::BiddingClosed(reason)));
        }

        let existing = self.store.list_bids(question_id).await?;
        if existing
            .iter()
            .any(|b| b.expert_id == expert_id && b.status == BidStatus::Pending)
        {
            return Err(MarketError::Conflict(ConflictReason::DuplicateBid));
        }

        let reserved = self
            .store
            .conditional_update(
                question_id,
                &[
                    QuestionPredicate::StatusIs(QuestionStatus::Open),
                    QuestionPredicate::NoAcceptedBid,
                    QuestionPredicate::BidCountBelow(MAX_BIDS_BEFORE_CLOSE),
                    QuestionPredicate::BidDeadlineAfter(now),
                ],
                QuestionPatch {
                    increment_bid_count: true,
                    ..Default::default()
                },
            )
            .await?;

        if reserved == 0 {
            let current = self.load(question_id).await?;
            let reason = match window(&current, now) {
                BidWindow::Closed(reason) => reason,
                // Another writer filled the last slot between our read and update.
                BidWindow::Open => CloseReason::MaxBidsReached,
            };
            debug!(%reason, "Bid slot reservation lost");
            return Err(MarketError::Conflict(ConflictReason::BiddingClosed(reason)));
        }

        let bid = self
            .store
            .insert_bid(Bid::new(question_id, expert_id, proposed_price_cents))
            .await?;

        info!(bid_id = %bid.id, price_cents = proposed_price_cents, "Bid submitted");
        Ok(bid)
    }

    /// Withdraw a pending bid. The slot it used stays consumed.
    #[instrument(skip(self), fields(bid_id = %bid_id, expert_id = %expert_id))]
    pub async fn withdraw_bid(&self, bid_id: Uuid, expert_id: Uuid) -> MarketResult<Bid> {
        let bid = self
            .store
            .get_bid(bid_id)
            .await?
            .ok_or_else(|| MarketError::bid_not_found(bid_id))?;

        if bid.expert_id != expert_id {
            return Err(MarketError::Permission(
                "only the bidding expert can withdraw a bid".to_string(),
            ));
        }

        let affected = self
            .store
            .update_bid_status(bid_id, BidStatus::Pending, BidStatus::Withdrawn)
            .await?;
        if affected == 0 {
            return Err(MarketError::Conflict(ConflictReason::BidNotPending));
        }

        Ok(Bid {
            status: BidStatus::Withdrawn,
            updated_at: Utc::now(),
            ..bid
        })
    }

    /// Accept a bid: the question moves to `claimed` by the bidder at the bid
    /// price, with the fee split frozen at the live rate.
    ///
    /// Returns the question as it was before acceptance (for reverting) and
    /// the question after.
    #[instrument(skip(self), fields(question_id = %question_id, bid_id = %bid_id))]
    pub async fn accept_bid(
        &self,
        question_id: Uuid,
        bid_id: Uuid,
    ) -> MarketResult<(Question, Question, Bid)> {
        let before = self.load(question_id).await?;
        let bid = self
            .store
            .get_bid(bid_id)
            .await?
            .ok_or_else(|| MarketError::bid_not_found(bid_id))?;

        if bid.question_id != question_id {
            return Err(MarketError::Validation(format!(
                "bid {} does not belong to question {}",
                bid_id, question_id
            )));
        }
        if bid.status != BidStatus::Pending {
            return Err(MarketError::Conflict(ConflictReason::BidNotPending));
        }

        let now = Utc::now();
        let split = pricing::split_fee(bid.proposed_price_cents, self.platform_fee_bps);
        let patch = QuestionPatch {
            accepted_bid_id: Some(Some(bid.id)),
            price_cents: Some(bid.proposed_price_cents),
            platform_fee_cents: Some(split.platform_fee_cents),
            expert_payout_cents: Some(split.expert_payout_cents),
            ..QuestionPatch::claim(bid.expert_id, now, now + self.claim_window)
        };

        let affected = self
            .store
            .conditional_update(
                question_id,
                &[
                    QuestionPredicate::StatusIs(QuestionStatus::Open),
                    QuestionPredicate::NoAcceptedBid,
                ],
                patch,
            )
            .await?;
        if affected == 0 {
            let current = self.load(question_id).await?;
            let reason = if current.accepted_bid_id.is_some() {
                CloseReason::BidAccepted
            } else {
                CloseReason::QuestionClaimed
            };
            return Err(MarketError::Conflict(ConflictReason::BiddingClosed(reason)));
        }

        let marked = self
            .store
            .update_bid_status(bid.id, BidStatus::Pending, BidStatus::Accepted)
            .await?;
        if marked == 0 {
            // Withdrawn while we were accepting it.
            self.restore_question(&before, bid.id).await?;
            return Err(MarketError::Conflict(ConflictReason::BidNotPending));
        }

        let after = self.load(question_id).await?;
        info!(expert_id = %bid.expert_id, price_cents = bid.proposed_price_cents, "Bid accepted");
        Ok((
            before,
            after,
            Bid {
                status: BidStatus::Accepted,
                ..bid
            },
        ))
    }

    /// Undo an acceptance whose charge failed. The bid goes back to pending.
    #[instrument(skip(self, before), fields(question_id = %before.id, bid_id = %bid_id))]
    pub async fn revert_acceptance(&self, before: &Question, bid_id: Uuid) -> MarketResult<u64> {
        let restored = self.restore_question(before, bid_id).await?;
        self.store
            .update_bid_status(bid_id, BidStatus::Accepted, BidStatus::Pending)
            .await?;
        Ok(restored)
    }

    async fn restore_question(&self, before: &Question, bid_id: Uuid) -> MarketResult<u64> {
        let patch = QuestionPatch {
            accepted_bid_id: Some(None),
            price_cents: Some(before.price_cents),
            platform_fee_cents: Some(before.platform_fee_cents),
            expert_payout_cents: Some(before.expert_payout_cents),
            ..QuestionPatch::release()
        };
        self.store
            .conditional_update(
                before.id,
                &[
                    QuestionPredicate::StatusIs(QuestionStatus::Claimed),
                    QuestionPredicate::AcceptedBidIs(bid_id),
                ],
                patch,
            )
            .await
    }
}
