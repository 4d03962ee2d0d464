use thiserror::Error;
use uuid::Uuid;

use crate::bidding::CloseReason;
use crate::models::QuestionStatus;
use crate::payments::PaymentError;

/// Why a conditional transition did not apply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictReason {
    #[error("question was already claimed")]
    AlreadyClaimed,

    #[error("bidding is closed: {0}")]
    BiddingClosed(CloseReason),

    #[error("expected status {expected}, found {actual}")]
    InvalidStatus {
        expected: QuestionStatus,
        actual: QuestionStatus,
    },

    #[error("claim window has expired")]
    ClaimExpired,

    #[error("expert already has a pending bid on this question")]
    DuplicateBid,

    #[error("bid is no longer pending")]
    BidNotPending,

    #[error("conversation tier changed concurrently")]
    TierChanged,

    #[error("question is already at the highest tier")]
    MaxTierReached,

    #[error("credit balance is too low for this debit")]
    InsufficientCredit,
}

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Conflict: {0}")]
    Conflict(ConflictReason),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Payment failed: {0}")]
    Payment(#[from] PaymentError),

    #[error("Downstream failure during {operation}: {detail}")]
    Downstream {
        operation: &'static str,
        detail: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type MarketResult<T> = Result<T, MarketError>;

impl MarketError {
    pub fn question_not_found(id: Uuid) -> Self {
        MarketError::NotFound {
            entity: "Question",
            id,
        }
    }

    pub fn expert_not_found(id: Uuid) -> Self {
        MarketError::NotFound {
            entity: "Expert",
            id,
        }
    }

    pub fn bid_not_found(id: Uuid) -> Self {
        MarketError::NotFound { entity: "Bid", id }
    }

    /// True for races lost under normal concurrent load. Callers should move
    /// on to another question instead of treating these as faults.
    pub fn is_retryable_race(&self) -> bool {
        matches!(
            self,
            MarketError::Conflict(
                ConflictReason::AlreadyClaimed
                    | ConflictReason::BiddingClosed(_)
                    | ConflictReason::TierChanged
            )
        )
    }
}

impl From<sea_orm::DbErr> for MarketError {
    fn from(err: sea_orm::DbErr) -> Self {
        MarketError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(err: serde_json::Error) -> Self {
        MarketError::Internal(format!("JSON serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_races_are_retryable() {
        assert!(MarketError::Conflict(ConflictReason::AlreadyClaimed).is_retryable_race());
        assert!(
            MarketError::Conflict(ConflictReason::BiddingClosed(CloseReason::MaxBidsReached))
                .is_retryable_race()
        );
        assert!(!MarketError::Conflict(ConflictReason::ClaimExpired).is_retryable_race());
        assert!(!MarketError::Validation("bad".into()).is_retryable_race());
    }

    #[test]
    fn test_bidding_closed_message_names_reason() {
        let err = MarketError::Conflict(ConflictReason::BiddingClosed(
            CloseReason::MaxBidsReached,
        ));
        assert!(err.to_string().contains("max_bids_reached"));
    }
}
