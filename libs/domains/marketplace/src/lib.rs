//! Marketplace Domain
//!
//! The Q&A marketplace transaction engine: matches a DIYer's question to one
//! expert, prices the engagement, gates follow-up conversation behind paid
//! tiers, scores experts and moves money through an external gateway.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              MarketplaceService               │  ← Operations, permissions
//! └──┬──────────┬───────────┬──────────┬──────────┘
//!    │          │           │          │
//! ┌──▼────┐ ┌───▼──────┐ ┌──▼─────┐ ┌──▼────────┐
//! │Claims │ │ Bidding  │ │ Queue  │ │ Payments  │  ← Stateful components
//! └──┬────┘ └───┬──────┘ └──┬─────┘ └──┬────────┘
//!    │          │           │          │
//! ┌──▼──────────▼───────────▼──┐  ┌────▼────────┐
//! │ Repository (conditional    │  │  Gateway    │  ← Store / external service
//! │ updates, user-scoped view) │  │ fake|stripe │
//! └────────────────────────────┘  └─────────────┘
//!
//!   pricing · reputation · tier_gate              ← Pure functions
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use domain_marketplace::{
//!     FakeGateway, InMemoryMarketplaceStore, MarketplaceConfig, MarketplaceService,
//! };
//!
//! let store = Arc::new(InMemoryMarketplaceStore::new());
//! let service = MarketplaceService::new(
//!     store,
//!     Arc::new(FakeGateway::new()),
//!     MarketplaceConfig::default(),
//! );
//! ```

pub mod bidding;
pub mod claims;
pub mod config;
pub mod entity;
pub mod error;
pub mod features;
pub mod memory;
pub mod models;
pub mod notifications;
pub mod payments;
pub mod postgres;
pub mod pricing;
pub mod queue;
pub mod repository;
pub mod reputation;
pub mod service;
pub mod tier_gate;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use bidding::{BidWindow, BiddingAuctioneer, CloseReason};
pub use claims::ClaimCoordinator;
pub use config::{MarketplaceConfig, PaymentGatewayKind};
pub use error::{ConflictReason, MarketError, MarketResult};
pub use features::{Feature, FeatureToggle, RolloutToggle};
pub use memory::InMemoryMarketplaceStore;
pub use models::{
    AuthorRole, Bid, BidStatus, BillingProfile, ClaimReceipt, CreateQuestion, CreditReason,
    CreditTransaction, ExpertLevel, ExpertMetrics, ExpertProfile, Message, PaymentAttempt,
    PaymentKind, PaymentOutcome, PayoutStatus, PriceTier, PricingMode, ProjectContext, Question,
    QuestionStatus, QueuePriority, Reputation, SubscriptionTier,
};
pub use notifications::{
    Notification, NotificationError, NotificationKind, NotificationSink, Notifier,
    TracingNotificationSink,
};
pub use payments::{
    FakeGateway, PaymentError, PaymentGateway, PaymentOrchestrator, PayoutOutcome, StripeGateway,
    gateway_from_config,
};
pub use postgres::PgMarketplaceStore;
pub use queue::{ExpertQueue, QueueBuilder};
pub use repository::{
    AccountDirectory, CreditLedger, MarketplaceRepository, PaymentAttemptLog, QuestionStore,
    UserScopedQuestions,
};
pub use service::{
    AcceptOutcome, CreditRetryReport, MarketplaceService, MessageOutcome, NotHelpfulOutcome,
    PayoutRetryReport, SweepReport, TierUpgrade,
};
