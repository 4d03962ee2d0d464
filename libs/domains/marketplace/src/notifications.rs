//! Notification sink contract and the fire-and-forget notifier.
//!
//! Delivery is best effort. A failed notification is logged and counted, and
//! never changes the outcome of the operation that produced it.

use std::sync::Arc;

use async_trait::async_trait;
use observability::MarketplaceMetrics;
use serde::Serialize;
use strum::Display;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    QuestionClaimed,
    BidReceived,
    BidAccepted,
    AnswerSubmitted,
    AnswerAccepted,
    MarkedNotHelpful,
    ClaimExpired,
    TierUpgraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
}

impl Notification {
    pub fn new(
        user_id: Uuid,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            body: body.into(),
            link: None,
        }
    }

    /// Link to the question page.
    pub fn for_question(mut self, question_id: Uuid) -> Self {
        self.link = Some(format!("/questions/{}", question_id));
        self
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification sink unavailable: {0}")]
    Unavailable(String),

    #[error("Notification rejected: {0}")]
    Rejected(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError>;

    /// Sink name for logging.
    fn name(&self) -> &'static str;
}

/// Sink that only writes notifications to the log
#[derive(Debug, Default, Clone)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            user_id = %notification.user_id,
            kind = %notification.kind,
            title = %notification.title,
            "Notification"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Deliver a notification, logging instead of returning any failure.
    pub async fn send(&self, notification: Notification) {
        let kind = notification.kind;
        let user_id = notification.user_id;
        if let Err(e) = self.sink.notify(notification).await {
            MarketplaceMetrics::record_notification_failed(&kind.to_string());
            warn!(
                sink = self.sink.name(),
                %user_id,
                %kind,
                error = %e,
                "Failed to deliver notification"
            );
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(Arc::new(TracingNotificationSink))
    }
}
