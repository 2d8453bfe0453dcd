//! Alert dispatcher: broadcast plus push notification for a recorded detection.
//!
//! Both sub-steps run for every report. Neither can fail the match that produced
//! the report: the outcome is logged, written back to the report's alert
//! bookkeeping, and returned to whoever awaits the dispatch task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use vigil_core::models::{AlertDelivery, AlertEvent, AlertMethod, AlertStatus, DetectionReport};
use vigil_core::VigilError;

use crate::subsystems::push::{PushBackend, PushError, PushMessage};
use crate::subsystems::reports::ReportStore;

// ============================================================================
// Broadcast hub
// ============================================================================

/// Fan-out channel for `match_found` events. Subscribers that fall behind lose
/// the oldest events; nobody listening is not an error.
#[derive(Clone)]
pub struct AlertHub {
    sender: broadcast::Sender<AlertEvent>,
}

impl AlertHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, event: AlertEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

// ============================================================================
// Recipients
// ============================================================================

#[async_trait]
pub trait RecipientStore: Send + Sync {
    /// Delivery tokens of every active recipient.
    async fn active_tokens(&self) -> Result<Vec<String>, VigilError>;

    /// Forget the given tokens. Returns how many registrations were cleared.
    async fn prune_tokens(&self, tokens: &[String]) -> Result<u64, VigilError>;
}

pub struct PgRecipientStore {
    pool: PgPool,
}

impl PgRecipientStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientStore for PgRecipientStore {
    async fn active_tokens(&self) -> Result<Vec<String>, VigilError> {
        let tokens: Vec<String> = sqlx::query_scalar(
            "SELECT fcm_token FROM users
             WHERE is_active AND fcm_token IS NOT NULL AND fcm_token <> ''",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    async fn prune_tokens(&self, tokens: &[String]) -> Result<u64, VigilError> {
        if tokens.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("UPDATE users SET fcm_token = NULL WHERE fcm_token = ANY($1)")
            .bind(tokens)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// Outcome
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastStatus {
    Sent { subscribers: usize },
    NoSubscribers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyStatus {
    /// No push backend configured.
    Skipped,
    Completed {
        succeeded: u32,
        failed: u32,
        pruned: u64,
    },
    /// Recipients could not be listed; nothing was sent.
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub broadcast: BroadcastStatus,
    pub notify: NotifyStatus,
}

impl DispatchOutcome {
    /// Notify failed for at least one recipient, or as a whole.
    pub fn is_degraded(&self) -> bool {
        match &self.notify {
            NotifyStatus::Skipped => false,
            NotifyStatus::Completed { failed, .. } => *failed > 0,
            NotifyStatus::Unavailable(_) => true,
        }
    }

    fn pushed(&self) -> u32 {
        match self.notify {
            NotifyStatus::Completed { succeeded, .. } => succeeded,
            _ => 0,
        }
    }

    fn push_failures(&self) -> u32 {
        match self.notify {
            NotifyStatus::Completed { failed, .. } => failed,
            _ => 0,
        }
    }

    /// At least one channel reached someone.
    pub fn alert_sent(&self) -> bool {
        self.pushed() > 0 || matches!(self.broadcast, BroadcastStatus::Sent { .. })
    }

    pub fn method(&self) -> Option<AlertMethod> {
        if self.pushed() > 0 {
            Some(AlertMethod::Fcm)
        } else if matches!(self.broadcast, BroadcastStatus::Sent { .. }) {
            Some(AlertMethod::Socket)
        } else {
            None
        }
    }

    pub fn delivery(&self) -> AlertDelivery {
        let sent = self.alert_sent();
        AlertDelivery {
            sent,
            sent_at: sent.then(Utc::now),
            method: self.method(),
            status: if self.is_degraded() {
                AlertStatus::Degraded
            } else {
                AlertStatus::Delivered
            },
            delivered: self.pushed(),
            failed: self.push_failures(),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct AlertDispatcher {
    hub: AlertHub,
    recipients: Arc<dyn RecipientStore>,
    push: Option<Arc<dyn PushBackend>>,
    reports: Arc<dyn ReportStore>,
    per_recipient_timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(
        hub: AlertHub,
        recipients: Arc<dyn RecipientStore>,
        push: Option<Arc<dyn PushBackend>>,
        reports: Arc<dyn ReportStore>,
        per_recipient_timeout: Duration,
    ) -> Self {
        Self {
            hub,
            recipients,
            push,
            reports,
            per_recipient_timeout,
        }
    }

    pub fn hub(&self) -> &AlertHub {
        &self.hub
    }

    /// Run dispatch on its own task so the match caller never waits on delivery.
    pub fn spawn(self: &Arc<Self>, report: DetectionReport) -> JoinHandle<DispatchOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.dispatch(&report).await })
    }

    pub async fn dispatch(&self, report: &DetectionReport) -> DispatchOutcome {
        let broadcast = self.broadcast(report);
        let notify = self.notify(report).await;
        let outcome = DispatchOutcome { broadcast, notify };

        if outcome.is_degraded() {
            tracing::warn!(
                report_id = %report.id,
                notify = ?outcome.notify,
                "Alert dispatch degraded"
            );
        } else {
            tracing::info!(
                report_id = %report.id,
                broadcast = ?outcome.broadcast,
                notify = ?outcome.notify,
                "Alert dispatched"
            );
        }

        if let Err(e) = self.reports.record_alert(report.id, &outcome.delivery()).await {
            tracing::warn!(report_id = %report.id, error = %e, "Failed to update alert bookkeeping");
        }

        outcome
    }

    fn broadcast(&self, report: &DetectionReport) -> BroadcastStatus {
        match self.hub.publish(AlertEvent::from(report)) {
            0 => BroadcastStatus::NoSubscribers,
            subscribers => BroadcastStatus::Sent { subscribers },
        }
    }

    async fn notify(&self, report: &DetectionReport) -> NotifyStatus {
        let Some(push) = self.push.as_ref() else {
            return NotifyStatus::Skipped;
        };

        let tokens = match self.recipients.active_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => return NotifyStatus::Unavailable(e.to_string()),
        };

        let message = PushMessage::for_report(report);
        let sends = tokens.iter().map(|token| {
            let push = Arc::clone(push);
            let message = &message;
            async move {
                let result = match tokio::time::timeout(
                    self.per_recipient_timeout,
                    push.send(message, token),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(PushError::Timeout),
                };
                (token, result)
            }
        });
        let results = join_all(sends).await;

        let mut succeeded = 0u32;
        let mut failed = 0u32;
        let mut invalid = Vec::new();
        for (token, result) in results {
            match result {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    failed += 1;
                    if e.is_invalid_token() {
                        invalid.push(token.clone());
                    } else {
                        tracing::debug!(backend = push.name(), error = %e, "Push delivery failed");
                    }
                }
            }
        }

        let pruned = match self.recipients.prune_tokens(&invalid).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to prune invalid push tokens");
                0
            }
        };

        NotifyStatus::Completed {
            succeeded,
            failed,
            pruned,
        }
    }
}
