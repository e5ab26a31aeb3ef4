//! Transactional email outbox.
//!
//! A transition that should notify the customer commits first; the dispatcher then writes
//! an outbox row in its own unit and attempts delivery in the background. Rows that fail
//! stay PENDING for the periodic drain until `max_attempts` is reached.
//!
//! Every attempt first claims its row for [`CLAIM_LEASE`]. The immediate send and the
//! drain can both pick up a fresh row, but only the one holding the claim sends it.

pub mod mailer;
pub mod templates;

use crate::{
    db::{
        models::{
            notifications::{DeliveryOutcome, EmailNotification, EmailNotificationCreateDBRequest, NotificationKind, NotificationStatus},
            transactions::Transaction,
        },
        store::{Store, UnitBudget},
    },
    errors::{Error, Result},
    types::NotificationId,
};
use chrono::{Duration, Utc};
use mailer::{Mailer, OutgoingEmail};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// How long a claimed row is reserved for its sender. A sender that dies mid-send
/// leaves the row to the drain once the lease lapses.
pub const CLAIM_LEASE: Duration = Duration::minutes(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub retrying: usize,
    pub failed: usize,
    /// Rows another sender claimed first
    pub skipped: usize,
}

#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
    budget: UnitBudget,
    max_attempts: i32,
    batch_size: i64,
}

impl Notifier {
    pub fn new(store: Arc<dyn Store>, mailer: Arc<dyn Mailer>, budget: UnitBudget, max_attempts: i32, batch_size: i64) -> Self {
        Self {
            store,
            mailer,
            budget,
            max_attempts,
            batch_size,
        }
    }

    /// Queue the email for an organizer decision and try to send it right away.
    ///
    /// Never fails: the transition that triggered it has already committed.
    pub async fn transaction_decided(&self, kind: NotificationKind, transaction: &Transaction) {
        match self.enqueue_decision(kind, transaction).await {
            Ok(notification) => {
                let notifier = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = notifier.deliver(notification.id).await {
                        warn!(notification_id = %notification.id, error = %e, "Immediate email delivery failed, leaving it to the drain");
                    }
                });
            }
            Err(e) => {
                error!(transaction_id = %transaction.id, ?kind, error = %e, "Failed to queue notification");
            }
        }
    }

    #[instrument(skip(self, transaction), fields(transaction_id = %transaction.id), err)]
    pub async fn enqueue_decision(&self, kind: NotificationKind, transaction: &Transaction) -> Result<EmailNotification> {
        let mut unit = self.store.begin(self.budget).await?;
        let customer = unit
            .user(transaction.user_id)
            .await?
            .ok_or_else(|| Error::not_found("User", transaction.user_id))?;
        let event = unit
            .event(transaction.event_id)
            .await?
            .ok_or_else(|| Error::not_found("Event", transaction.event_id))?;

        let rendered = match kind {
            NotificationKind::TransactionAccepted => templates::transaction_accepted(&customer.name, &event.title, transaction),
            NotificationKind::TransactionRejected => templates::transaction_rejected(&customer.name, &event.title, transaction),
        };

        let notification = unit
            .insert_notification(&EmailNotificationCreateDBRequest {
                to_user_id: customer.id,
                to_email: customer.email,
                kind,
                subject: rendered.subject,
                body_html: rendered.html,
                body_text: rendered.text,
            })
            .await?;
        unit.commit().await?;

        debug!(notification_id = %notification.id, "Notification queued");
        Ok(notification)
    }

    /// One delivery attempt for a PENDING row. Returns the row's resulting status, or
    /// `None` if the row was no longer PENDING or another sender holds its claim.
    ///
    /// The claim and the outcome are written in separate units so no unit is held open
    /// across the send.
    #[instrument(skip(self), err)]
    pub async fn deliver(&self, id: NotificationId) -> Result<Option<NotificationStatus>> {
        let now = Utc::now();
        let notification = {
            let mut unit = self.store.begin(self.budget).await?;
            let claimed = unit.claim_notification(id, now, now + CLAIM_LEASE).await?;
            unit.commit().await?;
            match claimed {
                Some(notification) => notification,
                None => {
                    debug!(notification_id = %id, "Notification not claimable, skipping");
                    return Ok(None);
                }
            }
        };

        let email = OutgoingEmail {
            to: notification.to_email.clone(),
            subject: notification.subject.clone(),
            html: notification.body_html.clone(),
            text: notification.body_text.clone(),
        };
        let attempts = notification.attempts + 1;
        let outcome = match self.mailer.send(&email).await {
            Ok(()) => DeliveryOutcome {
                status: NotificationStatus::Sent,
                attempts,
                last_error: None,
                sent_at: Some(Utc::now()),
            },
            Err(e) => DeliveryOutcome {
                status: if attempts >= self.max_attempts {
                    NotificationStatus::Failed
                } else {
                    NotificationStatus::Pending
                },
                attempts,
                last_error: Some(e.to_string()),
                sent_at: None,
            },
        };

        let mut unit = self.store.begin(self.budget).await?;
        unit.record_delivery(id, &outcome).await?;
        unit.commit().await?;

        match outcome.status {
            NotificationStatus::Sent => info!(notification_id = %id, attempts, "Email sent"),
            NotificationStatus::Failed => error!(notification_id = %id, attempts, error = ?outcome.last_error, "Email delivery failed permanently"),
            NotificationStatus::Pending => warn!(notification_id = %id, attempts, error = ?outcome.last_error, "Email delivery failed, will retry"),
        }
        Ok(Some(outcome.status))
    }

    /// Attempt delivery of every PENDING row, one batch at a time
    #[instrument(skip(self), err)]
    pub async fn drain(&self) -> Result<DrainReport> {
        let pending = {
            let mut unit = self.store.begin(self.budget).await?;
            unit.pending_notifications(self.batch_size, Utc::now()).await?
        };

        let mut report = DrainReport::default();
        for notification in pending {
            match self.deliver(notification.id).await {
                Ok(Some(NotificationStatus::Sent)) => report.sent += 1,
                Ok(Some(NotificationStatus::Pending)) => report.retrying += 1,
                Ok(Some(NotificationStatus::Failed)) => report.failed += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!(notification_id = %notification.id, error = %e, "Failed to process notification");
                    report.retrying += 1;
                }
            }
        }

        if report != DrainReport::default() {
            info!(
                sent = report.sent,
                retrying = report.retrying,
                failed = report.failed,
                skipped = report.skipped,
                "Drained notification outbox"
            );
        }
        Ok(report)
    }
}
