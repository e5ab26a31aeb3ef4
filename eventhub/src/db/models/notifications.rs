use crate::types::{NotificationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    TransactionAccepted,
    TransactionRejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

/// Outbox row drained by the notification dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmailNotification {
    pub id: NotificationId,
    pub to_user_id: UserId,
    pub to_email: String,
    pub kind: NotificationKind,
    pub subject: String,
    pub body_html: String,
    pub body_text: String,
    pub status: NotificationStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Set while a dispatcher is delivering the row
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EmailNotificationCreateDBRequest {
    pub to_user_id: UserId,
    pub to_email: String,
    pub kind: NotificationKind,
    pub subject: String,
    pub body_html: String,
    pub body_text: String,
}

/// Outcome of one delivery attempt, written back to the outbox row
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub status: NotificationStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}
