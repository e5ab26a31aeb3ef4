use crate::types::{Idr, PointEntryId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Point entry source enum stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointSource {
    ReferralReward,
    PurchaseRedeem,
    Rollback,
    AdminAdjustment,
}

/// Append-only ledger row. Expired earnings are zeroed in place, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PointEntry {
    pub id: PointEntryId,
    pub user_id: UserId,
    pub delta: Idr,
    pub source: PointSource,
    pub expires_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

impl PointEntry {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

#[derive(Debug, Clone)]
pub struct PointEntryCreateDBRequest {
    pub user_id: UserId,
    pub delta: Idr,
    pub source: PointSource,
    pub expires_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<TransactionId>,
}
