use crate::{
    db::models::points::{PointEntry, PointSource},
    types::{Idr, PointEntryId, TransactionId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Subset of the ledger sources that can be written directly; purchase and rollback
// entries only come from transactions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentSource {
    ReferralReward,
    AdminAdjustment,
}

impl From<AdjustmentSource> for PointSource {
    fn from(source: AdjustmentSource) -> Self {
        match source {
            AdjustmentSource::ReferralReward => PointSource::ReferralReward,
            AdjustmentSource::AdminAdjustment => PointSource::AdminAdjustment,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PointAdjustmentCreate {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    /// Signed amount; deductions need enough usable points
    pub delta: Idr,
    /// Defaults to ADMIN_ADJUSTMENT
    pub source: Option<AdjustmentSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PointEntryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: PointEntryId,
    pub delta: Idr,
    pub source: PointSource,
    pub expires_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

impl From<PointEntry> for PointEntryResponse {
    fn from(entry: PointEntry) -> Self {
        Self {
            id: entry.id,
            delta: entry.delta,
            source: entry.source,
            expires_at: entry.expires_at,
            transaction_id: entry.transaction_id,
            created_at: entry.created_at,
        }
    }
}
