use crate::types::{CouponId, DiscountType, EventId, Idr, TransactionId, UserId, VoucherId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Event-scoped promo code, shared between customers until its cap is reached
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Voucher {
    pub id: VoucherId,
    pub event_id: EventId,
    pub organizer_id: UserId,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Idr,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Voucher {
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now <= self.ends_at
    }

    pub fn has_capacity(&self) -> bool {
        self.max_uses.map_or(true, |max| self.used_count < max)
    }
}

#[derive(Debug, Clone)]
pub struct VoucherCreateDBRequest {
    pub event_id: EventId,
    pub organizer_id: UserId,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Idr,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub max_uses: Option<i32>,
}

/// Changes to a voucher; `None` keeps the stored value. `max_uses: Some(None)` lifts the cap.
#[derive(Debug, Clone, Default)]
pub struct VoucherUpdateDBRequest {
    pub discount_type: Option<DiscountType>,
    pub discount_value: Option<Idr>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub max_uses: Option<Option<i32>>,
    pub is_active: Option<bool>,
}

/// Single-use discount owned by one customer. The three usage fields move together.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Coupon {
    pub id: CouponId,
    pub user_id: UserId,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Idr,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by_txn_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CouponCreateDBRequest {
    pub user_id: UserId,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Idr,
    pub expires_at: DateTime<Utc>,
}
