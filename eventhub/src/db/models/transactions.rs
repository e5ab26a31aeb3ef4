use crate::types::{CouponId, EventId, Idr, TicketTypeId, TransactionId, UserId, VoucherId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Transaction status enum stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, ToSchema)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    WaitingPayment,
    WaitingAdminConfirmation,
    Done,
    Rejected,
    Canceled,
    Expired,
}

/// Purchase aggregate root. Only the lifecycle service writes to it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub status: TransactionStatus,
    pub payment_due_at: DateTime<Utc>,
    pub organizer_decision_by: Option<DateTime<Utc>>,
    pub subtotal_idr: Idr,
    pub discount_voucher_idr: Idr,
    pub discount_coupon_idr: Idr,
    pub points_used: Idr,
    pub total_payable_idr: Idr,
    pub used_voucher_id: Option<VoucherId>,
    pub used_coupon_id: Option<CouponId>,
    /// Set once voucher/coupon usage has been counted against their caps
    pub discounts_confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Price snapshot taken at purchase time; never updated afterwards
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransactionItem {
    pub id: Uuid,
    pub transaction_id: TransactionId,
    pub ticket_type_id: TicketTypeId,
    pub quantity: i32,
    pub unit_price_idr: Idr,
}

impl TransactionItem {
    pub fn line_total(&self) -> Idr {
        self.unit_price_idr * Idr::from(self.quantity)
    }
}

#[derive(Debug, Clone)]
pub struct TransactionItemCreateDBRequest {
    pub ticket_type_id: TicketTypeId,
    pub quantity: i32,
    pub unit_price_idr: Idr,
}

#[derive(Debug, Clone)]
pub struct TransactionCreateDBRequest {
    pub user_id: UserId,
    pub event_id: EventId,
    pub payment_due_at: DateTime<Utc>,
    pub subtotal_idr: Idr,
    pub discount_voucher_idr: Idr,
    pub discount_coupon_idr: Idr,
    pub points_used: Idr,
    pub total_payable_idr: Idr,
    pub used_voucher_id: Option<VoucherId>,
    pub used_coupon_id: Option<CouponId>,
    pub items: Vec<TransactionItemCreateDBRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentProof {
    pub id: Uuid,
    pub transaction_id: TransactionId,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

/// Net confirmed holding of one customer for one ticket type
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attendance {
    pub id: Uuid,
    pub event_id: EventId,
    pub user_id: UserId,
    pub ticket_type_id: TicketTypeId,
    pub quantity: i32,
    pub total_paid_idr: Idr,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AttendanceIncrement {
    pub event_id: EventId,
    pub user_id: UserId,
    pub ticket_type_id: TicketTypeId,
    pub quantity: i32,
    pub paid_idr: Idr,
}

/// Which transactions a listing should return
#[derive(Debug, Clone, Copy)]
pub enum TransactionFilter {
    Customer(UserId),
    Organizer { organizer_id: UserId, event_id: Option<EventId> },
}
