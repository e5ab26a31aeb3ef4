//! Persistence port for the transaction lifecycle.
//!
//! Every state transition runs inside exactly one [`UnitOfWork`]. The ledgers borrow the
//! unit mutably for the length of the transition, so all of their reads and writes share
//! one atomic scope. Dropping a unit without calling [`UnitOfWork::commit`] rolls it back.

use crate::{
    db::{
        errors::Result,
        models::{
            catalog::{
                Event, EventCreateDBRequest, EventStatus, EventUpdateDBRequest, TicketType, TicketTypeCreateDBRequest,
                TicketTypeUpdateDBRequest, User, UserCreateDBRequest,
            },
            discounts::{Coupon, CouponCreateDBRequest, Voucher, VoucherCreateDBRequest, VoucherUpdateDBRequest},
            notifications::{DeliveryOutcome, EmailNotification, EmailNotificationCreateDBRequest},
            points::{PointEntry, PointEntryCreateDBRequest},
            transactions::{
                Attendance, AttendanceIncrement, PaymentProof, Transaction, TransactionCreateDBRequest, TransactionFilter,
                TransactionItem, TransactionStatus,
            },
        },
    },
    types::{CouponId, EventId, Idr, NotificationId, PointEntryId, TicketTypeId, TransactionId, UserId, VoucherId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wait and execution limits for one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitBudget {
    /// How long to wait for a connection / the store before giving up
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
    /// How long the unit may run once started
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl UnitBudget {
    pub const fn new(max_wait: Duration, timeout: Duration) -> Self {
        Self { max_wait, timeout }
    }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Start an atomic, isolated unit of work
    async fn begin(&self, budget: UnitBudget) -> Result<Box<dyn UnitOfWork>>;
}

/// Row-level primitives over every entity the lifecycle touches.
///
/// Methods returning `bool` are conditional writes: `false` means no row matched the
/// condition, which callers must treat as a failure rather than a no-op.
#[async_trait]
pub trait UnitOfWork: Send {
    // Users
    async fn insert_user(&mut self, request: &UserCreateDBRequest) -> Result<User>;
    async fn user(&mut self, id: UserId) -> Result<Option<User>>;
    /// Hold the user's row until the unit ends, serialising points spends per user.
    /// `false` if the user does not exist.
    async fn lock_user(&mut self, id: UserId) -> Result<bool>;
    async fn set_cached_points_balance(&mut self, id: UserId, balance: Idr) -> Result<()>;
    async fn adjust_cached_points_balance(&mut self, id: UserId, delta: Idr) -> Result<()>;

    // Events and inventory
    async fn insert_event(&mut self, request: &EventCreateDBRequest) -> Result<Event>;
    async fn event(&mut self, id: EventId) -> Result<Option<Event>>;
    /// Read the event and hold its row until the unit ends
    async fn lock_event(&mut self, id: EventId) -> Result<Option<Event>>;
    async fn update_event(&mut self, id: EventId, request: &EventUpdateDBRequest) -> Result<Event>;
    /// Move `id` from `expected` to `next`; `false` if the status had already moved on
    async fn set_event_status_if(&mut self, id: EventId, expected: EventStatus, next: EventStatus) -> Result<bool>;
    /// Delete the event with its ticket types and vouchers, only while it is DRAFT
    async fn delete_draft_event(&mut self, id: EventId) -> Result<bool>;
    async fn insert_ticket_type(&mut self, request: &TicketTypeCreateDBRequest) -> Result<TicketType>;
    async fn ticket_types(&mut self, ids: &[TicketTypeId]) -> Result<Vec<TicketType>>;
    async fn event_ticket_types(&mut self, event_id: EventId) -> Result<Vec<TicketType>>;
    /// A new `total_seats` also resets `available_seats`; only valid before any sale
    async fn update_ticket_type(&mut self, id: TicketTypeId, request: &TicketTypeUpdateDBRequest) -> Result<TicketType>;
    async fn delete_ticket_type(&mut self, id: TicketTypeId) -> Result<bool>;
    /// Decrement by `quantity` only where `available_seats >= quantity`
    async fn decrement_available_seats(&mut self, id: TicketTypeId, quantity: i32) -> Result<bool>;
    async fn increment_available_seats(&mut self, id: TicketTypeId, quantity: i32) -> Result<bool>;

    // Vouchers and coupons
    async fn insert_voucher(&mut self, request: &VoucherCreateDBRequest) -> Result<Voucher>;
    async fn update_voucher(&mut self, id: VoucherId, request: &VoucherUpdateDBRequest) -> Result<Voucher>;
    async fn insert_coupon(&mut self, request: &CouponCreateDBRequest) -> Result<Coupon>;
    /// Case-insensitive lookup within one event
    async fn voucher_by_code(&mut self, event_id: EventId, code: &str) -> Result<Option<Voucher>>;
    async fn voucher(&mut self, id: VoucherId) -> Result<Option<Voucher>>;
    /// Case-insensitive lookup
    async fn coupon_by_code(&mut self, code: &str) -> Result<Option<Coupon>>;
    async fn coupon(&mut self, id: CouponId) -> Result<Option<Coupon>>;
    /// Increment `used_count` only while it is below `max_uses` (or uncapped)
    async fn increment_voucher_usage(&mut self, id: VoucherId) -> Result<bool>;
    /// Decrement `used_count` only while it is positive
    async fn decrement_voucher_usage(&mut self, id: VoucherId) -> Result<bool>;
    /// Set the usage triple only while the coupon is unused
    async fn mark_coupon_used(&mut self, id: CouponId, transaction_id: TransactionId, at: DateTime<Utc>) -> Result<bool>;
    /// Clear the usage triple only if it was set by `transaction_id`
    async fn clear_coupon_usage(&mut self, id: CouponId, transaction_id: TransactionId) -> Result<bool>;

    // Transactions
    async fn insert_transaction(&mut self, request: &TransactionCreateDBRequest) -> Result<Transaction>;
    async fn transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>>;
    async fn transaction_items(&mut self, id: TransactionId) -> Result<Vec<TransactionItem>>;
    async fn list_transactions(&mut self, filter: TransactionFilter) -> Result<Vec<Transaction>>;
    /// Move `id` from `expected` to `next`; `false` if the status had already moved on
    async fn set_status_if(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
        next: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    async fn set_organizer_decision_by(&mut self, id: TransactionId, decision_by: DateTime<Utc>) -> Result<()>;
    async fn mark_discounts_confirmed(&mut self, id: TransactionId) -> Result<()>;
    /// WAITING_PAYMENT transactions whose payment window closed before `now`
    async fn overdue_unpaid(&mut self, now: DateTime<Utc>) -> Result<Vec<TransactionId>>;
    /// WAITING_ADMIN_CONFIRMATION transactions whose decision deadline is before `cutoff`
    async fn stale_awaiting_decision(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<TransactionId>>;
    async fn insert_payment_proof(&mut self, transaction_id: TransactionId, image_url: &str) -> Result<PaymentProof>;
    async fn payment_proof(&mut self, transaction_id: TransactionId) -> Result<Option<PaymentProof>>;
    async fn upsert_attendance(&mut self, increment: &AttendanceIncrement) -> Result<Attendance>;
    async fn attendees(&mut self, event_id: EventId) -> Result<Vec<Attendance>>;

    // Points ledger
    async fn insert_point_entry(&mut self, request: &PointEntryCreateDBRequest) -> Result<PointEntry>;
    async fn point_entries(&mut self, user_id: UserId) -> Result<Vec<PointEntry>>;
    /// Sum of deltas whose expiry is unset or after `now`
    async fn usable_points(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<Idr>;
    /// Positive entries whose expiry is before `now`
    async fn expired_point_entries(&mut self, now: DateTime<Utc>) -> Result<Vec<PointEntry>>;
    /// Zero an entry's delta only if it still holds `expected_delta`
    async fn zero_point_entry(&mut self, id: PointEntryId, expected_delta: Idr) -> Result<bool>;

    // Notification outbox
    async fn insert_notification(&mut self, request: &EmailNotificationCreateDBRequest) -> Result<EmailNotification>;
    async fn notification(&mut self, id: NotificationId) -> Result<Option<EmailNotification>>;
    /// PENDING rows nobody holds a live claim on at `now`, oldest first
    async fn pending_notifications(&mut self, limit: i64, now: DateTime<Utc>) -> Result<Vec<EmailNotification>>;
    /// Claim a PENDING row until `until`, unless another claim is still live at `now`.
    /// Returns the claimed row, or `None` if it was sent, failed or claimed elsewhere.
    async fn claim_notification(
        &mut self,
        id: NotificationId,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<EmailNotification>>;
    /// Write the attempt's outcome and release the claim
    async fn record_delivery(&mut self, id: NotificationId, outcome: &DeliveryOutcome) -> Result<()>;

    /// Make every write in this unit visible atomically
    async fn commit(self: Box<Self>) -> Result<()>;
}
