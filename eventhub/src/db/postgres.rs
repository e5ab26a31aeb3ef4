//! Postgres-backed store.
//!
//! Each unit is one READ COMMITTED database transaction. Conditional writes are single
//! `UPDATE ... WHERE <condition>` statements checked through `rows_affected`, which gives
//! row-level compare-and-set without serializable isolation.

use crate::{
    db::{
        errors::{DbError, Result},
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
        store::{Store, UnitBudget, UnitOfWork},
    },
    types::{CouponId, EventId, Idr, NotificationId, PointEntryId, TicketTypeId, TransactionId, UserId, VoucherId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres};
use std::time::{Duration, Instant};
use tracing::{instrument, trace};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, name, email, role, points_balance, created_at";
const EVENT_COLUMNS: &str = "id, organizer_id, title, category, starts_at, ends_at, base_price_idr, status, created_at";
const TICKET_TYPE_COLUMNS: &str = "id, event_id, name, price_idr, total_seats, available_seats";
const VOUCHER_COLUMNS: &str = "id, event_id, organizer_id, code, discount_type, discount_value, starts_at, ends_at, max_uses, used_count, is_active, created_at";
const COUPON_COLUMNS: &str = "id, user_id, code, discount_type, discount_value, expires_at, is_used, used_at, used_by_txn_id, created_at";
const TRANSACTION_COLUMNS: &str = "id, user_id, event_id, status, payment_due_at, organizer_decision_by, subtotal_idr, discount_voucher_idr, discount_coupon_idr, points_used, total_payable_idr, used_voucher_id, used_coupon_id, discounts_confirmed, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, transaction_id, ticket_type_id, quantity, unit_price_idr";
const ATTENDANCE_COLUMNS: &str = "id, event_id, user_id, ticket_type_id, quantity, total_paid_idr, created_at, updated_at";
const POINT_ENTRY_COLUMNS: &str = "id, user_id, delta, source, expires_at, transaction_id, created_at";
const NOTIFICATION_COLUMNS: &str = "id, to_user_id, to_email, kind, subject, body_html, body_text, status, attempts, last_error, sent_at, claimed_until, created_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self), err)]
    async fn begin(&self, budget: UnitBudget) -> Result<Box<dyn UnitOfWork>> {
        let mut tx = tokio::time::timeout(budget.max_wait, self.pool.begin())
            .await
            .map_err(|_| DbError::Timeout {
                elapsed_ms: budget.max_wait.as_millis(),
            })??;

        // Transaction-local: both settings are dropped on commit or rollback
        let timeout_ms = budget.timeout.as_millis().to_string();
        let lock_wait_ms = budget.max_wait.as_millis().to_string();
        sqlx::query("SELECT set_config('statement_timeout', $1, true), set_config('lock_timeout', $2, true)")
            .bind(&timeout_ms)
            .bind(&lock_wait_ms)
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgUnit {
            tx,
            started: Instant::now(),
            timeout: budget.timeout,
        }))
    }
}

pub struct PgUnit {
    tx: sqlx::Transaction<'static, Postgres>,
    started: Instant,
    timeout: Duration,
}

impl PgUnit {
    /// Connection for the next statement, provided the unit is still inside its budget
    fn conn(&mut self) -> Result<&mut PgConnection> {
        let elapsed = self.started.elapsed();
        if elapsed > self.timeout {
            return Err(DbError::Timeout {
                elapsed_ms: elapsed.as_millis(),
            });
        }
        Ok(&mut *self.tx)
    }
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn insert_user(&mut self, request: &UserCreateDBRequest) -> Result<User> {
        let sql = format!("INSERT INTO users (name, email, role) VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(&request.name)
            .bind(&request.email)
            .bind(request.role)
            .fetch_one(self.conn()?)
            .await?;
        Ok(user)
    }

    async fn user(&mut self, id: UserId) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&sql).bind(id).fetch_optional(self.conn()?).await?)
    }

    async fn lock_user(&mut self, id: UserId) -> Result<bool> {
        let locked = sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(locked.is_some())
    }

    async fn set_cached_points_balance(&mut self, id: UserId, balance: Idr) -> Result<()> {
        let result = sqlx::query("UPDATE users SET points_balance = $2 WHERE id = $1")
            .bind(id)
            .bind(balance)
            .execute(self.conn()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn adjust_cached_points_balance(&mut self, id: UserId, delta: Idr) -> Result<()> {
        let result = sqlx::query("UPDATE users SET points_balance = points_balance + $2 WHERE id = $1")
            .bind(id)
            .bind(delta)
            .execute(self.conn()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn insert_event(&mut self, request: &EventCreateDBRequest) -> Result<Event> {
        let sql = format!(
            "INSERT INTO events (organizer_id, title, category, starts_at, ends_at, base_price_idr, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {EVENT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Event>(&sql)
            .bind(request.organizer_id)
            .bind(&request.title)
            .bind(&request.category)
            .bind(request.starts_at)
            .bind(request.ends_at)
            .bind(request.base_price_idr)
            .bind(request.status)
            .fetch_one(self.conn()?)
            .await?)
    }

    async fn event(&mut self, id: EventId) -> Result<Option<Event>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        Ok(sqlx::query_as::<_, Event>(&sql).bind(id).fetch_optional(self.conn()?).await?)
    }

    async fn lock_event(&mut self, id: EventId) -> Result<Option<Event>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE");
        Ok(sqlx::query_as::<_, Event>(&sql).bind(id).fetch_optional(self.conn()?).await?)
    }

    async fn update_event(&mut self, id: EventId, request: &EventUpdateDBRequest) -> Result<Event> {
        let sql = format!(
            "UPDATE events SET title = COALESCE($2, title), category = COALESCE($3, category),
                               starts_at = COALESCE($4, starts_at), ends_at = COALESCE($5, ends_at),
                               base_price_idr = COALESCE($6, base_price_idr)
             WHERE id = $1 RETURNING {EVENT_COLUMNS}"
        );
        sqlx::query_as::<_, Event>(&sql)
            .bind(id)
            .bind(&request.title)
            .bind(&request.category)
            .bind(request.starts_at)
            .bind(request.ends_at)
            .bind(request.base_price_idr)
            .fetch_optional(self.conn()?)
            .await?
            .ok_or(DbError::NotFound)
    }

    async fn set_event_status_if(&mut self, id: EventId, expected: EventStatus, next: EventStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE events SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(expected)
            .bind(next)
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_draft_event(&mut self, id: EventId) -> Result<bool> {
        // Ticket types and vouchers go with it through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM events WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(EventStatus::Draft)
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_ticket_type(&mut self, request: &TicketTypeCreateDBRequest) -> Result<TicketType> {
        let sql = format!(
            "INSERT INTO ticket_types (event_id, name, price_idr, total_seats, available_seats)
             VALUES ($1, $2, $3, $4, $4) RETURNING {TICKET_TYPE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, TicketType>(&sql)
            .bind(request.event_id)
            .bind(&request.name)
            .bind(request.price_idr)
            .bind(request.total_seats)
            .fetch_one(self.conn()?)
            .await?)
    }

    async fn ticket_types(&mut self, ids: &[TicketTypeId]) -> Result<Vec<TicketType>> {
        let sql = format!("SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = ANY($1)");
        Ok(sqlx::query_as::<_, TicketType>(&sql).bind(ids).fetch_all(self.conn()?).await?)
    }

    async fn event_ticket_types(&mut self, event_id: EventId) -> Result<Vec<TicketType>> {
        let sql = format!("SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE event_id = $1 ORDER BY name, id");
        Ok(sqlx::query_as::<_, TicketType>(&sql)
            .bind(event_id)
            .fetch_all(self.conn()?)
            .await?)
    }

    async fn update_ticket_type(&mut self, id: TicketTypeId, request: &TicketTypeUpdateDBRequest) -> Result<TicketType> {
        let sql = format!(
            "UPDATE ticket_types SET name = COALESCE($2, name), price_idr = COALESCE($3, price_idr),
                                     total_seats = COALESCE($4, total_seats),
                                     available_seats = COALESCE($4, available_seats)
             WHERE id = $1 RETURNING {TICKET_TYPE_COLUMNS}"
        );
        sqlx::query_as::<_, TicketType>(&sql)
            .bind(id)
            .bind(&request.name)
            .bind(request.price_idr)
            .bind(request.total_seats)
            .fetch_optional(self.conn()?)
            .await?
            .ok_or(DbError::NotFound)
    }

    async fn delete_ticket_type(&mut self, id: TicketTypeId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ticket_types WHERE id = $1")
            .bind(id)
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn decrement_available_seats(&mut self, id: TicketTypeId, quantity: i32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ticket_types SET available_seats = available_seats - $2 WHERE id = $1 AND available_seats >= $2",
        )
        .bind(id)
        .bind(quantity)
        .execute(self.conn()?)
        .await?;
        trace!(ticket_type_id = %id, quantity, rows = result.rows_affected(), "conditional seat decrement");
        Ok(result.rows_affected() == 1)
    }

    async fn increment_available_seats(&mut self, id: TicketTypeId, quantity: i32) -> Result<bool> {
        // The table CHECK rejects an increment past total_seats
        let result = sqlx::query("UPDATE ticket_types SET available_seats = available_seats + $2 WHERE id = $1")
            .bind(id)
            .bind(quantity)
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_voucher(&mut self, request: &VoucherCreateDBRequest) -> Result<Voucher> {
        let sql = format!(
            "INSERT INTO vouchers (event_id, organizer_id, code, discount_type, discount_value, starts_at, ends_at, max_uses)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {VOUCHER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Voucher>(&sql)
            .bind(request.event_id)
            .bind(request.organizer_id)
            .bind(&request.code)
            .bind(request.discount_type)
            .bind(request.discount_value)
            .bind(request.starts_at)
            .bind(request.ends_at)
            .bind(request.max_uses)
            .fetch_one(self.conn()?)
            .await?)
    }

    async fn update_voucher(&mut self, id: VoucherId, request: &VoucherUpdateDBRequest) -> Result<Voucher> {
        let sql = format!(
            "UPDATE vouchers SET discount_type = COALESCE($2, discount_type),
                                 discount_value = COALESCE($3, discount_value),
                                 starts_at = COALESCE($4, starts_at), ends_at = COALESCE($5, ends_at),
                                 max_uses = CASE WHEN $6 THEN $7 ELSE max_uses END,
                                 is_active = COALESCE($8, is_active)
             WHERE id = $1 RETURNING {VOUCHER_COLUMNS}"
        );
        sqlx::query_as::<_, Voucher>(&sql)
            .bind(id)
            .bind(request.discount_type)
            .bind(request.discount_value)
            .bind(request.starts_at)
            .bind(request.ends_at)
            .bind(request.max_uses.is_some())
            .bind(request.max_uses.flatten())
            .bind(request.is_active)
            .fetch_optional(self.conn()?)
            .await?
            .ok_or(DbError::NotFound)
    }

    async fn insert_coupon(&mut self, request: &CouponCreateDBRequest) -> Result<Coupon> {
        let sql = format!(
            "INSERT INTO coupons (user_id, code, discount_type, discount_value, expires_at)
             VALUES ($1, $2, $3, $4, $5) RETURNING {COUPON_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Coupon>(&sql)
            .bind(request.user_id)
            .bind(&request.code)
            .bind(request.discount_type)
            .bind(request.discount_value)
            .bind(request.expires_at)
            .fetch_one(self.conn()?)
            .await?)
    }

    async fn voucher_by_code(&mut self, event_id: EventId, code: &str) -> Result<Option<Voucher>> {
        let sql = format!("SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE event_id = $1 AND lower(code) = lower($2)");
        Ok(sqlx::query_as::<_, Voucher>(&sql)
            .bind(event_id)
            .bind(code)
            .fetch_optional(self.conn()?)
            .await?)
    }

    async fn voucher(&mut self, id: VoucherId) -> Result<Option<Voucher>> {
        let sql = format!("SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE id = $1");
        Ok(sqlx::query_as::<_, Voucher>(&sql).bind(id).fetch_optional(self.conn()?).await?)
    }

    async fn coupon_by_code(&mut self, code: &str) -> Result<Option<Coupon>> {
        let sql = format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE lower(code) = lower($1)");
        Ok(sqlx::query_as::<_, Coupon>(&sql).bind(code).fetch_optional(self.conn()?).await?)
    }

    async fn coupon(&mut self, id: CouponId) -> Result<Option<Coupon>> {
        let sql = format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1");
        Ok(sqlx::query_as::<_, Coupon>(&sql).bind(id).fetch_optional(self.conn()?).await?)
    }

    async fn increment_voucher_usage(&mut self, id: VoucherId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE vouchers SET used_count = used_count + 1
             WHERE id = $1 AND (max_uses IS NULL OR used_count < max_uses)",
        )
        .bind(id)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn decrement_voucher_usage(&mut self, id: VoucherId) -> Result<bool> {
        let result = sqlx::query("UPDATE vouchers SET used_count = used_count - 1 WHERE id = $1 AND used_count > 0")
            .bind(id)
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_coupon_used(&mut self, id: CouponId, transaction_id: TransactionId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE coupons SET is_used = TRUE, used_at = $3, used_by_txn_id = $2
             WHERE id = $1 AND is_used = FALSE",
        )
        .bind(id)
        .bind(transaction_id)
        .bind(at)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn clear_coupon_usage(&mut self, id: CouponId, transaction_id: TransactionId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE coupons SET is_used = FALSE, used_at = NULL, used_by_txn_id = NULL
             WHERE id = $1 AND is_used = TRUE AND used_by_txn_id = $2",
        )
        .bind(id)
        .bind(transaction_id)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_transaction(&mut self, request: &TransactionCreateDBRequest) -> Result<Transaction> {
        let sql = format!(
            "INSERT INTO transactions (user_id, event_id, status, payment_due_at, subtotal_idr, discount_voucher_idr,
                                       discount_coupon_idr, points_used, total_payable_idr, used_voucher_id, used_coupon_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {TRANSACTION_COLUMNS}"
        );
        let transaction = sqlx::query_as::<_, Transaction>(&sql)
            .bind(request.user_id)
            .bind(request.event_id)
            .bind(TransactionStatus::WaitingPayment)
            .bind(request.payment_due_at)
            .bind(request.subtotal_idr)
            .bind(request.discount_voucher_idr)
            .bind(request.discount_coupon_idr)
            .bind(request.points_used)
            .bind(request.total_payable_idr)
            .bind(request.used_voucher_id)
            .bind(request.used_coupon_id)
            .fetch_one(self.conn()?)
            .await?;

        for item in &request.items {
            sqlx::query(
                "INSERT INTO transaction_items (transaction_id, ticket_type_id, quantity, unit_price_idr)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(transaction.id)
            .bind(item.ticket_type_id)
            .bind(item.quantity)
            .bind(item.unit_price_idr)
            .execute(self.conn()?)
            .await?;
        }

        Ok(transaction)
    }

    async fn transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        Ok(sqlx::query_as::<_, Transaction>(&sql).bind(id).fetch_optional(self.conn()?).await?)
    }

    async fn transaction_items(&mut self, id: TransactionId) -> Result<Vec<TransactionItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM transaction_items WHERE transaction_id = $1 ORDER BY id");
        Ok(sqlx::query_as::<_, TransactionItem>(&sql).bind(id).fetch_all(self.conn()?).await?)
    }

    async fn list_transactions(&mut self, filter: TransactionFilter) -> Result<Vec<Transaction>> {
        let rows = match filter {
            TransactionFilter::Customer(user_id) => {
                let sql = format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
                );
                sqlx::query_as::<_, Transaction>(&sql)
                    .bind(user_id)
                    .fetch_all(self.conn()?)
                    .await?
            }
            TransactionFilter::Organizer { organizer_id, event_id } => {
                let columns = TRANSACTION_COLUMNS
                    .split(", ")
                    .map(|column| format!("t.{column}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "SELECT {columns} FROM transactions t JOIN events e ON e.id = t.event_id
                     WHERE e.organizer_id = $1 AND ($2::uuid IS NULL OR t.event_id = $2)
                     ORDER BY t.created_at DESC, t.id DESC"
                );
                sqlx::query_as::<_, Transaction>(&sql)
                    .bind(organizer_id)
                    .bind(event_id)
                    .fetch_all(self.conn()?)
                    .await?
            }
        };
        Ok(rows)
    }

    async fn set_status_if(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
        next: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE transactions SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(expected)
            .bind(next)
            .bind(now)
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_organizer_decision_by(&mut self, id: TransactionId, decision_by: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE transactions SET organizer_decision_by = $2 WHERE id = $1")
            .bind(id)
            .bind(decision_by)
            .execute(self.conn()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn mark_discounts_confirmed(&mut self, id: TransactionId) -> Result<()> {
        let result = sqlx::query("UPDATE transactions SET discounts_confirmed = TRUE WHERE id = $1")
            .bind(id)
            .execute(self.conn()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn overdue_unpaid(&mut self, now: DateTime<Utc>) -> Result<Vec<TransactionId>> {
        Ok(
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM transactions WHERE status = $1 AND payment_due_at < $2")
                .bind(TransactionStatus::WaitingPayment)
                .bind(now)
                .fetch_all(self.conn()?)
                .await?,
        )
    }

    async fn stale_awaiting_decision(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<TransactionId>> {
        Ok(sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM transactions WHERE status = $1 AND organizer_decision_by < $2",
        )
        .bind(TransactionStatus::WaitingAdminConfirmation)
        .bind(cutoff)
        .fetch_all(self.conn()?)
        .await?)
    }

    async fn insert_payment_proof(&mut self, transaction_id: TransactionId, image_url: &str) -> Result<PaymentProof> {
        Ok(sqlx::query_as::<_, PaymentProof>(
            "INSERT INTO payment_proofs (transaction_id, image_url) VALUES ($1, $2)
             RETURNING id, transaction_id, image_url, created_at",
        )
        .bind(transaction_id)
        .bind(image_url)
        .fetch_one(self.conn()?)
        .await?)
    }

    async fn payment_proof(&mut self, transaction_id: TransactionId) -> Result<Option<PaymentProof>> {
        Ok(sqlx::query_as::<_, PaymentProof>(
            "SELECT id, transaction_id, image_url, created_at FROM payment_proofs WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(self.conn()?)
        .await?)
    }

    async fn upsert_attendance(&mut self, increment: &AttendanceIncrement) -> Result<Attendance> {
        let sql = format!(
            "INSERT INTO attendance (event_id, user_id, ticket_type_id, quantity, total_paid_idr)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (event_id, user_id, ticket_type_id) DO UPDATE
             SET quantity = attendance.quantity + EXCLUDED.quantity,
                 total_paid_idr = attendance.total_paid_idr + EXCLUDED.total_paid_idr,
                 updated_at = NOW()
             RETURNING {ATTENDANCE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Attendance>(&sql)
            .bind(increment.event_id)
            .bind(increment.user_id)
            .bind(increment.ticket_type_id)
            .bind(increment.quantity)
            .bind(increment.paid_idr)
            .fetch_one(self.conn()?)
            .await?)
    }

    async fn attendees(&mut self, event_id: EventId) -> Result<Vec<Attendance>> {
        let sql = format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE event_id = $1 ORDER BY created_at, id");
        Ok(sqlx::query_as::<_, Attendance>(&sql)
            .bind(event_id)
            .fetch_all(self.conn()?)
            .await?)
    }

    async fn insert_point_entry(&mut self, request: &PointEntryCreateDBRequest) -> Result<PointEntry> {
        let sql = format!(
            "INSERT INTO point_entries (user_id, delta, source, expires_at, transaction_id)
             VALUES ($1, $2, $3, $4, $5) RETURNING {POINT_ENTRY_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, PointEntry>(&sql)
            .bind(request.user_id)
            .bind(request.delta)
            .bind(request.source)
            .bind(request.expires_at)
            .bind(request.transaction_id)
            .fetch_one(self.conn()?)
            .await?)
    }

    async fn point_entries(&mut self, user_id: UserId) -> Result<Vec<PointEntry>> {
        let sql =
            format!("SELECT {POINT_ENTRY_COLUMNS} FROM point_entries WHERE user_id = $1 ORDER BY created_at DESC, id DESC");
        Ok(sqlx::query_as::<_, PointEntry>(&sql)
            .bind(user_id)
            .fetch_all(self.conn()?)
            .await?)
    }

    async fn usable_points(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<Idr> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(delta), 0)::BIGINT FROM point_entries
             WHERE user_id = $1 AND (expires_at IS NULL OR expires_at > $2)",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(self.conn()?)
        .await?)
    }

    async fn expired_point_entries(&mut self, now: DateTime<Utc>) -> Result<Vec<PointEntry>> {
        let sql = format!(
            "SELECT {POINT_ENTRY_COLUMNS} FROM point_entries WHERE delta > 0 AND expires_at < $1 ORDER BY expires_at, id"
        );
        Ok(sqlx::query_as::<_, PointEntry>(&sql).bind(now).fetch_all(self.conn()?).await?)
    }

    async fn zero_point_entry(&mut self, id: PointEntryId, expected_delta: Idr) -> Result<bool> {
        let result = sqlx::query("UPDATE point_entries SET delta = 0 WHERE id = $1 AND delta = $2")
            .bind(id)
            .bind(expected_delta)
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_notification(&mut self, request: &EmailNotificationCreateDBRequest) -> Result<EmailNotification> {
        let sql = format!(
            "INSERT INTO email_notifications (to_user_id, to_email, kind, subject, body_html, body_text)
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {NOTIFICATION_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, EmailNotification>(&sql)
            .bind(request.to_user_id)
            .bind(&request.to_email)
            .bind(request.kind)
            .bind(&request.subject)
            .bind(&request.body_html)
            .bind(&request.body_text)
            .fetch_one(self.conn()?)
            .await?)
    }

    async fn notification(&mut self, id: NotificationId) -> Result<Option<EmailNotification>> {
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM email_notifications WHERE id = $1");
        Ok(sqlx::query_as::<_, EmailNotification>(&sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await?)
    }

    async fn pending_notifications(&mut self, limit: i64, now: DateTime<Utc>) -> Result<Vec<EmailNotification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM email_notifications
             WHERE status = 'PENDING' AND (claimed_until IS NULL OR claimed_until <= $2)
             ORDER BY created_at, id LIMIT $1"
        );
        Ok(sqlx::query_as::<_, EmailNotification>(&sql)
            .bind(limit)
            .bind(now)
            .fetch_all(self.conn()?)
            .await?)
    }

    async fn claim_notification(
        &mut self,
        id: NotificationId,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<EmailNotification>> {
        // A competing claim blocks on the row lock, then re-checks the condition and matches nothing
        let sql = format!(
            "UPDATE email_notifications SET claimed_until = $3
             WHERE id = $1 AND status = 'PENDING' AND (claimed_until IS NULL OR claimed_until <= $2)
             RETURNING {NOTIFICATION_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, EmailNotification>(&sql)
            .bind(id)
            .bind(now)
            .bind(until)
            .fetch_optional(self.conn()?)
            .await?)
    }

    async fn record_delivery(&mut self, id: NotificationId, outcome: &DeliveryOutcome) -> Result<()> {
        let result = sqlx::query(
            "UPDATE email_notifications SET status = $2, attempts = $3, last_error = $4, sent_at = $5, claimed_until = NULL
             WHERE id = $1",
        )
        .bind(id)
        .bind(outcome.status)
        .bind(outcome.attempts)
        .bind(&outcome.last_error)
        .bind(outcome.sent_at)
        .execute(self.conn()?)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::models::{notifications::NotificationKind, points::PointSource},
        errors::Error,
        ledger::{inventory::ItemRequest, Inventory, Points},
        types::Role,
    };

    const BUDGET: UnitBudget = UnitBudget::new(Duration::from_secs(5), Duration::from_secs(10));

    async fn seed_ticket_type(store: &PgStore, seats: i32) -> TicketTypeId {
        let mut unit = store.begin(BUDGET).await.unwrap();
        let organizer = unit
            .insert_user(&UserCreateDBRequest {
                name: "Organizer".into(),
                email: format!("org-{}@example.com", Uuid::new_v4().simple()),
                role: Role::Organizer,
            })
            .await
            .unwrap();
        let event = unit
            .insert_event(&EventCreateDBRequest {
                organizer_id: organizer.id,
                title: "Jazz Night".into(),
                category: "music".into(),
                starts_at: Utc::now(),
                ends_at: Utc::now(),
                base_price_idr: 100_000,
                status: EventStatus::Published,
            })
            .await
            .unwrap();
        let ticket_type = unit
            .insert_ticket_type(&TicketTypeCreateDBRequest {
                event_id: event.id,
                name: "Regular".into(),
                price_idr: 100_000,
                total_seats: seats,
            })
            .await
            .unwrap();
        unit.commit().await.unwrap();
        ticket_type.id
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn conditional_decrement_refuses_overdraw(pool: PgPool) {
        let store = PgStore::new(pool);
        let id = seed_ticket_type(&store, 1).await;

        let mut unit = store.begin(BUDGET).await.unwrap();
        assert!(!unit.decrement_available_seats(id, 2).await.unwrap());
        assert!(unit.decrement_available_seats(id, 1).await.unwrap());
        assert!(!unit.decrement_available_seats(id, 1).await.unwrap());
        unit.commit().await.unwrap();

        let mut unit = store.begin(BUDGET).await.unwrap();
        assert_eq!(unit.ticket_types(&[id]).await.unwrap()[0].available_seats, 0);
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn release_past_total_is_a_check_violation(pool: PgPool) {
        let store = PgStore::new(pool);
        let id = seed_ticket_type(&store, 2).await;

        let mut unit = store.begin(BUDGET).await.unwrap();
        let result = unit.increment_available_seats(id, 1).await;
        assert!(matches!(result, Err(DbError::CheckViolation { .. })));
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn dropped_unit_rolls_back(pool: PgPool) {
        let store = PgStore::new(pool);
        let id = seed_ticket_type(&store, 3).await;

        {
            let mut unit = store.begin(BUDGET).await.unwrap();
            assert!(unit.decrement_available_seats(id, 3).await.unwrap());
        }

        let mut unit = store.begin(BUDGET).await.unwrap();
        assert_eq!(unit.ticket_types(&[id]).await.unwrap()[0].available_seats, 3);
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn racing_reservations_for_the_last_seat(pool: PgPool) {
        let store = PgStore::new(pool);
        let id = seed_ticket_type(&store, 1).await;
        let event_id = {
            let mut unit = store.begin(BUDGET).await.unwrap();
            unit.ticket_types(&[id]).await.unwrap()[0].event_id
        };
        let items = [ItemRequest {
            ticket_type_id: id,
            quantity: 1,
        }];

        let mut first = store.begin(BUDGET).await.unwrap();
        let mut second = store.begin(BUDGET).await.unwrap();
        // Both buyers see the seat before either takes it
        Inventory::new(first.as_mut()).check_availability(&items).await.unwrap();
        Inventory::new(second.as_mut()).check_availability(&items).await.unwrap();

        Inventory::new(first.as_mut()).reserve(event_id, &items).await.unwrap();
        let loser = tokio::spawn(async move {
            let result = Inventory::new(second.as_mut()).reserve(event_id, &items).await;
            drop(second);
            result
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        first.commit().await.unwrap();

        let err = loser.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::SeatsNoLongerAvailable { ticket_type_id } if ticket_type_id == id));

        let mut unit = store.begin(BUDGET).await.unwrap();
        let ticket_type = unit.ticket_types(&[id]).await.unwrap().remove(0);
        assert_eq!(ticket_type.available_seats, 0);
        assert_eq!(ticket_type.total_seats, 1);
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn concurrent_spends_cannot_overdraw_points(pool: PgPool) {
        let store = PgStore::new(pool);
        let customer = {
            let mut unit = store.begin(BUDGET).await.unwrap();
            let customer = unit
                .insert_user(&UserCreateDBRequest {
                    name: "Customer".into(),
                    email: format!("buyer-{}@example.com", Uuid::new_v4().simple()),
                    role: Role::Customer,
                })
                .await
                .unwrap();
            Points::new(unit.as_mut())
                .grant(customer.id, 1_000, PointSource::ReferralReward, None, Utc::now())
                .await
                .unwrap();
            unit.commit().await.unwrap();
            customer
        };

        let mut first = store.begin(BUDGET).await.unwrap();
        Points::new(first.as_mut()).spend(customer.id, 800, None, Utc::now()).await.unwrap();

        let second = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut unit = store.begin(BUDGET).await.unwrap();
                let result = Points::new(unit.as_mut()).spend(customer.id, 800, None, Utc::now()).await;
                if result.is_ok() {
                    unit.commit().await.unwrap();
                }
                result
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        first.commit().await.unwrap();

        let err = second.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::InsufficientPoints { requested: 800, usable: 200 }));

        let mut unit = store.begin(BUDGET).await.unwrap();
        let balance = Points::new(unit.as_mut()).balance(customer.id, Utc::now()).await.unwrap();
        assert_eq!(balance.usable, 200);
        assert_eq!(balance.cached, 200);
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn notification_claims_are_exclusive(pool: PgPool) {
        let store = PgStore::new(pool);
        let mut unit = store.begin(BUDGET).await.unwrap();
        let user = unit
            .insert_user(&UserCreateDBRequest {
                name: "Customer".into(),
                email: format!("mail-{}@example.com", Uuid::new_v4().simple()),
                role: Role::Customer,
            })
            .await
            .unwrap();
        let row = unit
            .insert_notification(&EmailNotificationCreateDBRequest {
                to_user_id: user.id,
                to_email: user.email.clone(),
                kind: NotificationKind::TransactionAccepted,
                subject: "Accepted".into(),
                body_html: "<p>ok</p>".into(),
                body_text: "ok".into(),
            })
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let now = Utc::now();
        let lease = now + chrono::Duration::minutes(10);
        let mut unit = store.begin(BUDGET).await.unwrap();
        assert!(unit.claim_notification(row.id, now, lease).await.unwrap().is_some());
        assert!(unit.claim_notification(row.id, now, lease).await.unwrap().is_none());
        assert!(unit.pending_notifications(10, now).await.unwrap().is_empty());
        // A lapsed lease can be taken over
        assert_eq!(unit.pending_notifications(10, lease).await.unwrap().len(), 1);
        assert!(unit.claim_notification(row.id, lease, lease + chrono::Duration::minutes(10)).await.unwrap().is_some());
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn only_draft_events_can_be_deleted(pool: PgPool) {
        let store = PgStore::new(pool);
        let id = seed_ticket_type(&store, 4).await;

        let mut unit = store.begin(BUDGET).await.unwrap();
        let event_id = unit.ticket_types(&[id]).await.unwrap()[0].event_id;
        assert!(!unit.delete_draft_event(event_id).await.unwrap());
        assert!(unit
            .set_event_status_if(event_id, EventStatus::Published, EventStatus::Draft)
            .await
            .unwrap());
        assert!(unit.delete_draft_event(event_id).await.unwrap());
        assert!(unit.ticket_types(&[id]).await.unwrap().is_empty());
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn voucher_codes_are_unique_per_event_ignoring_case(pool: PgPool) {
        let store = PgStore::new(pool);
        let id = seed_ticket_type(&store, 1).await;

        let mut unit = store.begin(BUDGET).await.unwrap();
        let ticket_type = unit.ticket_types(&[id]).await.unwrap().remove(0);
        let event = unit.event(ticket_type.event_id).await.unwrap().unwrap();
        let request = VoucherCreateDBRequest {
            event_id: event.id,
            organizer_id: event.organizer_id,
            code: "EARLYBIRD".into(),
            discount_type: crate::types::DiscountType::Percent,
            discount_value: 10,
            starts_at: Utc::now(),
            ends_at: Utc::now(),
            max_uses: Some(1),
        };
        unit.insert_voucher(&request).await.unwrap();
        assert!(unit.voucher_by_code(event.id, "earlybird").await.unwrap().is_some());

        let duplicate = VoucherCreateDBRequest {
            code: "earlyBird".into(),
            ..request
        };
        let result = unit.insert_voucher(&duplicate).await;
        assert!(matches!(result, Err(DbError::UniqueViolation { .. })));
    }
}
