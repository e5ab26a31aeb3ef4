//! Serialised in-process store.
//!
//! A unit of work takes the store lock for its whole lifetime and mutates a private copy
//! of the state; `commit` swaps the copy in, dropping the unit discards it.

use crate::{
    db::{
        errors::{DbError, Result},
        models::{
            catalog::{
                Event, EventCreateDBRequest, EventStatus, EventUpdateDBRequest, TicketType, TicketTypeCreateDBRequest,
                TicketTypeUpdateDBRequest, User, UserCreateDBRequest,
            },
            discounts::{Coupon, CouponCreateDBRequest, Voucher, VoucherCreateDBRequest, VoucherUpdateDBRequest},
            notifications::{DeliveryOutcome, EmailNotification, EmailNotificationCreateDBRequest, NotificationStatus},
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
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
struct MemoryState {
    users: HashMap<UserId, User>,
    events: HashMap<EventId, Event>,
    ticket_types: HashMap<TicketTypeId, TicketType>,
    vouchers: HashMap<VoucherId, Voucher>,
    coupons: HashMap<CouponId, Coupon>,
    transactions: HashMap<TransactionId, Transaction>,
    transaction_items: Vec<TransactionItem>,
    payment_proofs: HashMap<TransactionId, PaymentProof>,
    attendance: Vec<Attendance>,
    point_entries: Vec<PointEntry>,
    notifications: Vec<EmailNotification>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    #[cfg(test)]
    failing_event_reads: Arc<std::sync::atomic::AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make event reads in every later unit fail like a dropped database connection
    #[cfg(test)]
    pub fn fail_event_reads(&self) {
        self.failing_event_reads.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, budget: UnitBudget) -> Result<Box<dyn UnitOfWork>> {
        let guard = tokio::time::timeout(budget.max_wait, self.state.clone().lock_owned())
            .await
            .map_err(|_| DbError::Timeout {
                elapsed_ms: budget.max_wait.as_millis(),
            })?;
        let working = guard.clone();

        Ok(Box::new(MemoryUnit {
            guard,
            working,
            started: Instant::now(),
            timeout: budget.timeout,
            #[cfg(test)]
            failing_event_reads: self.failing_event_reads.load(std::sync::atomic::Ordering::SeqCst),
        }))
    }
}

pub struct MemoryUnit {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    started: Instant,
    timeout: Duration,
    #[cfg(test)]
    failing_event_reads: bool,
}

impl MemoryUnit {
    /// Working state, provided the unit is still inside its budget
    fn state(&mut self) -> Result<&mut MemoryState> {
        let elapsed = self.started.elapsed();
        if elapsed > self.timeout {
            return Err(DbError::Timeout {
                elapsed_ms: elapsed.as_millis(),
            });
        }
        Ok(&mut self.working)
    }
}

fn unique_violation(constraint: &str, table: &str) -> DbError {
    DbError::UniqueViolation {
        constraint: constraint.to_string(),
        table: Some(table.to_string()),
    }
}

fn foreign_key_violation(constraint: &str, table: &str) -> DbError {
    DbError::ForeignKeyViolation {
        constraint: constraint.to_string(),
        table: Some(table.to_string()),
    }
}

fn check_violation(constraint: &str, table: &str) -> DbError {
    DbError::CheckViolation {
        constraint: constraint.to_string(),
        table: Some(table.to_string()),
    }
}

fn newest_first<T, F>(rows: &mut [T], key: F)
where
    F: Fn(&T) -> (DateTime<Utc>, Uuid),
{
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn insert_user(&mut self, request: &UserCreateDBRequest) -> Result<User> {
        let state = self.state()?;
        if state.users.values().any(|u| u.email.eq_ignore_ascii_case(&request.email)) {
            return Err(unique_violation("users_email_key", "users"));
        }
        let user = User {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            email: request.email.clone(),
            role: request.role,
            points_balance: 0,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user(&mut self, id: UserId) -> Result<Option<User>> {
        Ok(self.state()?.users.get(&id).cloned())
    }

    async fn lock_user(&mut self, id: UserId) -> Result<bool> {
        // The unit already holds the whole store
        Ok(self.state()?.users.contains_key(&id))
    }

    async fn set_cached_points_balance(&mut self, id: UserId, balance: Idr) -> Result<()> {
        let user = self.state()?.users.get_mut(&id).ok_or(DbError::NotFound)?;
        user.points_balance = balance;
        Ok(())
    }

    async fn adjust_cached_points_balance(&mut self, id: UserId, delta: Idr) -> Result<()> {
        let user = self.state()?.users.get_mut(&id).ok_or(DbError::NotFound)?;
        user.points_balance += delta;
        Ok(())
    }

    async fn insert_event(&mut self, request: &EventCreateDBRequest) -> Result<Event> {
        let state = self.state()?;
        if !state.users.contains_key(&request.organizer_id) {
            return Err(foreign_key_violation("events_organizer_id_fkey", "events"));
        }
        let event = Event {
            id: Uuid::new_v4(),
            organizer_id: request.organizer_id,
            title: request.title.clone(),
            category: request.category.clone(),
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            base_price_idr: request.base_price_idr,
            status: request.status,
            created_at: Utc::now(),
        };
        state.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn event(&mut self, id: EventId) -> Result<Option<Event>> {
        #[cfg(test)]
        if self.failing_event_reads {
            return Err(DbError::Other(anyhow::anyhow!("connection reset by peer")));
        }
        Ok(self.state()?.events.get(&id).cloned())
    }

    async fn lock_event(&mut self, id: EventId) -> Result<Option<Event>> {
        self.event(id).await
    }

    async fn update_event(&mut self, id: EventId, request: &EventUpdateDBRequest) -> Result<Event> {
        let event = self.state()?.events.get_mut(&id).ok_or(DbError::NotFound)?;
        if let Some(title) = &request.title {
            event.title = title.clone();
        }
        if let Some(category) = &request.category {
            event.category = category.clone();
        }
        event.starts_at = request.starts_at.unwrap_or(event.starts_at);
        event.ends_at = request.ends_at.unwrap_or(event.ends_at);
        event.base_price_idr = request.base_price_idr.unwrap_or(event.base_price_idr);
        Ok(event.clone())
    }

    async fn set_event_status_if(&mut self, id: EventId, expected: EventStatus, next: EventStatus) -> Result<bool> {
        match self.state()?.events.get_mut(&id) {
            Some(event) if event.status == expected => {
                event.status = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_draft_event(&mut self, id: EventId) -> Result<bool> {
        let state = self.state()?;
        if !state.events.get(&id).is_some_and(|event| event.status == EventStatus::Draft) {
            return Ok(false);
        }
        if state.transactions.values().any(|txn| txn.event_id == id) {
            return Err(foreign_key_violation("transactions_event_id_fkey", "transactions"));
        }
        state.events.remove(&id);
        state.ticket_types.retain(|_, ticket_type| ticket_type.event_id != id);
        state.vouchers.retain(|_, voucher| voucher.event_id != id);
        Ok(true)
    }

    async fn insert_ticket_type(&mut self, request: &TicketTypeCreateDBRequest) -> Result<TicketType> {
        let state = self.state()?;
        if !state.events.contains_key(&request.event_id) {
            return Err(foreign_key_violation("ticket_types_event_id_fkey", "ticket_types"));
        }
        if request.total_seats < 0 {
            return Err(check_violation("ticket_types_seats_check", "ticket_types"));
        }
        let ticket_type = TicketType {
            id: Uuid::new_v4(),
            event_id: request.event_id,
            name: request.name.clone(),
            price_idr: request.price_idr,
            total_seats: request.total_seats,
            available_seats: request.total_seats,
        };
        state.ticket_types.insert(ticket_type.id, ticket_type.clone());
        Ok(ticket_type)
    }

    async fn ticket_types(&mut self, ids: &[TicketTypeId]) -> Result<Vec<TicketType>> {
        let state = self.state()?;
        Ok(ids.iter().filter_map(|id| state.ticket_types.get(id)).cloned().collect())
    }

    async fn event_ticket_types(&mut self, event_id: EventId) -> Result<Vec<TicketType>> {
        let mut rows: Vec<TicketType> = self
            .state()?
            .ticket_types
            .values()
            .filter(|ticket_type| ticket_type.event_id == event_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn update_ticket_type(&mut self, id: TicketTypeId, request: &TicketTypeUpdateDBRequest) -> Result<TicketType> {
        let ticket_type = self.state()?.ticket_types.get_mut(&id).ok_or(DbError::NotFound)?;
        if request.total_seats.is_some_and(|seats| seats < 0) {
            return Err(check_violation("ticket_types_seats_check", "ticket_types"));
        }
        if let Some(name) = &request.name {
            ticket_type.name = name.clone();
        }
        ticket_type.price_idr = request.price_idr.unwrap_or(ticket_type.price_idr);
        if let Some(seats) = request.total_seats {
            ticket_type.total_seats = seats;
            ticket_type.available_seats = seats;
        }
        Ok(ticket_type.clone())
    }

    async fn delete_ticket_type(&mut self, id: TicketTypeId) -> Result<bool> {
        let state = self.state()?;
        if state.transaction_items.iter().any(|item| item.ticket_type_id == id) {
            return Err(foreign_key_violation("transaction_items_ticket_type_id_fkey", "transaction_items"));
        }
        Ok(state.ticket_types.remove(&id).is_some())
    }

    async fn decrement_available_seats(&mut self, id: TicketTypeId, quantity: i32) -> Result<bool> {
        match self.state()?.ticket_types.get_mut(&id) {
            Some(ticket_type) if ticket_type.available_seats >= quantity => {
                ticket_type.available_seats -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_available_seats(&mut self, id: TicketTypeId, quantity: i32) -> Result<bool> {
        let Some(ticket_type) = self.state()?.ticket_types.get_mut(&id) else {
            return Ok(false);
        };
        if ticket_type.available_seats + quantity > ticket_type.total_seats {
            return Err(check_violation("ticket_types_seats_check", "ticket_types"));
        }
        ticket_type.available_seats += quantity;
        Ok(true)
    }

    async fn insert_voucher(&mut self, request: &VoucherCreateDBRequest) -> Result<Voucher> {
        let state = self.state()?;
        if state
            .vouchers
            .values()
            .any(|v| v.event_id == request.event_id && v.code.eq_ignore_ascii_case(&request.code))
        {
            return Err(unique_violation("vouchers_event_code_key", "vouchers"));
        }
        let voucher = Voucher {
            id: Uuid::new_v4(),
            event_id: request.event_id,
            organizer_id: request.organizer_id,
            code: request.code.clone(),
            discount_type: request.discount_type,
            discount_value: request.discount_value,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            max_uses: request.max_uses,
            used_count: 0,
            is_active: true,
            created_at: Utc::now(),
        };
        state.vouchers.insert(voucher.id, voucher.clone());
        Ok(voucher)
    }

    async fn update_voucher(&mut self, id: VoucherId, request: &VoucherUpdateDBRequest) -> Result<Voucher> {
        let voucher = self.state()?.vouchers.get_mut(&id).ok_or(DbError::NotFound)?;
        let max_uses = request.max_uses.unwrap_or(voucher.max_uses);
        if max_uses.is_some_and(|max| max < voucher.used_count) {
            return Err(check_violation("vouchers_usage_check", "vouchers"));
        }
        voucher.max_uses = max_uses;
        voucher.discount_type = request.discount_type.unwrap_or(voucher.discount_type);
        voucher.discount_value = request.discount_value.unwrap_or(voucher.discount_value);
        voucher.starts_at = request.starts_at.unwrap_or(voucher.starts_at);
        voucher.ends_at = request.ends_at.unwrap_or(voucher.ends_at);
        voucher.is_active = request.is_active.unwrap_or(voucher.is_active);
        Ok(voucher.clone())
    }

    async fn insert_coupon(&mut self, request: &CouponCreateDBRequest) -> Result<Coupon> {
        let state = self.state()?;
        if state.coupons.values().any(|c| c.code.eq_ignore_ascii_case(&request.code)) {
            return Err(unique_violation("coupons_code_key", "coupons"));
        }
        let coupon = Coupon {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            code: request.code.clone(),
            discount_type: request.discount_type,
            discount_value: request.discount_value,
            expires_at: request.expires_at,
            is_used: false,
            used_at: None,
            used_by_txn_id: None,
            created_at: Utc::now(),
        };
        state.coupons.insert(coupon.id, coupon.clone());
        Ok(coupon)
    }

    async fn voucher_by_code(&mut self, event_id: EventId, code: &str) -> Result<Option<Voucher>> {
        Ok(self
            .state()?
            .vouchers
            .values()
            .find(|v| v.event_id == event_id && v.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn voucher(&mut self, id: VoucherId) -> Result<Option<Voucher>> {
        Ok(self.state()?.vouchers.get(&id).cloned())
    }

    async fn coupon_by_code(&mut self, code: &str) -> Result<Option<Coupon>> {
        Ok(self.state()?.coupons.values().find(|c| c.code.eq_ignore_ascii_case(code)).cloned())
    }

    async fn coupon(&mut self, id: CouponId) -> Result<Option<Coupon>> {
        Ok(self.state()?.coupons.get(&id).cloned())
    }

    async fn increment_voucher_usage(&mut self, id: VoucherId) -> Result<bool> {
        match self.state()?.vouchers.get_mut(&id) {
            Some(voucher) if voucher.has_capacity() => {
                voucher.used_count += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn decrement_voucher_usage(&mut self, id: VoucherId) -> Result<bool> {
        match self.state()?.vouchers.get_mut(&id) {
            Some(voucher) if voucher.used_count > 0 => {
                voucher.used_count -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_coupon_used(&mut self, id: CouponId, transaction_id: TransactionId, at: DateTime<Utc>) -> Result<bool> {
        match self.state()?.coupons.get_mut(&id) {
            Some(coupon) if !coupon.is_used => {
                coupon.is_used = true;
                coupon.used_at = Some(at);
                coupon.used_by_txn_id = Some(transaction_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_coupon_usage(&mut self, id: CouponId, transaction_id: TransactionId) -> Result<bool> {
        match self.state()?.coupons.get_mut(&id) {
            Some(coupon) if coupon.is_used && coupon.used_by_txn_id == Some(transaction_id) => {
                coupon.is_used = false;
                coupon.used_at = None;
                coupon.used_by_txn_id = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_transaction(&mut self, request: &TransactionCreateDBRequest) -> Result<Transaction> {
        let state = self.state()?;
        if !state.users.contains_key(&request.user_id) {
            return Err(foreign_key_violation("transactions_user_id_fkey", "transactions"));
        }
        if !state.events.contains_key(&request.event_id) {
            return Err(foreign_key_violation("transactions_event_id_fkey", "transactions"));
        }
        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            event_id: request.event_id,
            status: TransactionStatus::WaitingPayment,
            payment_due_at: request.payment_due_at,
            organizer_decision_by: None,
            subtotal_idr: request.subtotal_idr,
            discount_voucher_idr: request.discount_voucher_idr,
            discount_coupon_idr: request.discount_coupon_idr,
            points_used: request.points_used,
            total_payable_idr: request.total_payable_idr,
            used_voucher_id: request.used_voucher_id,
            used_coupon_id: request.used_coupon_id,
            discounts_confirmed: false,
            created_at: now,
            updated_at: now,
        };
        for item in &request.items {
            state.transaction_items.push(TransactionItem {
                id: Uuid::new_v4(),
                transaction_id: transaction.id,
                ticket_type_id: item.ticket_type_id,
                quantity: item.quantity,
                unit_price_idr: item.unit_price_idr,
            });
        }
        state.transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.state()?.transactions.get(&id).cloned())
    }

    async fn transaction_items(&mut self, id: TransactionId) -> Result<Vec<TransactionItem>> {
        Ok(self
            .state()?
            .transaction_items
            .iter()
            .filter(|item| item.transaction_id == id)
            .cloned()
            .collect())
    }

    async fn list_transactions(&mut self, filter: TransactionFilter) -> Result<Vec<Transaction>> {
        let state = self.state()?;
        let mut rows: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|txn| match filter {
                TransactionFilter::Customer(user_id) => txn.user_id == user_id,
                TransactionFilter::Organizer { organizer_id, event_id } => {
                    event_id.map_or(true, |event_id| txn.event_id == event_id)
                        && state
                            .events
                            .get(&txn.event_id)
                            .is_some_and(|event| event.organizer_id == organizer_id)
                }
            })
            .cloned()
            .collect();
        newest_first(&mut rows, |txn| (txn.created_at, txn.id));
        Ok(rows)
    }

    async fn set_status_if(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
        next: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        match self.state()?.transactions.get_mut(&id) {
            Some(txn) if txn.status == expected => {
                trace!(transaction_id = %id, from = ?expected, to = ?next, "status compare-and-set");
                txn.status = next;
                txn.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_organizer_decision_by(&mut self, id: TransactionId, decision_by: DateTime<Utc>) -> Result<()> {
        let txn = self.state()?.transactions.get_mut(&id).ok_or(DbError::NotFound)?;
        txn.organizer_decision_by = Some(decision_by);
        Ok(())
    }

    async fn mark_discounts_confirmed(&mut self, id: TransactionId) -> Result<()> {
        let txn = self.state()?.transactions.get_mut(&id).ok_or(DbError::NotFound)?;
        txn.discounts_confirmed = true;
        Ok(())
    }

    async fn overdue_unpaid(&mut self, now: DateTime<Utc>) -> Result<Vec<TransactionId>> {
        Ok(self
            .state()?
            .transactions
            .values()
            .filter(|txn| txn.status == TransactionStatus::WaitingPayment && txn.payment_due_at < now)
            .map(|txn| txn.id)
            .collect())
    }

    async fn stale_awaiting_decision(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<TransactionId>> {
        Ok(self
            .state()?
            .transactions
            .values()
            .filter(|txn| {
                txn.status == TransactionStatus::WaitingAdminConfirmation
                    && txn.organizer_decision_by.is_some_and(|decision_by| decision_by < cutoff)
            })
            .map(|txn| txn.id)
            .collect())
    }

    async fn insert_payment_proof(&mut self, transaction_id: TransactionId, image_url: &str) -> Result<PaymentProof> {
        let state = self.state()?;
        if state.payment_proofs.contains_key(&transaction_id) {
            return Err(unique_violation("payment_proofs_transaction_id_key", "payment_proofs"));
        }
        let proof = PaymentProof {
            id: Uuid::new_v4(),
            transaction_id,
            image_url: image_url.to_string(),
            created_at: Utc::now(),
        };
        state.payment_proofs.insert(transaction_id, proof.clone());
        Ok(proof)
    }

    async fn payment_proof(&mut self, transaction_id: TransactionId) -> Result<Option<PaymentProof>> {
        Ok(self.state()?.payment_proofs.get(&transaction_id).cloned())
    }

    async fn upsert_attendance(&mut self, increment: &AttendanceIncrement) -> Result<Attendance> {
        let state = self.state()?;
        let now = Utc::now();
        if let Some(existing) = state.attendance.iter_mut().find(|a| {
            a.event_id == increment.event_id && a.user_id == increment.user_id && a.ticket_type_id == increment.ticket_type_id
        }) {
            existing.quantity += increment.quantity;
            existing.total_paid_idr += increment.paid_idr;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let attendance = Attendance {
            id: Uuid::new_v4(),
            event_id: increment.event_id,
            user_id: increment.user_id,
            ticket_type_id: increment.ticket_type_id,
            quantity: increment.quantity,
            total_paid_idr: increment.paid_idr,
            created_at: now,
            updated_at: now,
        };
        state.attendance.push(attendance.clone());
        Ok(attendance)
    }

    async fn attendees(&mut self, event_id: EventId) -> Result<Vec<Attendance>> {
        Ok(self
            .state()?
            .attendance
            .iter()
            .filter(|a| a.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn insert_point_entry(&mut self, request: &PointEntryCreateDBRequest) -> Result<PointEntry> {
        let state = self.state()?;
        if !state.users.contains_key(&request.user_id) {
            return Err(foreign_key_violation("point_entries_user_id_fkey", "point_entries"));
        }
        let entry = PointEntry {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            delta: request.delta,
            source: request.source,
            expires_at: request.expires_at,
            transaction_id: request.transaction_id,
            created_at: Utc::now(),
        };
        state.point_entries.push(entry.clone());
        Ok(entry)
    }

    async fn point_entries(&mut self, user_id: UserId) -> Result<Vec<PointEntry>> {
        let mut rows: Vec<PointEntry> = self
            .state()?
            .point_entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |e| (e.created_at, e.id));
        Ok(rows)
    }

    async fn usable_points(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<Idr> {
        Ok(self
            .state()?
            .point_entries
            .iter()
            .filter(|e| e.user_id == user_id && e.is_usable_at(now))
            .map(|e| e.delta)
            .sum())
    }

    async fn expired_point_entries(&mut self, now: DateTime<Utc>) -> Result<Vec<PointEntry>> {
        Ok(self
            .state()?
            .point_entries
            .iter()
            .filter(|e| e.delta > 0 && e.expires_at.is_some_and(|expires_at| expires_at < now))
            .cloned()
            .collect())
    }

    async fn zero_point_entry(&mut self, id: PointEntryId, expected_delta: Idr) -> Result<bool> {
        match self.state()?.point_entries.iter_mut().find(|e| e.id == id) {
            Some(entry) if entry.delta == expected_delta => {
                entry.delta = 0;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_notification(&mut self, request: &EmailNotificationCreateDBRequest) -> Result<EmailNotification> {
        let notification = EmailNotification {
            id: Uuid::new_v4(),
            to_user_id: request.to_user_id,
            to_email: request.to_email.clone(),
            kind: request.kind,
            subject: request.subject.clone(),
            body_html: request.body_html.clone(),
            body_text: request.body_text.clone(),
            status: NotificationStatus::Pending,
            attempts: 0,
            last_error: None,
            sent_at: None,
            claimed_until: None,
            created_at: Utc::now(),
        };
        self.state()?.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn notification(&mut self, id: NotificationId) -> Result<Option<EmailNotification>> {
        Ok(self.state()?.notifications.iter().find(|n| n.id == id).cloned())
    }

    async fn pending_notifications(&mut self, limit: i64, now: DateTime<Utc>) -> Result<Vec<EmailNotification>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .state()?
            .notifications
            .iter()
            .filter(|n| n.status == NotificationStatus::Pending && !n.claimed_until.is_some_and(|until| until > now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claim_notification(
        &mut self,
        id: NotificationId,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<EmailNotification>> {
        match self.state()?.notifications.iter_mut().find(|n| n.id == id) {
            Some(notification)
                if notification.status == NotificationStatus::Pending
                    && !notification.claimed_until.is_some_and(|claimed| claimed > now) =>
            {
                notification.claimed_until = Some(until);
                Ok(Some(notification.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn record_delivery(&mut self, id: NotificationId, outcome: &DeliveryOutcome) -> Result<()> {
        let notification = self
            .state()?
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(DbError::NotFound)?;
        notification.status = outcome.status;
        notification.attempts = outcome.attempts;
        notification.last_error = outcome.last_error.clone();
        notification.sent_at = outcome.sent_at;
        notification.claimed_until = None;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnit { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::models::catalog::EventStatus, types::Role};

    const BUDGET: UnitBudget = UnitBudget::new(Duration::from_millis(200), Duration::from_secs(5));

    async fn seed_ticket_type(store: &MemoryStore, seats: i32) -> TicketTypeId {
        let mut unit = store.begin(BUDGET).await.expect("begin");
        let organizer = unit
            .insert_user(&UserCreateDBRequest {
                name: "Organizer".into(),
                email: format!("org-{}@example.com", Uuid::new_v4().simple()),
                role: Role::Organizer,
            })
            .await
            .expect("user");
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
            .expect("event");
        let ticket_type = unit
            .insert_ticket_type(&TicketTypeCreateDBRequest {
                event_id: event.id,
                name: "Regular".into(),
                price_idr: 100_000,
                total_seats: seats,
            })
            .await
            .expect("ticket type");
        unit.commit().await.expect("commit");
        ticket_type.id
    }

    #[test_log::test(tokio::test)]
    async fn dropped_unit_rolls_back() {
        let store = MemoryStore::new();
        let id = seed_ticket_type(&store, 3).await;

        {
            let mut unit = store.begin(BUDGET).await.expect("begin");
            assert!(unit.decrement_available_seats(id, 2).await.expect("decrement"));
        }

        let mut unit = store.begin(BUDGET).await.expect("begin");
        let ticket_types = unit.ticket_types(&[id]).await.expect("load");
        assert_eq!(ticket_types[0].available_seats, 3);
    }

    #[test_log::test(tokio::test)]
    async fn conditional_decrement_refuses_overdraw() {
        let store = MemoryStore::new();
        let id = seed_ticket_type(&store, 1).await;

        let mut unit = store.begin(BUDGET).await.expect("begin");
        assert!(!unit.decrement_available_seats(id, 2).await.expect("decrement"));
        assert!(unit.decrement_available_seats(id, 1).await.expect("decrement"));
        assert!(!unit.decrement_available_seats(id, 1).await.expect("decrement"));
    }

    #[test_log::test(tokio::test)]
    async fn release_cannot_exceed_total_seats() {
        let store = MemoryStore::new();
        let id = seed_ticket_type(&store, 2).await;

        let mut unit = store.begin(BUDGET).await.expect("begin");
        let result = unit.increment_available_seats(id, 1).await;
        assert!(matches!(result, Err(DbError::CheckViolation { .. })));
    }

    #[test_log::test(tokio::test)]
    async fn second_unit_waits_for_first_and_times_out() {
        let store = MemoryStore::new();
        let _held = store.begin(BUDGET).await.expect("begin");

        let result = store.begin(UnitBudget::new(Duration::from_millis(20), Duration::from_secs(1))).await;
        assert!(matches!(result, Err(DbError::Timeout { .. })));
    }

    #[test_log::test(tokio::test)]
    async fn unit_past_its_budget_rejects_statements() {
        let store = MemoryStore::new();
        let mut unit = store
            .begin(UnitBudget::new(Duration::from_millis(50), Duration::from_millis(1)))
            .await
            .expect("begin");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = unit.user(Uuid::new_v4()).await;
        assert!(matches!(result, Err(DbError::Timeout { .. })));
    }
}
