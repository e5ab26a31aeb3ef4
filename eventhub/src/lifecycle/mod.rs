//! Transaction state machine.
//!
//! Every transition runs in one unit of work: the status compare-and-set and all ledger
//! effects commit together or not at all. A transition whose source status has moved on
//! by the time its unit runs fails with `Conflict` and leaves the ledgers untouched.
//!
//! ```text
//! WAITING_PAYMENT ──proof──▶ WAITING_ADMIN_CONFIRMATION ──accept──▶ DONE
//!    │  │                         │  │
//!    │  └─expire─▶ EXPIRED        │  └─reject─▶ REJECTED
//!    └──cancel──▶ CANCELED ◀──────┴─cancel / stale
//! ```

pub mod status;

use crate::{
    auth::current_user::CurrentUser,
    config::LifecycleConfig,
    db::{
        errors::DbError,
        models::{
            catalog::{EventStatus, TicketType},
            discounts::Voucher,
            notifications::NotificationKind,
            points::{PointEntry, PointSource},
            transactions::{
                Attendance, AttendanceIncrement, PaymentProof, Transaction, TransactionCreateDBRequest, TransactionFilter,
                TransactionItem, TransactionStatus,
            },
        },
        store::{Store, UnitBudget, UnitOfWork},
    },
    errors::{Error, Result},
    ledger::{inventory::ItemRequest, points::PointsBalance, Discounts, Inventory, Points},
    metrics::LifecycleMetrics,
    notifications::Notifier,
    storage::{ProofStorage, StorageError},
    types::{EventId, Idr, Role, TransactionId, UserId},
};
use bon::Builder;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, instrument, warn};

/// Purchase request as accepted by [`TransactionLifecycle::create`]
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub event_id: EventId,
    pub items: Vec<ItemRequest>,
    pub voucher_code: Option<String>,
    pub coupon_code: Option<String>,
    pub points_used: Option<Idr>,
}

#[derive(Debug, Clone)]
pub struct TransactionDetails {
    pub transaction: Transaction,
    pub items: Vec<TransactionItem>,
    pub payment_proof: Option<PaymentProof>,
}

#[derive(Debug, Clone)]
pub struct ProofUpload {
    pub content_type: Option<String>,
    pub image: Bytes,
}

/// Per-sweep tally; `skipped` counts items another transition got to first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn total_payable(subtotal: Idr, voucher: Idr, coupon: Idr, points: Idr) -> Idr {
    subtotal
        .saturating_sub(voucher)
        .saturating_sub(coupon)
        .saturating_sub(points)
        .max(0)
}

fn offset(now: DateTime<Utc>, by: Duration, forward: bool) -> Result<DateTime<Utc>> {
    let by = chrono::Duration::from_std(by).map_err(|_| Error::Internal {
        operation: "compute deadline".to_string(),
    })?;
    let shifted = if forward {
        now.checked_add_signed(by)
    } else {
        now.checked_sub_signed(by)
    };
    shifted.ok_or_else(|| Error::Internal {
        operation: "compute deadline".to_string(),
    })
}

/// Store timeouts surface as a retryable failure of the whole operation
fn retryable(operation: &'static str) -> impl FnOnce(Error) -> Error {
    move |err| match err {
        Error::Database(DbError::Timeout { .. }) => Error::Timeout {
            operation: operation.to_string(),
        },
        other => other,
    }
}

fn status_conflict(transaction: &Transaction, action: &str) -> Error {
    Error::conflict(format!(
        "Cannot {action} transaction {}: status is {}",
        transaction.id, transaction.status
    ))
}

fn concurrent_change(id: TransactionId) -> Error {
    Error::conflict(format!("Transaction {id} was changed by another request"))
}

#[derive(Clone, Builder)]
pub struct TransactionLifecycle {
    store: Arc<dyn Store>,
    config: LifecycleConfig,
    notifier: Notifier,
    proofs: Arc<dyn ProofStorage>,
    metrics: Option<LifecycleMetrics>,
}

impl TransactionLifecycle {
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    async fn begin(&self, budget: UnitBudget) -> Result<Box<dyn UnitOfWork>> {
        Ok(self.store.begin(budget).await?)
    }

    fn record_transition(&self, from: Option<TransactionStatus>, to: TransactionStatus) {
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(from, to);
        }
    }

    async fn load(unit: &mut dyn UnitOfWork, id: TransactionId) -> Result<Transaction> {
        unit.transaction(id).await?.ok_or_else(|| Error::not_found("Transaction", id))
    }

    /// The acting organizer must own the transaction's event
    async fn ensure_event_organizer(unit: &mut dyn UnitOfWork, transaction: &Transaction, organizer_id: UserId) -> Result<()> {
        let event = unit
            .event(transaction.event_id)
            .await?
            .ok_or_else(|| Error::not_found("Event", transaction.event_id))?;
        if event.organizer_id != organizer_id {
            return Err(Error::Forbidden {
                message: format!("Transaction {} belongs to another organizer's event", transaction.id),
            });
        }
        Ok(())
    }

    // ----- transitions -----

    /// Reserve seats, price discounts, spend points and persist a WAITING_PAYMENT transaction
    #[instrument(skip(self, request), fields(event_id = %request.event_id, items = request.items.len()), err)]
    pub async fn create(&self, user_id: UserId, request: NewTransaction) -> Result<TransactionDetails> {
        self.create_in_unit(user_id, &request)
            .await
            .map_err(retryable("create transaction"))
    }

    async fn create_in_unit(&self, user_id: UserId, request: &NewTransaction) -> Result<TransactionDetails> {
        let now = Utc::now();
        let mut unit = self.begin(self.config.budgets.create).await?;

        unit.user(user_id).await?.ok_or_else(|| Error::not_found("User", user_id))?;
        let event = unit
            .event(request.event_id)
            .await?
            .ok_or_else(|| Error::not_found("Event", request.event_id))?;
        if event.status != EventStatus::Published {
            return Err(Error::bad_request(format!("Event {} is not open for sale", event.id)));
        }
        if event.organizer_id == user_id {
            return Err(Error::SelfBookingForbidden);
        }

        let reservation = Inventory::new(unit.as_mut()).reserve(event.id, &request.items).await?;

        let mut discounts = Discounts::new(unit.as_mut());
        let voucher = discounts
            .apply_voucher(request.voucher_code.as_deref(), event.id, reservation.subtotal, now)
            .await?;
        let coupon = discounts
            .apply_coupon(request.coupon_code.as_deref(), reservation.subtotal, user_id, now)
            .await?;

        let points_requested = request.points_used.unwrap_or(0).max(0);
        let subtotal = reservation.subtotal;
        let total = total_payable(subtotal, voucher.amount, coupon.amount, points_requested);
        let transaction = unit
            .insert_transaction(&TransactionCreateDBRequest {
                user_id,
                event_id: event.id,
                payment_due_at: offset(now, self.config.payment_timeout, true)?,
                subtotal_idr: subtotal,
                discount_voucher_idr: voucher.amount,
                discount_coupon_idr: coupon.amount,
                points_used: points_requested,
                total_payable_idr: total,
                used_voucher_id: voucher.voucher_id,
                used_coupon_id: coupon.coupon_id,
                items: reservation.items,
            })
            .await?;

        // Spent after the insert so the redeem entry references its transaction.
        // A refused spend drops the unit, transaction row included.
        let points_used = if points_requested > 0 {
            let mut points = Points::new(unit.as_mut());
            let spent = points.spend(user_id, points_requested, Some(transaction.id), now).await?;
            points.resync_cached_balance(user_id, now).await?;
            spent
        } else {
            0
        };

        let items = unit.transaction_items(transaction.id).await?;
        unit.commit().await?;

        self.record_transition(None, TransactionStatus::WaitingPayment);
        info!(transaction_id = %transaction.id, subtotal, total, points_used, "Transaction created");
        Ok(TransactionDetails {
            transaction,
            items,
            payment_proof: None,
        })
    }

    /// Attach a payment proof and hand the transaction to the organizer for a decision
    #[instrument(skip(self, upload), fields(bytes = upload.image.len()), err)]
    pub async fn upload_payment_proof(&self, user_id: UserId, id: TransactionId, upload: ProofUpload) -> Result<PaymentProof> {
        if upload.image.is_empty() {
            return Err(Error::bad_request("Payment proof image is required"));
        }

        // Avoid storing images for transactions that cannot take them
        {
            let mut unit = self.begin(self.config.budgets.read).await.map_err(retryable("upload payment proof"))?;
            Self::owned_awaiting_payment(unit.as_mut(), user_id, id).await?;
        }

        let url = self
            .proofs
            .store(id, upload.content_type.as_deref(), upload.image)
            .await
            .map_err(|e| match e {
                StorageError::UnsupportedType(content_type) => {
                    Error::bad_request(format!("Unsupported payment proof type {content_type}"))
                }
                other => {
                    error!(error = %other, "Failed to store payment proof");
                    Error::Internal {
                        operation: "store payment proof".to_string(),
                    }
                }
            })?;

        match self.attach_proof(user_id, id, &url).await {
            Ok(proof) => Ok(proof),
            Err(e) => {
                if let Err(cleanup) = self.proofs.remove(&url).await {
                    warn!(url, error = %cleanup, "Failed to remove orphaned payment proof");
                }
                Err(retryable("upload payment proof")(e))
            }
        }
    }

    async fn owned_awaiting_payment(unit: &mut dyn UnitOfWork, user_id: UserId, id: TransactionId) -> Result<Transaction> {
        match unit.transaction(id).await? {
            Some(transaction) if transaction.user_id == user_id && transaction.status == TransactionStatus::WaitingPayment => {
                Ok(transaction)
            }
            _ => Err(Error::not_found("Transaction", id)),
        }
    }

    async fn attach_proof(&self, user_id: UserId, id: TransactionId, url: &str) -> Result<PaymentProof> {
        let now = Utc::now();
        let mut unit = self.begin(self.config.budgets.payment_proof).await?;
        Self::owned_awaiting_payment(unit.as_mut(), user_id, id).await?;

        if !unit
            .set_status_if(
                id,
                TransactionStatus::WaitingPayment,
                TransactionStatus::WaitingAdminConfirmation,
                now,
            )
            .await?
        {
            return Err(Error::not_found("Transaction", id));
        }
        let proof = unit.insert_payment_proof(id, url).await?;
        let decision_by = offset(now, self.config.decision_window, true)?;
        unit.set_organizer_decision_by(id, decision_by).await?;
        unit.commit().await?;

        self.record_transition(
            Some(TransactionStatus::WaitingPayment),
            TransactionStatus::WaitingAdminConfirmation,
        );
        info!(transaction_id = %id, %decision_by, "Payment proof uploaded");
        Ok(proof)
    }

    /// Organizer accepts: count discount usage and record attendance. Seats and points stay spent.
    #[instrument(skip(self), err)]
    pub async fn accept(&self, organizer_id: UserId, id: TransactionId) -> Result<Transaction> {
        let updated = self
            .accept_in_unit(organizer_id, id)
            .await
            .map_err(retryable("accept transaction"))?;
        self.notifier
            .transaction_decided(NotificationKind::TransactionAccepted, &updated)
            .await;
        Ok(updated)
    }

    async fn accept_in_unit(&self, organizer_id: UserId, id: TransactionId) -> Result<Transaction> {
        let now = Utc::now();
        let mut unit = self.begin(self.config.budgets.decision).await?;
        let transaction = Self::load(unit.as_mut(), id).await?;
        Self::ensure_event_organizer(unit.as_mut(), &transaction, organizer_id).await?;

        if transaction.status != TransactionStatus::WaitingAdminConfirmation {
            return Err(status_conflict(&transaction, "accept"));
        }
        if !unit
            .set_status_if(id, TransactionStatus::WaitingAdminConfirmation, TransactionStatus::Done, now)
            .await?
        {
            return Err(concurrent_change(id));
        }

        let mut discounts = Discounts::new(unit.as_mut());
        discounts.confirm_voucher(transaction.used_voucher_id).await?;
        discounts.confirm_coupon(transaction.used_coupon_id, id, now).await?;
        if transaction.used_voucher_id.is_some() || transaction.used_coupon_id.is_some() {
            unit.mark_discounts_confirmed(id).await?;
        }

        for item in unit.transaction_items(id).await? {
            unit.upsert_attendance(&AttendanceIncrement {
                event_id: transaction.event_id,
                user_id: transaction.user_id,
                ticket_type_id: item.ticket_type_id,
                quantity: item.quantity,
                paid_idr: item.line_total(),
            })
            .await?;
        }

        let updated = Self::load(unit.as_mut(), id).await?;
        unit.commit().await?;

        self.record_transition(Some(TransactionStatus::WaitingAdminConfirmation), TransactionStatus::Done);
        info!(transaction_id = %id, "Transaction accepted");
        Ok(updated)
    }

    /// Organizer rejects: everything the transaction held is given back
    #[instrument(skip(self), err)]
    pub async fn reject(&self, organizer_id: UserId, id: TransactionId) -> Result<Transaction> {
        let updated = self
            .reject_in_unit(organizer_id, id)
            .await
            .map_err(retryable("reject transaction"))?;
        self.notifier
            .transaction_decided(NotificationKind::TransactionRejected, &updated)
            .await;
        Ok(updated)
    }

    async fn reject_in_unit(&self, organizer_id: UserId, id: TransactionId) -> Result<Transaction> {
        let now = Utc::now();
        let mut unit = self.begin(self.config.budgets.decision).await?;
        let transaction = Self::load(unit.as_mut(), id).await?;
        Self::ensure_event_organizer(unit.as_mut(), &transaction, organizer_id).await?;

        if transaction.status != TransactionStatus::WaitingAdminConfirmation {
            return Err(status_conflict(&transaction, "reject"));
        }
        let updated = Self::roll_back(unit.as_mut(), &transaction, TransactionStatus::Rejected, now).await?;
        unit.commit().await?;

        self.record_transition(Some(transaction.status), updated.status);
        info!(transaction_id = %id, "Transaction rejected");
        Ok(updated)
    }

    /// Customer cancels one of their own waiting transactions
    #[instrument(skip(self), err)]
    pub async fn cancel(&self, user_id: UserId, id: TransactionId) -> Result<Transaction> {
        self.cancel_in_unit(user_id, id)
            .await
            .map_err(retryable("cancel transaction"))
    }

    async fn cancel_in_unit(&self, user_id: UserId, id: TransactionId) -> Result<Transaction> {
        let now = Utc::now();
        let mut unit = self.begin(self.config.budgets.cancel).await?;
        let transaction = match Self::load(unit.as_mut(), id).await? {
            transaction if transaction.user_id == user_id => transaction,
            _ => return Err(Error::not_found("Transaction", id)),
        };

        if !transaction.status.can_transition_to(TransactionStatus::Canceled) {
            return Err(status_conflict(&transaction, "cancel"));
        }
        let updated = Self::roll_back(unit.as_mut(), &transaction, TransactionStatus::Canceled, now).await?;
        unit.commit().await?;

        self.record_transition(Some(transaction.status), updated.status);
        info!(transaction_id = %id, from = %transaction.status, "Transaction canceled by customer");
        Ok(updated)
    }

    /// Scheduler: close a WAITING_PAYMENT transaction whose payment window passed before `now`
    #[instrument(skip(self), err)]
    pub async fn expire(&self, id: TransactionId, now: DateTime<Utc>) -> Result<Transaction> {
        self.sweep_transition(id, now, TransactionStatus::Expired)
            .await
            .map_err(retryable("expire transaction"))
    }

    /// Scheduler: cancel a WAITING_ADMIN_CONFIRMATION transaction left undecided past the grace window
    #[instrument(skip(self), err)]
    pub async fn auto_cancel_stale(&self, id: TransactionId, now: DateTime<Utc>) -> Result<Transaction> {
        self.sweep_transition(id, now, TransactionStatus::Canceled)
            .await
            .map_err(retryable("auto-cancel transaction"))
    }

    async fn sweep_transition(&self, id: TransactionId, now: DateTime<Utc>, next: TransactionStatus) -> Result<Transaction> {
        let mut unit = self.begin(self.config.budgets.sweep_item).await?;
        let transaction = Self::load(unit.as_mut(), id).await?;

        let due = match next {
            TransactionStatus::Expired => {
                transaction.status == TransactionStatus::WaitingPayment && transaction.payment_due_at < now
            }
            _ => {
                let cutoff = offset(now, self.config.stale_grace, false)?;
                transaction.status == TransactionStatus::WaitingAdminConfirmation
                    && transaction.organizer_decision_by.is_some_and(|decision_by| decision_by < cutoff)
            }
        };
        if !due {
            return Err(status_conflict(&transaction, "time out"));
        }

        let updated = Self::roll_back(unit.as_mut(), &transaction, next, now).await?;
        unit.commit().await?;

        self.record_transition(Some(transaction.status), updated.status);
        info!(transaction_id = %id, from = %transaction.status, to = %updated.status, "Transaction timed out");
        Ok(updated)
    }

    /// Shared compensation for every unsuccessful ending: status change, seat release,
    /// discount refund (only if usage had been counted) and points refund.
    async fn roll_back(
        unit: &mut dyn UnitOfWork,
        transaction: &Transaction,
        next: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        if !unit.set_status_if(transaction.id, transaction.status, next, now).await? {
            return Err(concurrent_change(transaction.id));
        }

        let items = unit.transaction_items(transaction.id).await?;
        Inventory::new(&mut *unit).release(&items).await?;

        if transaction.discounts_confirmed {
            let mut discounts = Discounts::new(&mut *unit);
            discounts.refund_coupon(transaction.used_coupon_id, transaction.id).await?;
            discounts.refund_voucher(transaction.used_voucher_id).await?;
        }

        if transaction.points_used > 0 {
            let mut points = Points::new(&mut *unit);
            points
                .refund(transaction.user_id, transaction.points_used, Some(transaction.id))
                .await?;
            points.resync_cached_balance(transaction.user_id, now).await?;
        }

        debug!(transaction_id = %transaction.id, items = items.len(), "Rolled back ledger effects");
        Self::load(unit, transaction.id).await
    }

    // ----- sweeps -----

    fn tally<T>(&self, sweep: &'static str, report: &mut SweepReport, id: uuid::Uuid, result: Result<T>) {
        let outcome = match result {
            Ok(_) => {
                report.processed += 1;
                "processed"
            }
            Err(Error::Conflict { .. } | Error::NotFound { .. }) => {
                debug!(sweep, %id, "Item already moved on, skipping");
                report.skipped += 1;
                "skipped"
            }
            Err(e) => {
                error!(sweep, %id, error = %e, "Sweep item failed");
                report.failed += 1;
                "failed"
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_sweep_item(sweep, outcome);
        }
    }

    /// Expire every WAITING_PAYMENT transaction overdue at `now`, each in its own unit
    #[instrument(skip(self), err)]
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let ids = {
            let mut unit = self.begin(self.config.budgets.read).await?;
            unit.overdue_unpaid(now).await?
        };

        let mut report = SweepReport::default();
        for id in ids {
            let result = self.expire(id, now).await;
            self.tally("expire_overdue", &mut report, id, result);
        }
        info!(processed = report.processed, skipped = report.skipped, failed = report.failed, "Expired overdue transactions");
        Ok(report)
    }

    /// Cancel every WAITING_ADMIN_CONFIRMATION transaction undecided past deadline plus grace
    #[instrument(skip(self), err)]
    pub async fn auto_cancel_stale_transactions(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = offset(now, self.config.stale_grace, false)?;
        let ids = {
            let mut unit = self.begin(self.config.budgets.read).await?;
            unit.stale_awaiting_decision(cutoff).await?
        };

        let mut report = SweepReport::default();
        for id in ids {
            let result = self.auto_cancel_stale(id, now).await;
            self.tally("auto_cancel_stale", &mut report, id, result);
        }
        info!(processed = report.processed, skipped = report.skipped, failed = report.failed, "Canceled stale transactions");
        Ok(report)
    }

    /// Zero every earned point entry that expired before `now`, one entry per unit
    #[instrument(skip(self), err)]
    pub async fn purge_expired_points(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let entries = {
            let mut unit = self.begin(self.config.budgets.read).await?;
            unit.expired_point_entries(now).await?
        };

        let mut report = SweepReport::default();
        for entry in entries {
            let result = self.expire_point_entry(&entry, now).await;
            self.tally("purge_expired_points", &mut report, entry.id, result);
        }
        info!(processed = report.processed, skipped = report.skipped, failed = report.failed, "Purged expired points");
        Ok(report)
    }

    async fn expire_point_entry(&self, entry: &PointEntry, now: DateTime<Utc>) -> Result<()> {
        let mut unit = self.begin(self.config.budgets.sweep_item).await?;
        if !Points::new(unit.as_mut()).expire_entry(entry, now).await? {
            return Err(Error::conflict(format!("Point entry {} already expired", entry.id)));
        }
        unit.commit().await?;
        Ok(())
    }

    // ----- reads -----

    /// Visible to the purchaser, the event's organizer and admins; NotFound for anyone else
    #[instrument(skip(self, viewer), fields(viewer = %viewer.id), err)]
    pub async fn get(&self, viewer: &CurrentUser, id: TransactionId) -> Result<TransactionDetails> {
        let mut unit = self.begin(self.config.budgets.read).await.map_err(retryable("read transaction"))?;
        let transaction = Self::load(unit.as_mut(), id).await?;

        let visible = if viewer.role == Role::Admin || transaction.user_id == viewer.id {
            true
        } else {
            match Self::ensure_event_organizer(unit.as_mut(), &transaction, viewer.id).await {
                Ok(()) => true,
                Err(Error::Forbidden { .. }) => false,
                Err(e) => return Err(retryable("read transaction")(e)),
            }
        };
        if !visible {
            return Err(Error::not_found("Transaction", id));
        }

        let items = unit.transaction_items(id).await?;
        let payment_proof = unit.payment_proof(id).await?;
        Ok(TransactionDetails {
            transaction,
            items,
            payment_proof,
        })
    }

    pub async fn list_for_customer(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        let mut unit = self.begin(self.config.budgets.read).await.map_err(retryable("list transactions"))?;
        Ok(unit.list_transactions(TransactionFilter::Customer(user_id)).await?)
    }

    pub async fn list_for_organizer(&self, organizer_id: UserId, event_id: Option<EventId>) -> Result<Vec<Transaction>> {
        let mut unit = self.begin(self.config.budgets.read).await.map_err(retryable("list transactions"))?;
        Ok(unit
            .list_transactions(TransactionFilter::Organizer { organizer_id, event_id })
            .await?)
    }

    /// Confirmed holders of an event; its organizer or an admin only
    pub async fn attendees(&self, viewer: &CurrentUser, event_id: EventId) -> Result<Vec<Attendance>> {
        let mut unit = self.begin(self.config.budgets.read).await.map_err(retryable("list attendees"))?;
        let event = unit.event(event_id).await?.ok_or_else(|| Error::not_found("Event", event_id))?;
        if viewer.role != Role::Admin && event.organizer_id != viewer.id {
            return Err(Error::Forbidden {
                message: "Only the event's organizer can list its attendees".to_string(),
            });
        }
        Ok(unit.attendees(event_id).await?)
    }

    pub async fn check_availability(&self, items: &[ItemRequest]) -> Result<Vec<TicketType>> {
        let mut unit = self.begin(self.config.budgets.read).await.map_err(retryable("check availability"))?;
        Inventory::new(unit.as_mut()).check_availability(items).await
    }

    pub async fn preview_voucher(&self, event_id: EventId, code: &str) -> Result<Voucher> {
        let mut unit = self.begin(self.config.budgets.read).await.map_err(retryable("validate voucher"))?;
        Discounts::new(unit.as_mut()).preview_voucher(code, event_id, Utc::now()).await
    }

    // ----- points -----

    pub async fn points_balance(&self, user_id: UserId) -> Result<PointsBalance> {
        let mut unit = self.begin(self.config.budgets.read).await.map_err(retryable("read points"))?;
        Points::new(unit.as_mut()).balance(user_id, Utc::now()).await
    }

    pub async fn point_entries(&self, user_id: UserId) -> Result<Vec<PointEntry>> {
        let mut unit = self.begin(self.config.budgets.read).await.map_err(retryable("read points"))?;
        Points::new(unit.as_mut()).entries(user_id).await
    }

    /// Grant or deduct points outside of a purchase. Earned points expire after the
    /// configured validity.
    #[instrument(skip(self), err)]
    pub async fn adjust_points(&self, user_id: UserId, delta: Idr, source: PointSource) -> Result<PointEntry> {
        if !matches!(source, PointSource::ReferralReward | PointSource::AdminAdjustment) {
            return Err(Error::bad_request("Only REFERRAL_REWARD and ADMIN_ADJUSTMENT entries can be added directly"));
        }

        let now = Utc::now();
        let expires_at = offset(now, self.config.points_validity, true)?;
        let mut unit = self.begin(self.config.budgets.cancel).await.map_err(retryable("adjust points"))?;
        unit.user(user_id).await?.ok_or_else(|| Error::not_found("User", user_id))?;
        let entry = Points::new(unit.as_mut())
            .grant(user_id, delta, source, Some(expires_at), now)
            .await?;
        unit.commit().await?;

        info!(%user_id, delta, ?source, "Points adjusted");
        Ok(entry)
    }
}
