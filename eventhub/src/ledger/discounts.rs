//! Voucher and coupon pricing, confirmation and refund.
//!
//! Pricing at purchase time never touches usage counters. Usage is counted only when a
//! transaction is accepted, and given back only if it had been counted.

use crate::{
    db::{models::discounts::Voucher, store::UnitOfWork},
    errors::{Error, Result},
    types::{CouponId, EventId, Idr, TransactionId, UserId, VoucherId},
};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoucherDiscount {
    pub amount: Idr,
    pub voucher_id: Option<VoucherId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CouponDiscount {
    pub amount: Idr,
    pub coupon_id: Option<CouponId>,
}

pub struct Discounts<'u> {
    unit: &'u mut dyn UnitOfWork,
}

/// Blank codes count as no code at all
fn normalized(code: Option<&str>) -> Option<&str> {
    code.map(str::trim).filter(|code| !code.is_empty())
}

impl<'u> Discounts<'u> {
    pub fn new(unit: &'u mut dyn UnitOfWork) -> Self {
        Self { unit }
    }

    /// Price an optional voucher code. Unknown or unusable codes give no discount rather
    /// than an error, so checkout never fails on a stale promo entry.
    #[instrument(skip(self), err)]
    pub async fn apply_voucher(
        &mut self,
        code: Option<&str>,
        event_id: EventId,
        subtotal: Idr,
        now: DateTime<Utc>,
    ) -> Result<VoucherDiscount> {
        let Some(code) = normalized(code) else {
            return Ok(VoucherDiscount::default());
        };

        match self.unit.voucher_by_code(event_id, code).await? {
            Some(voucher) if voucher.is_active && voucher.is_within_window(now) && voucher.has_capacity() => {
                let amount = voucher.discount_type.amount_for(voucher.discount_value, subtotal);
                debug!(voucher_id = %voucher.id, amount, "Voucher applied");
                Ok(VoucherDiscount {
                    amount,
                    voucher_id: Some(voucher.id),
                })
            }
            _ => {
                debug!(code, "Voucher not applicable, pricing without it");
                Ok(VoucherDiscount::default())
            }
        }
    }

    /// Price an optional coupon code owned by `user_id`. Same silent fallback as vouchers.
    #[instrument(skip(self), err)]
    pub async fn apply_coupon(
        &mut self,
        code: Option<&str>,
        subtotal: Idr,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<CouponDiscount> {
        let Some(code) = normalized(code) else {
            return Ok(CouponDiscount::default());
        };

        match self.unit.coupon_by_code(code).await? {
            Some(coupon) if coupon.user_id == user_id && !coupon.is_used && coupon.expires_at > now => {
                let amount = coupon.discount_type.amount_for(coupon.discount_value, subtotal);
                debug!(coupon_id = %coupon.id, amount, "Coupon applied");
                Ok(CouponDiscount {
                    amount,
                    coupon_id: Some(coupon.id),
                })
            }
            _ => {
                debug!(code, "Coupon not applicable, pricing without it");
                Ok(CouponDiscount::default())
            }
        }
    }

    /// Strict voucher lookup for the customer-facing check: every reason a code would be
    /// ignored at checkout is reported.
    #[instrument(skip(self), err)]
    pub async fn preview_voucher(&mut self, code: &str, event_id: EventId, now: DateTime<Utc>) -> Result<Voucher> {
        let code = normalized(Some(code)).ok_or_else(|| Error::bad_request("Voucher code is required"))?;
        let voucher = self
            .unit
            .voucher_by_code(event_id, code)
            .await?
            .ok_or_else(|| Error::not_found("Voucher", code))?;

        if !voucher.is_active {
            return Err(Error::bad_request("Voucher is inactive"));
        }
        if !voucher.is_within_window(now) {
            return Err(Error::bad_request("Voucher is not valid at this time"));
        }
        if !voucher.has_capacity() {
            return Err(Error::bad_request("Voucher usage limit reached"));
        }
        Ok(voucher)
    }

    /// Count one use of the voucher. Fails if the cap was reached since purchase.
    pub async fn confirm_voucher(&mut self, voucher_id: Option<VoucherId>) -> Result<()> {
        let Some(id) = voucher_id else { return Ok(()) };
        if !self.unit.increment_voucher_usage(id).await? {
            return Err(Error::conflict("Voucher usage limit reached"));
        }
        Ok(())
    }

    /// Mark the coupon used by `transaction_id`. Fails if it was used elsewhere since purchase.
    pub async fn confirm_coupon(
        &mut self,
        coupon_id: Option<CouponId>,
        transaction_id: TransactionId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(id) = coupon_id else { return Ok(()) };
        if !self.unit.mark_coupon_used(id, transaction_id, now).await? {
            return Err(Error::conflict("Coupon has already been used"));
        }
        Ok(())
    }

    pub async fn refund_voucher(&mut self, voucher_id: Option<VoucherId>) -> Result<()> {
        let Some(id) = voucher_id else { return Ok(()) };
        if !self.unit.decrement_voucher_usage(id).await? {
            warn!(voucher_id = %id, "Voucher usage already at zero, nothing to refund");
        }
        Ok(())
    }

    pub async fn refund_coupon(&mut self, coupon_id: Option<CouponId>, transaction_id: TransactionId) -> Result<()> {
        let Some(id) = coupon_id else { return Ok(()) };
        if !self.unit.clear_coupon_usage(id, transaction_id).await? {
            warn!(coupon_id = %id, %transaction_id, "Coupon not held by this transaction, nothing to refund");
        }
        Ok(())
    }
}
