//! Loyalty points as an append-only signed ledger.
//!
//! The usable balance is the sum of deltas that have not expired. `users.points_balance`
//! is a cache of that sum, rewritten after every spend, grant, refund or expiry.
//!
//! Debits lock the user's row before reading the balance, so two concurrent spends
//! against one balance run one after the other.

use crate::{
    db::{
        models::points::{PointEntry, PointEntryCreateDBRequest, PointSource},
        store::UnitOfWork,
    },
    errors::{Error, Result},
    types::{Idr, TransactionId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PointsBalance {
    /// Sum of non-expired ledger entries
    pub usable: Idr,
    /// Denormalized value stored on the user
    pub cached: Idr,
}

pub struct Points<'u> {
    unit: &'u mut dyn UnitOfWork,
}

impl<'u> Points<'u> {
    pub fn new(unit: &'u mut dyn UnitOfWork) -> Self {
        Self { unit }
    }

    pub async fn usable_balance(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<Idr> {
        Ok(self.unit.usable_points(user_id, now).await?)
    }

    async fn lock_holder(&mut self, user_id: UserId) -> Result<()> {
        if !self.unit.lock_user(user_id).await? {
            return Err(Error::not_found("User", user_id));
        }
        Ok(())
    }

    /// Debit `requested` points. Returns the amount actually spent (0 for non-positive requests).
    #[instrument(skip(self), err)]
    pub async fn spend(
        &mut self,
        user_id: UserId,
        requested: Idr,
        transaction_id: Option<TransactionId>,
        now: DateTime<Utc>,
    ) -> Result<Idr> {
        if requested <= 0 {
            return Ok(0);
        }

        self.lock_holder(user_id).await?;
        let usable = self.usable_balance(user_id, now).await?;
        if requested > usable {
            return Err(Error::InsufficientPoints { requested, usable });
        }

        self.unit
            .insert_point_entry(&PointEntryCreateDBRequest {
                user_id,
                delta: -requested,
                source: PointSource::PurchaseRedeem,
                expires_at: None,
                transaction_id,
            })
            .await?;
        self.unit.adjust_cached_points_balance(user_id, -requested).await?;

        debug!(requested, usable, "Points spent");
        Ok(requested)
    }

    /// Credit back points spent on a transaction that did not go through
    #[instrument(skip(self), err)]
    pub async fn refund(&mut self, user_id: UserId, amount: Idr, transaction_id: Option<TransactionId>) -> Result<()> {
        if amount <= 0 {
            return Ok(());
        }

        self.unit
            .insert_point_entry(&PointEntryCreateDBRequest {
                user_id,
                delta: amount,
                source: PointSource::Rollback,
                expires_at: None,
                transaction_id,
            })
            .await?;
        self.unit.adjust_cached_points_balance(user_id, amount).await?;
        Ok(())
    }

    /// Rewrite the cached balance from the ledger sum
    pub async fn resync_cached_balance(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<Idr> {
        let usable = self.usable_balance(user_id, now).await?;
        self.unit.set_cached_points_balance(user_id, usable).await?;
        Ok(usable)
    }

    /// Record an earned or administrative entry.
    ///
    /// Negative grants never expire and cannot take the usable balance below zero.
    #[instrument(skip(self), err)]
    pub async fn grant(
        &mut self,
        user_id: UserId,
        delta: Idr,
        source: PointSource,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<PointEntry> {
        if delta == 0 {
            return Err(Error::bad_request("Point adjustment must be non-zero"));
        }
        self.lock_holder(user_id).await?;
        if delta < 0 {
            let usable = self.usable_balance(user_id, now).await?;
            if -delta > usable {
                return Err(Error::InsufficientPoints {
                    requested: -delta,
                    usable,
                });
            }
        }

        let entry = self
            .unit
            .insert_point_entry(&PointEntryCreateDBRequest {
                user_id,
                delta,
                source,
                expires_at: if delta > 0 { expires_at } else { None },
                transaction_id: None,
            })
            .await?;
        self.resync_cached_balance(user_id, now).await?;
        Ok(entry)
    }

    /// Zero one expired earning in place and rewrite the cached balance from the ledger.
    /// Returns false if another sweep got to it first.
    pub async fn expire_entry(&mut self, entry: &PointEntry, now: DateTime<Utc>) -> Result<bool> {
        if !self.unit.zero_point_entry(entry.id, entry.delta).await? {
            warn!(entry_id = %entry.id, "Point entry already expired");
            return Ok(false);
        }
        self.resync_cached_balance(entry.user_id, now).await?;
        Ok(true)
    }

    pub async fn entries(&mut self, user_id: UserId) -> Result<Vec<PointEntry>> {
        Ok(self.unit.point_entries(user_id).await?)
    }

    pub async fn balance(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<PointsBalance> {
        let user = self
            .unit
            .user(user_id)
            .await?
            .ok_or_else(|| Error::not_found("User", user_id))?;
        let usable = self.usable_balance(user_id, now).await?;
        Ok(PointsBalance {
            usable,
            cached: user.points_balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{memory::MemoryStore, store::Store},
        test_utils::{create_test_user, grant_test_points, TEST_BUDGET},
        types::Role,
    };
    use chrono::Duration;

    #[test_log::test(tokio::test)]
    async fn spend_and_refund_keep_cache_in_step_with_ledger() {
        let store = MemoryStore::new();
        let customer = create_test_user(&store, Role::Customer).await;
        grant_test_points(&store, customer.id, 10_000, Some(Utc::now() + Duration::days(30))).await;

        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        let mut points = Points::new(unit.as_mut());
        let now = Utc::now();

        assert_eq!(points.spend(customer.id, 4_000, None, now).await.unwrap(), 4_000);
        assert_eq!(points.balance(customer.id, now).await.unwrap(), PointsBalance { usable: 6_000, cached: 6_000 });

        points.refund(customer.id, 4_000, None).await.unwrap();
        points.refund(customer.id, 0, None).await.unwrap();
        assert_eq!(points.resync_cached_balance(customer.id, now).await.unwrap(), 10_000);
        assert_eq!(points.entries(customer.id).await.unwrap().len(), 3);
    }

    #[test_log::test(tokio::test)]
    async fn overspending_is_refused_without_writing() {
        let store = MemoryStore::new();
        let customer = create_test_user(&store, Role::Customer).await;
        grant_test_points(&store, customer.id, 1_000, None).await;

        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        let mut points = Points::new(unit.as_mut());
        let err = points.spend(customer.id, 1_001, None, Utc::now()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientPoints {
                requested: 1_001,
                usable: 1_000
            }
        ));
        assert_eq!(points.spend(customer.id, 0, None, Utc::now()).await.unwrap(), 0);
        assert_eq!(points.spend(customer.id, -5, None, Utc::now()).await.unwrap(), 0);
        assert_eq!(points.entries(customer.id).await.unwrap().len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn expired_earnings_are_not_usable() {
        let store = MemoryStore::new();
        let customer = create_test_user(&store, Role::Customer).await;
        grant_test_points(&store, customer.id, 5_000, Some(Utc::now() - Duration::days(1))).await;
        grant_test_points(&store, customer.id, 2_000, None).await;

        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        let mut points = Points::new(unit.as_mut());
        assert_eq!(points.usable_balance(customer.id, Utc::now()).await.unwrap(), 2_000);
        assert!(points.spend(customer.id, 3_000, None, Utc::now()).await.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn expire_entry_runs_once() {
        let store = MemoryStore::new();
        let customer = create_test_user(&store, Role::Customer).await;
        let entry = grant_test_points(&store, customer.id, 5_000, Some(Utc::now() - Duration::hours(1))).await;

        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        let mut points = Points::new(unit.as_mut());
        let now = Utc::now();
        assert!(points.expire_entry(&entry, now).await.unwrap());
        assert!(!points.expire_entry(&entry, now).await.unwrap());

        let balance = points.balance(customer.id, now).await.unwrap();
        assert_eq!(balance, PointsBalance { usable: 0, cached: 0 });
    }

    #[test_log::test(tokio::test)]
    async fn expiry_after_a_resync_leaves_cache_equal_to_ledger() {
        let store = MemoryStore::new();
        let customer = create_test_user(&store, Role::Customer).await;
        let stale = grant_test_points(&store, customer.id, 5_000, Some(Utc::now() - Duration::minutes(1))).await;
        grant_test_points(&store, customer.id, 2_000, None).await;

        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        let mut points = Points::new(unit.as_mut());
        let now = Utc::now();
        // The resync already dropped the stale 5000 from the cache
        points.spend(customer.id, 1_000, None, now).await.unwrap();
        assert_eq!(points.resync_cached_balance(customer.id, now).await.unwrap(), 1_000);

        assert!(points.expire_entry(&stale, now).await.unwrap());
        assert_eq!(points.balance(customer.id, now).await.unwrap(), PointsBalance { usable: 1_000, cached: 1_000 });
    }

    #[test_log::test(tokio::test)]
    async fn debits_for_unknown_users_are_not_found() {
        let store = MemoryStore::new();
        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        let mut points = Points::new(unit.as_mut());
        let ghost = uuid::Uuid::new_v4();

        let err = points.spend(ghost, 10, None, Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        let err = points
            .grant(ghost, 10, PointSource::ReferralReward, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn negative_adjustments_need_cover_and_never_expire() {
        let store = MemoryStore::new();
        let customer = create_test_user(&store, Role::Customer).await;
        grant_test_points(&store, customer.id, 3_000, None).await;

        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        let mut points = Points::new(unit.as_mut());
        let now = Utc::now();

        let err = points
            .grant(customer.id, -4_000, PointSource::AdminAdjustment, Some(now), now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientPoints { .. }));

        let entry = points
            .grant(customer.id, -1_000, PointSource::AdminAdjustment, Some(now), now)
            .await
            .unwrap();
        assert_eq!(entry.expires_at, None);
        assert_eq!(points.balance(customer.id, now).await.unwrap().cached, 2_000);
        assert!(points.grant(customer.id, 0, PointSource::AdminAdjustment, None, now).await.is_err());
    }
}
