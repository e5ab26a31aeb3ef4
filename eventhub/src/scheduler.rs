//! Background driver for time-based transitions and outbox draining.

use crate::{
    config::SchedulerConfig,
    lifecycle::{SweepReport, TransactionLifecycle},
};
use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub expired: SweepReport,
    pub auto_canceled: SweepReport,
    pub points_expired: SweepReport,
}

#[derive(Clone)]
pub struct Scheduler {
    lifecycle: TransactionLifecycle,
    config: SchedulerConfig,
}

/// A failed sweep is logged and counts as an empty one, so the other sweeps still run
async fn guarded(sweep: &'static str, run: impl Future<Output = crate::errors::Result<SweepReport>>) -> SweepReport {
    match run.await {
        Ok(report) => report,
        Err(e) => {
            error!(sweep, error = %e, "Sweep failed");
            SweepReport::default()
        }
    }
}

impl Scheduler {
    pub fn new(lifecycle: TransactionLifecycle, config: SchedulerConfig) -> Self {
        Self { lifecycle, config }
    }

    /// One maintenance pass: expire overdue payments, cancel stale decisions, purge expired points
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let report = TickReport {
            expired: guarded("expire_overdue", self.lifecycle.expire_overdue(now)).await,
            auto_canceled: guarded("auto_cancel_stale", self.lifecycle.auto_cancel_stale_transactions(now)).await,
            points_expired: guarded("purge_expired_points", self.lifecycle.purge_expired_points(now)).await,
        };
        if report != TickReport::default() {
            info!(
                expired = report.expired.processed,
                auto_canceled = report.auto_canceled.processed,
                points_expired = report.points_expired.processed,
                "Scheduler tick"
            );
        } else {
            debug!("Scheduler tick: nothing to do");
        }
        report
    }

    pub async fn drain_notifications(&self) {
        if let Err(e) = self.lifecycle.notifier().drain().await {
            error!(error = %e, "Notification drain failed");
        }
    }

    /// Run until `shutdown` is cancelled. Both loops fire once immediately.
    ///
    /// The outbox drain runs as its own task so a slow mail relay never holds up the sweeps.
    /// On shutdown it finishes the batch in hand before stopping.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval = ?self.config.interval,
            notification_interval = ?self.config.notification_interval,
            "Scheduler started"
        );
        tokio::spawn(self.clone().run_drain(shutdown.clone()));

        let mut maintenance = tokio::time::interval(self.config.interval);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = maintenance.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }
        info!("Scheduler stopped");
    }

    async fn run_drain(self, shutdown: CancellationToken) {
        let mut drain = tokio::time::interval(self.config.notification_interval);
        drain.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = drain.tick() => self.drain_notifications().await,
            }
        }
        debug!("Notification drain stopped");
    }

    /// Spawn [`Scheduler::run`] on the runtime; cancel the returned token to stop it
    pub fn spawn(self) -> CancellationToken {
        let shutdown = CancellationToken::new();
        tokio::spawn(self.run(shutdown.clone()));
        shutdown
    }
}
