//! Prometheus counters for lifecycle transitions and scheduler sweeps.

use crate::db::models::transactions::TransactionStatus;
use prometheus::{IntCounterVec, Opts, Registry};

#[derive(Clone, Debug)]
pub struct LifecycleMetrics {
    transitions: IntCounterVec,
    sweep_items: IntCounterVec,
}

impl LifecycleMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let transitions = IntCounterVec::new(
            Opts::new(
                "eventhub_transaction_transitions_total",
                "Committed transaction status transitions",
            ),
            &["from", "to"],
        )?;
        let sweep_items = IntCounterVec::new(
            Opts::new("eventhub_sweep_items_total", "Items processed by scheduler sweeps"),
            &["sweep", "outcome"],
        )?;

        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(sweep_items.clone()))?;

        Ok(Self { transitions, sweep_items })
    }

    /// `from` is `None` for a newly created transaction
    pub fn record_transition(&self, from: Option<TransactionStatus>, to: TransactionStatus) {
        let from = from.map_or("NEW", TransactionStatus::as_str);
        self.transitions.with_label_values(&[from, to.as_str()]).inc();
    }

    pub fn record_sweep_item(&self, sweep: &str, outcome: &str) {
        self.sweep_items.with_label_values(&[sweep, outcome]).inc();
    }
}
