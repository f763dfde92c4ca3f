//! Expiry of orders that never heard back from inventory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::OrderStatus;
use order_store::OrderStore;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::scheduler::PeriodicTask;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    /// Candidates whose status changed before the write.
    pub skipped: usize,
}

/// Fails PENDING orders whose validity window has closed.
pub struct TimeoutSweeper<S> {
    store: S,
}

impl<S: OrderStore> TimeoutSweeper<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Fails every order still PENDING with an expiry before `now`.
    ///
    /// Each write only applies if the order is still PENDING, so a
    /// confirmation landing between the scan and the write wins.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let candidates = self.store.find_expired(now).await?;
        let mut report = SweepReport::default();

        for order in candidates {
            match self
                .store
                .transition(order.id, &[OrderStatus::Pending], OrderStatus::Failed, now)
                .await?
            {
                Some(_) => {
                    metrics::counter!("orders_expired_total").increment(1);
                    metrics::counter!(
                        "order_transitions_total",
                        "to" => OrderStatus::Failed.as_str()
                    )
                    .increment(1);
                    info!(order_id = %order.id, "Order expired");
                    report.expired += 1;
                }
                None => {
                    debug!(order_id = %order.id, "Order left PENDING before expiry, skipping");
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl<S: OrderStore + 'static> PeriodicTask for TimeoutSweeper<S> {
    fn name(&self) -> &'static str {
        "timeout_sweeper"
    }

    async fn tick(&self) {
        if let Err(e) = self.sweep().await {
            error!(error = %e, "Timeout sweep failed");
        }
    }
}
