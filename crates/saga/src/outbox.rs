//! Periodic redelivery of outbox rows.

use std::sync::Arc;

use async_trait::async_trait;
use broker::EventPublisher;
use domain::OutboxStatus;
use order_store::OrderStore;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::scheduler::PeriodicTask;

/// Counts from one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Rows delivered and marked processed.
    pub processed: usize,
    /// Rows that failed but stay pending for the next flush.
    pub retried: usize,
    /// Rows that hit the attempt cap and were marked failed.
    pub failed: usize,
}

/// Retries pending outbox rows through the event publisher.
pub struct OutboxRelay<S> {
    store: S,
    publisher: Arc<EventPublisher>,
    batch_size: usize,
    max_attempts: u32,
}

impl<S: OrderStore> OutboxRelay<S> {
    pub fn new(
        store: S,
        publisher: Arc<EventPublisher>,
        batch_size: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            publisher,
            batch_size,
            max_attempts,
        }
    }

    /// Publishes up to one batch of pending rows, oldest first.
    ///
    /// Every failed publish, including a refusal while the broker is
    /// disconnected or the circuit is open, counts as an attempt on that row.
    /// The batch always runs to the end.
    #[tracing::instrument(skip(self))]
    pub async fn flush(&self) -> Result<FlushReport> {
        let batch = self
            .store
            .pending_outbox(self.batch_size, self.max_attempts)
            .await?;
        let mut report = FlushReport::default();

        if batch.is_empty() {
            return Ok(report);
        }
        debug!(count = batch.len(), "Flushing outbox");

        for message in &batch {
            match self
                .publisher
                .publish(&message.event_type, &message.payload)
                .await
            {
                Ok(()) => {
                    self.store.mark_outbox_processed(message.id).await?;
                    metrics::counter!("outbox_messages_processed_total").increment(1);
                    report.processed += 1;
                }
                Err(e) => {
                    let updated = self
                        .store
                        .record_outbox_failure(message.id, &e.to_string(), self.max_attempts)
                        .await?;

                    match updated {
                        Some(row) if row.status == OutboxStatus::Failed => {
                            metrics::counter!("outbox_messages_failed_total").increment(1);
                            error!(
                                message_id = %row.id,
                                order_id = %row.order_id,
                                attempts = row.attempts,
                                error = %e,
                                "Outbox message gave up after max attempts"
                            );
                            report.failed += 1;
                        }
                        _ => {
                            warn!(
                                message_id = %message.id,
                                error = %e,
                                "Outbox message publish failed, will retry"
                            );
                            report.retried += 1;
                        }
                    }
                }
            }
        }

        info!(
            processed = report.processed,
            retried = report.retried,
            failed = report.failed,
            "Outbox flush finished"
        );
        Ok(report)
    }
}

#[async_trait]
impl<S: OrderStore + 'static> PeriodicTask for OutboxRelay<S> {
    fn name(&self) -> &'static str {
        "outbox_relay"
    }

    async fn tick(&self) {
        if let Err(e) = self.flush().await {
            error!(error = %e, "Outbox flush failed");
        }
    }
}
