//! Routing of inbound broker events to state machine handlers.

use std::collections::HashMap;
use std::sync::Arc;

use broker::InboundMessage;
use domain::{IntegrationEvent, ReservationCancelled, ReservationConfirmed, ReservationFailed};
use futures_util::future::BoxFuture;
use order_store::OrderStore;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::{OrderStateMachine, TransitionOutcome};
use crate::error::{ErrorKind, Result};

type Handler<S> =
    for<'a> fn(&'a OrderStateMachine<S>, Value) -> BoxFuture<'a, Result<TransitionOutcome>>;

fn on_confirmed<S: OrderStore + Clone>(
    machine: &OrderStateMachine<S>,
    payload: Value,
) -> BoxFuture<'_, Result<TransitionOutcome>> {
    Box::pin(async move {
        let event: ReservationConfirmed = serde_json::from_value(payload)?;
        machine.handle_reservation_confirmed(event).await
    })
}

fn on_failed<S: OrderStore + Clone>(
    machine: &OrderStateMachine<S>,
    payload: Value,
) -> BoxFuture<'_, Result<TransitionOutcome>> {
    Box::pin(async move {
        let event: ReservationFailed = serde_json::from_value(payload)?;
        machine.handle_reservation_failed(event).await
    })
}

fn on_cancelled<S: OrderStore + Clone>(
    machine: &OrderStateMachine<S>,
    payload: Value,
) -> BoxFuture<'_, Result<TransitionOutcome>> {
    Box::pin(async move {
        let event: ReservationCancelled = serde_json::from_value(payload)?;
        machine.handle_reservation_cancelled(event).await
    })
}

/// Maps inbound event names to state machine handlers.
pub struct EventDispatcher<S>
where
    S: OrderStore,
{
    machine: Arc<OrderStateMachine<S>>,
    handlers: HashMap<&'static str, Handler<S>>,
}

impl<S> EventDispatcher<S>
where
    S: OrderStore + Clone + 'static,
{
    pub fn new(machine: Arc<OrderStateMachine<S>>) -> Self {
        let mut handlers: HashMap<&'static str, Handler<S>> = HashMap::new();
        handlers.insert(ReservationConfirmed::NAME, on_confirmed::<S>);
        handlers.insert(ReservationFailed::NAME, on_failed::<S>);
        handlers.insert(ReservationCancelled::NAME, on_cancelled::<S>);
        Self { machine, handlers }
    }

    /// Returns the event names this dispatcher handles.
    pub fn patterns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Runs the handler registered for `pattern`.
    ///
    /// Returns `Ok(None)` for events nobody handles.
    #[tracing::instrument(skip(self, payload))]
    pub async fn dispatch(
        &self,
        pattern: &str,
        payload: Value,
    ) -> Result<Option<TransitionOutcome>> {
        let Some(handler) = self.handlers.get(pattern) else {
            warn!("No handler for inbound event, dropping");
            return Ok(None);
        };

        handler(&self.machine, payload).await.map(Some)
    }

    /// Consumes inbound events until the channel closes or shutdown.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        shutdown: CancellationToken,
    ) {
        info!(
            patterns = ?self.handlers.keys().collect::<Vec<_>>(),
            "Inbound event consumer started"
        );

        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match self.dispatch(&message.pattern, message.payload).await {
                Ok(Some(outcome)) => debug!(
                    pattern = %message.pattern,
                    order_id = %outcome.order().id,
                    applied = outcome.is_applied(),
                    "Inbound event handled"
                ),
                Ok(None) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(
                        pattern = %message.pattern,
                        error = %e,
                        "Inbound event for unknown order, dropping"
                    );
                }
                Err(e) => {
                    error!(
                        pattern = %message.pattern,
                        error = %e,
                        "Failed to handle inbound event"
                    );
                }
            }
        }

        info!("Inbound event consumer stopped");
    }
}
