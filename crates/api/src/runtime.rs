//! Background machinery behind the HTTP surface.
//!
//! [`Runtime::start`] wires the broker connection, the inbound event consumer
//! and the periodic outbox relay and timeout sweep around one
//! [`OrderStateMachine`]. Everything stops on the shared cancellation token.

use std::sync::Arc;

use broker::{
    BrokerTransport, ConnectionManager, InMemoryBroker, TransportError, redact_credentials,
};
use domain::{AvailabilityReply, AvailabilityRequest, IntegrationEvent};
use order_store::OrderStore;
use saga::{EventDispatcher, OrderStateMachine, SagaConfig, Scheduler};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::routes::orders::AppState;

/// A running order service: shared state plus the tasks serving it.
pub struct Runtime<S: OrderStore> {
    state: Arc<AppState<S>>,
    scheduler: Scheduler,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: OrderStore + Clone + 'static> Runtime<S> {
    /// Starts the connection watcher, the first connect, the inbound consumer
    /// and the scheduled relay and sweep.
    ///
    /// The initial connect runs in the background; until it succeeds order
    /// operations fail fast as unavailable.
    pub async fn start(
        store: S,
        transport: Arc<dyn BrokerTransport>,
        config: SagaConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, TransportError> {
        info!(
            broker = %redact_credentials(&config.broker_url),
            rpc_timeout = ?config.rpc_timeout,
            "Starting order saga runtime"
        );

        let connection = ConnectionManager::new(
            Arc::clone(&transport),
            config.connection_config(),
            shutdown.clone(),
        );
        let mut tasks = vec![connection.spawn_watcher()];

        let connector = connection.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = connector.ensure_connected().await {
                warn!(error = %e, "Initial broker connection abandoned");
            }
        }));

        let outbox_interval = config.outbox_interval;
        let sweep_interval = config.sweep_interval;
        let machine = Arc::new(OrderStateMachine::new(store, connection, config));

        let inbound = transport.subscribe().await?;
        let dispatcher = EventDispatcher::new(Arc::clone(&machine));
        tasks.push(tokio::spawn(dispatcher.run(inbound, shutdown.clone())));

        let scheduler = Scheduler::new(shutdown.clone());
        scheduler.spawn(machine.outbox_relay(), outbox_interval);
        scheduler.spawn(machine.timeout_sweeper(), sweep_interval);

        Ok(Self {
            state: Arc::new(AppState { machine }),
            scheduler,
            shutdown,
            tasks,
        })
    }

    pub fn state(&self) -> Arc<AppState<S>> {
        Arc::clone(&self.state)
    }

    pub fn machine(&self) -> &Arc<OrderStateMachine<S>> {
        &self.state.machine
    }

    /// Cancels every background task and waits for in-flight ticks to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.scheduler.shutdown().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Order saga runtime stopped");
    }
}

/// Answers `check_availability` on an in-memory broker with unlimited stock.
///
/// Lets the binary run without a real inventory service: every well-formed
/// request is reported as available in full.
pub fn register_stub_inventory(broker: &InMemoryBroker) {
    broker.on_request(AvailabilityRequest::NAME, |request| {
        let reply = match serde_json::from_value::<AvailabilityRequest>(request.clone()) {
            Ok(request) => AvailabilityReply {
                sku_exists: true,
                has_available_stock: true,
                available_quantity: u64::from(request.quantity.get()),
            },
            Err(_) => AvailabilityReply {
                sku_exists: false,
                has_available_stock: false,
                available_quantity: 0,
            },
        };
        serde_json::to_value(reply).map_err(|e| TransportError::Io(e.to_string()))
    });
}
