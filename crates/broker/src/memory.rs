//! In-memory broker for tests and local runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::{BrokerTransport, ConnectionEvent, InboundMessage, TransportError};

const INBOUND_BUFFER: usize = 64;

type RequestHandler = Arc<dyn Fn(&Value) -> Result<Value, TransportError> + Send + Sync>;

/// An event accepted by [`InMemoryBroker::emit`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub pattern: String,
    pub payload: Value,
}

struct BrokerState {
    reachable: bool,
    connected: bool,
    connect_attempts: u32,
    emit_attempts: u32,
    fail_on_emit: bool,
    emit_delay: Option<Duration>,
    request_delay: Option<Duration>,
    emitted: Vec<EmittedEvent>,
    handlers: HashMap<String, RequestHandler>,
    inbound: Option<mpsc::Sender<InboundMessage>>,
}

/// In-memory broker transport.
///
/// Reachability, emit failures, and latency can be switched at runtime so the
/// connection manager, publisher, and validator can be driven through their
/// failure paths.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Creates a reachable broker with no request handlers.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                reachable: true,
                connected: false,
                connect_attempts: 0,
                emit_attempts: 0,
                fail_on_emit: false,
                emit_delay: None,
                request_delay: None,
                emitted: Vec::new(),
                handlers: HashMap::new(),
                inbound: None,
            })),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Controls whether `connect` succeeds.
    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Makes every `emit` fail with an I/O error.
    pub fn set_fail_on_emit(&self, fail: bool) {
        self.state().fail_on_emit = fail;
    }

    /// Delays every `emit` by `delay`.
    pub fn set_emit_delay(&self, delay: Option<Duration>) {
        self.state().emit_delay = delay;
    }

    /// Delays every `send` reply by `delay`.
    pub fn set_request_delay(&self, delay: Option<Duration>) {
        self.state().request_delay = delay;
    }

    /// Registers the remote consumer for a request pattern.
    pub fn on_request<F>(&self, pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        self.state()
            .handlers
            .insert(pattern.into(), Arc::new(handler));
    }

    /// Removes the remote consumer for a request pattern.
    pub fn remove_handler(&self, pattern: &str) {
        self.state().handlers.remove(pattern);
    }

    /// Returns true while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Returns the number of `connect` calls made so far.
    pub fn connect_attempts(&self) -> u32 {
        self.state().connect_attempts
    }

    /// Returns the number of `emit` calls that reached the broker.
    pub fn emit_attempts(&self) -> u32 {
        self.state().emit_attempts
    }

    /// Returns every event accepted so far, oldest first.
    pub fn emitted(&self) -> Vec<EmittedEvent> {
        self.state().emitted.clone()
    }

    /// Returns the number of accepted events published under `pattern`.
    pub fn emitted_count(&self, pattern: &str) -> usize {
        self.state()
            .emitted
            .iter()
            .filter(|e| e.pattern == pattern)
            .count()
    }

    /// Closes the current connection and notifies listeners.
    pub fn drop_connection(&self) {
        self.state().connected = false;
        let _ = self.events.send(ConnectionEvent::Closed);
    }

    /// Fails the current connection with `reason` and notifies listeners.
    pub fn fail_connection(&self, reason: impl Into<String>) {
        self.state().connected = false;
        let _ = self.events.send(ConnectionEvent::Error(reason.into()));
    }

    /// Delivers an inbound event to the subscriber, as the broker would.
    pub async fn deliver(&self, pattern: &str, payload: Value) -> Result<(), TransportError> {
        let sender = self
            .state()
            .inbound
            .clone()
            .ok_or_else(|| TransportError::Io("no inbound subscriber".to_string()))?;

        sender
            .send(InboundMessage::new(pattern, payload))
            .await
            .map_err(|_| TransportError::Io("inbound subscriber dropped".to_string()))
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.connect_attempts += 1;
        if !state.reachable {
            return Err(TransportError::Io("connection refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    async fn emit(&self, pattern: &str, payload: &Value) -> Result<(), TransportError> {
        let delay = {
            let mut state = self.state();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            state.emit_attempts += 1;
            state.emit_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.fail_on_emit {
            return Err(TransportError::Io("emit rejected".to_string()));
        }
        state.emitted.push(EmittedEvent {
            pattern: pattern.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn send(&self, pattern: &str, payload: &Value) -> Result<Value, TransportError> {
        let (handler, delay) = {
            let state = self.state();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            (state.handlers.get(pattern).cloned(), state.request_delay)
        };

        let handler = handler.ok_or_else(|| TransportError::NoHandler(pattern.to_string()))?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        handler(payload)
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<InboundMessage>, TransportError> {
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        self.state().inbound = Some(tx);
        Ok(rx)
    }
}
