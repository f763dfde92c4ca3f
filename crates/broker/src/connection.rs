//! Broker connection lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{BrokerTransport, ConnectionEvent, TransportError};

type ConnectAttempt = Shared<BoxFuture<'static, Result<(), TransportError>>>;

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Broker address, used for logging only.
    pub url: String,
    /// Fixed delay between connection attempts and before a reconnect.
    pub reconnect_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

struct Inner {
    transport: Arc<dyn BrokerTransport>,
    config: ConnectionConfig,
    connected: AtomicBool,
    in_flight: Mutex<Option<ConnectAttempt>>,
    reconnect_scheduled: AtomicBool,
    shutdown: CancellationToken,
}

impl Inner {
    fn in_flight(&self) -> MutexGuard<'_, Option<ConnectAttempt>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn connect_with_retry(self: Arc<Self>) -> Result<(), TransportError> {
        let url = redact_credentials(&self.config.url);

        let result = loop {
            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => break Err(TransportError::Shutdown),
                result = self.transport.connect() => result,
            };

            match attempt {
                Ok(()) => {
                    self.connected.store(true, Ordering::SeqCst);
                    info!(url = %url, "Connected to message broker");
                    break Ok(());
                }
                Err(e) => {
                    error!(
                        url = %url,
                        error = %e,
                        retry_in = ?self.config.reconnect_delay,
                        "Failed to connect to message broker, retrying"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break Err(TransportError::Shutdown),
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        };

        *self.in_flight() = None;
        result
    }
}

/// Owns the broker connection state.
///
/// Concurrent [`ensure_connected`](Self::ensure_connected) callers share one
/// in-flight attempt. A dropped connection schedules exactly one reconnect,
/// however many close or error signals arrive. Every pending retry and
/// reconnect stops when the shutdown token is cancelled.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        config: ConnectionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                connected: AtomicBool::new(false),
                in_flight: Mutex::new(None),
                reconnect_scheduled: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    pub fn transport(&self) -> &Arc<dyn BrokerTransport> {
        &self.inner.transport
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Returns once the broker is connected, retrying forever on failure.
    ///
    /// Only fails with [`TransportError::Shutdown`] when the service stops
    /// before a connection is made.
    pub async fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }

        let attempt = {
            let mut slot = self.inner.in_flight();
            match slot.as_ref() {
                Some(attempt) => {
                    debug!("Joining in-flight broker connection attempt");
                    attempt.clone()
                }
                None => {
                    let attempt = Arc::clone(&self.inner)
                        .connect_with_retry()
                        .boxed()
                        .shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Marks the connection lost and schedules a single reconnect.
    pub fn handle_disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);

        if self.inner.reconnect_scheduled.swap(true, Ordering::SeqCst) {
            debug!("Reconnect already scheduled");
            return;
        }

        let delay = self.inner.config.reconnect_delay;
        info!(retry_in = ?delay, "Scheduling message broker reconnect");

        let manager = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = manager.inner.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    manager.inner.reconnect_scheduled.store(false, Ordering::SeqCst);
                    if let Err(e) = manager.ensure_connected().await {
                        debug!(error = %e, "Reconnect abandoned");
                    }
                }
            }
        });
    }

    /// Listens for close/error signals from the transport until shutdown.
    pub fn spawn_watcher(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let mut events = self.inner.transport.connection_events();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = manager.inner.shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(ConnectionEvent::Closed) => {
                            warn!("Message broker connection closed");
                            manager.handle_disconnect();
                        }
                        Ok(ConnectionEvent::Error(reason)) => {
                            error!(reason = %reason, "Message broker connection error");
                            manager.handle_disconnect();
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Missed message broker connection events");
                            manager.handle_disconnect();
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Cancels pending connection attempts and reconnect timers.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

/// Masks the user info of a broker URL for logging.
pub fn redact_credentials(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());

    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}****:****{}", &url[..scheme_end + 3], &rest[at..]),
        None => url.to_string(),
    }
}
