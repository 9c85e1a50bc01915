//! Owns the single broker connection and its reconnect policy.
//!
//! Lifecycle is exposed as typed `tokio::sync::broadcast` subscriptions
//! rather than a string-keyed event emitter (see `DESIGN.md` notes on
//! re-architecting the event-emitting connection object).

use lapin::{Connection, ConnectionProperties};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

use crate::errors::PipelineError;

const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const MAX_BACKOFF_MS: u64 = 30_000;

/// A lifecycle transition emitted by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: String },
    Error { message: String },
    Blocked { reason: String },
    Unblocked,
    /// Reconnect attempts exhausted; the process should treat this as fatal.
    MaxReconnectAttemptsReached,
}

/// Owns the broker connection, reconnect state, and lifecycle broadcast.
pub struct ConnectionManager {
    url: String,
    connection: RwLock<Option<Connection>>,
    events: broadcast::Sender<ConnectionEvent>,
    connected: AtomicBool,
    reconnect_attempts: AtomicU32,
    /// Guards against the close callback and an explicit `connect()` call
    /// both racing into the backoff loop at once.
    reconnecting: AtomicBool,
    /// Set by [`Self::disconnect`] so a close triggered by our own shutdown
    /// doesn't get mistaken for a drop worth reconnecting from.
    shutting_down: AtomicBool,
}

impl ConnectionManager {
    /// Create a manager for the given AMQP URL. Does not connect yet.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(256);
        Arc::new(Self {
            url: url.into(),
            connection: RwLock::new(None),
            events: tx,
            connected: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            reconnecting: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Subscribe to lifecycle events. Each subscriber gets its own receiver;
    /// none of them observe events emitted before they subscribed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Open the connection, retrying with exponential backoff on failure. If
    /// the resulting connection later closes or errors out, a reconnect is
    /// driven automatically in the background: callers don't need to notice
    /// a drop and call `connect` again, only watch [`Self::subscribe`] (or
    /// poll [`Self::is_connected`]) for `Connected` events to re-declare
    /// topology and resume consuming.
    ///
    /// # Errors
    /// Returns [`PipelineError::TransientNetwork`] once
    /// [`MAX_RECONNECT_ATTEMPTS`] is exhausted without a successful connect.
    pub async fn connect(self: &Arc<Self>) -> Result<(), PipelineError> {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::TransientNetwork(
                "a reconnect is already in progress".into(),
            ));
        }
        let result = self.connect_inner().await;
        self.reconnecting.store(false, Ordering::SeqCst);
        result
    }

    async fn connect_inner(self: &Arc<Self>) -> Result<(), PipelineError> {
        loop {
            match Connection::connect(&self.url, ConnectionProperties::default()).await {
                Ok(conn) => {
                    self.install_close_watch(&conn);
                    *self.connection.write().await = Some(conn);
                    self.connected.store(true, Ordering::SeqCst);
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    let _ = self.events.send(ConnectionEvent::Connected);
                    return Ok(());
                }
                Err(err) => {
                    let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let _ = self.events.send(ConnectionEvent::Error {
                        message: err.to_string(),
                    });

                    if attempt >= MAX_RECONNECT_ATTEMPTS {
                        let _ = self.events.send(ConnectionEvent::MaxReconnectAttemptsReached);
                        return Err(PipelineError::TransientNetwork(format!(
                            "exhausted {MAX_RECONNECT_ATTEMPTS} reconnect attempts: {err}"
                        )));
                    }

                    let backoff = Self::backoff_for_attempt(attempt);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Register a close/error callback on a freshly established connection
    /// that flips `connected` to false, broadcasts `Disconnected`, and spawns
    /// a background task re-entering the backoff loop.
    fn install_close_watch(self: &Arc<Self>, conn: &Connection) {
        let manager = self.clone();
        conn.on_error(move |err| {
            if manager.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            if !manager.connected.swap(false, Ordering::SeqCst) {
                // Already handled by a previous callback invocation for this
                // same connection; nothing new to do.
                return;
            }
            let _ = manager.events.send(ConnectionEvent::Disconnected {
                reason: err.to_string(),
            });
            let manager = manager.clone();
            tokio::spawn(async move {
                if let Err(err) = manager.connect().await {
                    tracing::error!(error = %err, "background reconnect failed");
                }
            });
        });
    }

    /// Exponential backoff for the given 1-indexed attempt, capped at
    /// [`MAX_BACKOFF_MS`]: `min(1000 * 2^(attempt-1), 30_000)`.
    #[must_use]
    pub fn backoff_for_attempt(attempt: u32) -> Duration {
        let ms = 1000_u64
            .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)))
            .min(MAX_BACKOFF_MS);
        Duration::from_millis(ms)
    }

    /// Whether the manager currently believes it holds a live connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open a new channel on the current connection.
    ///
    /// # Errors
    /// Returns [`PipelineError::TransientNetwork`] if there is no live
    /// connection or the broker rejects the channel request.
    pub async fn channel(&self) -> Result<lapin::Channel, PipelineError> {
        let guard = self.connection.read().await;
        let conn = guard
            .as_ref()
            .ok_or_else(|| PipelineError::TransientNetwork("not connected".into()))?;
        Ok(conn.create_channel().await?)
    }

    /// Close the connection and mark the manager disconnected. No further
    /// automatic reconnect is attempted after this.
    pub async fn disconnect(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(conn) = self.connection.write().await.take() {
            let _ = conn.close(200, "shutdown").await;
        }
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Disconnected {
            reason: "shutdown requested".into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(ConnectionManager::backoff_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(ConnectionManager::backoff_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(ConnectionManager::backoff_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(ConnectionManager::backoff_for_attempt(6), Duration::from_millis(30_000));
        assert_eq!(ConnectionManager::backoff_for_attempt(20), Duration::from_millis(30_000));
    }

    #[test]
    fn fresh_manager_is_not_connected() {
        let manager = ConnectionManager::new("amqp://localhost");
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn subscribers_receive_lifecycle_events() {
        let manager = ConnectionManager::new("amqp://localhost");
        let mut rx = manager.subscribe();
        let _ = manager.events.send(ConnectionEvent::Blocked {
            reason: "memory alarm".into(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ConnectionEvent::Blocked { .. }));
    }
}
