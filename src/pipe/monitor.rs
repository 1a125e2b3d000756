//! Connection monitor
//!
//! One monitor task per session. It turns the two one-shot signals raised
//! by the session (pipes opened, read side gone) into state changes, log
//! lines and user callbacks, each exactly once. A new `connect` spawns a
//! new monitor; a finished one is never re-armed.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};

/// User callback for connection transitions
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Connection state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
struct Handlers {
    on_connected: Option<Callback>,
    on_disconnected: Option<Callback>,
}

/// Registered callbacks, shared by the client and its monitors
///
/// Handlers are looked up when the transition fires, so a handler
/// registered after `connect` still sees the disconnect.
#[derive(Clone, Default)]
pub(crate) struct CallbackRegistry {
    handlers: Arc<Mutex<Handlers>>,
}

impl CallbackRegistry {
    pub fn set_connected(&self, callback: Callback) {
        self.lock().on_connected = Some(callback);
    }

    pub fn set_disconnected(&self, callback: Callback) {
        self.lock().on_disconnected = Some(callback);
    }

    fn connected(&self) -> Option<Callback> {
        self.lock().on_connected.clone()
    }

    fn disconnected(&self) -> Option<Callback> {
        self.lock().on_disconnected.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Session side of a running monitor
pub(crate) struct MonitorHandle {
    connected_tx: oneshot::Sender<()>,
    ack_rx: oneshot::Receiver<()>,
    /// Raised by the read loop when the session ends
    disconnected_tx: oneshot::Sender<()>,
}

impl MonitorHandle {
    /// Report that both pipes are open; returns once `on_connected` has run
    pub async fn connected(self) -> oneshot::Sender<()> {
        let _ = self.connected_tx.send(());
        if self.ack_rx.await.is_err() {
            tracing::warn!("Connection monitor stopped before acknowledging connect");
        }
        self.disconnected_tx
    }
}

/// Spawn the monitor task for a new session
pub(crate) fn spawn(
    state: Arc<watch::Sender<ConnectionState>>,
    callbacks: CallbackRegistry,
) -> MonitorHandle {
    let (connected_tx, connected_rx) = oneshot::channel();
    let (disconnected_tx, disconnected_rx) = oneshot::channel();
    let (ack_tx, ack_rx) = oneshot::channel();

    tokio::spawn(async move {
        if connected_rx.await.is_err() {
            return;
        }
        state.send_replace(ConnectionState::Connected);
        tracing::info!("Pipe connected!");
        if let Some(callback) = callbacks.connected() {
            callback();
        }
        let _ = ack_tx.send(());

        // The read loop flips the state itself; a dropped sender means it is gone too
        let _ = disconnected_rx.await;
        tracing::info!("Pipe disconnected!");
        if let Some(callback) = callbacks.disconnected() {
            callback();
        }
    });

    MonitorHandle {
        connected_tx,
        ack_rx,
        disconnected_tx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_monitor_fires_each_transition_once() {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state_tx);
        let callbacks = CallbackRegistry::default();

        let up = Arc::new(AtomicUsize::new(0));
        let down = Arc::new(AtomicUsize::new(0));
        let up_count = up.clone();
        let down_count = down.clone();
        callbacks.set_connected(Arc::new(move || {
            up_count.fetch_add(1, Ordering::SeqCst);
        }));
        callbacks.set_disconnected(Arc::new(move || {
            down_count.fetch_add(1, Ordering::SeqCst);
        }));

        let handle = spawn(state.clone(), callbacks);
        let disconnected_tx = handle.connected().await;
        assert_eq!(*state.borrow(), ConnectionState::Connected);
        assert_eq!(up.load(Ordering::SeqCst), 1);
        assert_eq!(down.load(Ordering::SeqCst), 0);

        disconnected_tx.send(()).unwrap();
        for _ in 0..100 {
            if down.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(up.load(Ordering::SeqCst), 1);
        assert_eq!(down.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }
}
