//! Observable connection state.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// Identifying attributes of the remote endpoint. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub serial: Option<String>,
}

impl DeviceDescriptor {
    /// Descriptor for a socket peer, keyed by its address.
    pub fn for_socket(kind: &str, addr: std::net::SocketAddr) -> Self {
        Self {
            id: format!("{kind}:{addr}"),
            name: format!("{kind} {addr}"),
            ..Default::default()
        }
    }
}

/// State of the active session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected(DeviceDescriptor),
    /// The platform has not granted access to the device yet.
    AuthorizationRequired,
    Error {
        message: String,
        cause: Option<String>,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn error(message: impl Into<String>, cause: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            cause,
        }
    }
}

/// Single-writer cell holding the current [`ConnectionState`].
///
/// The selector creates one cell and hands it to whichever session is
/// active; only that session writes it. Observers subscribe for changes.
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    pub fn get(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        debug!(?state, "connection state");
        self.tx.send_replace(state);
    }
}
