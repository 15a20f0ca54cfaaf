//! Session selection and wire serialization.
//!
//! The protocol has no request ids, so two exchanges interleaved on one
//! stream corrupt each other's framing. The selector keeps the single active
//! session behind an async mutex; whoever holds the [`SessionGuard`] owns
//! the wire until the guard is dropped.

use std::sync::{Arc, RwLock};

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard, watch};
use tracing::info;

use crate::config::{ConfigStore, ConnectionConfig, ConnectionMode};
use crate::error::TransportError;
use crate::session::{Session, TransportSession};
use crate::state::{ConnectionState, StateCell};
use crate::usb::UsbHost;

/// Exclusive access to the active session.
pub type SessionGuard<'a> = MappedMutexGuard<'a, Session>;

/// Holds the configured mode and the one active session.
pub struct SessionSelector {
    store: Arc<dyn ConfigStore>,
    config: RwLock<ConnectionConfig>,
    usb_host: Option<Arc<dyn UsbHost>>,
    state: StateCell,
    active: Mutex<Option<Session>>,
}

impl SessionSelector {
    /// Loads the persisted configuration. No session is built until first use.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        usb_host: Option<Arc<dyn UsbHost>>,
    ) -> Result<Self, TransportError> {
        let config = store.load()?;
        info!(mode = ?config.mode, "session selector ready");
        Ok(Self {
            store,
            config: RwLock::new(config),
            usb_host,
            state: StateCell::new(),
            active: Mutex::new(None),
        })
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> ConnectionConfig {
        self.config.read().unwrap().clone()
    }

    /// Configured mode (may be `Auto`).
    pub fn mode(&self) -> ConnectionMode {
        self.config.read().unwrap().mode
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Observes state changes across mode switches.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Takes the wire, building the session for the configured mode if
    /// none exists yet.
    pub async fn lock(&self) -> Result<SessionGuard<'_>, TransportError> {
        let mut guard = self.active.lock().await;
        if guard.is_none() {
            let config = self.config();
            *guard = Some(self.build(&config)?);
        }
        MutexGuard::try_map(guard, Option::as_mut).map_err(|_| TransportError::NotConnected)
    }

    /// Switches transport variant.
    ///
    /// The current session is disconnected first, then the new mode is
    /// persisted and its session built. Waits for any in-flight exchange.
    pub async fn switch_mode(&self, mode: ConnectionMode) -> Result<(), TransportError> {
        let mut config = self.config();
        config.mode = mode;
        self.reconfigure(config).await
    }

    /// Replaces the whole configuration, with the same teardown order as
    /// [`switch_mode`](Self::switch_mode).
    pub async fn reconfigure(&self, config: ConnectionConfig) -> Result<(), TransportError> {
        let mut guard = self.active.lock().await;
        if let Some(mut old) = guard.take() {
            info!(from = ?old.mode(), to = ?config.mode, "switching connection mode");
            old.disconnect().await;
        }

        self.store.save(&config)?;
        *self.config.write().unwrap() = config.clone();
        *guard = Some(self.build(&config)?);
        Ok(())
    }

    fn build(&self, config: &ConnectionConfig) -> Result<Session, TransportError> {
        Session::from_config(config, self.state.clone(), self.usb_host.clone())
    }

    // Single-call delegation. Each call holds the wire only for itself;
    // request/response cycles should go through `lock`.

    pub async fn connect(&self) -> Result<(), TransportError> {
        self.lock().await?.connect().await
    }

    pub async fn disconnect(&self) {
        let mut guard = self.active.lock().await;
        if let Some(session) = guard.as_mut() {
            session.disconnect().await;
        }
    }

    pub async fn request_authorization(&self) -> Result<(), TransportError> {
        self.lock().await?.request_authorization().await
    }

    pub async fn has_authorization(&self) -> Result<bool, TransportError> {
        Ok(self.lock().await?.has_authorization())
    }

    pub async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.lock().await?.send(frame).await
    }

    pub async fn receive(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        self.lock().await?.receive(max_len).await
    }
}
