//! The transport session contract and its closed set of variants.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::{ConnectionConfig, ConnectionMode};
use crate::error::TransportError;
use crate::state::StateCell;
use crate::tcp::{TunnelClient, TunnelServer, WifiClient};
use crate::usb::{DirectHost, UsbHost};
use crate::{DEFAULT_PORT, LOOPBACK_HOST};

/// Boxed future returned by [`TransportSession`] methods.
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Which side speaks first in the protocol handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    /// Sends `HANDSHAKE` and waits for the acknowledgment.
    Initiator,
    /// Waits for the peer's `HANDSHAKE`, then acknowledges it.
    Responder,
}

/// Byte channel carrying whole protocol frames.
///
/// No method is reentrant: callers serialize access, which the
/// [`SessionSelector`](crate::SessionSelector) does for them.
pub trait TransportSession: Send {
    /// Establishes the channel.
    fn connect(&mut self) -> SessionFuture<'_, ()>;

    /// Sends a best-effort `DISCONNECT`, then tears the channel down.
    /// Never fails; problems are logged.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Asks the platform to grant access to the peer.
    fn request_authorization(&mut self) -> SessionFuture<'_, ()>;

    /// Whether access to the peer has been granted.
    fn has_authorization(&self) -> bool;

    /// Sends one serialized frame.
    fn send<'a>(&'a mut self, frame: &'a [u8]) -> SessionFuture<'a, ()>;

    /// Receives the bytes of one frame, at most `max_len` long.
    fn receive(&mut self, max_len: usize) -> SessionFuture<'_, Vec<u8>>;

    /// Handshake direction for this variant.
    fn role(&self) -> HandshakeRole;

    /// Drops the channel without a goodbye and records the failure.
    fn abort(&mut self, message: &str, cause: Option<String>);

    /// State cell written by this session.
    fn state(&self) -> &StateCell;
}

/// The four transport variants.
pub enum Session {
    DirectHost(DirectHost),
    TunnelClient(TunnelClient),
    TunnelServer(TunnelServer),
    WifiClient(WifiClient),
}

impl Session {
    /// Builds the variant selected by `config.mode`.
    ///
    /// `Auto` yields a tunnel client on the default loopback endpoint.
    pub fn from_config(
        config: &ConnectionConfig,
        state: StateCell,
        usb_host: Option<Arc<dyn UsbHost>>,
    ) -> Result<Self, TransportError> {
        let t = config.timeouts;
        Ok(match config.mode.resolve() {
            ConnectionMode::DirectHost => {
                let host = usb_host.ok_or(TransportError::NoDeviceFound)?;
                Session::DirectHost(DirectHost::new(host, state, t.usb()))
            }
            ConnectionMode::TunnelClient | ConnectionMode::Auto => {
                let (host, port) = if config.mode == ConnectionMode::Auto {
                    (LOOPBACK_HOST, u32::from(DEFAULT_PORT))
                } else {
                    (config.tunnel_host.as_str(), config.tunnel_port)
                };
                Session::TunnelClient(TunnelClient::new(host, port, state, t))
            }
            ConnectionMode::TunnelServer => {
                Session::TunnelServer(TunnelServer::new(config.server_port, state, t))
            }
            ConnectionMode::WifiClient => Session::WifiClient(WifiClient::new(
                &config.wifi_host,
                config.wifi_port,
                state,
                t,
            )),
        })
    }

    /// Mode this session was built for (never `Auto`).
    pub fn mode(&self) -> ConnectionMode {
        match self {
            Session::DirectHost(_) => ConnectionMode::DirectHost,
            Session::TunnelClient(_) => ConnectionMode::TunnelClient,
            Session::TunnelServer(_) => ConnectionMode::TunnelServer,
            Session::WifiClient(_) => ConnectionMode::WifiClient,
        }
    }

    fn inner(&self) -> &dyn TransportSession {
        match self {
            Session::DirectHost(s) => s,
            Session::TunnelClient(s) => s,
            Session::TunnelServer(s) => s,
            Session::WifiClient(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn TransportSession {
        match self {
            Session::DirectHost(s) => s,
            Session::TunnelClient(s) => s,
            Session::TunnelServer(s) => s,
            Session::WifiClient(s) => s,
        }
    }
}

impl TransportSession for Session {
    fn connect(&mut self) -> SessionFuture<'_, ()> {
        self.inner_mut().connect()
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.inner_mut().disconnect()
    }

    fn request_authorization(&mut self) -> SessionFuture<'_, ()> {
        self.inner_mut().request_authorization()
    }

    fn has_authorization(&self) -> bool {
        self.inner().has_authorization()
    }

    fn send<'a>(&'a mut self, frame: &'a [u8]) -> SessionFuture<'a, ()> {
        self.inner_mut().send(frame)
    }

    fn receive(&mut self, max_len: usize) -> SessionFuture<'_, Vec<u8>> {
        self.inner_mut().receive(max_len)
    }

    fn role(&self) -> HandshakeRole {
        self.inner().role()
    }

    fn abort(&mut self, message: &str, cause: Option<String>) {
        self.inner_mut().abort(message, cause)
    }

    fn state(&self) -> &StateCell {
        self.inner().state()
    }
}
