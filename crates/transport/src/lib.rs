//! Transport sessions for PC Explorer.
//!
//! A [`Session`] carries framed protocol traffic over one of four channels:
//! a directly attached USB peer, a client socket into a port-forward tunnel,
//! a listening socket on the far end of a reverse tunnel, or a plain Wi-Fi
//! socket. The [`SessionSelector`] owns the single active session and
//! serializes every exchange on it.

pub mod config;
pub mod error;
pub mod selector;
pub mod session;
pub mod state;
pub mod tcp;
pub mod usb;

pub use config::{
    ConfigError, ConfigStore, ConnectionConfig, ConnectionMode, JsonConfigStore, MemoryConfigStore,
    SessionTimeouts,
};
pub use error::TransportError;
pub use selector::{SessionGuard, SessionSelector};
pub use session::{HandshakeRole, Session, SessionFuture, TransportSession};
pub use state::{ConnectionState, DeviceDescriptor, StateCell};
pub use tcp::{TunnelClient, TunnelServer, WifiClient};
pub use usb::{DirectHost, UsbConnection, UsbHost};

/// Port used by the tunnel and Wi-Fi variants unless configured otherwise.
pub const DEFAULT_PORT: u16 = 5555;

/// Literal loopback address every tunnel endpoint resolves to.
pub const LOOPBACK_HOST: &str = "127.0.0.1";
