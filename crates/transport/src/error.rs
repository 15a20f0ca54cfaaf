//! Error types for transport sessions.

use pcex_protocol::{DecodeError, WireError};

use crate::config::ConfigError;

/// Errors produced while establishing or using a transport session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no device found")]
    NoDeviceFound,

    #[error("authorization required")]
    AuthorizationRequired,

    #[error("no bulk IN/OUT endpoint pair on device")]
    EndpointNotFound,

    #[error("could not claim channel: {0}")]
    ChannelClaimFailed(String),

    #[error("invalid port {0} (expected 1..=65535)")]
    InvalidPort(u32),

    #[error("could not resolve endpoint {0}")]
    UnresolvedEndpoint(String),

    #[error("port {0} already in use")]
    PortInUse(u16),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("timed out")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<WireError> for TransportError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => Self::Timeout,
            WireError::Io(io) => Self::Io(io),
            WireError::Decode(d) => Self::Decode(d),
            WireError::PeerClosed => Self::PeerClosed,
        }
    }
}
