//! Error types for command execution.

use pcex_protocol::{DecodeError, EncodeError, ErrorCode, PayloadError};
use pcex_transport::TransportError;

/// Errors produced while executing a command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("malformed payload: {0}")]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The remote host answered with `RESPONSE_ERROR`.
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("unexpected response command {0:#04x}")]
    UnexpectedResponse(u8),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
}

impl CommandError {
    /// Known error code of a remote error.
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Remote { code, .. } => ErrorCode::from_raw(*code),
            _ => None,
        }
    }
}
