//! Error types for frame and payload decoding.

/// A frame could not be parsed. Always fatal to the exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame too small: {0} bytes (minimum 14)")]
    TooSmall(usize),

    #[error("bad magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("truncated payload: declared {declared} bytes, {available} available")]
    TruncatedPayload { declared: usize, available: usize },

    #[error("checksum mismatch: frame carries {received:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { received: u32, computed: u32 },

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

/// A command payload did not match its expected shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload truncated reading {field}: need {needed} bytes, {remaining} left")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}

/// Errors produced while streaming frames over a byte channel.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("peer closed the stream")]
    PeerClosed,
}

/// A frame could not be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}
