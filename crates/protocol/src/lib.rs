//! Wire protocol for PC Explorer remote file access.
//!
//! Every exchange between the handheld client and the remote host is a
//! single frame:
//!
//! ```text
//! MAGIC(4) "PCEX" | COMMAND(1) | FLAGS(1) | PAYLOAD_LEN(4, LE) | PAYLOAD | CRC32(4, LE)
//! ```
//!
//! The CRC-32 covers every byte that precedes it. Command-specific payloads
//! are encoded with the helpers in [`payload`]; frames are built and parsed
//! with [`Packet`], and streamed over async byte channels with [`wire`].

pub mod constants;
pub mod error;
pub mod packet;
pub mod payload;
pub mod wire;

pub use constants::{Command, ErrorCode, Flags};
pub use error::{DecodeError, EncodeError, PayloadError, WireError};
pub use packet::Packet;
pub use payload::{
    FileEntry, ReadRequest, RemoteError, RenameRequest, SearchRequest, StorageInfo, WriteHeader,
};
