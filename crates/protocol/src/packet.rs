//! Frame codec.
//!
//! Serialization is pure: no I/O, no state. A [`Packet`] is built right
//! before it is sent, parsed right after it is received, and never mutated.

use std::fmt;

use crate::constants::{
    CHECKSUM_SIZE, Command, FRAME_OVERHEAD, Flags, MAGIC, MAX_PAYLOAD_SIZE, PREFIX_SIZE,
};
use crate::error::{DecodeError, EncodeError};

/// One complete wire message.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    command: u8,
    flags: Flags,
    payload: Vec<u8>,
}

impl Packet {
    /// Builds a packet, rejecting payloads larger than [`MAX_PAYLOAD_SIZE`].
    pub fn new(
        command: impl Into<u8>,
        flags: Flags,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Self, EncodeError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(EncodeError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            command: command.into(),
            flags,
            payload,
        })
    }

    /// Empty-payload packet; cannot fail.
    pub fn bare(command: Command) -> Self {
        Self {
            command: command.into(),
            flags: Flags::NONE,
            payload: Vec::new(),
        }
    }

    /// Raw command byte.
    pub fn command_byte(&self) -> u8 {
        self.command
    }

    /// Known command, or `None` for bytes outside the command table.
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.command).ok()
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Size of this packet once serialized.
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Serializes to `magic | command | flags | len | payload | crc32`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&MAGIC);
        out.push(self.command);
        out.push(self.flags.bits());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        let checksum = crc32fast::hash(&out);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Parses the frame at the start of `bytes`.
    ///
    /// Bytes after the trailing checksum are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(DecodeError::TooSmall(bytes.len()));
        }

        let magic: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }

        let declared = payload_len(bytes);
        let body_end = PREFIX_SIZE + declared;
        if bytes.len() < body_end + CHECKSUM_SIZE {
            return Err(DecodeError::TruncatedPayload {
                declared,
                available: bytes.len() - FRAME_OVERHEAD,
            });
        }
        if declared > MAX_PAYLOAD_SIZE {
            return Err(DecodeError::PayloadTooLarge {
                size: declared,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let received = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        let computed = crc32fast::hash(&bytes[..body_end]);
        if received != computed {
            return Err(DecodeError::ChecksumMismatch { received, computed });
        }

        Ok(Self {
            command: bytes[4],
            flags: Flags::from_bits(bytes[5]),
            payload: bytes[PREFIX_SIZE..body_end].to_vec(),
        })
    }
}

/// Reads the little-endian payload length out of a frame prefix.
///
/// `prefix` must hold at least [`PREFIX_SIZE`] bytes.
pub(crate) fn payload_len(prefix: &[u8]) -> usize {
    u32::from_le_bytes([prefix[6], prefix[7], prefix[8], prefix[9]]) as usize
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Packet");
        match self.command() {
            Some(c) => d.field("command", &c),
            None => d.field("command", &format_args!("{:#04x}", self.command)),
        };
        d.field("flags", &self.flags)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
