//! Protocol constants: magic, sizes, command codes, flags and error codes.

use std::fmt;
use std::time::Duration;

/// Marker at the start of every frame.
pub const MAGIC: [u8; 4] = *b"PCEX";

/// Bytes before the payload: magic + command + flags + payload length.
pub const PREFIX_SIZE: usize = 10;

/// Trailing CRC-32.
pub const CHECKSUM_SIZE: usize = 4;

/// Fixed per-frame overhead (prefix + checksum).
pub const FRAME_OVERHEAD: usize = PREFIX_SIZE + CHECKSUM_SIZE;

/// Largest serialized frame.
pub const MAX_FRAME_SIZE: usize = 65_535;

/// Largest payload that fits in a frame.
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - FRAME_OVERHEAD;

/// Default timeout the remote host applies to bulk USB transfers.
pub const USB_TIMEOUT: Duration = Duration::from_millis(5000);

/// Identity string the client presents in its handshake.
pub const CLIENT_IDENTITY: &str = "PCEX-Android-1.0";

/// Length value in a read request meaning "until end of file".
pub const READ_ALL: i64 = -1;

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Command byte of a frame.
///
/// Requests live in `0x01..=0x0B` plus `DISCONNECT = 0xFF`; responses
/// occupy `0x80..=0x84`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Handshake = 0x01,
    ListDir = 0x02,
    GetFileInfo = 0x03,
    ReadFile = 0x04,
    WriteFile = 0x05,
    CreateDir = 0x06,
    Delete = 0x07,
    Rename = 0x08,
    Search = 0x09,
    GetDrives = 0x0A,
    GetStorageInfo = 0x0B,
    Disconnect = 0xFF,

    ResponseOk = 0x80,
    ResponseError = 0x81,
    ResponseData = 0x82,
    ResponseFileChunk = 0x83,
    ResponseEnd = 0x84,
}

impl Command {
    /// Returns `true` for the response kinds (`0x80..=0x84`).
    pub fn is_response(self) -> bool {
        (self as u8) & 0x80 != 0 && self != Command::Disconnect
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Command::Handshake,
            0x02 => Command::ListDir,
            0x03 => Command::GetFileInfo,
            0x04 => Command::ReadFile,
            0x05 => Command::WriteFile,
            0x06 => Command::CreateDir,
            0x07 => Command::Delete,
            0x08 => Command::Rename,
            0x09 => Command::Search,
            0x0A => Command::GetDrives,
            0x0B => Command::GetStorageInfo,
            0xFF => Command::Disconnect,
            0x80 => Command::ResponseOk,
            0x81 => Command::ResponseError,
            0x82 => Command::ResponseData,
            0x83 => Command::ResponseFileChunk,
            0x84 => Command::ResponseEnd,
            other => return Err(other),
        })
    }
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Handshake => "HANDSHAKE",
            Command::ListDir => "LIST_DIR",
            Command::GetFileInfo => "GET_FILE_INFO",
            Command::ReadFile => "READ_FILE",
            Command::WriteFile => "WRITE_FILE",
            Command::CreateDir => "CREATE_DIR",
            Command::Delete => "DELETE",
            Command::Rename => "RENAME",
            Command::Search => "SEARCH",
            Command::GetDrives => "GET_DRIVES",
            Command::GetStorageInfo => "GET_STORAGE_INFO",
            Command::Disconnect => "DISCONNECT",
            Command::ResponseOk => "RESPONSE_OK",
            Command::ResponseError => "RESPONSE_ERROR",
            Command::ResponseData => "RESPONSE_DATA",
            Command::ResponseFileChunk => "RESPONSE_FILE_CHUNK",
            Command::ResponseEnd => "RESPONSE_END",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Independent flag bits carried in the frame header.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0x00);
    pub const COMPRESSED: Flags = Flags(0x01);
    pub const ENCRYPTED: Flags = Flags(0x02);
    pub const CONTINUATION: Flags = Flags(0x04);
    pub const FINAL: Flags = Flags(0x08);

    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        self.union(rhs)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("Flags(NONE)");
        }
        let names = [
            (Flags::COMPRESSED, "COMPRESSED"),
            (Flags::ENCRYPTED, "ENCRYPTED"),
            (Flags::CONTINUATION, "CONTINUATION"),
            (Flags::FINAL, "FINAL"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        let unknown = self.0 & !0x0F;
        if unknown != 0 {
            write!(f, "Flags({} | {unknown:#04x})", set.join(" | "))
        } else {
            write!(f, "Flags({})", set.join(" | "))
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Error codes carried by `RESPONSE_ERROR` payloads.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success = 0,
    UnknownCommand = 1,
    InvalidPath = 2,
    FileNotFound = 3,
    PermissionDenied = 4,
    AlreadyExists = 5,
    NotEmpty = 6,
    NoSpace = 7,
    IoError = 8,
    Timeout = 9,
    ProtocolError = 10,
}

impl ErrorCode {
    /// Maps a raw wire value, returning `None` for codes this client does not know.
    pub fn from_raw(code: i32) -> Option<Self> {
        Some(match code {
            0 => ErrorCode::Success,
            1 => ErrorCode::UnknownCommand,
            2 => ErrorCode::InvalidPath,
            3 => ErrorCode::FileNotFound,
            4 => ErrorCode::PermissionDenied,
            5 => ErrorCode::AlreadyExists,
            6 => ErrorCode::NotEmpty,
            7 => ErrorCode::NoSpace,
            8 => ErrorCode::IoError,
            9 => ErrorCode::Timeout,
            10 => ErrorCode::ProtocolError,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Success => "success",
            ErrorCode::UnknownCommand => "unknown command",
            ErrorCode::InvalidPath => "invalid path",
            ErrorCode::FileNotFound => "file not found",
            ErrorCode::PermissionDenied => "permission denied",
            ErrorCode::AlreadyExists => "already exists",
            ErrorCode::NotEmpty => "directory not empty",
            ErrorCode::NoSpace => "no space left",
            ErrorCode::IoError => "I/O error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::ProtocolError => "protocol error",
        };
        f.write_str(s)
    }
}
