//! Command payload shapes.
//!
//! All integers are little-endian. Variable-length fields (strings, lists)
//! carry a 4-byte count prefix.
//!
//! ```text
//! path          = str
//! rename        = str(path) str(new_name)
//! search        = str(query) str(path)
//! file entry    = str(name) str(path) u8(is_dir) u64(size) u64(mtime_ms)
//! file list     = u32(count) entry*
//! storage info  = u64(total) u64(free) str(drive) str(volume)
//! drive list    = u32(count) str*
//! write header  = str(path) u64(total_size) u32(chunk_size)
//! read request  = str(path) u64(offset) i64(length, -1 = all)
//! error         = i32(code) str(message)
//! ```

use serde::{Deserialize, Serialize};

use crate::constants::ErrorCode;
use crate::error::PayloadError;

// ---------------------------------------------------------------------------
// Primitive writer / reader
// ---------------------------------------------------------------------------

/// Append-only payload builder.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.buf.push(v);
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i64(mut self, v: i64) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Length-prefixed UTF-8 string.
    pub fn str(self, s: &str) -> Self {
        self.bytes(s.as_bytes())
    }

    /// Length-prefixed raw bytes.
    pub fn bytes(mut self, b: &[u8]) -> Self {
        self.buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(b);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], PayloadError> {
        if self.remaining() < n {
            return Err(PayloadError::Truncated {
                field,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], PayloadError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, PayloadError> {
        Ok(self.take(1, field)?[0])
    }

    pub fn u32(&mut self, field: &'static str) -> Result<u32, PayloadError> {
        self.array(field).map(u32::from_le_bytes)
    }

    pub fn i32(&mut self, field: &'static str) -> Result<i32, PayloadError> {
        self.array(field).map(i32::from_le_bytes)
    }

    pub fn u64(&mut self, field: &'static str) -> Result<u64, PayloadError> {
        self.array(field).map(u64::from_le_bytes)
    }

    pub fn i64(&mut self, field: &'static str) -> Result<i64, PayloadError> {
        self.array(field).map(i64::from_le_bytes)
    }

    pub fn str(&mut self, field: &'static str) -> Result<String, PayloadError> {
        let len = self.u32(field)? as usize;
        let raw = self.take(len, field)?;
        String::from_utf8(raw.to_vec()).map_err(|_| PayloadError::InvalidUtf8(field))
    }

    /// Reads a 4-byte element count, bounded by what the rest of the payload
    /// could possibly hold given `min_element_size`.
    pub fn count(
        &mut self,
        field: &'static str,
        min_element_size: usize,
    ) -> Result<usize, PayloadError> {
        let count = self.u32(field)? as usize;
        if count.saturating_mul(min_element_size) > self.remaining() {
            return Err(PayloadError::Truncated {
                field,
                needed: count.saturating_mul(min_element_size),
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Path
// ---------------------------------------------------------------------------

pub fn encode_path(path: &str) -> Vec<u8> {
    PayloadWriter::new().str(path).finish()
}

pub fn decode_path(data: &[u8]) -> Result<String, PayloadError> {
    PayloadReader::new(data).str("path")
}

// ---------------------------------------------------------------------------
// Rename / search
// ---------------------------------------------------------------------------

/// Renames `path` to `new_name` within the same parent directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRequest {
    pub path: String,
    pub new_name: String,
}

impl RenameRequest {
    pub fn encode(&self) -> Vec<u8> {
        PayloadWriter::new()
            .str(&self.path)
            .str(&self.new_name)
            .finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(data);
        Ok(Self {
            path: r.str("path")?,
            new_name: r.str("new_name")?,
        })
    }
}

/// Case-insensitive name search under `path` (empty = first drive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub path: String,
}

impl SearchRequest {
    pub fn encode(&self) -> Vec<u8> {
        PayloadWriter::new()
            .str(&self.query)
            .str(&self.path)
            .finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(data);
        Ok(Self {
            query: r.str("query")?,
            path: r.str("path")?,
        })
    }
}

// ---------------------------------------------------------------------------
// File entries
// ---------------------------------------------------------------------------

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    /// Size in bytes; always 0 for directories.
    pub size: u64,
    /// Modification time, milliseconds since the Unix epoch.
    pub last_modified: u64,
}

/// Smallest encoded entry: two empty strings + flag + two u64s.
const MIN_ENTRY_SIZE: usize = 4 + 4 + 1 + 8 + 8;

impl FileEntry {
    pub fn encode(&self) -> Vec<u8> {
        self.write(PayloadWriter::new()).finish()
    }

    fn write(&self, w: PayloadWriter) -> PayloadWriter {
        w.str(&self.name)
            .str(&self.path)
            .u8(if self.is_dir { 0x01 } else { 0x00 })
            .u64(self.size)
            .u64(self.last_modified)
    }

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        Self::read(&mut PayloadReader::new(data))
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            name: r.str("entry.name")?,
            path: r.str("entry.path")?,
            is_dir: r.u8("entry.is_dir")? & 0x01 != 0,
            size: r.u64("entry.size")?,
            last_modified: r.u64("entry.last_modified")?,
        })
    }

    pub fn encode_list(entries: &[FileEntry]) -> Vec<u8> {
        let mut w = PayloadWriter::new().u32(entries.len() as u32);
        for entry in entries {
            w = entry.write(w);
        }
        w.finish()
    }

    pub fn decode_list(data: &[u8]) -> Result<Vec<Self>, PayloadError> {
        let mut r = PayloadReader::new(data);
        let count = r.count("file_list.count", MIN_ENTRY_SIZE)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(Self::read(&mut r)?);
        }
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Storage / drives
// ---------------------------------------------------------------------------

/// Capacity of the volume holding a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub total_space: u64,
    pub free_space: u64,
    pub drive_letter: String,
    pub volume_name: String,
}

impl StorageInfo {
    pub fn encode(&self) -> Vec<u8> {
        PayloadWriter::new()
            .u64(self.total_space)
            .u64(self.free_space)
            .str(&self.drive_letter)
            .str(&self.volume_name)
            .finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(data);
        Ok(Self {
            total_space: r.u64("total_space")?,
            free_space: r.u64("free_space")?,
            drive_letter: r.str("drive_letter")?,
            volume_name: r.str("volume_name")?,
        })
    }

    pub fn used_space(&self) -> u64 {
        self.total_space.saturating_sub(self.free_space)
    }
}

pub fn encode_drive_list(drives: &[String]) -> Vec<u8> {
    let mut w = PayloadWriter::new().u32(drives.len() as u32);
    for drive in drives {
        w = w.str(drive);
    }
    w.finish()
}

pub fn decode_drive_list(data: &[u8]) -> Result<Vec<String>, PayloadError> {
    let mut r = PayloadReader::new(data);
    let count = r.count("drive_list.count", 4)?;
    (0..count).map(|_| r.str("drive")).collect()
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// Opens an upload: the remote host acknowledges, then expects chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteHeader {
    pub path: String,
    pub total_size: u64,
    pub chunk_size: u32,
}

impl WriteHeader {
    pub fn encode(&self) -> Vec<u8> {
        PayloadWriter::new()
            .str(&self.path)
            .u64(self.total_size)
            .u32(self.chunk_size)
            .finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(data);
        Ok(Self {
            path: r.str("path")?,
            total_size: r.u64("total_size")?,
            chunk_size: r.u32("chunk_size")?,
        })
    }
}

/// Requests a byte range; the remote host answers with a chunk stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub path: String,
    pub offset: u64,
    /// Byte count, or [`READ_ALL`](crate::constants::READ_ALL).
    pub length: i64,
}

impl ReadRequest {
    pub fn whole_file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            length: crate::constants::READ_ALL,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        PayloadWriter::new()
            .str(&self.path)
            .u64(self.offset)
            .i64(self.length)
            .finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(data);
        Ok(Self {
            path: r.str("path")?,
            offset: r.u64("offset")?,
            length: r.i64("length")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of a `RESPONSE_ERROR` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
        }
    }

    /// Known error code, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_raw(self.code)
    }

    pub fn encode(&self) -> Vec<u8> {
        PayloadWriter::new()
            .i32(self.code)
            .str(&self.message)
            .finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(data);
        Ok(Self {
            code: r.i32("error.code")?,
            message: r.str("error.message")?,
        })
    }
}
