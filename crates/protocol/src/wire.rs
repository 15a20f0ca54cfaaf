//! Streaming frames over async byte channels.
//!
//! Stream transports (TCP) use these helpers directly. Message-oriented
//! transports (USB bulk) read whole frames and go through
//! [`Packet::decode`] instead.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{CHECKSUM_SIZE, FRAME_OVERHEAD, MAGIC, MAX_FRAME_SIZE, PREFIX_SIZE};
use crate::error::{DecodeError, WireError};
use crate::packet::{Packet, payload_len};

/// Reads exactly one frame from `reader` and decodes it.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet, WireError> {
    let frame = read_frame_bytes(reader, MAX_FRAME_SIZE).await?;
    Ok(Packet::decode(&frame)?)
}

/// Reads the raw bytes of exactly one frame without verifying the checksum.
///
/// The fixed prefix is read first and validated, so a bad magic or a length
/// that would push the frame past `max_frame` is rejected without buffering
/// the rest. Then exactly `payload + 4` more bytes are read.
pub async fn read_frame_bytes<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame: usize,
) -> Result<Vec<u8>, WireError> {
    let mut frame = vec![0u8; PREFIX_SIZE];
    read_exact_or_closed(reader, &mut frame).await?;

    let magic: [u8; 4] = [frame[0], frame[1], frame[2], frame[3]];
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic).into());
    }

    let declared = payload_len(&frame);
    let max = max_frame.min(MAX_FRAME_SIZE).saturating_sub(FRAME_OVERHEAD);
    if declared > max {
        return Err(DecodeError::PayloadTooLarge {
            size: declared,
            max,
        }
        .into());
    }

    frame.resize(PREFIX_SIZE + declared + CHECKSUM_SIZE, 0);
    read_exact_or_closed(reader, &mut frame[PREFIX_SIZE..]).await?;
    Ok(frame)
}

/// Writes one frame and flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), WireError> {
    writer.write_all(&packet.encode()).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_exact_or_closed<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), WireError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(WireError::PeerClosed),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{Command, Flags};

    #[tokio::test]
    async fn frame_roundtrip() {
        let packet = Packet::new(Command::ListDir, Flags::NONE, b"\x03\x00\x00\x00C:\\".to_vec())
            .unwrap();

        let mut buf = Vec::new();
        write_frame(&mut buf, &packet).await.unwrap();
        assert_eq!(buf.len(), packet.encoded_len());

        let mut cursor = &buf[..];
        let parsed = read_frame(&mut cursor).await.unwrap();
        assert_eq!(parsed, packet);
    }

    #[tokio::test]
    async fn back_to_back_frames() {
        let mut buf = Vec::new();
        for i in 0..3u8 {
            let p = Packet::new(Command::ResponseFileChunk, Flags::CONTINUATION, vec![i; 10])
                .unwrap();
            write_frame(&mut buf, &p).await.unwrap();
        }
        write_frame(&mut buf, &Packet::bare(Command::ResponseEnd))
            .await
            .unwrap();

        let mut cursor = &buf[..];
        for i in 0..3u8 {
            let p = read_frame(&mut cursor).await.unwrap();
            assert_eq!(p.payload(), &[i; 10]);
        }
        let end = read_frame(&mut cursor).await.unwrap();
        assert_eq!(end.command(), Some(Command::ResponseEnd));
    }

    #[tokio::test]
    async fn empty_stream_is_peer_closed() {
        let mut cursor: &[u8] = &[];
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(WireError::PeerClosed)
        ));
    }

    #[tokio::test]
    async fn stream_cut_mid_payload_is_peer_closed() {
        let bytes = Packet::new(Command::Handshake, Flags::NONE, b"hello".to_vec())
            .unwrap()
            .encode();
        let mut cursor = &bytes[..bytes.len() - 2];
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(WireError::PeerClosed)
        ));
    }

    #[tokio::test]
    async fn bad_magic_rejected_from_prefix() {
        let mut cursor: &[u8] = b"HTTP/1.1 200 OK\r\n";
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(WireError::Decode(DecodeError::BadMagic(_)))
        ));
    }

    #[tokio::test]
    async fn oversized_length_rejected_without_reading_body() {
        let mut prefix = Vec::from(MAGIC);
        prefix.extend_from_slice(&[0x82, 0x00]);
        prefix.extend_from_slice(&u32::MAX.to_le_bytes());
        let mut cursor = &prefix[..];
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(WireError::Decode(DecodeError::PayloadTooLarge { .. }))
        ));
    }

    #[tokio::test]
    async fn caller_limit_applies_before_payload_read() {
        let bytes = Packet::new(Command::ResponseData, Flags::NONE, vec![7u8; 100])
            .unwrap()
            .encode();
        let mut cursor = &bytes[..];
        assert!(matches!(
            read_frame_bytes(&mut cursor, 64).await,
            Err(WireError::Decode(DecodeError::PayloadTooLarge { size: 100, max: 50 }))
        ));

        let mut cursor = &bytes[..];
        let raw = read_frame_bytes(&mut cursor, bytes.len()).await.unwrap();
        assert_eq!(raw, bytes);
    }

    #[tokio::test]
    async fn corrupted_checksum_surfaces_as_decode_error() {
        let mut bytes = Packet::bare(Command::ResponseOk).encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mut cursor = &bytes[..];
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(WireError::Decode(DecodeError::ChecksumMismatch { .. }))
        ));
    }
}
