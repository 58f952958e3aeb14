//! Length-delimited framing
//!
//! Each frame is an unsigned LEB128 varint holding the payload length,
//! followed by the bincode-encoded message. Use [`DelimitedCodec`] with
//! `FramedRead`/`FramedWrite` for streams that carry nothing but frames, and
//! [`read_frame`] / [`write_frame`] for streams where raw bytes follow a frame:
//! `read_frame` never consumes bytes past the end of the frame.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Maximum payload size of a single frame (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A u64 varint never needs more than 10 bytes
const MAX_VARINT_LEN: usize = 10;

/// Append `value` as a varint
pub fn encode_varint(mut value: u64, dst: &mut BytesMut) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Decode a varint from the start of `src`
///
/// Returns the value and the number of bytes it occupied, or `None` if
/// `src` ends before the varint does.
pub fn decode_varint(src: &[u8]) -> Result<Option<(u64, usize)>, ProtocolError> {
    let mut value = 0u64;
    for (i, byte) in src.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(ProtocolError::InvalidLengthPrefix);
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if src.len() >= MAX_VARINT_LEN {
        return Err(ProtocolError::InvalidLengthPrefix);
    }
    Ok(None)
}

fn check_size(size: u64) -> Result<usize, ProtocolError> {
    let size = usize::try_from(size).map_err(|_| ProtocolError::InvalidLengthPrefix)?;
    if size > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(size)
}

/// Encode `message` as a complete frame
pub fn encode_frame<T: Serialize>(message: &T, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = bincode::serialize(message)?;
    check_size(payload.len() as u64)?;
    dst.reserve(MAX_VARINT_LEN + payload.len());
    encode_varint(payload.len() as u64, dst);
    dst.extend_from_slice(&payload);
    Ok(())
}

/// Codec for a stream of frames all carrying `T`
#[derive(Debug)]
pub struct DelimitedCodec<T> {
    _message: PhantomData<fn() -> T>,
}

impl<T> DelimitedCodec<T> {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            _message: PhantomData,
        }
    }
}

impl<T> Default for DelimitedCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for DelimitedCodec<T> {
    type Item = T;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (payload_len, prefix_len) = match decode_varint(src)? {
            Some(prefix) => prefix,
            None => return Ok(None),
        };
        let payload_len = check_size(payload_len)?;

        if src.len() < prefix_len + payload_len {
            src.reserve(prefix_len + payload_len - src.len());
            return Ok(None);
        }

        src.advance(prefix_len);
        let payload = src.split_to(payload_len);
        Ok(Some(bincode::deserialize(&payload)?))
    }
}

impl<T: Serialize> Encoder<T> for DelimitedCodec<T> {
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst)
    }
}

/// Read exactly one frame from `reader`
pub async fn read_frame<T, R>(reader: &mut R) -> Result<T, ProtocolError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut value = 0u64;
    let mut shift = 0;
    loop {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::UnexpectedEof)
            }
            Err(e) => return Err(e.into()),
        };
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 7 * MAX_VARINT_LEN as u32 {
            return Err(ProtocolError::InvalidLengthPrefix);
        }
    }

    let mut payload = vec![0u8; check_size(value)?];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::UnexpectedEof)
        }
        Err(e) => return Err(e.into()),
    }

    let message = bincode::deserialize(&payload)?;
    tracing::trace!("Read frame of {} bytes", payload.len());
    Ok(message)
}

/// Write one frame to `writer`
pub async fn write_frame<T, W>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    encode_frame(message, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Command, Heartbeat, Ret};

    #[test]
    fn test_varint_boundaries() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u64::MAX] {
            let mut buf = BytesMut::new();
            encode_varint(value, &mut buf);
            let (decoded, len) = decode_varint(&buf).unwrap().unwrap();
            assert_eq!(decoded, value);
            assert_eq!(len, buf.len());
        }
    }

    #[test]
    fn test_varint_incomplete() {
        assert!(decode_varint(&[0x80, 0x80]).unwrap().is_none());
        assert!(decode_varint(&[]).unwrap().is_none());
    }

    #[test]
    fn test_varint_too_long() {
        let bytes = [0xFFu8; 11];
        assert!(matches!(
            decode_varint(&bytes),
            Err(ProtocolError::InvalidLengthPrefix)
        ));
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = DelimitedCodec::<Ret>::new();

        let mut full_buf = BytesMut::new();
        codec
            .encode(Ret::from_code(crate::ErrorCode::BadParam, "x"), &mut full_buf)
            .unwrap();

        let mut partial = full_buf.split_to(3);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.code(), crate::ErrorCode::BadParam);
        assert!(partial.is_empty());
    }

    #[test]
    fn test_codec_multiple_frames_in_buffer() {
        let mut codec = DelimitedCodec::<Heartbeat>::new();
        let mut buf = BytesMut::new();
        for ts in [1, 2] {
            let beat = Heartbeat {
                local_timestamp: ts,
                ..Default::default()
            };
            codec.encode(beat, &mut buf).unwrap();
        }

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().local_timestamp, 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().local_timestamp, 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_codec_rejects_oversized_frame() {
        let mut codec = DelimitedCodec::<Ret>::new();
        let mut buf = BytesMut::new();
        encode_varint((MAX_FRAME_SIZE + 1) as u64, &mut buf);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_leaves_trailing_bytes() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, &Ret::ok()).await.unwrap();
        client.write_all(b"raw payload").await.unwrap();
        drop(client);

        let ret: Ret = read_frame(&mut server).await.unwrap();
        assert!(ret.is_ok());

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"raw payload");
    }

    #[tokio::test]
    async fn test_read_frame_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let result: Result<Command, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(ProtocolError::UnexpectedEof)));
    }
}
