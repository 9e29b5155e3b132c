//! Framing and serialization.
//!
//! Frame shape: an 8-byte little-endian length prefix followed by that
//! many bytes of postcard-encoded payload. A length of zero carries no
//! body and is the graceful-shutdown terminator, never a real envelope.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::envelope::Envelope;
use crate::error::{DecodeError, EncodeError, TransportError};

/// Encodes and decodes the envelope carried in each frame. A single
/// implementation (postcard) is used; unlike payload bytes handed to
/// method/tool handlers, the envelope itself has one fixed wire shape.
pub trait WireCodec {
    fn encode_envelope(env: &Envelope) -> Result<Vec<u8>, EncodeError>;
    fn decode_envelope(bytes: &[u8]) -> Result<Envelope, DecodeError>;
}

pub struct PostcardCodec;

impl WireCodec for PostcardCodec {
    fn encode_envelope(env: &Envelope) -> Result<Vec<u8>, EncodeError> {
        Ok(postcard::to_allocvec(env)?)
    }

    fn decode_envelope(bytes: &[u8]) -> Result<Envelope, DecodeError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Encodes an inner payload (a `CustomRequest`, `StreamData`, ...) that
/// travels as opaque bytes inside a request/response/signal envelope.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    Ok(postcard::to_allocvec(value)?)
}

/// Decodes an inner payload previously produced by [`encode_payload`].
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    Ok(postcard::from_bytes(bytes)?)
}

/// Reads one frame body. `Ok(None)` means a zero-length terminator frame
/// was received: the peer is shutting down cleanly.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload_size: usize,
) -> Result<Option<Vec<u8>>, TransportError> {
    let mut len_buf = [0u8; 8];
    if let Err(e) = reader.read_exact(&mut len_buf).await {
        return match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Err(TransportError::Closed),
            _ => Err(TransportError::Io(e)),
        };
    }
    let len = u64::from_le_bytes(len_buf);
    if len == 0 {
        return Ok(None);
    }
    if len as usize > max_payload_size {
        return Err(TransportError::FrameTooLarge {
            len,
            max: max_payload_size,
        });
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Writes one frame body (length prefix followed by bytes).
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &[u8],
) -> Result<(), TransportError> {
    writer.write_all(&(body.len() as u64).to_le_bytes()).await?;
    if !body.is_empty() {
        writer.write_all(body).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Writes the zero-length terminator frame that signals graceful shutdown.
pub async fn write_terminator<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), TransportError> {
    writer.write_all(&0u64.to_le_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Method, RequestEnvelope};

    #[tokio::test]
    async fn round_trips_a_request_frame() {
        let env = Envelope::Request(RequestEnvelope {
            id: 7,
            method: Method::Custom,
            payload: vec![1, 2, 3],
        });
        let body = PostcardCodec::encode_envelope(&env).unwrap();

        let mut buf = Vec::new();
        write_frame(&mut buf, &body).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_frame(&mut cursor, 1 << 20).await.unwrap().unwrap();
        let decoded = PostcardCodec::decode_envelope(&read_back).unwrap();

        match decoded {
            Envelope::Request(req) => {
                assert_eq!(req.id, 7);
                assert_eq!(req.payload, vec![1, 2, 3]);
            }
            _ => panic!("expected a request envelope"),
        }
    }

    #[tokio::test]
    async fn zero_length_frame_is_a_terminator() {
        let mut buf = Vec::new();
        write_terminator(&mut buf).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let frame = read_frame(&mut cursor, 1 << 20).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1024u64.to_le_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor, 16).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }
}
