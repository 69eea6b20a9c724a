//! Host envelopes and their pipe framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::frame::DEFAULT_MAX_FRAME_LENGTH;

const HEADER_LEN: usize = 12;

/// A message pushed by the host, addressed to one listener handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub handle: u64,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(handle: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            handle,
            payload: payload.into(),
        }
    }
}

/// Envelope framing on the host pipe:
/// - 8 bytes: listener handle (big-endian u64)
/// - 4 bytes: payload length (big-endian u32)
/// - N bytes: payload
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_length: usize,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self {
            max_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    /// Capped at what the u32 length field can carry.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.min(u32::MAX as usize),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[8], src[9], src[10], src[11]]) as usize;
        if length > self.max_length {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Envelope too large: {} > {}", length, self.max_length),
            ));
        }

        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }

        let handle = src.get_u64();
        src.advance(4);
        let payload = src.split_to(length).freeze();
        Ok(Some(Envelope { handle, payload }))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        if item.payload.len() > self.max_length {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Envelope too large: {} > {}", item.payload.len(), self.max_length),
            ));
        }

        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u64(item.handle);
        dst.put_u32(item.payload.len() as u32);
        dst.put_slice(&item.payload);
        Ok(())
    }
}
