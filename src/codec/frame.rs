//! Stream frame codec.
//!
//! Reassembles frames split across socket reads and hands the message layer
//! only complete payloads.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum frame length (16 MB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Frame kind constants.
pub mod frame_kind {
    /// Encoded message body.
    pub const MESSAGE: u8 = 0x00;
    /// Terminal status and trailing metadata.
    pub const TRAILERS: u8 = 0x01;
    /// Request head: method path and request metadata.
    pub const HEADERS: u8 = 0x02;
}

/// A decoded stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A request or response message body.
    Message(Bytes),
    /// Terminal status, always the last frame of a response stream.
    Trailers(Bytes),
    /// Request head, always the first frame of a request stream.
    Headers(Bytes),
}

impl Frame {
    fn kind(&self) -> u8 {
        match self {
            Frame::Message(_) => frame_kind::MESSAGE,
            Frame::Trailers(_) => frame_kind::TRAILERS,
            Frame::Headers(_) => frame_kind::HEADERS,
        }
    }

    fn payload(&self) -> &Bytes {
        match self {
            Frame::Message(p) | Frame::Trailers(p) | Frame::Headers(p) => p,
        }
    }
}

/// Length-prefixed frame codec.
///
/// Frames are laid out as:
/// - 4 bytes: length of kind + payload (big-endian u32)
/// - 1 byte: frame kind (see [`frame_kind`])
/// - N bytes: payload
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_length: usize,
}

impl FrameCodec {
    /// Create a new codec with default max length (16 MB).
    pub fn new() -> Self {
        Self {
            max_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    /// Create a new codec with custom max length, capped at what the u32
    /// length prefix can carry.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.min(u32::MAX as usize),
        }
    }

    /// Get the max frame length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_data(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        // Peek at the length without consuming
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length == 0 {
            return Err(invalid_data("Frame without kind byte".to_string()));
        }
        if length > self.max_length {
            return Err(invalid_data(format!("Frame too large: {} > {}", length, self.max_length)));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let kind = src.get_u8();
        let payload = src.split_to(length - 1).freeze();

        match kind {
            frame_kind::MESSAGE => Ok(Some(Frame::Message(payload))),
            frame_kind::TRAILERS => Ok(Some(Frame::Trailers(payload))),
            frame_kind::HEADERS => Ok(Some(Frame::Headers(payload))),
            other => Err(invalid_data(format!("Unknown frame kind: {:#04x}", other))),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let payload = item.payload();
        let length = payload.len() + 1;

        if length > self.max_length {
            return Err(invalid_data(format!("Frame too large: {} > {}", length, self.max_length)));
        }

        dst.reserve(4 + length);
        dst.put_u32(length as u32);
        dst.put_u8(item.kind());
        dst.put_slice(payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_frame_codec_new() {
        let codec = FrameCodec::new();
        assert_eq!(codec.max_length(), DEFAULT_MAX_FRAME_LENGTH);
    }

    #[test]
    fn test_frame_codec_with_max_length() {
        let codec = FrameCodec::with_max_length(1024);
        assert_eq!(codec.max_length(), 1024);
    }

    #[test]
    fn test_max_length_capped_to_prefix_width() {
        let codec = FrameCodec::with_max_length(usize::MAX);
        assert_eq!(codec.max_length(), u32::MAX as usize);
        assert!(u32::try_from(codec.max_length()).is_ok());
    }

    #[test]
    fn test_encode_layout() {
        let buf = encoded(Frame::Trailers(Bytes::from_static(b"ok")));
        assert_eq!(&buf[..], &[0, 0, 0, 3, frame_kind::TRAILERS, b'o', b'k']);
    }

    #[test]
    fn test_partial_length_prefix() {
        let mut decoder = FrameCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut decoder = FrameCodec::new();
        let full = encoded(Frame::Message(Bytes::from_static(b"hello world")));

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..6]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[6..]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Message(Bytes::from_static(b"hello world")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut decoder = FrameCodec::new();
        let mut buf = encoded(Frame::Message(Bytes::from_static(b"one")));
        buf.extend_from_slice(&encoded(Frame::Message(Bytes::from_static(b"two"))));
        buf.extend_from_slice(&encoded(Frame::Trailers(Bytes::new())));

        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Frame::Message(Bytes::from_static(b"one")))
        );
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Frame::Message(Bytes::from_static(b"two")))
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Frame::Trailers(Bytes::new())));
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut decoder = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(2);
        buf.put_u8(0x7f);
        buf.put_u8(0);
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut decoder = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn test_too_large_decode() {
        let mut decoder = FrameCodec::with_max_length(10);
        let mut buf = BytesMut::new();
        buf.put_u32(100);
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn test_too_large_encode() {
        let mut encoder = FrameCodec::with_max_length(4);
        let mut buf = BytesMut::new();
        let result = encoder.encode(Frame::Message(Bytes::from_static(b"too long")), &mut buf);
        assert!(result.is_err());
    }
}
