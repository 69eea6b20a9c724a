//! Codec Adapter - bytes in, typed values out
//!
//! This module provides:
//! - Tagged message encoding keyed by a string type identifier
//! - A registry of codecs shared by the transport and the host bus
//! - Length-prefixed frame codec for reassembling stream reads

pub mod frame;
pub mod message;
pub mod registry;

pub use frame::{Frame, FrameCodec, frame_kind};
pub use message::{Message, MessageCodec};
pub use registry::CodecRegistry;
