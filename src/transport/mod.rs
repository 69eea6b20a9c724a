//! Stream Transport - typed streaming calls over a shared session
//!
//! This module provides:
//! - Session abstraction with socket and in-memory connectors
//! - Method descriptors, call options, status and metadata
//! - Client transport producing ordered response streams
//! - Stream server for answering calls

pub mod call;
pub mod client;
pub mod endpoint;
pub mod memory;
pub mod method;
pub mod server;
pub mod session;

pub use call::{Call, CallStatus};
pub use client::StreamTransport;
pub use endpoint::Endpoint;
pub use memory::{MemoryConnector, MemoryListener};
pub use method::{CallOptions, Metadata, MethodDescriptor, RequestHead, Status, status_code};
pub use server::{CallbackHandler, MethodHandler, ResponseSink, ServerCall, StreamServer};
pub use session::{BoxedStream, ByteStream, Session, SessionConnector, SocketConnector, handshake};
