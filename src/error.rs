//! Error types for voxbridge
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in voxbridge
#[derive(Debug, Error)]
pub enum VoxError {
    /// Session not ready, handshake failed, or transport destroyed
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A frame or envelope could not be decoded
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Decoded event key disagrees with the key the listener registered for
    #[error("Event key mismatch on handle {handle}: expected {expected:?}, got {actual:?}")]
    EventKeyMismatch {
        handle: u64,
        expected: String,
        actual: String,
    },

    /// The external connect operation failed
    #[error("Connect failure: {0}")]
    ConnectFailure(String),

    /// Peer terminated the call with a non-OK status
    #[error("Call failed with status {code}: {message}")]
    CallFailed { code: u32, message: String },

    /// No codec registered for a type key
    #[error("Unknown codec: {0}")]
    UnknownCodec(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VoxError {
    /// Whether this error invalidates the whole session rather than one call.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, VoxError::TransportUnavailable(_) | VoxError::Io(_))
    }
}

/// Result type alias for voxbridge operations
pub type Result<T> = std::result::Result<T, VoxError>;
