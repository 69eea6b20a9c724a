//! Method descriptors, call options and terminal status.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::Message;
use crate::error::VoxError;

/// Request or trailing metadata.
pub type Metadata = BTreeMap<String, String>;

/// Status code constants carried in trailers.
pub mod status_code {
    pub const OK: u32 = 0;
    pub const CANCELLED: u32 = 1;
    pub const UNKNOWN: u32 = 2;
    pub const INVALID_ARGUMENT: u32 = 3;
    pub const DEADLINE_EXCEEDED: u32 = 4;
    pub const UNIMPLEMENTED: u32 = 12;
    pub const INTERNAL: u32 = 13;
    pub const UNAVAILABLE: u32 = 14;
}

/// Identifies a remote method and its input/output codec pair.
///
/// Declared as constants next to the message types:
///
/// ```
/// # use serde::{Deserialize, Serialize};
/// # use voxbridge::codec::Message;
/// # use voxbridge::transport::MethodDescriptor;
/// #[derive(Serialize, Deserialize)]
/// struct JoinRequest { channel: u64 }
/// impl Message for JoinRequest { const TYPE_KEY: &'static str = "voice.JoinRequest"; }
///
/// #[derive(Serialize, Deserialize)]
/// struct VoiceEvent { speaking: bool }
/// impl Message for VoiceEvent { const TYPE_KEY: &'static str = "voice.VoiceEvent"; }
///
/// const JOIN: MethodDescriptor<JoinRequest, VoiceEvent> = MethodDescriptor::new("voice.Voice/Join");
/// assert_eq!(JOIN.input_key(), "voice.JoinRequest");
/// ```
pub struct MethodDescriptor<I, O> {
    path: &'static str,
    _phantom: PhantomData<fn(I) -> O>,
}

impl<I: Message, O: Message> MethodDescriptor<I, O> {
    pub const fn new(path: &'static str) -> Self {
        Self {
            path,
            _phantom: PhantomData,
        }
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    pub fn input_key(&self) -> &'static str {
        I::TYPE_KEY
    }

    pub fn output_key(&self) -> &'static str {
        O::TYPE_KEY
    }
}

impl<I, O> Clone for MethodDescriptor<I, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I, O> Copy for MethodDescriptor<I, O> {}

impl<I, O> std::fmt::Debug for MethodDescriptor<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor").field("path", &self.path).finish()
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for the whole call, including the response stream.
    pub timeout: Option<Duration>,
    /// Request metadata sent in the request head.
    pub metadata: Metadata,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// First frame of every request stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHead {
    pub method: String,
    pub input_type: String,
    pub output_type: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Terminal status of a call, sent as the trailer frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Status {
    pub fn ok() -> Self {
        Self::new(status_code::OK, "")
    }

    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code == status_code::OK
    }
}

impl From<VoxError> for Status {
    fn from(err: VoxError) -> Self {
        let code = match &err {
            VoxError::MalformedPayload(_) | VoxError::UnknownCodec(_) => status_code::INVALID_ARGUMENT,
            VoxError::TransportUnavailable(_) | VoxError::Io(_) => status_code::UNAVAILABLE,
            VoxError::CallFailed { code, .. } => *code,
            _ => status_code::INTERNAL,
        };
        Status::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize)]
    struct In;
    impl Message for In {
        const TYPE_KEY: &'static str = "test.In";
    }

    #[derive(Serialize, Deserialize)]
    struct Out;
    impl Message for Out {
        const TYPE_KEY: &'static str = "test.Out";
    }

    const METHOD: MethodDescriptor<In, Out> = MethodDescriptor::new("test.Svc/Run");

    #[test]
    fn test_descriptor_keys() {
        assert_eq!(METHOD.path(), "test.Svc/Run");
        assert_eq!(METHOD.input_key(), "test.In");
        assert_eq!(METHOD.output_key(), "test.Out");
    }

    #[test]
    fn test_call_options_builder() {
        let options = CallOptions::default()
            .with_timeout(Duration::from_secs(2))
            .with_metadata("authorization", "token");
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.metadata["authorization"], "token");
    }

    #[test]
    fn test_status_ok() {
        assert!(Status::ok().is_ok());
        assert!(!Status::new(status_code::INTERNAL, "boom").is_ok());
    }

    #[test]
    fn test_status_deserialize_minimal() {
        let status: Status = serde_json::from_str(r#"{"code":0}"#).unwrap();
        assert_eq!(status, Status::ok());
    }

    #[test]
    fn test_status_from_error() {
        let status = Status::from(VoxError::MalformedPayload("bad".into()));
        assert_eq!(status.code, status_code::INVALID_ARGUMENT);

        let status = Status::from(VoxError::CallFailed {
            code: status_code::UNIMPLEMENTED,
            message: "nope".into(),
        });
        assert_eq!(status.code, status_code::UNIMPLEMENTED);
    }
}
