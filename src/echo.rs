//! Echo service used by `voxbridge serve`/`voxbridge call` and the tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::codec::{CodecRegistry, Message};
use crate::transport::method::{MethodDescriptor, Status, status_code};
use crate::transport::server::{MethodHandler, ResponseSink, ServerCall, StreamServer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoRequest {
    pub text: String,
    pub count: u32,
    /// Pause between replies.
    #[serde(default)]
    pub interval_ms: u64,
    /// Fail with INTERNAL after this many replies.
    #[serde(default)]
    pub fail_after: Option<u32>,
}

impl EchoRequest {
    pub fn new(text: impl Into<String>, count: u32) -> Self {
        Self {
            text: text.into(),
            count,
            interval_ms: 0,
            fail_after: None,
        }
    }
}

impl Message for EchoRequest {
    const TYPE_KEY: &'static str = "echo.EchoRequest";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoReply {
    pub seq: u32,
    pub text: String,
}

impl Message for EchoReply {
    const TYPE_KEY: &'static str = "echo.EchoReply";
}

pub const REPEAT: MethodDescriptor<EchoRequest, EchoReply> = MethodDescriptor::new("echo.Echo/Repeat");

/// Repeats the request text `count` times.
pub struct RepeatHandler;

#[async_trait]
impl MethodHandler for RepeatHandler {
    async fn handle(&self, call: ServerCall, sink: &mut ResponseSink) -> std::result::Result<(), Status> {
        let request: EchoRequest = call.decode()?;

        for seq in 0..request.count {
            if request.fail_after == Some(seq) {
                let sent = sink.sent();
                sink.set_trailer("x-sent", sent.to_string());
                return Err(Status::new(status_code::INTERNAL, "requested failure"));
            }
            if request.interval_ms > 0 {
                tokio::time::sleep(Duration::from_millis(request.interval_ms)).await;
            }
            sink.send(&EchoReply {
                seq,
                text: request.text.clone(),
            })
            .await?;
        }

        let sent = sink.sent();
        sink.set_trailer("x-sent", sent.to_string());
        Ok(())
    }
}

/// Codecs for the echo messages.
pub fn registry() -> CodecRegistry {
    CodecRegistry::new().with::<EchoRequest>().with::<EchoReply>()
}

/// Server with the echo method routed.
pub fn server() -> StreamServer {
    StreamServer::new().route(REPEAT.path(), RepeatHandler)
}
