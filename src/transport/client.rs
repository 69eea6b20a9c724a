//! Client side of the stream transport.
//!
//! Owns exactly one session and turns each invocation into a dedicated
//! stream: request head and body are written, the write side is closed, and
//! a reader task decodes responses into the call's ordered sequence.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncRead;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::{CodecRegistry, Frame, FrameCodec, Message, MessageCodec};
use crate::config::TransportConfig;
use crate::error::{Result, VoxError};
use crate::transport::call::{Call, CallStateWriter, CallStatus};
use crate::transport::method::{CallOptions, Metadata, MethodDescriptor, RequestHead, Status, status_code};
use crate::transport::session::{Session, SessionConnector, SocketConnector, handshake};

enum SessionSlot {
    Idle,
    Ready(Arc<dyn Session>),
    Destroyed,
}

/// Streaming RPC transport over one shared session.
pub struct StreamTransport {
    config: TransportConfig,
    connector: Arc<dyn SessionConnector>,
    registry: Arc<CodecRegistry>,
    slot: Mutex<SessionSlot>,
    active: Arc<AtomicUsize>,
}

impl StreamTransport {
    pub fn new(
        config: TransportConfig,
        connector: Arc<dyn SessionConnector>,
        registry: Arc<CodecRegistry>,
    ) -> Self {
        Self {
            config,
            connector,
            registry,
            slot: Mutex::new(SessionSlot::Idle),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Transport dialing `tcp://` or `unix://` endpoints.
    pub fn with_socket(config: TransportConfig, registry: Arc<CodecRegistry>) -> Self {
        Self::new(config, Arc::new(SocketConnector::new()), registry)
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    /// Open the session and wait for its handshake. No-op when already
    /// connected; concurrent callers share a single handshake.
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        match &*slot {
            SessionSlot::Ready(_) => return Ok(()),
            SessionSlot::Destroyed => {
                return Err(VoxError::TransportUnavailable("Transport destroyed".into()));
            }
            SessionSlot::Idle => {}
        }

        let session = handshake(self.connector.as_ref(), &self.config).await?;

        log::info!("Connected to {}", session.endpoint());
        *slot = SessionSlot::Ready(session);
        Ok(())
    }

    /// Whether a ready session is held.
    pub async fn is_connected(&self) -> bool {
        matches!(*self.slot.lock().await, SessionSlot::Ready(_))
    }

    /// Number of calls whose stream is still open.
    pub fn active_calls(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Close the session. Later calls fail with `TransportUnavailable`;
    /// calling this again does nothing.
    pub async fn destroy(&self) {
        let mut slot = self.slot.lock().await;
        if let SessionSlot::Ready(session) = std::mem::replace(&mut *slot, SessionSlot::Destroyed) {
            session.close().await;
            log::info!("Transport destroyed: {}", session.endpoint());
        }
    }

    async fn session(&self) -> Result<Arc<dyn Session>> {
        match &*self.slot.lock().await {
            SessionSlot::Ready(session) => Ok(Arc::clone(session)),
            SessionSlot::Idle => Err(VoxError::TransportUnavailable("Not connected".into())),
            SessionSlot::Destroyed => Err(VoxError::TransportUnavailable("Transport destroyed".into())),
        }
    }

    /// Invoke `method` with a single request and stream back its responses.
    pub async fn invoke_streaming<I: Message, O: Message>(
        &self,
        method: &MethodDescriptor<I, O>,
        input: &I,
        options: CallOptions,
    ) -> Result<Call<O>> {
        let session = self.session().await?;
        let input_codec = self.registry.lookup::<I>(method.input_key())?;
        let output_codec = self.registry.lookup::<O>(method.output_key())?;

        let head = RequestHead {
            method: method.path().to_string(),
            input_type: method.input_key().to_string(),
            output_type: method.output_key().to_string(),
            metadata: options.metadata,
        };
        let head = serde_json::to_vec(&head)?;
        let body = input_codec.encode(input)?;

        let stream = session.open_stream().await?;
        let guard = ActiveCall::new(Arc::clone(&self.active));
        let (reader, writer) = tokio::io::split(stream);
        let codec = FrameCodec::with_max_length(self.config.max_frame_length);

        let mut sink = FramedWrite::new(writer, codec.clone());
        sink.send(Frame::Headers(head.into())).await?;
        sink.send(Frame::Message(body.into())).await?;
        // Request is single-shot: flush and half-close.
        sink.close().await?;
        log::debug!("Request sent: {}", method.path());

        let (tx, rx) = mpsc::channel(self.config.call_buffer.max(1));
        let (state, state_rx) = CallStateWriter::channel();
        let deadline = options.timeout.map(|t| Instant::now() + t);
        let reader = ResponseReader {
            method: method.path(),
            frames: FramedRead::new(reader, codec),
            codec: output_codec,
            tx,
            state,
            deadline,
            _guard: guard,
        };
        tokio::spawn(reader.run());

        Ok(Call::new(method.path(), rx, state_rx))
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("endpoint", &self.config.endpoint)
            .field("active_calls", &self.active_calls())
            .finish()
    }
}

/// Counts a live call stream for as long as it is held.
struct ActiveCall(Arc<AtomicUsize>);

impl ActiveCall {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Outcome {
    Finished(Status),
    Failed(VoxError),
    Abandoned,
}

struct ResponseReader<R, O> {
    method: &'static str,
    frames: FramedRead<R, FrameCodec>,
    codec: Arc<MessageCodec<O>>,
    tx: mpsc::Sender<Result<O>>,
    state: CallStateWriter,
    deadline: Option<Instant>,
    _guard: ActiveCall,
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl<R: AsyncRead + Unpin, O: Message> ResponseReader<R, O> {
    async fn run(mut self) {
        let outcome = self.read_to_end().await;

        match outcome {
            Outcome::Finished(status) if status.is_ok() => {
                self.state.finish(CallStatus::Completed, status.metadata);
                log::debug!("Call completed: {}", self.method);
            }
            Outcome::Finished(status) => {
                self.state.finish(CallStatus::Errored, status.metadata);
                log::debug!("Call failed: {} ({}: {})", self.method, status.code, status.message);
                let _ = self
                    .tx
                    .send(Err(VoxError::CallFailed {
                        code: status.code,
                        message: status.message,
                    }))
                    .await;
            }
            Outcome::Failed(err) => {
                self.state.finish(CallStatus::Errored, Metadata::new());
                log::warn!("Call errored: {}: {}", self.method, err);
                let _ = self.tx.send(Err(err)).await;
            }
            Outcome::Abandoned => {
                self.state.finish(CallStatus::Cancelled, Metadata::new());
                log::debug!("Call abandoned: {}", self.method);
            }
        }
        // Dropping self releases the stream and the active-call slot.
    }

    async fn read_to_end(&mut self) -> Outcome {
        loop {
            let next = tokio::select! {
                _ = self.tx.closed() => return Outcome::Abandoned,
                _ = deadline_elapsed(self.deadline) => {
                    return Outcome::Failed(VoxError::CallFailed {
                        code: status_code::DEADLINE_EXCEEDED,
                        message: "deadline exceeded".into(),
                    });
                }
                frame = self.frames.next() => frame,
            };

            match next {
                // Every response ends with trailers; EOF before them means
                // the peer went away mid-call.
                None => {
                    return Outcome::Failed(VoxError::CallFailed {
                        code: status_code::UNAVAILABLE,
                        message: "stream ended without trailers".into(),
                    });
                }
                Some(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                    return Outcome::Failed(VoxError::MalformedPayload(e.to_string()));
                }
                Some(Err(e)) => return Outcome::Failed(VoxError::Io(e)),
                Some(Ok(Frame::Message(bytes))) => {
                    let value = match self.codec.decode(&bytes) {
                        Ok(value) => value,
                        Err(e) => return Outcome::Failed(e),
                    };
                    self.state.advance(CallStatus::Streaming);
                    if self.tx.send(Ok(value)).await.is_err() {
                        return Outcome::Abandoned;
                    }
                }
                Some(Ok(Frame::Trailers(bytes))) => {
                    return match serde_json::from_slice::<Status>(&bytes) {
                        Ok(status) => Outcome::Finished(status),
                        Err(e) => Outcome::Failed(VoxError::MalformedPayload(format!("trailers: {}", e))),
                    };
                }
                Some(Ok(Frame::Headers(_))) => {
                    return Outcome::Failed(VoxError::MalformedPayload(
                        "unexpected headers frame in response".into(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::{self, EchoReply, EchoRequest, REPEAT};
    use crate::transport::memory::{MemoryConnector, MemoryListener};
    use crate::transport::session::BoxedStream;
    use async_trait::async_trait;
    use bytes::{Bytes, BytesMut};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::Encoder;

    /// Connector whose sessions never finish their handshake.
    struct HangingConnector;

    struct HangingSession;

    #[async_trait]
    impl SessionConnector for HangingConnector {
        async fn open(&self, _endpoint: &str) -> Result<Box<dyn Session>> {
            Ok(Box::new(HangingSession))
        }
    }

    #[async_trait]
    impl Session for HangingSession {
        async fn ready(&self) -> Result<()> {
            std::future::pending().await
        }

        async fn open_stream(&self) -> Result<BoxedStream> {
            Err(VoxError::TransportUnavailable("never ready".into()))
        }

        async fn close(&self) {}

        fn endpoint(&self) -> String {
            "hang://".into()
        }
    }

    /// How a hand-written peer ends its response.
    enum Ending {
        Trailers,
        HalfFrame,
        HangUp,
    }

    /// Answers one accepted stream per script entry with `replies` echo
    /// replies and the given ending.
    fn spawn_raw_peer(mut listener: MemoryListener, script: Vec<(u32, Ending)>) {
        tokio::spawn(async move {
            for (replies, ending) in script {
                let Some(stream) = listener.accept().await else {
                    return;
                };
                let (reader, mut writer) = tokio::io::split(stream);
                let mut request = FramedRead::new(reader, FrameCodec::new());
                while let Some(frame) = request.next().await {
                    frame.unwrap();
                }

                let mut codec = FrameCodec::new();
                let replies_codec = MessageCodec::<EchoReply>::new();
                let mut out = BytesMut::new();
                for seq in 0..replies {
                    let body = replies_codec
                        .encode(&EchoReply {
                            seq,
                            text: format!("ok{}", seq),
                        })
                        .unwrap();
                    codec.encode(Frame::Message(body.into()), &mut out).unwrap();
                }
                match ending {
                    Ending::Trailers => {
                        let status = serde_json::to_vec(&Status::ok()).unwrap();
                        codec.encode(Frame::Trailers(status.into()), &mut out).unwrap();
                    }
                    Ending::HalfFrame => {
                        let mut partial = BytesMut::new();
                        codec
                            .encode(Frame::Message(Bytes::from_static(b"{\"type\":\"echo.EchoReply\"}")), &mut partial)
                            .unwrap();
                        out.extend_from_slice(&partial[..partial.len() / 2]);
                    }
                    Ending::HangUp => {}
                }
                writer.write_all(&out).await.unwrap();
                writer.shutdown().await.unwrap();
            }
        });
    }

    fn raw_transport(connector: MemoryConnector) -> StreamTransport {
        StreamTransport::new(
            TransportConfig::with_endpoint("mem://raw"),
            Arc::new(connector),
            Arc::new(echo::registry()),
        )
    }

    async fn drain(call: &mut Call<EchoReply>) -> Vec<Result<EchoReply>> {
        let mut items = Vec::new();
        while let Some(item) = call.message().await {
            items.push(item);
        }
        items
    }

    fn memory_transport() -> (StreamTransport, MemoryConnector) {
        let (connector, listener) = MemoryConnector::new();
        let server = Arc::new(echo::server());
        tokio::spawn(server.run_memory(listener));
        let transport = StreamTransport::new(
            TransportConfig::with_endpoint("mem://echo"),
            Arc::new(connector.clone()),
            Arc::new(echo::registry()),
        );
        (transport, connector)
    }

    #[tokio::test]
    async fn test_invoke_before_connect_is_unavailable() {
        let (transport, _connector) = memory_transport();
        let result = transport
            .invoke_streaming(&REPEAT, &EchoRequest::new("hi", 1), CallOptions::default())
            .await;
        assert!(matches!(result, Err(VoxError::TransportUnavailable(_))));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (transport, connector) = memory_transport();
        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        assert_eq!(connector.handshakes(), 1);
        assert!(transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_concurrent_connect_single_handshake() {
        let (transport, connector) = memory_transport();
        let (a, b) = tokio::join!(transport.connect(), transport.connect());
        a.unwrap();
        b.unwrap();
        assert_eq!(connector.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_failed_handshake() {
        let (transport, connector) = memory_transport();
        connector.refuse_ready(true);
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, VoxError::TransportUnavailable(_)));
        assert!(!transport.is_connected().await);

        connector.refuse_ready(false);
        transport.connect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let transport = StreamTransport::new(
            TransportConfig::with_endpoint("hang://"),
            Arc::new(HangingConnector),
            Arc::new(echo::registry()),
        );

        let started = Instant::now();
        let err = transport.connect().await.unwrap_err();
        match err {
            VoxError::TransportUnavailable(msg) => assert!(msg.contains("timed out"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(started.elapsed() >= TransportConfig::default().ready_timeout());
        assert!(!transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_truncated_frame_errors_call() {
        let (connector, listener) = MemoryConnector::new();
        spawn_raw_peer(listener, vec![(2, Ending::HalfFrame), (2, Ending::Trailers)]);
        let transport = raw_transport(connector);
        transport.connect().await.unwrap();

        let mut call = transport
            .invoke_streaming(&REPEAT, &EchoRequest::new("x", 5), CallOptions::default())
            .await
            .unwrap();
        let items = drain(&mut call).await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().text, "ok0");
        assert_eq!(items[1].as_ref().unwrap().text, "ok1");
        assert!(matches!(items[2], Err(VoxError::Io(_))), "{:?}", items[2]);
        assert_eq!(call.status(), CallStatus::Errored);

        // The session survives a broken stream.
        let replies = transport
            .invoke_streaming(&REPEAT, &EchoRequest::new("x", 2), CallOptions::default())
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(replies.len(), 2);
        assert!(transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_missing_trailers_is_unavailable() {
        let (connector, listener) = MemoryConnector::new();
        spawn_raw_peer(listener, vec![(2, Ending::HangUp)]);
        let transport = raw_transport(connector);
        transport.connect().await.unwrap();

        let mut call = transport
            .invoke_streaming(&REPEAT, &EchoRequest::new("x", 5), CallOptions::default())
            .await
            .unwrap();
        let items = drain(&mut call).await;

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        assert!(matches!(
            items[2],
            Err(VoxError::CallFailed {
                code: status_code::UNAVAILABLE,
                ..
            })
        ));
        assert_eq!(call.status(), CallStatus::Errored);
        assert!(call.trailers().await.is_empty());
    }

    #[tokio::test]
    async fn test_responses_in_order() {
        let (transport, _connector) = memory_transport();
        transport.connect().await.unwrap();

        let call = transport
            .invoke_streaming(&REPEAT, &EchoRequest::new("hello", 25), CallOptions::default())
            .await
            .unwrap();
        let replies = call.collect_all().await.unwrap();

        let seqs: Vec<u32> = replies.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, (0..25).collect::<Vec<_>>());
        assert!(replies.iter().all(|r| r.text == "hello"));
    }

    #[tokio::test]
    async fn test_completion_status_and_trailers() {
        let (transport, _connector) = memory_transport();
        transport.connect().await.unwrap();

        let mut call = transport
            .invoke_streaming(&REPEAT, &EchoRequest::new("x", 2), CallOptions::default())
            .await
            .unwrap();
        while let Some(reply) = call.message().await {
            reply.unwrap();
        }
        let trailers = call.trailers().await;
        assert_eq!(call.status(), CallStatus::Completed);
        assert_eq!(trailers.get("x-sent").map(String::as_str), Some("2"));
        assert!(call.headers().is_empty());
    }

    #[tokio::test]
    async fn test_peer_failure_terminates_sequence() {
        let (transport, _connector) = memory_transport();
        transport.connect().await.unwrap();

        let mut request = EchoRequest::new("x", 10);
        request.fail_after = Some(3);
        let mut call = transport
            .invoke_streaming(&REPEAT, &request, CallOptions::default())
            .await
            .unwrap();

        let mut seen = Vec::new();
        let mut error = None;
        while let Some(item) = call.message().await {
            match item {
                Ok(reply) => seen.push(reply.seq),
                Err(e) => error = Some(e),
            }
        }
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(matches!(error, Some(VoxError::CallFailed { code: status_code::INTERNAL, .. })));
        assert_eq!(call.status(), CallStatus::Errored);

        // Session survives a per-call failure.
        let replies = transport
            .invoke_streaming(&REPEAT, &EchoRequest::new("again", 1), CallOptions::default())
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(replies.len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let (transport, _connector) = memory_transport();
        transport.connect().await.unwrap();

        let mut request = EchoRequest::new("slow", 100);
        request.interval_ms = 50;
        let result = transport
            .invoke_streaming(
                &REPEAT,
                &request,
                CallOptions::default().with_timeout(Duration::from_millis(120)),
            )
            .await
            .unwrap()
            .collect_all()
            .await;
        assert!(matches!(
            result,
            Err(VoxError::CallFailed {
                code: status_code::DEADLINE_EXCEEDED,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_abandoned_call_releases_stream() {
        let (transport, _connector) = memory_transport();
        transport.connect().await.unwrap();

        let mut request = EchoRequest::new("tick", u32::MAX);
        request.interval_ms = 5;
        let mut call = transport
            .invoke_streaming(&REPEAT, &request, CallOptions::default())
            .await
            .unwrap();
        assert!(call.message().await.unwrap().is_ok());
        assert_eq!(transport.active_calls(), 1);
        drop(call);

        tokio::time::timeout(Duration::from_secs(2), async {
            while transport.active_calls() != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream not released");

        let replies = transport
            .invoke_streaming(&REPEAT, &EchoRequest::new("next", 3), CallOptions::default())
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(replies.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_method_is_unimplemented() {
        const MISSING: MethodDescriptor<EchoRequest, EchoReply> = MethodDescriptor::new("echo.Echo/Missing");
        let (transport, _connector) = memory_transport();
        transport.connect().await.unwrap();

        let result = transport
            .invoke_streaming(&MISSING, &EchoRequest::new("x", 1), CallOptions::default())
            .await
            .unwrap()
            .collect_all()
            .await;
        assert!(matches!(
            result,
            Err(VoxError::CallFailed {
                code: status_code::UNIMPLEMENTED,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unregistered_codec() {
        let (connector, _listener) = MemoryConnector::new();
        let transport = StreamTransport::new(
            TransportConfig::with_endpoint("mem://empty"),
            Arc::new(connector),
            Arc::new(CodecRegistry::new()),
        );
        transport.connect().await.unwrap();
        let result = transport
            .invoke_streaming(&REPEAT, &EchoRequest::new("x", 1), CallOptions::default())
            .await;
        assert!(matches!(result, Err(VoxError::UnknownCodec(_))));
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_final() {
        let (transport, _connector) = memory_transport();
        transport.connect().await.unwrap();
        transport.destroy().await;
        transport.destroy().await;

        assert!(!transport.is_connected().await);
        let result = transport
            .invoke_streaming(&REPEAT, &EchoRequest::new("x", 1), CallOptions::default())
            .await;
        assert!(matches!(result, Err(VoxError::TransportUnavailable(_))));
        assert!(transport.connect().await.is_err());
    }
}
