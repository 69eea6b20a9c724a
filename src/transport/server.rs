//! Stream Server - answers streaming calls
//!
//! Provides:
//! - Socket and in-memory listeners
//! - Per-stream request decoding and method routing
//! - Response streaming followed by a trailer frame

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::frame::DEFAULT_MAX_FRAME_LENGTH;
use crate::codec::{Frame, FrameCodec, Message, MessageCodec};
use crate::error::{Result, VoxError};
use crate::transport::endpoint::Endpoint;
use crate::transport::memory::MemoryListener;
use crate::transport::method::{Metadata, RequestHead, Status, status_code};

/// A decoded incoming request.
#[derive(Debug, Clone)]
pub struct ServerCall {
    head: RequestHead,
    body: Bytes,
}

impl ServerCall {
    pub fn method(&self) -> &str {
        &self.head.method
    }

    pub fn metadata(&self) -> &Metadata {
        &self.head.metadata
    }

    /// Decode the request body as `I`.
    pub fn decode<I: Message>(&self) -> Result<I> {
        MessageCodec::<I>::new().decode(&self.body)
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writes responses for one call.
pub struct ResponseSink {
    frames: FramedWrite<BoxedWriter, FrameCodec>,
    trailers: Metadata,
    sent: u64,
}

impl ResponseSink {
    fn new(writer: BoxedWriter, codec: FrameCodec) -> Self {
        Self {
            frames: FramedWrite::new(writer, codec),
            trailers: Metadata::new(),
            sent: 0,
        }
    }

    /// Send one response. Fails once the caller went away.
    pub async fn send<O: Message>(&mut self, value: &O) -> Result<()> {
        let body = MessageCodec::<O>::new().encode(value)?;
        self.frames.send(Frame::Message(body.into())).await?;
        self.sent += 1;
        Ok(())
    }

    /// Add trailing metadata delivered with the final status.
    pub fn set_trailer(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.trailers.insert(key.into(), value.into());
    }

    /// Responses sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    async fn finish(mut self, mut status: Status) -> Result<()> {
        for (key, value) in std::mem::take(&mut self.trailers) {
            status.metadata.entry(key).or_insert(value);
        }
        let trailers = serde_json::to_vec(&status)?;
        self.frames.send(Frame::Trailers(trailers.into())).await?;
        self.frames.close().await?;
        Ok(())
    }
}

/// Handler trait for answering one method
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Stream responses into `sink`. `Ok` finishes the call with an OK
    /// status, `Err` with the returned one.
    async fn handle(&self, call: ServerCall, sink: &mut ResponseSink) -> std::result::Result<(), Status>;
}

/// Simple handler that routes to a callback producing all responses at once
pub struct CallbackHandler<I, O, F> {
    callback: F,
    _phantom: PhantomData<fn(I) -> O>,
}

impl<I, O, F> CallbackHandler<I, O, F>
where
    I: Message,
    O: Message + Sync,
    F: Fn(I, &Metadata) -> std::result::Result<Vec<O>, Status> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<I, O, F> MethodHandler for CallbackHandler<I, O, F>
where
    I: Message,
    O: Message + Sync,
    F: Fn(I, &Metadata) -> std::result::Result<Vec<O>, Status> + Send + Sync,
{
    async fn handle(&self, call: ServerCall, sink: &mut ResponseSink) -> std::result::Result<(), Status> {
        let input: I = call.decode()?;
        let outputs = (self.callback)(input, call.metadata())?;
        for output in &outputs {
            sink.send(output).await?;
        }
        Ok(())
    }
}

/// Server answering streaming calls
pub struct StreamServer {
    routes: HashMap<String, Arc<dyn MethodHandler>>,
    max_frame_length: usize,
    shutdown: watch::Sender<bool>,
}

impl StreamServer {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            routes: HashMap::new(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            shutdown,
        }
    }

    pub fn with_max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }

    /// Register `handler` for a method path.
    pub fn route(mut self, path: impl Into<String>, handler: impl MethodHandler + 'static) -> Self {
        self.routes.insert(path.into(), Arc::new(handler));
        self
    }

    /// Registered method paths, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<_> = self.routes.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Signal every running accept loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Bind `endpoint` and serve until shutdown.
    pub async fn run(self: Arc<Self>, endpoint: &Endpoint) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();

        match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|e| VoxError::TransportUnavailable(format!("Failed to bind {}: {}", addr, e)))?;
                log::info!("Serving on {}", endpoint);

                loop {
                    tokio::select! {
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer)) => {
                                log::debug!("Accepted stream from {}", peer);
                                self.spawn_stream(stream);
                            }
                            Err(e) => log::warn!("Accept error: {}", e),
                        },
                        _ = shutdown.wait_for(|stop| *stop) => break,
                    }
                }
            }
            Endpoint::Unix(path) => {
                // Remove stale socket if present
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let listener = UnixListener::bind(path)
                    .map_err(|e| VoxError::TransportUnavailable(format!("Failed to bind socket: {}", e)))?;
                log::info!("Serving on {}", endpoint);

                loop {
                    tokio::select! {
                        accepted = listener.accept() => match accepted {
                            Ok((stream, _addr)) => self.spawn_stream(stream),
                            Err(e) => log::warn!("Accept error: {}", e),
                        },
                        _ = shutdown.wait_for(|stop| *stop) => break,
                    }
                }

                let _ = std::fs::remove_file(path);
            }
        }

        log::info!("Server on {} stopped", endpoint);
        Ok(())
    }

    /// Serve streams handed over by a `MemoryConnector` until shutdown or
    /// until every connector is dropped.
    pub async fn run_memory(self: Arc<Self>, mut listener: MemoryListener) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Some(stream) => self.spawn_stream(stream),
                    None => break,
                },
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
        Ok(())
    }

    fn spawn_stream<S>(self: &Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let server = Arc::clone(self);
        tokio::spawn(async move { server.serve_stream(stream).await });
    }

    /// Answer the single call carried by `stream`.
    pub async fn serve_stream<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let codec = FrameCodec::with_max_length(self.max_frame_length);
        let mut frames = FramedRead::new(reader, codec.clone());
        let mut sink = ResponseSink::new(Box::new(writer), codec);

        let status = match read_request(&mut frames).await {
            Ok(None) => {
                // Socket readiness checks connect and hang up without a request.
                log::debug!("Stream closed before request");
                return;
            }
            Ok(Some(call)) => {
                let method = call.method().to_string();
                match self.routes.get(&method) {
                    Some(handler) => {
                        let handler = Arc::clone(handler);
                        match handler.handle(call, &mut sink).await {
                            Ok(()) => Status::ok(),
                            Err(status) => status,
                        }
                    }
                    None => {
                        log::warn!("Unknown method: {}", method);
                        Status::new(status_code::UNIMPLEMENTED, format!("Unknown method: {}", method))
                    }
                }
            }
            Err(e) => {
                log::warn!("Bad request: {}", e);
                Status::from(e)
            }
        };

        if let Err(e) = sink.finish(status).await {
            log::debug!("Caller went away before trailers: {}", e);
        }
    }
}

impl Default for StreamServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the request head and body. `None` when the stream ends before
/// any frame arrived.
async fn read_request<S>(frames: &mut FramedRead<ReadHalf<S>, FrameCodec>) -> Result<Option<ServerCall>>
where
    S: AsyncRead + Unpin,
{
    let head = match frames.next().await {
        Some(Ok(Frame::Headers(bytes))) => serde_json::from_slice::<RequestHead>(&bytes)
            .map_err(|e| VoxError::MalformedPayload(format!("request head: {}", e)))?,
        Some(Ok(_)) => return Err(VoxError::MalformedPayload("request must start with headers".into())),
        Some(Err(e)) => return Err(VoxError::MalformedPayload(e.to_string())),
        None => return Ok(None),
    };

    let body = match frames.next().await {
        Some(Ok(Frame::Message(bytes))) => bytes,
        Some(Ok(_)) => return Err(VoxError::MalformedPayload("expected request body".into())),
        Some(Err(e)) => return Err(VoxError::MalformedPayload(e.to_string())),
        None => return Err(VoxError::MalformedPayload("stream closed before request body".into())),
    };

    Ok(Some(ServerCall { head, body }))
}
