//! Session abstraction.
//!
//! A session is one transport-level channel to an endpoint. It must report
//! ready before any stream is opened on it, and hosts any number of
//! independent bidirectional byte streams.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

use crate::config::TransportConfig;
use crate::error::{Result, VoxError};
use crate::transport::endpoint::Endpoint;

/// A bidirectional byte stream opened on a session.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

pub type BoxedStream = Box<dyn ByteStream>;

#[async_trait]
pub trait Session: Send + Sync {
    /// Resolve once the session handshake completed.
    async fn ready(&self) -> Result<()>;

    /// Open a fresh bidirectional stream.
    async fn open_stream(&self) -> Result<BoxedStream>;

    /// Close the session. Streams already handed out are unaffected.
    async fn close(&self);

    fn endpoint(&self) -> String;
}

/// Opens sessions for an endpoint string.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Session>>;
}

/// Open a session for the configured endpoint and wait for its handshake.
/// The session is closed again if the handshake fails or times out.
pub async fn handshake(connector: &dyn SessionConnector, config: &TransportConfig) -> Result<Arc<dyn Session>> {
    let session: Arc<dyn Session> = Arc::from(connector.open(&config.endpoint).await?);

    match tokio::time::timeout(config.ready_timeout(), session.ready()).await {
        Ok(Ok(())) => Ok(session),
        Ok(Err(e)) => {
            session.close().await;
            Err(match e {
                VoxError::TransportUnavailable(_) => e,
                other => VoxError::TransportUnavailable(format!("Handshake failed: {}", other)),
            })
        }
        Err(_) => {
            session.close().await;
            Err(VoxError::TransportUnavailable(format!(
                "Handshake with {} timed out after {}ms",
                config.endpoint, config.ready_timeout_ms
            )))
        }
    }
}

/// Connector for `tcp://` and `unix://` endpoints.
///
/// Every stream is its own socket; readiness is a throwaway connection.
#[derive(Debug, Clone, Default)]
pub struct SocketConnector;

impl SocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionConnector for SocketConnector {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Session>> {
        let endpoint = Endpoint::parse(endpoint)?;
        Ok(Box::new(SocketSession {
            endpoint,
            closed: AtomicBool::new(false),
        }))
    }
}

struct SocketSession {
    endpoint: Endpoint,
    closed: AtomicBool,
}

impl SocketSession {
    async fn dial(&self) -> Result<BoxedStream> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoxError::TransportUnavailable("Session closed".into()));
        }

        let stream: BoxedStream = match &self.endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(|e| VoxError::TransportUnavailable(format!("Failed to connect to {}: {}", addr, e)))?;
                stream.set_nodelay(true)?;
                Box::new(stream)
            }
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(|e| {
                    VoxError::TransportUnavailable(format!("Failed to connect to {}: {}", path.display(), e))
                })?;
                Box::new(stream)
            }
        };
        Ok(stream)
    }
}

#[async_trait]
impl Session for SocketSession {
    async fn ready(&self) -> Result<()> {
        let conn = self.dial().await?;
        drop(conn);
        log::debug!("Session ready: {}", self.endpoint);
        Ok(())
    }

    async fn open_stream(&self) -> Result<BoxedStream> {
        self.dial().await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        log::debug!("Session closed: {}", self.endpoint);
    }

    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }
}
