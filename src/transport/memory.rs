//! In-process sessions over duplex pipes.
//!
//! `MemoryConnector` hands the server half of every opened stream to a
//! `MemoryListener`, which a `StreamServer` can serve directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::error::{Result, VoxError};
use crate::transport::session::{BoxedStream, Session, SessionConnector};

const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Receives the server halves of streams opened through a `MemoryConnector`.
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MemoryListener {
    /// Wait for the next stream. `None` once every connector is dropped.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.incoming.recv().await
    }
}

/// Connector whose sessions live entirely in-process.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    outgoing: mpsc::UnboundedSender<DuplexStream>,
    pipe_capacity: usize,
    refuse_ready: Arc<AtomicBool>,
    handshakes: Arc<AtomicU64>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        Self::with_pipe_capacity(DEFAULT_PIPE_CAPACITY)
    }

    /// Create a connector whose pipes buffer at most `capacity` bytes.
    pub fn with_pipe_capacity(capacity: usize) -> (Self, MemoryListener) {
        let (outgoing, incoming) = mpsc::unbounded_channel();
        let connector = Self {
            outgoing,
            pipe_capacity: capacity,
            refuse_ready: Arc::new(AtomicBool::new(false)),
            handshakes: Arc::new(AtomicU64::new(0)),
        };
        (connector, MemoryListener { incoming })
    }

    /// Make subsequent handshakes fail.
    pub fn refuse_ready(&self, refuse: bool) {
        self.refuse_ready.store(refuse, Ordering::SeqCst);
    }

    /// Number of handshakes attempted through this connector.
    pub fn handshakes(&self) -> u64 {
        self.handshakes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionConnector for MemoryConnector {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Session>> {
        Ok(Box::new(MemorySession {
            endpoint: endpoint.to_string(),
            connector: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemorySession {
    endpoint: String,
    connector: MemoryConnector,
    closed: AtomicBool,
}

#[async_trait]
impl Session for MemorySession {
    async fn ready(&self) -> Result<()> {
        self.connector.handshakes.fetch_add(1, Ordering::SeqCst);
        if self.connector.refuse_ready.load(Ordering::SeqCst) {
            return Err(VoxError::TransportUnavailable("Handshake refused".into()));
        }
        if self.connector.outgoing.is_closed() {
            return Err(VoxError::TransportUnavailable("No listener".into()));
        }
        Ok(())
    }

    async fn open_stream(&self) -> Result<BoxedStream> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoxError::TransportUnavailable("Session closed".into()));
        }
        let (client, server) = tokio::io::duplex(self.connector.pipe_capacity);
        self.connector
            .outgoing
            .send(server)
            .map_err(|_| VoxError::TransportUnavailable("No listener".into()))?;
        Ok(Box::new(client))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}
