//! Connection lifecycle - connect, retry with a fixed delay, give up
//!
//! This module provides:
//! - A pure transition function over [`ConnectionState`]
//! - A tokio driver executing the requested side effects
//! - [`SessionHandshake`], a connector that opens a transport session

pub mod driver;
pub mod machine;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::TransportConfig;
use crate::error::{Result, VoxError};
use crate::transport::{Session, SessionConnector, handshake};

pub use driver::{Command, ConnectionDriver, ConnectionHandle, ConnectionSnapshot, Connector};
pub use machine::{Action, ConnectionState, Event, Phase, Transition, transition};

/// An established session, the context of a `connected` machine.
#[derive(Clone)]
pub struct SessionContext {
    pub endpoint: String,
    pub session: Arc<dyn Session>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Connects by opening a session and waiting for its handshake.
pub struct SessionHandshake {
    connector: Arc<dyn SessionConnector>,
    config: TransportConfig,
}

impl SessionHandshake {
    pub fn new(connector: Arc<dyn SessionConnector>, config: TransportConfig) -> Self {
        Self { connector, config }
    }
}

#[async_trait]
impl Connector for SessionHandshake {
    type Context = SessionContext;

    async fn connect(&self) -> Result<SessionContext> {
        let session = handshake(self.connector.as_ref(), &self.config)
            .await
            .map_err(|e| VoxError::ConnectFailure(e.to_string()))?;
        Ok(SessionContext {
            endpoint: session.endpoint(),
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleConfig;
    use crate::transport::MemoryConnector;

    #[tokio::test]
    async fn test_session_handshake_connects() {
        let (connector, _listener) = MemoryConnector::new();
        let handshake = SessionHandshake::new(Arc::new(connector), TransportConfig::with_endpoint("memory://test"));

        let context = handshake.connect().await.unwrap();
        assert_eq!(context.endpoint, "memory://test");
    }

    #[tokio::test]
    async fn test_session_handshake_failure_is_connect_failure() {
        let (connector, _listener) = MemoryConnector::new();
        connector.refuse_ready(true);
        let handshake = SessionHandshake::new(Arc::new(connector), TransportConfig::with_endpoint("memory://test"));

        let err = handshake.connect().await.unwrap_err();
        assert!(matches!(err, VoxError::ConnectFailure(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_over_refused_sessions_gives_up() {
        let (connector, _listener) = MemoryConnector::new();
        connector.refuse_ready(true);
        let connector = Arc::new(connector);
        let handle = ConnectionDriver::spawn(
            SessionHandshake::new(connector.clone(), TransportConfig::with_endpoint("memory://test")),
            &LifecycleConfig::default(),
        );

        handle.send(Command::Connect);
        let snapshot = handle
            .wait_until(|s| s.phase() == Phase::Disconnected && s.attempts > 0)
            .await
            .unwrap();
        assert_eq!(snapshot.attempts, 3);
        assert_eq!(connector.handshakes(), 3);

        handle.shutdown().await;
    }
}
