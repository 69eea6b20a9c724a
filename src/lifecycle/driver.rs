//! Runs the connection state machine on a tokio task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use super::machine::{Action, ConnectionState, Event, Phase, transition};
use crate::config::LifecycleConfig;
use crate::error::Result;

/// The external connect operation.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// What a successful attempt produces.
    type Context: Clone + Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Context>;
}

/// Caller-issued lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    Reconnect,
}

impl<C> From<Command> for Event<C> {
    fn from(command: Command) -> Self {
        match command {
            Command::Connect => Event::Connect,
            Command::Disconnect => Event::Disconnect,
            Command::Reconnect => Event::Reconnect,
        }
    }
}

/// Published after every state change.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot<C> {
    pub state: ConnectionState<C>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Connect attempts started over the driver's lifetime.
    pub attempts: u64,
}

impl<C> ConnectionSnapshot<C> {
    pub fn phase(&self) -> Phase {
        self.state.phase
    }
}

/// Handle to a running [`ConnectionDriver`].
pub struct ConnectionHandle<C> {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionSnapshot<C>>,
    task: JoinHandle<()>,
}

impl<C: Clone> ConnectionHandle<C> {
    /// Queue a command. Returns false once the driver has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot<C>> {
        self.state.clone()
    }

    pub fn state(&self) -> ConnectionSnapshot<C> {
        self.state.borrow().clone()
    }

    /// Wait until a published snapshot satisfies `predicate`. Returns None if
    /// the driver stops first.
    pub async fn wait_until<F>(&self, mut predicate: F) -> Option<ConnectionSnapshot<C>>
    where
        F: FnMut(&ConnectionSnapshot<C>) -> bool,
    {
        let mut rx = self.state.clone();
        let snapshot = match rx.wait_for(|snapshot| predicate(snapshot)).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => return None,
        };
        Some(snapshot)
    }

    /// Stop the driver, dropping any attempt or timer in flight.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            log::error!("Connection driver panicked: {}", e);
        }
    }
}

type Attempt<C> = Pin<Box<dyn Future<Output = Result<C>> + Send>>;

/// Owns the machine state and its pending side effects.
pub struct ConnectionDriver<K: Connector> {
    connector: Arc<K>,
    retry_delay: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    publish: watch::Sender<ConnectionSnapshot<K::Context>>,
    current: ConnectionState<K::Context>,
    connected_at: Option<DateTime<Utc>>,
    attempts: u64,
    attempt: Option<Attempt<K::Context>>,
    timer: Option<Pin<Box<Sleep>>>,
}

impl<K: Connector> ConnectionDriver<K> {
    /// Spawn the driver in `disconnected`.
    pub fn spawn(connector: K, config: &LifecycleConfig) -> ConnectionHandle<K::Context> {
        let current = ConnectionState::new(config.max_retries);
        let (publish, state) = watch::channel(ConnectionSnapshot {
            state: current.clone(),
            connected_at: None,
            attempts: 0,
        });
        let (commands_tx, commands) = mpsc::unbounded_channel();

        let driver = Self {
            connector: Arc::new(connector),
            retry_delay: config.retry_delay(),
            commands,
            publish,
            current,
            connected_at: None,
            attempts: 0,
            attempt: None,
            timer: None,
        };

        ConnectionHandle {
            commands: commands_tx,
            state,
            task: tokio::spawn(driver.run()),
        }
    }

    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Event::from(command),
                    None => break,
                },
                outcome = maybe(&mut self.attempt) => match outcome {
                    Ok(context) => Event::Succeeded(context),
                    Err(e) => Event::Failed(e.to_string()),
                },
                _ = maybe(&mut self.timer) => Event::RetryElapsed,
            };
            self.apply(event);
        }
        log::debug!("Connection driver stopped in {}", self.current.phase);
    }

    fn apply(&mut self, event: Event<K::Context>) {
        match event {
            Event::Succeeded(_) | Event::Failed(_) => self.attempt = None,
            Event::RetryElapsed => self.timer = None,
            _ => {}
        }

        let name = event.name();
        let from = self.current.phase;
        let next = transition(&self.current, event);
        if !next.changed {
            log::debug!("Ignoring {} in {}", name, from);
            return;
        }

        for action in &next.actions {
            match action {
                Action::StartConnect => {
                    self.attempts += 1;
                    let connector = Arc::clone(&self.connector);
                    self.attempt = Some(Box::pin(async move { connector.connect().await }));
                }
                Action::ScheduleRetry => {
                    self.timer = Some(Box::pin(tokio::time::sleep(self.retry_delay)));
                }
                Action::CancelRetry => self.timer = None,
                Action::AbortConnect => self.attempt = None,
                Action::GiveUp => {
                    tracing::warn!(
                        max_retries = next.state.max_retries,
                        last_error = next.state.last_error.as_deref().unwrap_or(""),
                        "Giving up on connection"
                    );
                }
            }
        }

        self.current = next.state;
        self.connected_at = match self.current.phase {
            Phase::Connected if from != Phase::Connected => Some(Utc::now()),
            Phase::Connected => self.connected_at,
            _ => None,
        };

        tracing::info!(
            from = %from,
            to = %self.current.phase,
            retry_count = self.current.retry_count,
            "Connection state changed"
        );

        self.publish.send_replace(ConnectionSnapshot {
            state: self.current.clone(),
            connected_at: self.connected_at,
            attempts: self.attempts,
        });
    }
}

async fn maybe<F: Future + Unpin>(slot: &mut Option<F>) -> F::Output {
    match slot {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}
