//! Connection state machine.
//!
//! `transition` is pure: it computes the next state and the side effects the
//! caller must perform. Running the effects (connect attempts, the retry
//! timer) is the driver's job.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    /// Pause after a failed attempt before the next one.
    Waiting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Disconnected => "disconnected",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
            Phase::Waiting => "waiting",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState<C> {
    pub phase: Phase,
    /// Failed attempts since the last CONNECT.
    pub retry_count: u32,
    pub max_retries: u32,
    /// Context of the established session.
    pub context: Option<C>,
    /// Reason of the most recent failed attempt.
    pub last_error: Option<String>,
}

impl<C> ConnectionState<C> {
    pub fn new(max_retries: u32) -> Self {
        Self {
            phase: Phase::Disconnected,
            retry_count: 0,
            max_retries,
            context: None,
            last_error: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

impl<C> Default for ConnectionState<C> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event<C> {
    Connect,
    Disconnect,
    Reconnect,
    /// The connect attempt produced a session.
    Succeeded(C),
    /// The connect attempt failed.
    Failed(String),
    /// The retry delay elapsed.
    RetryElapsed,
}

impl<C> Event<C> {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connect => "CONNECT",
            Event::Disconnect => "DISCONNECT",
            Event::Reconnect => "RECONNECT",
            Event::Succeeded(_) => "SUCCEEDED",
            Event::Failed(_) => "FAILED",
            Event::RetryElapsed => "RETRY_ELAPSED",
        }
    }
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    StartConnect,
    ScheduleRetry,
    CancelRetry,
    AbortConnect,
    GiveUp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition<C> {
    pub state: ConnectionState<C>,
    pub actions: Vec<Action>,
    /// False when the event was ignored in the current phase.
    pub changed: bool,
}

impl<C> Transition<C> {
    fn to(state: ConnectionState<C>, actions: Vec<Action>) -> Self {
        Self {
            state,
            actions,
            changed: true,
        }
    }
}

/// Compute the next state for `event`.
pub fn transition<C: Clone>(state: &ConnectionState<C>, event: Event<C>) -> Transition<C> {
    let mut next = state.clone();

    match (state.phase, event) {
        (Phase::Disconnected, Event::Connect) => {
            next.phase = Phase::Connecting;
            next.retry_count = 0;
            next.last_error = None;
            Transition::to(next, vec![Action::StartConnect])
        }
        (Phase::Connecting, Event::Succeeded(context)) => {
            next.phase = Phase::Connected;
            next.context = Some(context);
            next.last_error = None;
            Transition::to(next, vec![])
        }
        (Phase::Connecting, Event::Failed(reason)) => {
            next.phase = Phase::Waiting;
            next.retry_count = state.retry_count.saturating_add(1);
            next.last_error = Some(reason);
            Transition::to(next, vec![Action::ScheduleRetry])
        }
        (Phase::Connecting, Event::Disconnect) => {
            next.phase = Phase::Disconnected;
            next.retry_count = 0;
            next.context = None;
            Transition::to(next, vec![Action::AbortConnect])
        }
        (Phase::Connected, Event::Disconnect) => {
            next.phase = Phase::Disconnected;
            next.context = None;
            Transition::to(next, vec![])
        }
        (Phase::Connected, Event::Reconnect) => {
            next.phase = Phase::Connecting;
            next.context = None;
            Transition::to(next, vec![Action::StartConnect])
        }
        (Phase::Waiting, Event::RetryElapsed) => {
            if state.can_retry() {
                next.phase = Phase::Connecting;
                Transition::to(next, vec![Action::StartConnect])
            } else {
                next.phase = Phase::Disconnected;
                next.retry_count = 0;
                next.context = None;
                Transition::to(next, vec![Action::GiveUp])
            }
        }
        (Phase::Waiting, Event::Disconnect) => {
            next.phase = Phase::Disconnected;
            next.retry_count = 0;
            next.context = None;
            Transition::to(next, vec![Action::CancelRetry])
        }
        _ => Transition {
            state: next,
            actions: vec![],
            changed: false,
        },
    }
}
