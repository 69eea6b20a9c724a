//! One outstanding remote invocation and its response sequence.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::transport::method::Metadata;

/// Lifecycle of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Request sent, no response frame yet.
    Pending,
    /// At least one response decoded.
    Streaming,
    /// Stream ended with an OK status.
    Completed,
    /// Transport, decode or peer error.
    Errored,
    /// Consumer abandoned the call.
    Cancelled,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Errored | CallStatus::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CallState {
    pub status: CallStatus,
    pub trailers: Metadata,
}

/// Writer side of a call's status. Terminal states are sticky.
pub(crate) struct CallStateWriter {
    tx: watch::Sender<CallState>,
}

impl CallStateWriter {
    pub fn channel() -> (Self, watch::Receiver<CallState>) {
        let (tx, rx) = watch::channel(CallState {
            status: CallStatus::Pending,
            trailers: Metadata::new(),
        });
        (Self { tx }, rx)
    }

    /// Move to `status` unless already terminal.
    pub fn advance(&self, status: CallStatus) -> bool {
        self.tx.send_if_modified(|state| {
            if state.status.is_terminal() || state.status == status {
                return false;
            }
            state.status = status;
            true
        })
    }

    /// Move to a terminal status and record trailers, unless already terminal.
    pub fn finish(&self, status: CallStatus, trailers: Metadata) -> bool {
        debug_assert!(status.is_terminal());
        self.tx.send_if_modified(|state| {
            if state.status.is_terminal() {
                return false;
            }
            state.status = status;
            state.trailers = trailers;
            true
        })
    }
}

/// Handle to a streaming call.
///
/// Yields decoded responses in the order the peer wrote them. The first
/// error ends the sequence; nothing is yielded after it. Dropping the call
/// cancels it and releases the underlying stream.
pub struct Call<O> {
    method: &'static str,
    receiver: mpsc::Receiver<Result<O>>,
    state: watch::Receiver<CallState>,
    done: bool,
}

impl<O> Unpin for Call<O> {}

impl<O> Call<O> {
    pub(crate) fn new(
        method: &'static str,
        receiver: mpsc::Receiver<Result<O>>,
        state: watch::Receiver<CallState>,
    ) -> Self {
        Self {
            method,
            receiver,
            state,
            done: false,
        }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn status(&self) -> CallStatus {
        self.state.borrow().status
    }

    /// Response headers. This transport has no header phase, so always empty.
    pub fn headers(&self) -> Metadata {
        Metadata::new()
    }

    /// Trailing metadata, available once the call reached a terminal state.
    ///
    /// Responses are buffered with bounded capacity, so a peer that streams
    /// more than the buffer holds only finishes once the responses are read.
    pub async fn trailers(&self) -> Metadata {
        let mut state = self.state.clone();
        if let Ok(s) = state.wait_for(|s| s.status.is_terminal()).await {
            return s.trailers.clone();
        }
        // Reader task is gone; report whatever it recorded.
        state.borrow().trailers.clone()
    }

    /// Next response, `None` once the sequence ended.
    pub async fn message(&mut self) -> Option<Result<O>> {
        self.next().await
    }

    /// Drain the call, failing on the first error.
    pub async fn collect_all(mut self) -> Result<Vec<O>> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await {
            out.push(item?);
        }
        Ok(out)
    }

    /// Abandon the call. The reader task observes the closed channel and
    /// releases the stream.
    pub fn cancel(&mut self) {
        self.receiver.close();
        self.done = true;
    }
}

impl<O> Stream for Call<O> {
    type Item = Result<O>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<O> std::fmt::Debug for Call<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.method)
            .field("status", &self.status())
            .finish()
    }
}
