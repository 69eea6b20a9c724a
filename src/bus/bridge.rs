//! Pumps envelopes from the host pipe into a [`HostEventBus`].

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use super::envelope::{Envelope, EnvelopeCodec};
use super::{Dispatch, EventContainer, HostEventBus};
use crate::error::{Result, VoxError};

const PAYLOAD_PREVIEW: usize = 16;

/// A protocol violation observed while dispatching, forwarded to whoever
/// supervises the host session.
#[derive(Debug)]
pub struct BusFault {
    pub handle: u64,
    pub error: VoxError,
}

/// Counters for one pump run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub delivered: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub faults: u64,
}

pub struct HostBridge<E> {
    bus: Arc<HostEventBus<E>>,
    faults: mpsc::UnboundedSender<BusFault>,
}

impl<E: EventContainer> HostBridge<E> {
    /// Create a bridge; faults are reported on the returned receiver.
    pub fn new(bus: Arc<HostEventBus<E>>) -> (Self, mpsc::UnboundedReceiver<BusFault>) {
        let (faults, rx) = mpsc::unbounded_channel();
        (Self { bus, faults }, rx)
    }

    pub fn bus(&self) -> &Arc<HostEventBus<E>> {
        &self.bus
    }

    /// Read envelopes until EOF. Framing errors end the pump; payload
    /// errors are logged and skipped.
    pub async fn pump<R>(&self, reader: R) -> Result<PumpStats>
    where
        R: AsyncRead + Unpin,
    {
        let mut envelopes = FramedRead::new(reader, EnvelopeCodec::new());
        let mut stats = PumpStats::default();

        while let Some(envelope) = envelopes.next().await {
            self.deliver(envelope?, &mut stats);
        }

        log::info!(
            "Host pipe closed: delivered={} dropped={} malformed={} faults={}",
            stats.delivered,
            stats.dropped,
            stats.malformed,
            stats.faults
        );
        Ok(stats)
    }

    /// Same as [`pump`](Self::pump) for envelopes already split off the pipe.
    pub async fn pump_envelopes(&self, mut rx: mpsc::Receiver<Envelope>) -> PumpStats {
        let mut stats = PumpStats::default();
        while let Some(envelope) = rx.recv().await {
            self.deliver(envelope, &mut stats);
        }
        stats
    }

    fn deliver(&self, envelope: Envelope, stats: &mut PumpStats) {
        match self.bus.dispatch(&envelope) {
            Ok(Dispatch::Delivered) => stats.delivered += 1,
            Ok(Dispatch::NoListener) => stats.dropped += 1,
            Err(VoxError::MalformedPayload(reason)) => {
                stats.malformed += 1;
                let preview = &envelope.payload[..envelope.payload.len().min(PAYLOAD_PREVIEW)];
                log::warn!(
                    "Malformed payload for handle {} ({} bytes, starts {}): {}",
                    envelope.handle,
                    envelope.payload.len(),
                    hex::encode(preview),
                    reason
                );
            }
            Err(error) => {
                stats.faults += 1;
                log::error!("Protocol violation on handle {}: {}", envelope.handle, error);
                // Nobody supervising is fine; the fault has been logged.
                let _ = self.faults.send(BusFault {
                    handle: envelope.handle,
                    error,
                });
            }
        }
    }
}
