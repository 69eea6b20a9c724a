//! Host Event Bus - host-originated envelopes to in-process listeners
//!
//! This module provides:
//! - Listener registry keyed by monotonically assigned handles
//! - Decode and key check before every delivery
//! - Host capability queries
//! - A bridge pumping envelopes off the host pipe

pub mod bridge;
pub mod capability;
pub mod envelope;
pub mod event;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::codec::{CodecRegistry, Message, MessageCodec};
use crate::error::{Result, VoxError};

pub use bridge::{BusFault, HostBridge, PumpStats};
pub use capability::Capabilities;
pub use envelope::{Envelope, EnvelopeCodec};
pub use event::HostEvent;

/// Event container type decoded from every envelope payload.
pub trait EventContainer: Message {
    /// Key naming which kind of event this value is.
    fn key(&self) -> &str;
}

/// Returned by [`HostEventBus::on`]; pass to [`HostEventBus::off`] to
/// unregister.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerToken {
    handle: u64,
    key: String,
}

impl ListenerToken {
    /// Handle the host addresses envelopes to.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Result of dispatching one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// No listener for the handle; the envelope was dropped.
    NoListener,
}

type Callback<E> = Arc<dyn Fn(E) + Send + Sync>;

struct Registration<E> {
    key: String,
    callback: Callback<E>,
}

/// Dispatches host envelopes to the listener registered for their handle.
pub struct HostEventBus<E> {
    codec: Arc<MessageCodec<E>>,
    capabilities: Capabilities,
    next_handle: AtomicU64,
    listeners: RwLock<HashMap<u64, Registration<E>>>,
}

impl<E: EventContainer> HostEventBus<E> {
    /// Create a bus decoding payloads with the codec registered for `E`.
    pub fn new(registry: &CodecRegistry, capabilities: Capabilities) -> Result<Self> {
        Ok(Self {
            codec: registry.lookup::<E>(E::TYPE_KEY)?,
            capabilities,
            next_handle: AtomicU64::new(1),
            listeners: RwLock::new(HashMap::new()),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<u64, Registration<E>>> {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u64, Registration<E>>> {
        self.listeners.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for events keyed `key`. Every call gets its own
    /// handle; handles are never reused.
    pub fn on<F>(&self, key: impl Into<String>, callback: F) -> ListenerToken
    where
        F: Fn(E) + Send + Sync + 'static,
    {
        let key = key.into();
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.write().insert(
            handle,
            Registration {
                key: key.clone(),
                callback: Arc::new(callback),
            },
        );
        log::debug!("Listener {} registered for {:?}", handle, key);
        ListenerToken { handle, key }
    }

    /// Unregister a listener. Returns false if it was already removed.
    pub fn off(&self, token: &ListenerToken) -> bool {
        let removed = self.write().remove(&token.handle).is_some();
        if removed {
            log::debug!("Listener {} removed", token.handle);
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.read().len()
    }

    /// Decode `envelope` and hand it to its listener.
    ///
    /// Unknown handles are dropped. A decoded key that differs from the
    /// listener's key is a protocol violation: the callback is not invoked
    /// and `EventKeyMismatch` is returned.
    pub fn dispatch(&self, envelope: &Envelope) -> Result<Dispatch> {
        let (expected, callback) = match self.read().get(&envelope.handle) {
            Some(registration) => (registration.key.clone(), Arc::clone(&registration.callback)),
            None => {
                log::debug!("Dropping envelope for unknown handle {}", envelope.handle);
                return Ok(Dispatch::NoListener);
            }
        };

        let event = self.codec.decode(&envelope.payload)?;

        if event.key() != expected {
            return Err(VoxError::EventKeyMismatch {
                handle: envelope.handle,
                expected,
                actual: event.key().to_string(),
            });
        }

        // Invoked outside the lock so the callback may call on/off.
        callback(event);
        Ok(Dispatch::Delivered)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn is_host(&self) -> bool {
        self.capabilities.is_host()
    }

    pub fn is_host_macos(&self) -> bool {
        self.capabilities.is_host_macos()
    }

    pub fn is_host_windows(&self) -> bool {
        self.capabilities.is_host_windows()
    }

    pub fn is_host_mobile(&self) -> bool {
        self.capabilities.is_host_mobile()
    }
}

impl<E> std::fmt::Debug for HostEventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEventBus")
            .field("capabilities", &self.capabilities)
            .field("next_handle", &self.next_handle)
            .finish()
    }
}
