//! Codec registry keyed by type identifier.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::message::{Message, MessageCodec};
use crate::error::{Result, VoxError};

/// Registry of message codecs.
///
/// Built once at startup and shared read-only (`Arc<CodecRegistry>`) by the
/// transport and the host bus.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the codec for `T` under `T::TYPE_KEY`. Re-registering a key
    /// replaces the previous codec.
    pub fn register<T: Message>(&mut self) -> &mut Self {
        self.codecs
            .insert(T::TYPE_KEY, Arc::new(MessageCodec::<T>::new()));
        self
    }

    /// Builder-style registration.
    pub fn with<T: Message>(mut self) -> Self {
        self.register::<T>();
        self
    }

    /// Look up the codec registered under `type_key`, typed as `T`.
    pub fn lookup<T: Message>(&self, type_key: &str) -> Result<Arc<MessageCodec<T>>> {
        let codec = self
            .codecs
            .get(type_key)
            .ok_or_else(|| VoxError::UnknownCodec(type_key.to_string()))?;

        Arc::clone(codec)
            .downcast::<MessageCodec<T>>()
            .map_err(|_| {
                VoxError::UnknownCodec(format!(
                    "{} is not registered for {}",
                    type_key,
                    std::any::type_name::<T>()
                ))
            })
    }

    pub fn contains(&self, type_key: &str) -> bool {
        self.codecs.contains_key(type_key)
    }

    /// Registered type keys, sorted.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.codecs.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
