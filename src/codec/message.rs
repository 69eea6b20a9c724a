//! Tagged message encoding.
//!
//! Every message body carries its type key next to the value:
//!
//! ```text
//! {"type": "<TYPE_KEY>", "value": <serialized value>}
//! ```
//!
//! Decoding checks the tag against the codec's key before touching the value,
//! so a body meant for another type is rejected instead of misread.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxError};

/// A value that can travel through the codec adapter.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Type identifier embedded in every encoded body.
    const TYPE_KEY: &'static str;
}

#[derive(Serialize)]
struct TaggedRef<'a, T> {
    #[serde(rename = "type")]
    type_key: &'a str,
    value: &'a T,
}

#[derive(Deserialize)]
struct Tagged {
    #[serde(rename = "type")]
    type_key: String,
    value: serde_json::Value,
}

/// Encoder/decoder pair for one message type.
pub struct MessageCodec<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Message> MessageCodec<T> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }

    /// The type key this codec writes and accepts.
    pub fn type_key(&self) -> &'static str {
        T::TYPE_KEY
    }

    /// Serialize a value into a tagged body.
    pub fn encode(&self, value: &T) -> Result<Vec<u8>> {
        let tagged = TaggedRef {
            type_key: T::TYPE_KEY,
            value,
        };
        Ok(serde_json::to_vec(&tagged)?)
    }

    /// Deserialize a tagged body, failing with `MalformedPayload` on
    /// truncated input or an unrecognized tag.
    pub fn decode(&self, bytes: &[u8]) -> Result<T> {
        let tagged: Tagged = serde_json::from_slice(bytes)
            .map_err(|e| VoxError::MalformedPayload(format!("{}: {}", T::TYPE_KEY, e)))?;

        if tagged.type_key != T::TYPE_KEY {
            return Err(VoxError::MalformedPayload(format!(
                "unrecognized tag {:?}, expected {:?}",
                tagged.type_key,
                T::TYPE_KEY
            )));
        }

        serde_json::from_value(tagged.value)
            .map_err(|e| VoxError::MalformedPayload(format!("{}: {}", T::TYPE_KEY, e)))
    }
}

impl<T: Message> Default for MessageCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MessageCodec<T> {
    fn clone(&self) -> Self {
        Self { _phantom: PhantomData }
    }
}

impl<T> std::fmt::Debug for MessageCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCodec")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
