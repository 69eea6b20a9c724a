//! Default host event container.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::bus::EventContainer;
use crate::codec::Message;
use crate::error::{Result, VoxError};

/// A host event: the key names the variant, `data` carries its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEvent {
    pub key: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl HostEvent {
    pub fn new(key: impl Into<String>, data: serde_json::Value) -> Self {
        Self { key: key.into(), data }
    }

    /// Decode `data` into the shape the listener expects.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| VoxError::MalformedPayload(format!("{} data: {}", self.key, e)))
    }
}

impl Message for HostEvent {
    const TYPE_KEY: &'static str = "host.Event";
}

impl EventContainer for HostEvent {
    fn key(&self) -> &str {
        &self.key
    }
}
