//! Wire model.
//!
//! Routed events travel as a JSON [`Envelope`] `{"event": {...}, "metadata": {...}}`.
//! Direct sends carry either raw text or a JSON document.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque key/value data travelling alongside an event.
pub type Metadata = Map<String, Value>;

/// An application event.
///
/// `name` selects the routing topic and `event_type` the exchange; any other
/// fields ride along in `payload` and are flattened onto the wire object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(name: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            event_type: event_type.into(),
            payload: Map::new(),
        }
    }

    /// Attach a payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// Canonical routed message shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: Event,
    #[serde(default)]
    pub metadata: Metadata,
}

pub fn encode_envelope(event: &Event, metadata: &Metadata) -> serde_json::Result<Vec<u8>> {
    #[derive(Serialize)]
    struct EnvelopeRef<'a> {
        event: &'a Event,
        metadata: &'a Metadata,
    }

    serde_json::to_vec(&EnvelopeRef { event, metadata })
}

pub fn decode_envelope(data: &[u8]) -> serde_json::Result<Envelope> {
    serde_json::from_slice(data)
}

/// Encode a direct payload: strings pass through as text, everything else is JSON.
pub fn encode_direct<T: Serialize + ?Sized>(payload: &T) -> serde_json::Result<Vec<u8>> {
    match serde_json::to_value(payload)? {
        Value::String(text) => Ok(text.into_bytes()),
        other => serde_json::to_vec(&other),
    }
}

/// A message received on a direct queue.
#[derive(Debug, Clone)]
pub struct DirectMessage {
    pub queue: String,
    pub data: Vec<u8>,
}

impl DirectMessage {
    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Body decoded as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.data)
    }
}
