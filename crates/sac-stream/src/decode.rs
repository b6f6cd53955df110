//! Frame decoding: raw transport frames to typed application events.

use std::marker::PhantomData;

use serde::{Deserialize, de::DeserializeOwned};
use tracing::debug;

use crate::frame::Frame;

/// Decodes raw frames into typed events.
///
/// Malformed input returns `None` and is dropped: a single corrupt
/// server frame must never take down the client. Implementations must
/// not panic on arbitrary input.
pub trait FrameDecoder: Send + Sync + 'static {
    /// The decoded application-level event type.
    type Event: Send + 'static;

    /// Decode one frame, or discard it.
    fn decode(&self, frame: &Frame) -> Option<Self::Event>;
}

/// A watch event as the backend pushes it: a `type` discriminator, an
/// `action` (`progress`, `complete`, `error`, ...), and resource-specific
/// fields kept as raw JSON.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct WatchEvent {
    /// Event family, e.g. `skill_sync` or `workspace_output`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// What happened within the family.
    #[serde(default)]
    pub action: String,
    /// Remaining fields (`skill_id`, `step`, `message`, ...).
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Default decoder for `{type, action, ...fields}` JSON frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct WatchEventDecoder;

impl FrameDecoder for WatchEventDecoder {
    type Event = WatchEvent;

    fn decode(&self, frame: &Frame) -> Option<WatchEvent> {
        decode_json(frame)
    }
}

/// Decoder for caller-defined event types deserialized from JSON text
/// frames.
pub struct JsonDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameDecoder for JsonDecoder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Event = T;

    fn decode(&self, frame: &Frame) -> Option<T> {
        decode_json(frame)
    }
}

fn decode_json<T: DeserializeOwned>(frame: &Frame) -> Option<T> {
    let text = frame.as_text()?;
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(err) => {
            debug!(error = %err, "Discarding malformed frame");
            None
        }
    }
}
