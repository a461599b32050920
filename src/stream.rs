//! Typed streaming events.

use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::Outcome;

/// A lazy, single-consumer sequence of events: zero or more `Ok` items,
/// then either the end of the stream or exactly one `Err`.
pub type EventStream = BoxStream<'static, Outcome<StreamEvent>>;

/// One decoded `data:` payload, routed by its `type` field.
///
/// Each variant keeps the full JSON object it was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart(Value),
    MessageDelta(Value),
    MessageStop(Value),
    ContentBlockStart(Value),
    ContentBlockDelta(Value),
    ContentBlockStop(Value),
    Ping(Value),
    /// An error reported in-band by the server. Delivered as an event; the
    /// stream itself keeps going.
    Error(Value),
    Unknown { event_type: String, payload: Value },
}

impl StreamEvent {
    /// Route a JSON object by its `type`. Returns `None` when there is no
    /// string `type` to route on.
    pub fn from_value(payload: Value) -> Option<Self> {
        let event_type = payload.get("type")?.as_str()?.to_string();
        let event = match event_type.as_str() {
            "message_start" => StreamEvent::MessageStart(payload),
            "message_delta" => StreamEvent::MessageDelta(payload),
            "message_stop" => StreamEvent::MessageStop(payload),
            "content_block_start" => StreamEvent::ContentBlockStart(payload),
            "content_block_delta" => StreamEvent::ContentBlockDelta(payload),
            "content_block_stop" => StreamEvent::ContentBlockStop(payload),
            "ping" => StreamEvent::Ping(payload),
            "error" => StreamEvent::Error(payload),
            _ => StreamEvent::Unknown {
                event_type,
                payload,
            },
        };
        Some(event)
    }

    pub fn event_type(&self) -> &str {
        match self {
            StreamEvent::MessageStart(_) => "message_start",
            StreamEvent::MessageDelta(_) => "message_delta",
            StreamEvent::MessageStop(_) => "message_stop",
            StreamEvent::ContentBlockStart(_) => "content_block_start",
            StreamEvent::ContentBlockDelta(_) => "content_block_delta",
            StreamEvent::ContentBlockStop(_) => "content_block_stop",
            StreamEvent::Ping(_) => "ping",
            StreamEvent::Error(_) => "error",
            StreamEvent::Unknown { event_type, .. } => event_type,
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            StreamEvent::MessageStart(p)
            | StreamEvent::MessageDelta(p)
            | StreamEvent::MessageStop(p)
            | StreamEvent::ContentBlockStart(p)
            | StreamEvent::ContentBlockDelta(p)
            | StreamEvent::ContentBlockStop(p)
            | StreamEvent::Ping(p)
            | StreamEvent::Error(p) => p,
            StreamEvent::Unknown { payload, .. } => payload,
        }
    }

    /// Text carried by a `content_block_delta`, if any.
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            StreamEvent::ContentBlockDelta(p) => p.get("delta")?.get("text")?.as_str(),
            _ => None,
        }
    }
}
