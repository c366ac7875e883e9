//! Outward event stream
//!
//! A run emits zero or more `delta` events followed by exactly one terminal
//! `done` or `error` event, unless it is cancelled, in which case the stream
//! simply ends. On the wire each event is one SSE block:
//!
//! ```text
//! event: message
//! data: {"type":"delta","text":"he"}
//!
//! ```
//!
//! The `type` field of the payload is authoritative; the SSE event name is
//! `message` for deltas and `meta` for terminal events.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutEvent {
    Delta { text: String },
    Error { message: String },
    Done,
}

impl OutEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        OutEvent::Delta { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OutEvent::Error {
            message: message.into(),
        }
    }

    /// SSE event name
    pub fn event_name(&self) -> &'static str {
        match self {
            OutEvent::Delta { .. } => "message",
            OutEvent::Error { .. } | OutEvent::Done => "meta",
        }
    }

    /// Encode as one SSE block, blank-line terminated. The `data:` line is
    /// the serde form of the event.
    pub fn to_sse(&self) -> String {
        // Only string fields, so serialization cannot fail
        let data = serde_json::to_string(self).unwrap_or_default();
        format!("event: {}\ndata: {}\n\n", self.event_name(), data)
    }

    /// Decode one SSE block, dispatching on the payload's `type` field
    pub fn from_sse(frame: &str) -> Result<Self, serde_json::Error> {
        let data: String = frame
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect::<Vec<_>>()
            .join("\n");
        serde_json::from_str(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shapes() {
        assert_eq!(
            serde_json::to_string(&OutEvent::delta("he")).unwrap(),
            r#"{"type":"delta","text":"he"}"#
        );
        assert_eq!(
            serde_json::to_string(&OutEvent::error("boom")).unwrap(),
            r#"{"type":"error","message":"boom"}"#
        );
        assert_eq!(serde_json::to_string(&OutEvent::Done).unwrap(), r#"{"type":"done"}"#);
    }

    #[test]
    fn test_sse_framing() {
        let frame = OutEvent::delta("hi").to_sse();
        assert!(frame.starts_with("event: message\ndata: {"), "got: {:?}", frame);
        assert!(frame.ends_with("}\n\n"));
        assert_eq!(frame.matches('\n').count(), 3);
        assert_eq!(OutEvent::from_sse(&frame).unwrap(), OutEvent::delta("hi"));

        assert_eq!(OutEvent::Done.to_sse(), "event: meta\ndata: {\"type\":\"done\"}\n\n");
    }

    #[test]
    fn test_sse_data_is_serde_form() {
        for event in [OutEvent::delta("x\ny"), OutEvent::error("e"), OutEvent::Done] {
            let data = serde_json::to_string(&event).unwrap();
            let expected = format!("event: {}\ndata: {}\n\n", event.event_name(), data);
            assert_eq!(event.to_sse(), expected);
        }
    }

    #[test]
    fn test_from_sse_uses_payload_type() {
        let frame = "event: meta\ndata: {\"type\":\"delta\",\"text\":\"a\\nb\"}\n\n";
        assert_eq!(OutEvent::from_sse(frame).unwrap(), OutEvent::delta("a\nb"));
    }
}
