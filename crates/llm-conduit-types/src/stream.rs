// Canonical stream events: the provider-agnostic protocol emitted to consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};
use crate::response::{Citation, FinishReason, Usage};
use crate::tool::{ToolCall, ToolResult};

/// Fieldless discriminant of [`StreamEventKind`], handy for ordering checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamEventType {
    StreamStart,
    TextStart,
    TextDelta,
    TextComplete,
    ThinkingStart,
    ThinkingDelta,
    ThinkingComplete,
    ToolCall,
    ToolResult,
    Citation,
    ProviderToolEvent,
    StepFinish,
    Error,
    StreamEnd,
}

/// Payload of a canonical event. Closed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamEventKind {
    StreamStart {
        model: String,
        provider: String,
        #[serde(default)]
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    TextStart {
        message_id: String,
    },
    TextDelta {
        delta: String,
        message_id: String,
    },
    TextComplete {
        message_id: String,
    },
    ThinkingStart {
        reasoning_id: String,
    },
    ThinkingDelta {
        delta: String,
        reasoning_id: String,
    },
    ThinkingComplete {
        reasoning_id: String,
    },
    ToolCall {
        tool_call: ToolCall,
        message_id: String,
    },
    ToolResult {
        tool_result: ToolResult,
        message_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Citation {
        citation: Citation,
        message_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        block_index: Option<u64>,
    },
    /// Progress of a tool the provider runs on its side (web search, code interpreter).
    ProviderToolEvent {
        tool_type: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        #[serde(default)]
        data: serde_json::Value,
    },
    StepFinish {},
    Error {
        error_type: ErrorKind,
        message: String,
        recoverable: bool,
    },
    StreamEnd {
        finish_reason: FinishReason,
        usage: Usage,
    },
}

impl StreamEventKind {
    pub fn event_type(&self) -> StreamEventType {
        match self {
            Self::StreamStart { .. } => StreamEventType::StreamStart,
            Self::TextStart { .. } => StreamEventType::TextStart,
            Self::TextDelta { .. } => StreamEventType::TextDelta,
            Self::TextComplete { .. } => StreamEventType::TextComplete,
            Self::ThinkingStart { .. } => StreamEventType::ThinkingStart,
            Self::ThinkingDelta { .. } => StreamEventType::ThinkingDelta,
            Self::ThinkingComplete { .. } => StreamEventType::ThinkingComplete,
            Self::ToolCall { .. } => StreamEventType::ToolCall,
            Self::ToolResult { .. } => StreamEventType::ToolResult,
            Self::Citation { .. } => StreamEventType::Citation,
            Self::ProviderToolEvent { .. } => StreamEventType::ProviderToolEvent,
            Self::StepFinish {} => StreamEventType::StepFinish,
            Self::Error { .. } => StreamEventType::Error,
            Self::StreamEnd { .. } => StreamEventType::StreamEnd,
        }
    }
}

/// One canonical event: a unique id, the instant it was produced, and its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: StreamEventKind,
}

impl StreamEvent {
    pub fn new(kind: StreamEventKind) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Error event mirroring a library error.
    pub fn from_error(error: &Error) -> Self {
        Self::new(StreamEventKind::Error {
            error_type: error.kind,
            message: error.message.clone(),
            recoverable: error.retryable,
        })
    }

    pub fn event_type(&self) -> StreamEventType {
        self.kind.event_type()
    }

    /// Text carried by a `TextDelta`, if this is one.
    pub fn text_delta(&self) -> Option<&str> {
        match &self.kind {
            StreamEventKind::TextDelta { delta, .. } => Some(delta),
            _ => None,
        }
    }
}

impl From<StreamEventKind> for StreamEvent {
    fn from(kind: StreamEventKind) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_ids_are_unique() {
        let a = StreamEvent::new(StreamEventKind::StepFinish {});
        let b = StreamEvent::new(StreamEventKind::StepFinish {});
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("evt_"));
    }

    #[test]
    fn test_stream_event_serializes_flat_with_type_tag() {
        let event = StreamEvent::new(StreamEventKind::TextDelta {
            delta: "Hi".into(),
            message_id: "msg_1".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TEXT_DELTA");
        assert_eq!(json["delta"], "Hi");
        assert_eq!(json["message_id"], "msg_1");
        assert!(json["timestamp"].is_string());
        let back: StreamEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_stream_end_roundtrip() {
        let event = StreamEvent::new(StreamEventKind::StreamEnd {
            finish_reason: FinishReason::Stop,
            usage: Usage::new(10, 3),
        });
        let json = serde_json::to_string(&event).unwrap();
        let back: StreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), StreamEventType::StreamEnd);
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_type_discriminant() {
        let event = StreamEvent::new(StreamEventKind::ThinkingStart {
            reasoning_id: "r1".into(),
        });
        assert_eq!(event.event_type(), StreamEventType::ThinkingStart);
        assert_eq!(event.text_delta(), None);
    }

    #[test]
    fn test_error_event_from_error() {
        let err = Error::from_http_status(529, "Overloaded".into(), "anthropic", None, None);
        let event = StreamEvent::from_error(&err);
        match event.kind {
            StreamEventKind::Error {
                error_type,
                recoverable,
                ..
            } => {
                assert_eq!(error_type, ErrorKind::Overloaded);
                assert!(recoverable);
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }
}
