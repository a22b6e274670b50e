//! Event types carried by scoped channels
//!
//! All types use camelCase JSON serialization so the UI side can consume
//! them without a translation layer.

use serde::{Deserialize, Serialize};

/// Who a UI message is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Intermediate agent reasoning or progress
    Thinking,
    /// Echo of user input
    User,
    /// Final or streamed assistant text
    Assistant,
    /// Unrecoverable failure
    Error,
    /// Short narration of what the agent is doing
    Narration,
}

/// A message rendered by the UI
///
/// Republishing with the same `msg_id` replaces the earlier content, which
/// is how streamed output grows a single bubble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
    pub msg_id: String,
    pub content: String,
    pub role: MessageRole,
    /// Unix timestamp in milliseconds
    pub ts: i64,
}

impl UiMessage {
    /// Create a message with a fresh id
    pub fn new(content: impl Into<String>, role: MessageRole) -> Self {
        Self::with_id(generate_msg_id(), content, role)
    }

    /// Create a message with a caller-chosen id
    pub fn with_id(msg_id: impl Into<String>, content: impl Into<String>, role: MessageRole) -> Self {
        Self {
            msg_id: msg_id.into(),
            content: content.into(),
            role,
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Agent asks a human to act before it continues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanInputRequest {
    pub request_id: String,
    pub prompt: String,
}

/// Decision returned by the human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanAction {
    /// The manual step is finished, resume
    Done,
    /// Stop the task
    Abort,
}

/// Human's answer to a [`HumanInputRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanInputResponse {
    pub request_id: String,
    pub action: HumanAction,
}

/// Envelope published on a scoped channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    Message(UiMessage),
    HumanInputRequest(HumanInputRequest),
    HumanInputResponse(HumanInputResponse),
}

impl Event {
    /// Message payload, if this is a message event
    pub fn as_message(&self) -> Option<&UiMessage> {
        match self {
            Event::Message(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Message(_) => "message",
            Event::HumanInputRequest(_) => "humanInputRequest",
            Event::HumanInputResponse(_) => "humanInputResponse",
        }
    }
}

/// Generate a UI message id (msg-<uuid>)
pub fn generate_msg_id() -> String {
    format!("msg-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = Event::Message(UiMessage::with_id("msg-1", "hello", MessageRole::Assistant));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["payload"]["msgId"], "msg-1");
        assert_eq!(json["payload"]["role"], "assistant");
    }

    #[test]
    fn test_human_input_response_parse() {
        let json = r#"{"type":"humanInputResponse","payload":{"requestId":"r-1","action":"abort"}}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            Event::HumanInputResponse(HumanInputResponse {
                request_id: "r-1".into(),
                action: HumanAction::Abort,
            })
        );
        assert_eq!(event.event_type(), "humanInputResponse");
        assert!(event.as_message().is_none());
    }

    #[test]
    fn test_generated_ids_unique() {
        let a = UiMessage::new("a", MessageRole::Thinking);
        let b = UiMessage::new("b", MessageRole::Thinking);
        assert!(a.msg_id.starts_with("msg-"));
        assert_ne!(a.msg_id, b.msg_id);
        assert!(a.ts > 0);
    }
}
