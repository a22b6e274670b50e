//! Conversation turns
//!
//! A `Turn` is one entry of an execution's conversational memory. The kind
//! is the enum discriminant, so every consumer dispatches with a `match`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant of a [`Turn`], for filtering and counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    System,
    Human,
    Ai,
    Tool,
    BrowserState,
}

impl fmt::Display for TurnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnKind::System => write!(f, "system"),
            TurnKind::Human => write!(f, "human"),
            TurnKind::Ai => write!(f, "ai"),
            TurnKind::Tool => write!(f, "tool"),
            TurnKind::BrowserState => write!(f, "browser_state"),
        }
    }
}

/// Tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// Tool result payload: plain text or structured JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Structured(serde_json::Value),
}

impl TurnContent {
    /// Render as text (structured payloads are serialized as compact JSON)
    pub fn as_text(&self) -> String {
        match self {
            TurnContent::Text(text) => text.clone(),
            TurnContent::Structured(value) => value.to_string(),
        }
    }
}

impl From<String> for TurnContent {
    fn from(s: String) -> Self {
        TurnContent::Text(s)
    }
}

impl From<&str> for TurnContent {
    fn from(s: &str) -> Self {
        TurnContent::Text(s.to_string())
    }
}

impl From<serde_json::Value> for TurnContent {
    fn from(v: serde_json::Value) -> Self {
        TurnContent::Structured(v)
    }
}

/// One conversational turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    System {
        content: String,
    },
    Human {
        content: String,
    },
    Ai {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: TurnContent,
    },
    BrowserState {
        content: String,
    },
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Turn::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Turn::Human {
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Turn::Ai {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn ai_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Turn::Ai {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<TurnContent>) -> Self {
        Turn::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn browser_state(content: impl Into<String>) -> Self {
        Turn::BrowserState {
            content: content.into(),
        }
    }

    pub fn kind(&self) -> TurnKind {
        match self {
            Turn::System { .. } => TurnKind::System,
            Turn::Human { .. } => TurnKind::Human,
            Turn::Ai { .. } => TurnKind::Ai,
            Turn::Tool { .. } => TurnKind::Tool,
            Turn::BrowserState { .. } => TurnKind::BrowserState,
        }
    }

    /// Text content of the turn
    pub fn text(&self) -> String {
        match self {
            Turn::System { content }
            | Turn::Human { content }
            | Turn::Ai { content, .. }
            | Turn::BrowserState { content } => content.clone(),
            Turn::Tool { content, .. } => content.as_text(),
        }
    }

    /// Tool calls attached to an AI turn
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Turn::Ai { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Turn::Tool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// Character length of the content, as counted by token estimation
    pub fn content_chars(&self) -> usize {
        match self {
            Turn::System { content }
            | Turn::Human { content }
            | Turn::Ai { content, .. }
            | Turn::BrowserState { content } => content.chars().count(),
            Turn::Tool { content, .. } => match content {
                TurnContent::Text(text) => text.chars().count(),
                TurnContent::Structured(value) => value.to_string().chars().count(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_dispatch() {
        assert_eq!(Turn::system("s").kind(), TurnKind::System);
        assert_eq!(Turn::human("h").kind(), TurnKind::Human);
        assert_eq!(Turn::ai("a").kind(), TurnKind::Ai);
        assert_eq!(Turn::tool("call-1", "ok").kind(), TurnKind::Tool);
        assert_eq!(Turn::browser_state("page").kind(), TurnKind::BrowserState);
    }

    #[test]
    fn test_tool_calls_only_on_ai() {
        let call = ToolCall::new("c1", "navigate", serde_json::json!({"url": "https://a3s.dev"}));
        let ai = Turn::ai_with_tool_calls("", vec![call.clone()]);
        assert_eq!(ai.tool_calls(), &[call]);
        assert!(Turn::human("hi").tool_calls().is_empty());
    }

    #[test]
    fn test_structured_tool_content() {
        let turn = Turn::tool("c1", serde_json::json!({"ok": true}));
        assert_eq!(turn.text(), r#"{"ok":true}"#);
        assert_eq!(turn.tool_call_id(), Some("c1"));
        assert_eq!(turn.content_chars(), 11);
    }

    #[test]
    fn test_serde_tagging() {
        let turn = Turn::browser_state("Tab 1: example.com");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["kind"], "browser_state");
        assert_eq!(json["content"], "Tab 1: example.com");

        let ai: Turn = serde_json::from_str(r#"{"kind":"ai","content":"thinking"}"#).unwrap();
        assert_eq!(ai, Turn::ai("thinking"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(TurnKind::BrowserState.to_string(), "browser_state");
        assert_eq!(TurnKind::Ai.to_string(), "ai");
    }
}
