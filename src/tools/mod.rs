//! Tool system
//!
//! Tools are opaque to the control loop: it looks at `ok`, `output`,
//! `error`, the done-tool name and the human-input signal, nothing else.
//! Browser automation tools (navigation, extraction, tabs) are supplied by
//! the embedding application; the runtime ships the two tools the loop
//! itself depends on.

mod done;
mod registry;
mod todo_manager;

pub use done::DoneTool;
pub use registry::ToolRegistry;
pub use todo_manager::TodoManagerTool;

use crate::context::ExecutionContext;
use crate::message::TurnContent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Name of the built-in todo tool
pub const TODO_MANAGER_TOOL: &str = "todo_manager";

/// Tool execution output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The tool cannot proceed until a human acts in the browser
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_human_input: bool,
    /// What the human is asked to do
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl ToolOutput {
    pub fn success(output: impl Into<serde_json::Value>) -> Self {
        Self {
            ok: true,
            output: Some(output.into()),
            error: None,
            requires_human_input: false,
            prompt: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: None,
            error: Some(message.into()),
            requires_human_input: false,
            prompt: None,
        }
    }

    /// Pause the loop until a human completes `prompt`
    pub fn human_input(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            ok: true,
            output: Some(serde_json::Value::String(prompt.clone())),
            error: None,
            requires_human_input: true,
            prompt: Some(prompt),
        }
    }

    /// Output rendered as text (strings unquoted)
    pub fn output_text(&self) -> Option<String> {
        self.output.as_ref().map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Content folded into history as the tool turn
    pub fn to_content(&self) -> TurnContent {
        match serde_json::to_value(self) {
            Ok(value) => TurnContent::Structured(value),
            Err(e) => TurnContent::Text(format!("unserializable tool output: {}", e)),
        }
    }
}

/// Tool trait - the core abstraction for all tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must be unique within registry)
    fn name(&self) -> &str;

    /// Human-readable description for LLM
    fn description(&self) -> &str;

    /// JSON Schema for tool parameters
    fn parameters(&self) -> serde_json::Value;

    /// Execute the tool with given arguments
    ///
    /// An `Err` is a tool failure; the registry folds it into a failed
    /// [`ToolOutput`] so it never escapes the call.
    async fn execute(
        &self,
        args: &serde_json::Value,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<ToolOutput>;
}
