//! Built-in completion signal

use super::{Tool, ToolOutput};
use crate::context::ExecutionContext;
use async_trait::async_trait;

/// Ends the current attempt; the control loop recognises it by name
pub struct DoneTool {
    name: String,
}

impl DoneTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for DoneTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Call when the task is finished. Provide a short summary of the result for the user."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "What was accomplished"
                }
            },
            "required": ["summary"]
        })
    }

    async fn execute(
        &self,
        args: &serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<ToolOutput> {
        let summary = args
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("Task completed");
        Ok(ToolOutput::success(summary))
    }
}
