//! Built-in tool the model uses to maintain its plan

use super::{Tool, ToolOutput, TODO_MANAGER_TOOL};
use crate::context::ExecutionContext;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum TodoAction {
    AddMultiple { todos: Vec<String> },
    Complete { ids: Vec<usize> },
    Skip { id: usize },
    List,
}

/// Reads and updates the execution's todo list
#[derive(Debug, Default)]
pub struct TodoManagerTool;

#[async_trait]
impl Tool for TodoManagerTool {
    fn name(&self) -> &str {
        TODO_MANAGER_TOOL
    }

    fn description(&self) -> &str {
        "Manage the task plan. Actions: add_multiple (todos), complete (ids), skip (id), list."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add_multiple", "complete", "skip", "list"]
                },
                "todos": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Steps to append (add_multiple)"
                },
                "ids": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "Steps to mark done (complete)"
                },
                "id": {
                    "type": "integer",
                    "description": "Step to remove (skip)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(
        &self,
        args: &serde_json::Value,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<ToolOutput> {
        let action: TodoAction = serde_json::from_value(args.clone())
            .map_err(|e| anyhow::anyhow!("invalid todo_manager arguments: {}", e))?;

        let mut todos = ctx.todos();
        let output = match action {
            TodoAction::AddMultiple { todos: items } => {
                let requested = items.len();
                let added = todos.add_multiple(items);
                if added < requested {
                    format!(
                        "Added {} of {} todos (list is full)\n{}",
                        added,
                        requested,
                        todos.to_markdown()
                    )
                } else {
                    format!("Added {} todos\n{}", added, todos.to_markdown())
                }
            }
            TodoAction::Complete { ids } => {
                todos.complete_multiple(&ids);
                todos.to_markdown()
            }
            TodoAction::Skip { id } => {
                todos.skip(id)?;
                todos.to_markdown()
            }
            TodoAction::List => todos.to_markdown(),
        };
        Ok(ToolOutput::success(output))
    }
}
