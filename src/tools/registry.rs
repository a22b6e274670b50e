//! Tool Registry
//!
//! Thread-safe registration, lookup, and execution. Execution never fails:
//! unknown tools and tool errors come back as failed outputs, and every call
//! is recorded as a metric on the execution context.

use super::{Tool, ToolOutput};
use crate::context::ExecutionContext;
use crate::llm::ToolDefinition;
use crate::message::ToolCall;
use crate::telemetry::{ToolMetric, SPAN_TOOL_EXECUTE};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::Instrument;

/// Tool registry for managing available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(tool = %name, "Registering tool");
        tools.insert(name, tool);
    }

    /// Register a tool only if the name is free; returns whether it was added
    pub fn register_if_absent(&self, tool: Arc<dyn Tool>) -> bool {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.contains_key(tool.name()) {
            return false;
        }
        tools.insert(tool.name().to_string(), tool);
        true
    }

    /// Unregister a tool by name
    ///
    /// Returns true if the tool was found and removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        tools.contains_key(name)
    }

    /// Independent registry holding the same tools
    pub fn snapshot(&self) -> Self {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        Self {
            tools: RwLock::new(tools.clone()),
        }
    }

    /// Tool definitions for LLM, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        let mut definitions: Vec<_> = tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Registered tool names, sorted
    pub fn list(&self) -> Vec<String> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute a tool call and record its metric on `ctx`
    pub async fn execute(&self, call: &ToolCall, ctx: &ExecutionContext) -> ToolOutput {
        let span = tracing::info_span!(
            SPAN_TOOL_EXECUTE,
            "a3s.tool.name" = %call.name,
            "a3s.tool.id" = %call.id,
            "a3s.tool.success" = tracing::field::Empty,
            "a3s.tool.duration_ms" = tracing::field::Empty,
        );
        let start = tokio::time::Instant::now();

        let output = match self.get(&call.name) {
            Some(tool) => match tool.execute(&call.args, ctx).instrument(span.clone()).await {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "Tool execution failed");
                    ToolOutput::error(format!("{:#}", e))
                }
            },
            None => ToolOutput::error(format!("Unknown tool: {}", call.name)),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        span.record("a3s.tool.success", output.ok);
        span.record("a3s.tool.duration_ms", duration_ms as i64);

        let metric = if output.ok {
            ToolMetric::success(&call.name, duration_ms)
        } else {
            ToolMetric::failure(
                &call.name,
                duration_ms,
                output.error.clone().unwrap_or_default(),
            )
        };
        ctx.record_tool_metric(&call.id, metric);
        output
    }
}
