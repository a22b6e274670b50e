//! LLM collaborator contracts
//!
//! The runtime does not talk to any model API itself. An [`LlmProvider`]
//! hands out [`LlmClient`]s; a client completes a conversation of [`Turn`]s,
//! optionally streaming, optionally bound to a tool set, or forced into a
//! JSON shape.
//!
//! Authentication and other provider set-up failures must be reported as
//! [`AgentError::Config`]; they propagate to the caller unchanged.

use crate::error::{AgentError, Result};
use crate::message::{ToolCall, Turn};
use crate::telemetry::SPAN_LLM_COMPLETION;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

// ============================================================================
// Public Types
// ============================================================================

/// Tool definition for LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// LLM response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmResponse {
    /// Free-form text, possibly empty for tool-call-only responses
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            stop_reason: Some("tool_use".to_string()),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The AI turn this response becomes in history
    pub fn to_turn(&self) -> Turn {
        Turn::ai_with_tool_calls(self.content.clone(), self.tool_calls.clone())
    }
}

/// Streaming event from LLM
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Text content delta
    TextDelta(String),
    /// Response complete
    Done(LlmResponse),
}

/// Model selection hints passed to the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

// ============================================================================
// Traits
// ============================================================================

/// LLM client trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a conversation, with `tools` bound for structured calling
    async fn complete(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<LlmResponse>;

    /// Complete a conversation with streaming
    ///
    /// The default delivers the whole response as a single delta.
    async fn complete_streaming(
        &self,
        turns: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let response = self.complete(turns, tools).await?;
        let (tx, rx) = mpsc::channel(2);
        if !response.content.is_empty() {
            let _ = tx.send(StreamEvent::TextDelta(response.content.clone())).await;
        }
        let _ = tx.send(StreamEvent::Done(response)).await;
        Ok(rx)
    }

    /// Complete a conversation, forcing the answer into `schema`
    async fn complete_structured(
        &self,
        turns: &[Turn],
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// Hands out model clients
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Client for the requested model
    async fn model(&self, options: &ModelOptions) -> Result<Arc<dyn LlmClient>>;

    /// Whether the provider has finished loading credentials
    async fn is_ready(&self) -> bool {
        true
    }
}

/// Structured completion deserialized into `T`
pub async fn complete_as<T: DeserializeOwned>(
    client: &dyn LlmClient,
    turns: &[Turn],
    schema: &serde_json::Value,
) -> Result<T> {
    let span = tracing::info_span!(
        SPAN_LLM_COMPLETION,
        "a3s.llm.schema" = %schema_title(schema),
        "a3s.llm.turns" = turns.len() as i64,
    );
    let value = client
        .complete_structured(turns, schema)
        .instrument(span)
        .await?;
    serde_json::from_value(value).map_err(|e| {
        AgentError::Llm(format!(
            "structured output does not match {}: {}",
            schema_title(schema),
            e
        ))
    })
}

fn schema_title(schema: &serde_json::Value) -> &str {
    schema
        .get("title")
        .and_then(|t| t.as_str())
        .unwrap_or("schema")
}

/// Poll `provider` until it reports ready
///
/// Fails with [`AgentError::Config`] once `timeout` elapses, and with a
/// non-user cancellation when `cancel` fires first.
pub async fn wait_until_ready(
    provider: &dyn LlmProvider,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let started = tokio::time::Instant::now();
    loop {
        if provider.is_ready().await {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(AgentError::Config(format!(
                "LLM provider not ready after {}ms",
                timeout.as_millis()
            )));
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(AgentError::Cancelled { user_initiated: false });
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}
