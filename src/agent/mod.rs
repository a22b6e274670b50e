//! Agents
//!
//! An agent is built per run over that run's [`ExecutionContext`]. Chat
//! mode answers from the open tabs; browse mode drives the
//! observe/think/act/validate loop.

mod browse;
mod chat;
mod human_input;
mod loop_detector;
mod prompts;

pub use browse::{AttemptOutcome, BrowseAgent};
pub use chat::ChatAgent;
pub use human_input::{wait_for_human_input, HumanInputOutcome};
pub use loop_detector::LoopDetector;

use crate::context::ExecutionContext;
use crate::error::{AgentError, Result};
use crate::execution::{AgentMode, ExecutionMetadata};
use crate::llm::{LlmResponse, StreamEvent};
use crate::message::Turn;
use crate::pubsub::{generate_msg_id, MessageRole};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use std::sync::Arc;

/// A task executor bound to one run
#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(&self, query: &str, metadata: &ExecutionMetadata) -> Result<()>;
}

/// Agent for `mode` over `ctx`, with `tools` as the injected tool set
pub fn create_agent(
    mode: AgentMode,
    ctx: Arc<ExecutionContext>,
    tools: &ToolRegistry,
) -> Box<dyn Agent> {
    match mode {
        AgentMode::Chat => Box::new(ChatAgent::new(ctx)),
        AgentMode::Browse => Box::new(BrowseAgent::new(ctx, tools)),
    }
}

/// Complete `turns` as free text, publishing partial output under one id
///
/// Every delta republishes the accumulated text under the same message id
/// and a final publish carries the complete text. Responses without text
/// publish nothing. Cancellation is checked between chunks.
pub(crate) async fn stream_text(
    ctx: &ExecutionContext,
    turns: &[Turn],
    role: MessageRole,
) -> Result<LlmResponse> {
    ctx.check_cancelled()?;
    let llm = ctx.llm().await?;

    if !ctx.config().agent.stream_responses {
        let response = llm.complete(turns, &[]).await?;
        ctx.check_cancelled()?;
        if !response.content.is_empty() {
            ctx.channel().publish_message(response.content.clone(), role);
        }
        return Ok(response);
    }

    let mut rx = llm.complete_streaming(turns, &[]).await?;
    let msg_id = generate_msg_id();
    let mut text = String::new();

    let mut response = loop {
        match rx.recv().await {
            Some(StreamEvent::TextDelta(delta)) => {
                ctx.check_cancelled()?;
                text.push_str(&delta);
                ctx.channel()
                    .publish_message_with_id(msg_id.as_str(), text.clone(), role);
            }
            Some(StreamEvent::Done(response)) => break response,
            None if text.is_empty() => {
                return Err(AgentError::Llm(
                    "stream ended without a response".to_string(),
                ));
            }
            None => break LlmResponse::text(text.clone()),
        }
    };

    ctx.check_cancelled()?;
    if response.content.is_empty() {
        response.content = text;
    }
    if !response.content.is_empty() {
        ctx.channel()
            .publish_message_with_id(msg_id.as_str(), response.content.clone(), role);
    }
    Ok(response)
}
