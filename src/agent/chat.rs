//! Chat mode: answer a question about the open tabs

use super::{prompts, stream_text, Agent};
use crate::browser::render_pages;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::execution::ExecutionMetadata;
use crate::pubsub::MessageRole;
use crate::telemetry::SPAN_AGENT_EXECUTE;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::Instrument;

pub struct ChatAgent {
    ctx: Arc<ExecutionContext>,
}

impl ChatAgent {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    async fn run(&self, query: &str) -> Result<()> {
        let ctx = &self.ctx;
        ctx.set_current_task(query);

        let system = ctx
            .config()
            .agent
            .system_prompt
            .clone()
            .unwrap_or_else(|| prompts::CHAT_SYSTEM_PROMPT.to_string());
        ctx.history().append_system(system);

        ctx.check_cancelled()?;
        let pages = ctx.browser().pages(&ctx.selected_tab_ids()).await?;
        if !pages.is_empty() {
            ctx.history().append_browser_state(render_pages(&pages));
        }
        ctx.history().append_human(query);

        let turns = ctx.history().get_all();
        let response = stream_text(ctx, &turns, MessageRole::Assistant).await?;
        ctx.history().append_ai(response.content);
        Ok(())
    }
}

#[async_trait]
impl Agent for ChatAgent {
    async fn execute(&self, query: &str, _metadata: &ExecutionMetadata) -> Result<()> {
        let span = tracing::info_span!(
            SPAN_AGENT_EXECUTE,
            execution_id = %self.ctx.execution_id(),
            mode = "chat",
        );
        self.run(query).instrument(span).await
    }
}
