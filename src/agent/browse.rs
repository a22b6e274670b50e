//! Browse mode: the observe/think/act/validate control loop
//!
//! ```text
//! plan (classify, maybe generate todos)
//! for attempt in 1..=max_validation_attempts
//!     for cycle in 1..=max_cycles_per_attempt
//!         observe -> think -> act        (ends on done tool or loop)
//!     validate                            (success, or feedback + retry)
//! ```
//!
//! Cancellation is checked before every phase and before every tool call.

use super::human_input::{wait_for_human_input, HumanInputOutcome};
use super::loop_detector::LoopDetector;
use super::prompts::{self, Classification, NextAction, Plan, Validation};
use super::{stream_text, Agent};
use crate::context::ExecutionContext;
use crate::error::{AgentError, Result};
use crate::execution::{ExecutionMetadata, PlanningMode};
use crate::llm::{complete_as, LlmResponse};
use crate::message::Turn;
use crate::pubsub::MessageRole;
use crate::telemetry::{SPAN_AGENT_ATTEMPT, SPAN_AGENT_EXECUTE};
use crate::tools::{DoneTool, TodoManagerTool, ToolRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::Instrument;

/// How one validation attempt's inner loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The done tool was called; carries its summary
    Done(String),
    /// Cycle budget used up
    BudgetExhausted,
    /// Repeated model output
    LoopDetected,
    /// A human-input pause timed out
    HumanInputTimeout,
}

pub struct BrowseAgent {
    ctx: Arc<ExecutionContext>,
    tools: ToolRegistry,
}

impl BrowseAgent {
    /// Agent over `ctx` with the injected `tools` plus the built-in todo and
    /// done tools
    pub fn new(ctx: Arc<ExecutionContext>, tools: &ToolRegistry) -> Self {
        let tools = tools.snapshot();
        tools.register(Arc::new(TodoManagerTool));
        tools.register_if_absent(Arc::new(DoneTool::new(
            ctx.config().agent.done_tool_name.clone(),
        )));
        Self { ctx, tools }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    async fn run(&self, query: &str, metadata: &ExecutionMetadata) -> Result<()> {
        let ctx = &self.ctx;
        let config = &ctx.config().agent;
        ctx.set_current_task(query);

        {
            let mut history = ctx.history();
            history.append_system(prompts::browse_system_prompt(
                config.system_prompt.as_deref(),
                &config.done_tool_name,
            ));
            history.append_human(query);
        }

        self.prepare_plan(query, metadata).await?;

        let max_attempts = config.max_validation_attempts.max(1);

        for attempt in 1..=max_attempts {
            ctx.check_cancelled()?;
            let span = tracing::info_span!(SPAN_AGENT_ATTEMPT, attempt);
            let outcome = self.run_attempt(query).instrument(span).await?;
            tracing::info!(
                execution_id = %ctx.execution_id(),
                attempt,
                outcome = ?outcome,
                "Attempt finished"
            );

            ctx.check_cancelled()?;
            let validation = self.validate(query).await?;
            if validation.is_complete {
                let answer = match outcome {
                    AttemptOutcome::Done(summary) if !summary.is_empty() => summary,
                    _ => validation.reasoning,
                };
                ctx.channel()
                    .publish_message(answer.clone(), MessageRole::Assistant);
                ctx.history().append_ai(answer);
                return Ok(());
            }

            tracing::info!(
                execution_id = %ctx.execution_id(),
                attempt,
                reasoning = %validation.reasoning,
                "Validation rejected attempt"
            );
            ctx.channel().publish_message(
                format!("Not done yet: {}", validation.reasoning),
                MessageRole::Thinking,
            );
            ctx.history()
                .append_human(prompts::validation_feedback(&validation));
        }

        Err(AgentError::Incomplete {
            attempts: max_attempts,
        })
    }

    /// Load the todo list from a predefined plan, or classify the task and
    /// generate one for complex tasks
    async fn prepare_plan(&self, query: &str, metadata: &ExecutionMetadata) -> Result<()> {
        let ctx = &self.ctx;
        let max_todos = ctx.config().agent.max_todos;

        let steps = match (&metadata.execution_mode, &metadata.predefined_plan) {
            (PlanningMode::Predefined, Some(plan)) => plan.steps.clone(),
            _ => {
                ctx.check_cancelled()?;
                let llm = ctx.llm().await?;
                let mut turns = ctx.history().get_all();
                turns.push(Turn::human(prompts::classification_instruction(query)));
                let classification: Classification =
                    complete_as(llm.as_ref(), &turns, &prompts::classification_schema()).await?;
                if classification.is_simple {
                    return Ok(());
                }

                ctx.check_cancelled()?;
                turns.pop();
                turns.push(Turn::human(prompts::planning_instruction(query, max_todos)));
                let plan: Plan = complete_as(llm.as_ref(), &turns, &prompts::plan_schema()).await?;
                plan.steps
            }
        };

        let markdown = {
            let mut todos = ctx.todos();
            todos.add_multiple(steps);
            todos.to_markdown()
        };
        ctx.channel()
            .publish_message(format!("Plan:\n{}", markdown), MessageRole::Thinking);
        ctx.history().append_ai(format!("Plan:\n{}", markdown));
        Ok(())
    }

    async fn run_attempt(&self, query: &str) -> Result<AttemptOutcome> {
        let ctx = &self.ctx;
        let max_cycles = ctx.config().agent.max_cycles_per_attempt;
        let mut detector = LoopDetector::from_config(&ctx.config().agent);

        for _ in 0..max_cycles {
            ctx.check_cancelled()?;
            let focus = self.current_focus(query);

            self.observe(&focus).await?;

            ctx.check_cancelled()?;
            let action = self.think(&focus).await?;

            ctx.check_cancelled()?;
            let response = self.request_call(&action).await?;
            if let Some(outcome) = self.act(&response).await? {
                return Ok(outcome);
            }

            if detector.record(&action.tool_name, &response.to_turn()) {
                tracing::warn!(execution_id = %ctx.execution_id(), "Repetition loop detected");
                ctx.channel().publish_message(
                    "I seem to be repeating myself; stopping to check progress.",
                    MessageRole::Thinking,
                );
                return Ok(AttemptOutcome::LoopDetected);
            }
        }
        Ok(AttemptOutcome::BudgetExhausted)
    }

    /// The active todo, or the task itself when there is no plan
    fn current_focus(&self, query: &str) -> String {
        self.ctx
            .todos()
            .get_next_todo()
            .map(|todo| todo.content)
            .unwrap_or_else(|| query.to_string())
    }

    async fn observe(&self, focus: &str) -> Result<()> {
        let ctx = &self.ctx;
        let page = ctx.browser().current_page().await?;
        ctx.history().append_browser_state(page.render());

        let mut turns = ctx.history().get_all();
        turns.push(Turn::human(prompts::observe_instruction(focus)));
        let response = stream_text(ctx, &turns, MessageRole::Thinking).await?;
        if !response.content.trim().is_empty() {
            ctx.history().append_ai(response.content);
        }
        Ok(())
    }

    async fn think(&self, focus: &str) -> Result<NextAction> {
        let ctx = &self.ctx;
        let llm = ctx.llm().await?;
        let tool_names = self.tools.list();

        let mut turns = ctx.history().get_all();
        turns.push(Turn::human(prompts::think_instruction(focus, &tool_names)));
        let action: NextAction = complete_as(
            llm.as_ref(),
            &turns,
            &prompts::next_action_schema(&tool_names),
        )
        .await?;

        if !action.rationale.is_empty() {
            ctx.channel()
                .publish_message(action.rationale.clone(), MessageRole::Narration);
        }
        ctx.history()
            .append_ai(format!("Next: {} ({})", action.tool_name, action.rationale));
        Ok(action)
    }

    /// Ask the model to invoke the chosen tool
    async fn request_call(&self, action: &NextAction) -> Result<LlmResponse> {
        let ctx = &self.ctx;
        let llm = ctx.llm().await?;
        let definitions = self.tools.definitions();

        let mut turns = ctx.history().get_all();
        turns.push(Turn::human(prompts::act_instruction(&action.tool_name)));
        llm.complete(&turns, &definitions).await
    }

    /// Fold the model's act response into history and run its tool calls
    ///
    /// Returns an outcome when the attempt should end.
    async fn act(&self, response: &LlmResponse) -> Result<Option<AttemptOutcome>> {
        let ctx = &self.ctx;
        if !response.has_tool_calls() {
            if !response.content.trim().is_empty() {
                ctx.history().append_ai(response.content.as_str());
            }
            return Ok(None);
        }
        ctx.history().append(response.to_turn());

        let done_tool = ctx.config().agent.done_tool_name.as_str();
        for call in &response.tool_calls {
            ctx.check_cancelled()?;
            ctx.channel()
                .publish_message(format!("Running {}", call.name), MessageRole::Thinking);

            let output = self.tools.execute(call, ctx).await;
            ctx.history().append_tool(call.id.as_str(), output.to_content());

            if call.name == done_tool && output.ok {
                return Ok(Some(AttemptOutcome::Done(
                    output.output_text().unwrap_or_default(),
                )));
            }

            if output.requires_human_input {
                let prompt = output
                    .prompt
                    .clone()
                    .unwrap_or_else(|| "Please complete the step in the browser".to_string());
                return self.pause_for_human(&prompt).await;
            }
        }
        Ok(None)
    }

    async fn pause_for_human(&self, prompt: &str) -> Result<Option<AttemptOutcome>> {
        let ctx = &self.ctx;
        match wait_for_human_input(ctx, prompt).await? {
            HumanInputOutcome::Done => {
                ctx.history().append_human(format!(
                    "I completed the requested step: {}. Continue with the task.",
                    prompt
                ));
                Ok(None)
            }
            HumanInputOutcome::TimedOut => {
                ctx.channel().publish_message(
                    "Timed out waiting for human input",
                    MessageRole::Thinking,
                );
                ctx.history().append_human(format!(
                    "Nobody completed the requested step ({}) in time.",
                    prompt
                ));
                Ok(Some(AttemptOutcome::HumanInputTimeout))
            }
            HumanInputOutcome::Aborted => {
                ctx.cancel_execution(true);
                ctx.channel()
                    .publish_message("Task aborted by user", MessageRole::Assistant);
                Err(ctx.cancellation_error())
            }
        }
    }

    async fn validate(&self, query: &str) -> Result<Validation> {
        let ctx = &self.ctx;
        let llm = ctx.llm().await?;
        let mut turns = ctx.history().get_all();
        turns.push(Turn::human(prompts::validation_instruction(query)));
        complete_as(llm.as_ref(), &turns, &prompts::validation_schema()).await
    }
}

#[async_trait]
impl Agent for BrowseAgent {
    async fn execute(&self, query: &str, metadata: &ExecutionMetadata) -> Result<()> {
        let span = tracing::info_span!(
            SPAN_AGENT_EXECUTE,
            execution_id = %self.ctx.execution_id(),
            mode = "browse",
        );
        self.run(query, metadata).instrument(span).await
    }
}
