//! Per-run execution state
//!
//! An [`ExecutionContext`] is built fresh for every `run()` of an execution.
//! It shares the execution's history and channel and owns everything else:
//! the cancellation token, tab bookkeeping, todo list, tool metrics and the
//! human-input slots.

use crate::browser::{BrowserContext, TabId};
use crate::config::RuntimeConfig;
use crate::error::{AgentError, Result};
use crate::history::MessageHistory;
use crate::llm::{wait_until_ready, LlmClient, LlmProvider, ModelOptions};
use crate::pubsub::{HumanInputResponse, ScopedEventChannel};
use crate::telemetry::{summarize_tool_metrics, ToolMetric, ToolStats};
use crate::todo::TodoStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct CancelState {
    token: CancellationToken,
    user_initiated: bool,
}

#[derive(Debug, Default)]
struct RunState {
    executing: bool,
    locked_tab_id: Option<TabId>,
    selected_tab_ids: Vec<TabId>,
    current_task: Option<String>,
    task_number: usize,
    human_input_request_id: Option<String>,
    human_input_response: Option<HumanInputResponse>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutable state for one run
pub struct ExecutionContext {
    execution_id: String,
    config: Arc<RuntimeConfig>,
    history: Arc<Mutex<MessageHistory>>,
    channel: Arc<ScopedEventChannel>,
    browser: Arc<dyn BrowserContext>,
    provider: Arc<dyn LlmProvider>,
    llm: tokio::sync::OnceCell<Arc<dyn LlmClient>>,
    cancel: Mutex<CancelState>,
    state: Mutex<RunState>,
    todos: Mutex<TodoStore>,
    metrics: Mutex<HashMap<String, ToolMetric>>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("execution_id", &self.execution_id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(
        execution_id: impl Into<String>,
        config: Arc<RuntimeConfig>,
        history: Arc<Mutex<MessageHistory>>,
        channel: Arc<ScopedEventChannel>,
        browser: Arc<dyn BrowserContext>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        let max_todos = config.agent.max_todos;
        Self {
            execution_id: execution_id.into(),
            config,
            history,
            channel,
            browser,
            provider,
            llm: tokio::sync::OnceCell::new(),
            cancel: Mutex::new(CancelState {
                token: CancellationToken::new(),
                user_initiated: false,
            }),
            state: Mutex::new(RunState::default()),
            todos: Mutex::new(TodoStore::new(max_todos)),
            metrics: Mutex::new(HashMap::new()),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Conversation history shared across runs of the execution
    ///
    /// Do not hold the guard across an `.await`.
    pub fn history(&self) -> MutexGuard<'_, MessageHistory> {
        lock(&self.history)
    }

    pub fn channel(&self) -> &Arc<ScopedEventChannel> {
        &self.channel
    }

    pub fn browser(&self) -> &Arc<dyn BrowserContext> {
        &self.browser
    }

    /// Model client for this run
    ///
    /// The first call waits for the provider to become ready (bounded by the
    /// configured timeout and this run's cancellation) and then asks it for
    /// a model; later calls reuse that client.
    pub async fn llm(&self) -> Result<Arc<dyn LlmClient>> {
        let client = self
            .llm
            .get_or_try_init(|| async {
                let execution = &self.config.execution;
                wait_until_ready(
                    self.provider.as_ref(),
                    execution.provider_ready_timeout(),
                    execution.provider_poll_interval(),
                    &self.cancellation_token(),
                )
                .await
                .map_err(|e| {
                    if e.is_cancellation() {
                        self.cancellation_error()
                    } else {
                        e
                    }
                })?;
                self.provider.model(&ModelOptions::default()).await
            })
            .await?;
        Ok(client.clone())
    }

    /// Todo list for this run
    ///
    /// Do not hold the guard across an `.await`.
    pub fn todos(&self) -> MutexGuard<'_, TodoStore> {
        lock(&self.todos)
    }

    // ------------------------------------------------------------------
    // Execution flag and tabs
    // ------------------------------------------------------------------

    /// Mark the run as executing, remembering the tab it is locked to
    pub fn start_execution(&self, tab_id: Option<TabId>) {
        let mut state = lock(&self.state);
        state.executing = true;
        state.locked_tab_id = tab_id;
    }

    /// Clear the executing flag; the locked tab is kept until `reset`
    pub fn end_execution(&self) {
        lock(&self.state).executing = false;
    }

    pub fn is_executing(&self) -> bool {
        lock(&self.state).executing
    }

    pub fn locked_tab_id(&self) -> Option<TabId> {
        lock(&self.state).locked_tab_id
    }

    pub fn selected_tab_ids(&self) -> Vec<TabId> {
        lock(&self.state).selected_tab_ids.clone()
    }

    pub fn set_selected_tab_ids(&self, tab_ids: Vec<TabId>) {
        lock(&self.state).selected_tab_ids = tab_ids;
    }

    pub fn current_task(&self) -> Option<String> {
        lock(&self.state).current_task.clone()
    }

    /// Set the task being worked on and bump the task counter
    pub fn set_current_task(&self, task: impl Into<String>) {
        let mut state = lock(&self.state);
        state.current_task = Some(task.into());
        state.task_number += 1;
    }

    pub fn task_number(&self) -> usize {
        lock(&self.state).task_number
    }

    /// Clear tab bookkeeping, todos, metrics and human-input slots
    pub fn reset(&self) {
        *lock(&self.state) = RunState::default();
        lock(&self.todos).reset();
        lock(&self.metrics).clear();
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Clone of the active cancellation token
    pub fn cancellation_token(&self) -> CancellationToken {
        lock(&self.cancel).token.clone()
    }

    /// Cancel the active token
    ///
    /// Idempotent; the first caller's `user_initiated` flag is kept. Returns
    /// whether this call did the cancelling.
    pub fn cancel_execution(&self, user_initiated: bool) -> bool {
        let mut cancel = lock(&self.cancel);
        if cancel.token.is_cancelled() {
            return false;
        }
        cancel.user_initiated = user_initiated;
        cancel.token.cancel();
        tracing::debug!(
            execution_id = %self.execution_id,
            user_initiated,
            "Execution cancelled"
        );
        true
    }

    /// Fresh token for the next run; clears the user-initiated flag
    pub fn reset_abort_controller(&self) {
        let mut cancel = lock(&self.cancel);
        cancel.token = CancellationToken::new();
        cancel.user_initiated = false;
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.cancel).token.is_cancelled()
    }

    pub fn is_user_cancelled(&self) -> bool {
        let cancel = lock(&self.cancel);
        cancel.token.is_cancelled() && cancel.user_initiated
    }

    /// The error a cancellation check raises for this run
    pub fn cancellation_error(&self) -> AgentError {
        AgentError::Cancelled {
            user_initiated: lock(&self.cancel).user_initiated,
        }
    }

    /// Guard called at every phase boundary and before every suspend point
    pub fn check_cancelled(&self) -> Result<()> {
        let cancel = lock(&self.cancel);
        if cancel.token.is_cancelled() {
            return Err(AgentError::Cancelled {
                user_initiated: cancel.user_initiated,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Human input
    // ------------------------------------------------------------------

    /// Register the outstanding request, dropping any earlier response
    pub fn set_human_input_request_id(&self, request_id: Option<String>) {
        let mut state = lock(&self.state);
        state.human_input_request_id = request_id;
        state.human_input_response = None;
    }

    pub fn human_input_request_id(&self) -> Option<String> {
        lock(&self.state).human_input_request_id.clone()
    }

    /// Store a response if it answers the outstanding request
    ///
    /// Stale or mismatched responses are discarded. Returns whether the
    /// response was accepted.
    pub fn set_human_input_response(&self, response: HumanInputResponse) -> bool {
        let mut state = lock(&self.state);
        if state.human_input_request_id.as_deref() != Some(response.request_id.as_str()) {
            tracing::debug!(
                execution_id = %self.execution_id,
                request_id = %response.request_id,
                "Discarding mismatched human input response"
            );
            return false;
        }
        state.human_input_response = Some(response);
        true
    }

    pub fn human_input_response(&self) -> Option<HumanInputResponse> {
        lock(&self.state).human_input_response.clone()
    }

    pub fn clear_human_input(&self) {
        self.set_human_input_request_id(None);
    }

    // ------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------

    pub fn record_tool_metric(&self, call_id: &str, metric: ToolMetric) {
        lock(&self.metrics).insert(call_id.to_string(), metric);
    }

    /// Metrics keyed by tool call id
    pub fn tool_metrics(&self) -> HashMap<String, ToolMetric> {
        lock(&self.metrics).clone()
    }

    /// Per-tool aggregate of this run's metrics
    pub fn tool_metrics_summary(&self) -> Vec<ToolStats> {
        summarize_tool_metrics(lock(&self.metrics).values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::HumanAction;
    use crate::testing::test_context;

    fn response(id: &str, action: HumanAction) -> HumanInputResponse {
        HumanInputResponse {
            request_id: id.to_string(),
            action,
        }
    }

    #[test]
    fn test_start_end_keeps_locked_tab() {
        let ctx = test_context();
        ctx.start_execution(Some(42));
        assert!(ctx.is_executing());
        ctx.end_execution();
        assert!(!ctx.is_executing());
        assert_eq!(ctx.locked_tab_id(), Some(42));

        ctx.reset();
        assert_eq!(ctx.locked_tab_id(), None);
    }

    #[test]
    fn test_cancel_is_idempotent_and_keeps_first_reason() {
        let ctx = test_context();
        assert!(ctx.check_cancelled().is_ok());

        assert!(ctx.cancel_execution(true));
        assert!(!ctx.cancel_execution(false));
        assert!(ctx.is_user_cancelled());
        let err = ctx.check_cancelled().unwrap_err();
        assert!(err.is_user_cancellation());
    }

    #[test]
    fn test_reset_abort_controller() {
        let ctx = test_context();
        let old = ctx.cancellation_token();
        ctx.cancel_execution(true);
        ctx.reset_abort_controller();

        assert!(old.is_cancelled());
        assert!(!ctx.is_cancelled());
        assert!(!ctx.is_user_cancelled());
        ctx.cancel_execution(false);
        assert!(!ctx.check_cancelled().unwrap_err().is_user_cancellation());
    }

    #[test]
    fn test_human_input_matching() {
        let ctx = test_context();
        assert!(!ctx.set_human_input_response(response("r1", HumanAction::Done)));

        ctx.set_human_input_request_id(Some("r1".into()));
        assert!(!ctx.set_human_input_response(response("stale", HumanAction::Abort)));
        assert!(ctx.human_input_response().is_none());

        assert!(ctx.set_human_input_response(response("r1", HumanAction::Done)));
        assert_eq!(
            ctx.human_input_response().map(|r| r.action),
            Some(HumanAction::Done)
        );

        // a new request drops the old answer
        ctx.set_human_input_request_id(Some("r2".into()));
        assert!(ctx.human_input_response().is_none());
        assert!(!ctx.set_human_input_response(response("r1", HumanAction::Done)));
    }

    #[test]
    fn test_current_task_counter() {
        let ctx = test_context();
        ctx.set_current_task("find flights");
        ctx.set_current_task("book hotel");
        assert_eq!(ctx.current_task().as_deref(), Some("book hotel"));
        assert_eq!(ctx.task_number(), 2);
    }

    #[test]
    fn test_metrics_summary_and_reset() {
        let ctx = test_context();
        ctx.record_tool_metric("c1", ToolMetric::success("navigate", 10));
        ctx.record_tool_metric("c2", ToolMetric::success("navigate", 30));
        let summary = ctx.tool_metrics_summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].avg_duration_ms, 20);

        ctx.todos().add("step");
        ctx.set_selected_tab_ids(vec![1, 2]);
        ctx.reset();
        assert!(ctx.tool_metrics().is_empty());
        assert!(ctx.todos().is_empty());
        assert!(ctx.selected_tab_ids().is_empty());
    }
}
