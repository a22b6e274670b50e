//! Executions: isolated, resumable task streams
//!
//! An [`Execution`] owns one conversation: a bounded history and a scoped
//! event channel that survive across `run()` calls. Everything else (the
//! [`ExecutionContext`], the agent) is rebuilt per run. Starting a run while
//! another is in flight cancels the earlier one; there is no queueing.
//!
//! Lifecycle:
//!
//! ```text
//! Created -> Initializing -> Running -> Completed | Failed | Cancelled
//!                              |
//!                              +-> Cancelling -> Cancelled
//!
//! any finished state -> Initializing (next run)
//! any state          -> Disposed (terminal)
//! ```

mod manager;

pub use manager::{ExecutionManager, ExecutionStats};

use crate::agent::create_agent;
use crate::browser::{BrowserContext, BrowserContextFactory, TabId};
use crate::config::RuntimeConfig;
use crate::context::ExecutionContext;
use crate::error::{AgentError, Result};
use crate::history::MessageHistory;
use crate::llm::LlmProvider;
use crate::pubsub::{ChannelRegistry, HumanAction, MessageRole, ScopedEventChannel};
use crate::tools::ToolRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Message published when a user pauses a run
pub const PAUSE_MESSAGE: &str = "Task paused by user";

/// Which agent handles the execution's runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Answer questions about the open tabs
    Chat,
    /// Drive the browser until the task is done
    #[default]
    Browse,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Chat => write!(f, "chat"),
            AgentMode::Browse => write!(f, "browse"),
        }
    }
}

impl std::str::FromStr for AgentMode {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "chat" => Ok(AgentMode::Chat),
            "browse" | "agent" => Ok(AgentMode::Browse),
            other => Err(AgentError::Config(format!("Unknown agent mode: {}", other))),
        }
    }
}

/// Options fixed when an execution is created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    pub mode: AgentMode,
    /// Tab the browser context is locked to during a run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    /// Tabs whose state is shared with the model
    pub tab_ids: Vec<TabId>,
}

impl ExecutionOptions {
    pub fn chat() -> Self {
        Self {
            mode: AgentMode::Chat,
            ..Self::default()
        }
    }

    pub fn browse() -> Self {
        Self::default()
    }

    pub fn with_tab(mut self, tab_id: TabId) -> Self {
        self.tab_id = Some(tab_id);
        if !self.tab_ids.contains(&tab_id) {
            self.tab_ids.push(tab_id);
        }
        self
    }

    pub fn with_tab_ids(mut self, tab_ids: Vec<TabId>) -> Self {
        self.tab_ids = tab_ids;
        self
    }
}

/// How the todo list for a browse run is produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanningMode {
    /// Classify the task and generate a plan when needed
    #[default]
    Dynamic,
    /// Use the steps from [`ExecutionMetadata::predefined_plan`]
    Predefined,
}

/// A plan supplied by the caller instead of generated by the model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredefinedPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub goal: String,
    pub steps: Vec<String>,
}

/// Per-run metadata passed through to the agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionMetadata {
    /// Which surface started the run (sidepanel, newtab, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub execution_mode: PlanningMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predefined_plan: Option<PredefinedPlan>,
}

impl ExecutionMetadata {
    pub fn predefined(plan: PredefinedPlan) -> Self {
        Self {
            source: None,
            execution_mode: PlanningMode::Predefined,
            predefined_plan: Some(plan),
        }
    }
}

/// Collaborators shared by every execution of a manager
#[derive(Clone)]
pub struct AgentDeps {
    pub llm: Arc<dyn LlmProvider>,
    pub tools: Arc<ToolRegistry>,
    pub browser: Arc<dyn BrowserContextFactory>,
}

impl AgentDeps {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        browser: Arc<dyn BrowserContextFactory>,
    ) -> Self {
        Self {
            llm,
            tools,
            browser,
        }
    }
}

/// Execution lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Created,
    Initializing,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
    Disposed,
}

impl ExecutionState {
    /// A run is in flight
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ExecutionState::Initializing | ExecutionState::Running | ExecutionState::Cancelling
        )
    }

    /// The last run has settled
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::Created => "created",
            ExecutionState::Initializing => "initializing",
            ExecutionState::Running => "running",
            ExecutionState::Cancelling => "cancelling",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::Cancelled => "cancelled",
            ExecutionState::Disposed => "disposed",
        };
        write!(f, "{}", s)
    }
}

/// Snapshot of an execution for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInfo {
    pub id: String,
    pub mode: AgentMode,
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
}

struct ExecutionInner {
    state: ExecutionState,
    /// Bumped by every `run()`; a run whose generation is stale never starts
    generation: u64,
    /// User pause that arrived before the run's context was installed
    pending_cancel: bool,
    active: Option<Arc<ExecutionContext>>,
    last: Option<Arc<ExecutionContext>>,
    last_run_at: Option<DateTime<Utc>>,
}

/// One isolated task stream
pub struct Execution {
    id: String,
    options: ExecutionOptions,
    config: Arc<RuntimeConfig>,
    deps: AgentDeps,
    registry: ChannelRegistry,
    channel: Arc<ScopedEventChannel>,
    history: OnceLock<Arc<Mutex<MessageHistory>>>,
    browser: tokio::sync::OnceCell<Arc<dyn BrowserContext>>,
    run_lock: tokio::sync::Mutex<()>,
    inner: Mutex<ExecutionInner>,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("id", &self.id)
            .field("mode", &self.options.mode)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Execution {
    /// New execution bound to the channel `registry` holds for `id`
    pub fn new(
        id: impl Into<String>,
        options: ExecutionOptions,
        config: Arc<RuntimeConfig>,
        deps: AgentDeps,
        registry: ChannelRegistry,
    ) -> Self {
        let id = id.into();
        let channel = registry.get_or_create(&id);
        Self {
            id,
            options,
            config,
            deps,
            registry,
            channel,
            history: OnceLock::new(),
            browser: tokio::sync::OnceCell::new(),
            run_lock: tokio::sync::Mutex::new(()),
            inner: Mutex::new(ExecutionInner {
                state: ExecutionState::Created,
                generation: 0,
                pending_cancel: false,
                active: None,
                last: None,
                last_run_at: None,
            }),
            created_at: Utc::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn mode(&self) -> AgentMode {
        self.options.mode
    }

    pub fn channel(&self) -> &Arc<ScopedEventChannel> {
        &self.channel
    }

    /// Conversation history, created on first use
    pub fn history(&self) -> Arc<Mutex<MessageHistory>> {
        self.history
            .get_or_init(|| {
                Arc::new(Mutex::new(MessageHistory::from_config(&self.config.history)))
            })
            .clone()
    }

    pub fn state(&self) -> ExecutionState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == ExecutionState::Disposed
    }

    /// Context of the most recent run, kept after it settles
    pub fn last_context(&self) -> Option<Arc<ExecutionContext>> {
        self.lock().last.clone()
    }

    pub fn info(&self) -> ExecutionInfo {
        let inner = self.lock();
        ExecutionInfo {
            id: self.id.clone(),
            mode: self.options.mode,
            state: inner.state,
            created_at: self.created_at,
            last_run_at: inner.last_run_at,
        }
    }

    /// Run `query` to completion
    ///
    /// Cancels any run already in flight. Failures publish one error message
    /// on the channel before being returned; cancellations return silently.
    pub async fn run(&self, query: &str, metadata: &ExecutionMetadata) -> Result<()> {
        let generation = {
            let mut inner = self.lock();
            if inner.state == ExecutionState::Disposed {
                return Err(AgentError::Disposed(self.id.clone()));
            }
            inner.generation += 1;
            inner.pending_cancel = false;
            if let Some(active) = &inner.active {
                if active.cancel_execution(false) {
                    tracing::info!(execution_id = %self.id, "Preempting run in flight");
                }
            }
            inner.generation
        };

        let _running = self.run_lock.lock().await;
        if self.lock().generation != generation {
            tracing::debug!(execution_id = %self.id, "Run superseded before start");
            return Err(AgentError::Cancelled {
                user_initiated: false,
            });
        }

        let result = match self.prepare(generation).await {
            Ok(ctx) => {
                let result = self.execute(&ctx, query, metadata).await;
                self.cleanup(&ctx).await;
                result
            }
            Err(e) => Err(e),
        };
        self.settle(&result);
        result
    }

    /// Build this run's context and make it the active one
    async fn prepare(&self, generation: u64) -> Result<Arc<ExecutionContext>> {
        self.set_state(ExecutionState::Initializing);

        let browser = self
            .browser
            .get_or_try_init(|| self.deps.browser.create(&self.id))
            .await?
            .clone();

        let ctx = Arc::new(ExecutionContext::new(
            self.id.clone(),
            self.config.clone(),
            self.history(),
            self.channel.clone(),
            browser,
            self.deps.llm.clone(),
        ));
        ctx.set_selected_tab_ids(self.options.tab_ids.clone());

        let mut inner = self.lock();
        if inner.state == ExecutionState::Disposed {
            return Err(AgentError::Disposed(self.id.clone()));
        }
        if inner.generation != generation {
            return Err(AgentError::Cancelled {
                user_initiated: false,
            });
        }
        if std::mem::take(&mut inner.pending_cancel) {
            tracing::info!(execution_id = %self.id, "Run cancelled by user before start");
            return Err(AgentError::Cancelled {
                user_initiated: true,
            });
        }
        inner.active = Some(ctx.clone());
        inner.last = Some(ctx.clone());
        inner.state = ExecutionState::Running;
        inner.last_run_at = Some(Utc::now());
        Ok(ctx)
    }

    async fn execute(
        &self,
        ctx: &Arc<ExecutionContext>,
        query: &str,
        metadata: &ExecutionMetadata,
    ) -> Result<()> {
        tracing::info!(
            execution_id = %self.id,
            mode = %self.options.mode,
            "Run started"
        );
        ctx.start_execution(self.options.tab_id);
        if let Some(tab_id) = self.options.tab_id {
            ctx.browser().lock_to_tab(tab_id).await?;
        }

        let agent = create_agent(self.options.mode, ctx.clone(), &self.deps.tools);
        agent.execute(query, metadata).await
    }

    /// Runs on every exit path
    async fn cleanup(&self, ctx: &Arc<ExecutionContext>) {
        ctx.browser().unlock().await;
        ctx.end_execution();

        let mut inner = self.lock();
        if inner
            .active
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, ctx))
        {
            inner.active = None;
        }
    }

    fn settle(&self, result: &Result<()>) {
        let state = match result {
            Ok(()) => {
                tracing::info!(execution_id = %self.id, "Run completed");
                ExecutionState::Completed
            }
            Err(e) if e.is_cancellation() => {
                tracing::info!(
                    execution_id = %self.id,
                    user_initiated = e.is_user_cancellation(),
                    "Run cancelled"
                );
                ExecutionState::Cancelled
            }
            Err(e) => {
                tracing::error!(execution_id = %self.id, error = %e, "Run failed");
                self.channel.publish_message(e.to_string(), MessageRole::Error);
                ExecutionState::Failed
            }
        };
        self.set_state(state);
    }

    fn set_state(&self, state: ExecutionState) {
        let mut inner = self.lock();
        if inner.state != ExecutionState::Disposed {
            inner.state = state;
        }
    }

    /// Pause the run in flight
    ///
    /// Publishes one pause message and cancels the active context. A pause
    /// during `Initializing` is held until the context exists, and the run
    /// then ends before its agent starts. Returns `false` without side
    /// effects when nothing is running or the run is already cancelled.
    pub fn cancel(&self) -> bool {
        let ctx = {
            let mut inner = self.lock();
            let active = inner.active.clone();
            match active {
                Some(ctx) => ctx,
                None if inner.state == ExecutionState::Initializing && !inner.pending_cancel => {
                    inner.pending_cancel = true;
                    inner.state = ExecutionState::Cancelling;
                    drop(inner);
                    self.channel
                        .publish_message(PAUSE_MESSAGE, MessageRole::Assistant);
                    tracing::info!(
                        execution_id = %self.id,
                        "Run cancelled by user during initialization"
                    );
                    return true;
                }
                None => return false,
            }
        };
        if ctx.is_cancelled() {
            return false;
        }

        self.channel
            .publish_message(PAUSE_MESSAGE, MessageRole::Assistant);
        let cancelled = ctx.cancel_execution(true);
        if cancelled {
            let mut inner = self.lock();
            if inner.state == ExecutionState::Running {
                inner.state = ExecutionState::Cancelling;
            }
            tracing::info!(execution_id = %self.id, "Run cancelled by user");
        }
        cancelled
    }

    /// Start a new conversation under the same id and channel
    pub fn reset(&self) {
        let (active, last) = {
            let inner = self.lock();
            (inner.active.clone(), inner.last.clone())
        };
        if let Some(ctx) = active {
            ctx.cancel_execution(false);
        }
        if let Some(history) = self.history.get() {
            history.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
        self.channel.clear_buffer();
        if let Some(ctx) = last {
            ctx.reset();
        }
        tracing::info!(execution_id = %self.id, "Execution reset");
    }

    /// Forward a human-input answer to the paused run
    pub fn respond_human_input(&self, request_id: impl Into<String>, action: HumanAction) {
        self.channel.publish_human_input_response(request_id, action);
    }

    /// Release everything the execution holds
    ///
    /// Cancels the run in flight, releases the browser context and destroys
    /// the channel. Idempotent.
    pub async fn dispose(&self) {
        let active = {
            let mut inner = self.lock();
            if inner.state == ExecutionState::Disposed {
                return;
            }
            inner.state = ExecutionState::Disposed;
            inner.generation += 1;
            inner.last = None;
            inner.active.take()
        };

        if let Some(ctx) = active {
            ctx.cancel_execution(false);
            ctx.end_execution();
        }
        if let Some(browser) = self.browser.get() {
            browser.unlock().await;
            browser.cleanup().await;
        }
        self.registry.delete(&self.id, true);
        tracing::info!(execution_id = %self.id, "Execution disposed");
    }
}
