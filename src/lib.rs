//! # a3s-browser-agent
//!
//! Execution runtime for a chat-driven browser agent.
//!
//! ## Overview
//!
//! A task arrives as natural language; an [`Execution`] runs it through an
//! agent that drives the browser with tools and streams its progress to the
//! UI over a [`ScopedEventChannel`]. Many executions run side by side, each
//! with its own bounded history, channel and cancellation token.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_browser_agent::{ExecutionManager, ExecutionMetadata, ExecutionOptions};
//!
//! # async fn example(manager: ExecutionManager) -> a3s_browser_agent::Result<()> {
//! let execution = manager
//!     .create("tab-42", ExecutionOptions::browse().with_tab(42))
//!     .await?;
//!
//! // Stream progress to the UI
//! let mut events = execution.channel().subscribe();
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//!
//! execution
//!     .run("Find the cheapest flight to Lisbon", &ExecutionMetadata::default())
//!     .await?;
//!
//! // Keep the execution around briefly in case the panel reconnects
//! manager.delete("tab-42", false).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **ExecutionManager** / **Execution**: lifecycle, capacity limits, delayed disposal
//! - **ExecutionContext**: per-run state (cancellation, tabs, todos, tool metrics)
//! - **MessageHistory**: token-bounded conversation memory
//! - **ScopedEventChannel** / **ChannelRegistry**: per-execution pub/sub with replay
//! - **BrowseAgent** / **ChatAgent**: the observe/think/act/validate loop and chat mode
//! - **LlmProvider**, **Tool**, **BrowserContext**: collaborator traits the host implements

pub mod agent;
pub mod browser;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod history;
pub mod llm;
pub mod message;
pub mod pubsub;
pub mod telemetry;
pub mod todo;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

// Re-export core types
pub use agent::{
    create_agent, wait_for_human_input, Agent, AttemptOutcome, BrowseAgent, ChatAgent,
    HumanInputOutcome, LoopDetector,
};
pub use browser::{BrowserContext, BrowserContextFactory, PageState, TabId};
pub use config::{AgentConfig, ChannelConfig, ExecutionConfig, HistoryConfig, RuntimeConfig};
pub use context::ExecutionContext;
pub use error::{AgentError, Result};
pub use execution::{
    AgentDeps, AgentMode, Execution, ExecutionInfo, ExecutionManager, ExecutionMetadata,
    ExecutionOptions, ExecutionState, ExecutionStats, PlanningMode, PredefinedPlan,
};
pub use history::{MessageHistory, TokenEstimator};
pub use llm::{LlmClient, LlmProvider, LlmResponse, ModelOptions, StreamEvent, ToolDefinition};
pub use message::{ToolCall, Turn, TurnContent, TurnKind};
pub use pubsub::{
    ChannelRegistry, ChannelStats, Event, HumanAction, HumanInputRequest, HumanInputResponse,
    MessageRole, ScopedEventChannel, Subscription, UiMessage,
};
pub use telemetry::{ToolMetric, ToolStats};
pub use todo::{TodoItem, TodoStatus, TodoStore};
pub use tools::{Tool, ToolOutput, ToolRegistry};
