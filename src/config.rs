//! Runtime configuration
//!
//! Groups the tunables of every runtime layer:
//! - Conversation memory budget and token estimation constants
//! - Event channel replay capacity and reconnect grace period
//! - Execution concurrency ceiling, disposal grace period, provider readiness wait
//! - Control-loop heuristics (validation attempts, loop detection, human input)
//!
//! All sections use camelCase JSON and default every missing field, so a
//! partial config file only overrides what it names.

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default token budget for one execution's conversation memory
pub const DEFAULT_MAX_TOKENS: usize = 128_000;

/// Default number of characters that approximate one token
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Default fixed per-turn token overhead
pub const DEFAULT_TOKENS_PER_TURN: usize = 3;

/// Default number of events kept for late subscribers
pub const DEFAULT_REPLAY_CAPACITY: usize = 200;

/// Default idle grace period before a released channel or execution is destroyed (10 minutes)
pub const DEFAULT_IDLE_GRACE_MS: u64 = 10 * 60 * 1000;

/// Default ceiling on live executions
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 10;

/// Default ceiling on todo items per execution
pub const DEFAULT_MAX_TODOS: usize = 30;

// ============================================================================
// Sections
// ============================================================================

/// Conversation memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    /// Token budget the history is trimmed to after every mutation
    pub max_tokens: usize,
    /// Characters per estimated token
    pub chars_per_token: usize,
    /// Fixed overhead charged for every turn
    pub tokens_per_turn: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            tokens_per_turn: DEFAULT_TOKENS_PER_TURN,
        }
    }
}

impl HistoryConfig {
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Event channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    /// Events retained for replay to new subscribers
    pub replay_capacity: usize,
    /// Grace period before a released channel is destroyed
    pub idle_grace_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            idle_grace_ms: DEFAULT_IDLE_GRACE_MS,
        }
    }
}

impl ChannelConfig {
    pub fn idle_grace(&self) -> Duration {
        Duration::from_millis(self.idle_grace_ms)
    }

    pub fn with_idle_grace_ms(mut self, ms: u64) -> Self {
        self.idle_grace_ms = ms;
        self
    }
}

/// Execution lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionConfig {
    /// Maximum number of live executions
    pub max_concurrent: usize,
    /// Grace period before a released execution is disposed
    pub idle_grace_ms: u64,
    /// How long a run waits for the LLM provider to become ready
    pub provider_ready_timeout_ms: u64,
    /// Poll interval while waiting for the provider
    pub provider_poll_interval_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            idle_grace_ms: DEFAULT_IDLE_GRACE_MS,
            provider_ready_timeout_ms: 30_000,
            provider_poll_interval_ms: 500,
        }
    }
}

impl ExecutionConfig {
    pub fn idle_grace(&self) -> Duration {
        Duration::from_millis(self.idle_grace_ms)
    }

    pub fn provider_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_ready_timeout_ms)
    }

    pub fn provider_poll_interval(&self) -> Duration {
        Duration::from_millis(self.provider_poll_interval_ms)
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_idle_grace_ms(mut self, ms: u64) -> Self {
        self.idle_grace_ms = ms;
        self
    }
}

/// Control-loop configuration
///
/// The loop-detection and validation values are heuristics, not contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Outer retry ceiling: validation attempts before giving up
    pub max_validation_attempts: usize,
    /// Observe/think/act cycles per validation attempt
    pub max_cycles_per_attempt: usize,
    /// Number of recent cycles inspected by the loop detector
    pub loop_lookback: usize,
    /// Identical cycle signatures within the lookback window that count as a loop
    pub loop_threshold: usize,
    /// How long a human-input pause waits for a response
    pub human_input_timeout_ms: u64,
    /// Poll interval while waiting for human input
    pub human_input_poll_ms: u64,
    /// Tool whose invocation ends an attempt successfully
    pub done_tool_name: String,
    /// Maximum number of todo items per execution
    pub max_todos: usize,
    /// Stream free-form model output to the channel
    pub stream_responses: bool,
    /// Optional system prompt override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_validation_attempts: 3,
            max_cycles_per_attempt: 12,
            loop_lookback: 8,
            loop_threshold: 4,
            human_input_timeout_ms: 10 * 60 * 1000,
            human_input_poll_ms: 500,
            done_tool_name: "done_tool".to_string(),
            max_todos: DEFAULT_MAX_TODOS,
            stream_responses: true,
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    pub fn human_input_timeout(&self) -> Duration {
        Duration::from_millis(self.human_input_timeout_ms)
    }

    pub fn human_input_poll(&self) -> Duration {
        Duration::from_millis(self.human_input_poll_ms)
    }

    pub fn with_max_validation_attempts(mut self, attempts: usize) -> Self {
        self.max_validation_attempts = attempts;
        self
    }

    pub fn with_max_cycles(mut self, cycles: usize) -> Self {
        self.max_cycles_per_attempt = cycles;
        self
    }

    pub fn with_loop_detection(mut self, lookback: usize, threshold: usize) -> Self {
        self.loop_lookback = lookback;
        self.loop_threshold = threshold;
        self
    }

    pub fn with_human_input_timeout(mut self, timeout_ms: u64, poll_ms: u64) -> Self {
        self.human_input_timeout_ms = timeout_ms;
        self.human_input_poll_ms = poll_ms;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

// ============================================================================
// Runtime Configuration
// ============================================================================

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub history: HistoryConfig,
    pub channel: ChannelConfig,
    pub execution: ExecutionConfig,
    pub agent: AgentConfig,
}

impl RuntimeConfig {
    /// Create a configuration with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AgentError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            AgentError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "Runtime config loaded");
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AgentError::Config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            AgentError::Config(format!(
                "Failed to write config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Reject limits that would make the runtime unusable
    pub fn validate(&self) -> Result<()> {
        if self.history.max_tokens == 0 {
            return Err(AgentError::Config("history.maxTokens must be > 0".into()));
        }
        if self.history.max_tokens < self.history.tokens_per_turn {
            return Err(AgentError::Config(
                "history.maxTokens must cover at least one turn's overhead".into(),
            ));
        }
        if self.history.chars_per_token == 0 {
            return Err(AgentError::Config(
                "history.charsPerToken must be > 0".into(),
            ));
        }
        if self.channel.replay_capacity == 0 {
            return Err(AgentError::Config(
                "channel.replayCapacity must be > 0".into(),
            ));
        }
        if self.execution.max_concurrent == 0 {
            return Err(AgentError::Config(
                "execution.maxConcurrent must be > 0".into(),
            ));
        }
        if self.agent.max_validation_attempts == 0 || self.agent.max_cycles_per_attempt == 0 {
            return Err(AgentError::Config(
                "agent attempt and cycle limits must be > 0".into(),
            ));
        }
        if self.agent.human_input_poll_ms == 0 {
            return Err(AgentError::Config(
                "agent.humanInputPollMs must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.agent = agent;
        self
    }
}
