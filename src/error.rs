//! Error types for a3s-browser-agent

use thiserror::Error;

/// Errors that can occur in the agent runtime
#[derive(Debug, Error)]
pub enum AgentError {
    /// A cooperative cancellation check fired
    ///
    /// `user_initiated` separates a pause requested from the UI from an
    /// internal cleanup cancel (e.g. a newer run preempting this one).
    #[error("Task cancelled{}", cancel_suffix(.user_initiated))]
    Cancelled { user_initiated: bool },

    /// Missing or invalid configuration (model credentials, runtime limits)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation conflicts with current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Live execution count is at the configured ceiling
    #[error("Maximum concurrent executions ({limit}) reached")]
    CapacityExceeded { limit: usize },

    /// Execution was disposed and can no longer run
    #[error("Execution '{0}' has been disposed")]
    Disposed(String),

    /// Model call failure
    #[error("LLM error: {0}")]
    Llm(String),

    /// Browser-context failure, such as a tab that can no longer be locked
    #[error("Browser error: {0}")]
    Browser(String),

    /// Validation never confirmed the task as complete
    #[error("Task incomplete after {attempts} attempts")]
    Incomplete { attempts: usize },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    /// Whether this error is a cancellation of any kind
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AgentError::Cancelled { .. })
    }

    /// Whether this error is a cancellation requested by the user
    pub fn is_user_cancellation(&self) -> bool {
        matches!(
            self,
            AgentError::Cancelled {
                user_initiated: true
            }
        )
    }
}

fn cancel_suffix(user_initiated: &bool) -> &'static str {
    if *user_initiated {
        " by user"
    } else {
        ""
    }
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, AgentError>;
