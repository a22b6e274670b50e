//! Telemetry
//!
//! Span names, per-call tool metrics and subscriber setup. Everything is
//! plain `tracing`; exporting is left to the embedding application.
//!
//! ## Span Hierarchy
//!
//! ```text
//! a3s.agent.execute
//!   +-- a3s.agent.attempt (repeated)
//!   |   +-- a3s.llm.completion
//!   |   +-- a3s.tool.execute (repeated)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

pub const SPAN_AGENT_EXECUTE: &str = "a3s.agent.execute";
pub const SPAN_AGENT_ATTEMPT: &str = "a3s.agent.attempt";
pub const SPAN_LLM_COMPLETION: &str = "a3s.llm.completion";
pub const SPAN_TOOL_EXECUTE: &str = "a3s.tool.execute";

// ============================================================================
// Subscriber
// ============================================================================

/// Install a global fmt subscriber filtered by `RUST_LOG` (default `info`)
///
/// Safe to call more than once; only the first call installs anything.
/// Returns whether this call installed the subscriber.
pub fn init_tracing(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}

// ============================================================================
// Tool Metrics
// ============================================================================

/// One tool invocation, keyed by call id on the execution context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetric {
    pub tool_name: String,
    pub duration_ms: u64,
    pub success: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolMetric {
    pub fn success(tool_name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            tool_name: tool_name.into(),
            duration_ms,
            success: true,
            timestamp: chrono::Utc::now(),
            error: None,
        }
    }

    pub fn failure(tool_name: impl Into<String>, duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            duration_ms,
            success: false,
            timestamp: chrono::Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Aggregated statistics for a single tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStats {
    pub tool_name: String,
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_duration_ms: u64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub avg_duration_ms: u64,
    pub last_called_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ToolStats {
    fn empty(tool_name: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            total_duration_ms: 0,
            min_duration_ms: u64::MAX,
            max_duration_ms: 0,
            avg_duration_ms: 0,
            last_called_at: None,
        }
    }

    fn record(&mut self, metric: &ToolMetric) {
        self.total_calls += 1;
        if metric.success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.total_duration_ms += metric.duration_ms;
        self.min_duration_ms = self.min_duration_ms.min(metric.duration_ms);
        self.max_duration_ms = self.max_duration_ms.max(metric.duration_ms);
        self.avg_duration_ms = self.total_duration_ms / self.total_calls;
        self.last_called_at = match self.last_called_at {
            Some(last) if last >= metric.timestamp => Some(last),
            _ => Some(metric.timestamp),
        };
    }
}

/// Aggregate per-call metrics into per-tool stats, sorted by tool name
pub fn summarize_tool_metrics<'a, I>(metrics: I) -> Vec<ToolStats>
where
    I: IntoIterator<Item = &'a ToolMetric>,
{
    let mut stats: HashMap<&str, ToolStats> = HashMap::new();
    for metric in metrics {
        stats
            .entry(metric.tool_name.as_str())
            .or_insert_with(|| ToolStats::empty(&metric.tool_name))
            .record(metric);
    }
    let mut stats: Vec<_> = stats.into_values().collect();
    stats.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
    stats
}
