//! Repetition detection over recent control-loop cycles

use crate::config::AgentConfig;
use crate::message::Turn;
use std::collections::{HashMap, VecDeque};

/// Flags an attempt whose cycles keep producing the same model action
///
/// Each cycle is reduced to one normalized signature: the tool chosen while
/// thinking plus the model turn that answered the act request. A loop is a
/// signature repeating `threshold` times among the last `lookback` cycles.
#[derive(Debug, Clone)]
pub struct LoopDetector {
    lookback: usize,
    threshold: usize,
    recent: VecDeque<String>,
}

impl LoopDetector {
    pub fn new(lookback: usize, threshold: usize) -> Self {
        Self {
            lookback: lookback.max(1),
            threshold: threshold.max(2),
            recent: VecDeque::new(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.loop_lookback, config.loop_threshold)
    }

    /// Lowercase, drop digits, collapse whitespace
    pub fn normalize(text: &str) -> String {
        text.to_lowercase()
            .chars()
            .filter(|c| !c.is_ascii_digit())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn cycle_signature(tool_name: &str, act: &Turn) -> String {
        let mut signature = format!("{} {}", tool_name, act.text());
        for call in act.tool_calls() {
            signature.push(' ');
            signature.push_str(&call.name);
            signature.push(' ');
            signature.push_str(&call.args.to_string());
        }
        Self::normalize(&signature)
    }

    /// Record one finished cycle and report whether the window now holds a loop
    pub fn record(&mut self, tool_name: &str, act: &Turn) -> bool {
        let signature = Self::cycle_signature(tool_name, act);
        if signature.is_empty() {
            return false;
        }
        self.recent.push_back(signature);
        while self.recent.len() > self.lookback {
            self.recent.pop_front();
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for signature in &self.recent {
            let count = counts.entry(signature.as_str()).or_insert(0);
            *count += 1;
            if *count >= self.threshold {
                return true;
            }
        }
        false
    }

    /// Cycles currently inside the window
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}
