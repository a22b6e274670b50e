//! Bounded conversation memory
//!
//! `MessageHistory` is an ordered log of turns kept under a token budget.
//! Token counts are an approximation:
//!
//! ```text
//! tokens(turn) = tokens_per_turn
//!              + ceil(chars(content) / chars_per_token)
//!              + ceil(chars(json(tool_calls)) / chars_per_token)   // AI turns with tool calls
//! ```
//!
//! Any routine that truncates input for the model must use the same
//! [`TokenEstimator`] so both sides agree on what fits.
//!
//! After every mutation the oldest non-system turn is evicted until the
//! estimate fits the budget. When only system turns remain the oldest turn
//! of any kind goes instead. One turn always survives; if it alone is over
//! budget its text is cut down to what fits, and an AI turn whose tool-call
//! payload alone is over budget loses its calls. The budget is never below
//! the per-turn overhead, so an emptied turn always fits.

use crate::config::HistoryConfig;
use crate::message::{Turn, TurnContent, TurnKind};

/// Approximate token counter shared by history trimming and prompt truncation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimator {
    pub chars_per_token: usize,
    pub tokens_per_turn: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        let config = HistoryConfig::default();
        Self {
            chars_per_token: config.chars_per_token,
            tokens_per_turn: config.tokens_per_turn,
        }
    }
}

impl TokenEstimator {
    /// Tokens for a raw piece of text
    pub fn text_tokens(&self, chars: usize) -> usize {
        chars.div_ceil(self.chars_per_token.max(1))
    }

    /// Tokens charged for one turn
    pub fn turn_tokens(&self, turn: &Turn) -> usize {
        let mut tokens = self.tokens_per_turn + self.text_tokens(turn.content_chars());
        let calls = turn.tool_calls();
        if !calls.is_empty() {
            let serialized = serde_json::to_string(calls).map(|s| s.chars().count()).unwrap_or(0);
            tokens += self.text_tokens(serialized);
        }
        tokens
    }

    /// Tokens for a sequence of turns
    pub fn total(&self, turns: &[Turn]) -> usize {
        turns.iter().map(|t| self.turn_tokens(t)).sum()
    }

    /// Largest number of characters that fits in `tokens`
    pub fn max_chars(&self, tokens: usize) -> usize {
        tokens.saturating_mul(self.chars_per_token.max(1))
    }
}

/// Ordered conversation log with a token budget
#[derive(Debug, Clone)]
pub struct MessageHistory {
    turns: Vec<Turn>,
    token_budget: usize,
    estimator: TokenEstimator,
}

impl MessageHistory {
    /// Create an empty history with the given budget and default estimation constants
    pub fn new(token_budget: usize) -> Self {
        Self {
            turns: Vec::new(),
            token_budget: token_budget.max(TokenEstimator::default().tokens_per_turn),
            estimator: TokenEstimator::default(),
        }
    }

    /// Create an empty history from configuration
    pub fn from_config(config: &HistoryConfig) -> Self {
        Self {
            turns: Vec::new(),
            token_budget: config.max_tokens.max(config.tokens_per_turn),
            estimator: TokenEstimator {
                chars_per_token: config.chars_per_token,
                tokens_per_turn: config.tokens_per_turn,
            },
        }
    }

    /// Append a turn, then trim to budget
    ///
    /// System and browser-state turns replace their previous instance.
    pub fn append(&mut self, turn: Turn) {
        match turn.kind() {
            TurnKind::System => self.remove_kind(TurnKind::System),
            TurnKind::BrowserState => self.remove_kind(TurnKind::BrowserState),
            TurnKind::Human | TurnKind::Ai | TurnKind::Tool => {}
        }
        self.turns.push(turn);
        self.enforce_budget();
    }

    /// Replace the system turn
    ///
    /// The system turn is kept at the front of the log.
    pub fn append_system(&mut self, content: impl Into<String>) {
        self.remove_kind(TurnKind::System);
        self.turns.insert(0, Turn::system(content));
        self.enforce_budget();
    }

    /// Replace the browser-state turn
    pub fn append_browser_state(&mut self, content: impl Into<String>) {
        self.append(Turn::browser_state(content));
    }

    pub fn append_human(&mut self, content: impl Into<String>) {
        self.append(Turn::human(content));
    }

    pub fn append_ai(&mut self, content: impl Into<String>) {
        self.append(Turn::ai(content));
    }

    pub fn append_ai_tool_calls(
        &mut self,
        content: impl Into<String>,
        tool_calls: Vec<crate::message::ToolCall>,
    ) {
        self.append(Turn::ai_with_tool_calls(content, tool_calls));
    }

    pub fn append_tool(
        &mut self,
        tool_call_id: impl Into<String>,
        content: impl Into<crate::message::TurnContent>,
    ) {
        self.append(Turn::tool(tool_call_id, content));
    }

    /// Copy of all turns, oldest first
    pub fn get_all(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Most recent turn
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Remove and return the most recent turn
    pub fn remove_last(&mut self) -> Option<Turn> {
        self.turns.pop()
    }

    /// Remove every turn of the given kind
    pub fn remove_kind(&mut self, kind: TurnKind) {
        self.turns.retain(|t| t.kind() != kind);
    }

    /// Estimated token count of the whole log
    pub fn estimate_tokens(&self) -> usize {
        self.estimator.total(&self.turns)
    }

    /// Budget minus current estimate (zero when over budget)
    pub fn remaining_tokens(&self) -> usize {
        self.token_budget.saturating_sub(self.estimate_tokens())
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    pub fn estimator(&self) -> TokenEstimator {
        self.estimator
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drop all turns, keeping budget and estimation constants
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// New history with the same budget, optionally carrying the current turns
    pub fn fork(&self, include_history: bool) -> Self {
        Self {
            turns: if include_history {
                self.turns.clone()
            } else {
                Vec::new()
            },
            token_budget: self.token_budget,
            estimator: self.estimator,
        }
    }

    fn enforce_budget(&mut self) {
        let mut total = self.estimate_tokens();
        let mut evicted = 0usize;

        while total > self.token_budget && self.turns.len() > 1 {
            let index = self
                .turns
                .iter()
                .position(|t| t.kind() != TurnKind::System)
                .unwrap_or(0);
            let removed = self.turns.remove(index);
            total = total.saturating_sub(self.estimator.turn_tokens(&removed));
            evicted += 1;
        }

        if total > self.token_budget {
            total = self.fit_sole_turn();
        }

        if evicted > 0 {
            tracing::debug!(
                evicted,
                remaining = self.turns.len(),
                tokens = total,
                budget = self.token_budget,
                "History trimmed to token budget"
            );
        }
    }

    /// Shrink the one remaining turn until it fits
    ///
    /// Text is cut first. Tool calls go only when their payload alone
    /// exceeds the budget.
    fn fit_sole_turn(&mut self) -> usize {
        let estimator = self.estimator;
        let budget = self.token_budget;
        let Some(turn) = self.turns.first_mut() else {
            return 0;
        };

        let overhead = |turn: &Turn| {
            estimator.turn_tokens(turn) - estimator.text_tokens(turn.content_chars())
        };
        if overhead(&*turn) > budget {
            if let Turn::Ai { tool_calls, .. } = turn {
                tracing::debug!(dropped = tool_calls.len(), "Tool calls dropped from oversized turn");
                tool_calls.clear();
            }
        }
        let max_chars = estimator.max_chars(budget.saturating_sub(overhead(&*turn)));
        truncate_content(turn, max_chars);

        let total = estimator.turn_tokens(turn);
        tracing::debug!(tokens = total, budget, "Sole turn truncated");
        total
    }
}

fn truncate_content(turn: &mut Turn, max_chars: usize) {
    let cut = |text: &str| text.chars().take(max_chars).collect::<String>();
    match turn {
        Turn::System { content }
        | Turn::Human { content }
        | Turn::Ai { content, .. }
        | Turn::BrowserState { content } => *content = cut(content),
        Turn::Tool { content, .. } => *content = TurnContent::Text(cut(&content.as_text())),
    }
}
