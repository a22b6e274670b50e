//! Task list for multi-step browse runs
//!
//! Complex tasks are broken into a short ordered list of steps. At most one
//! step is `Doing` at a time; the control loop takes the next step from
//! [`TodoStore::get_next_todo`] and the model updates the list through the
//! `todo_manager` tool.

use crate::config::DEFAULT_MAX_TODOS;
use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    /// Waiting to be started
    #[default]
    Todo,
    /// Currently being worked on
    Doing,
    /// Finished
    Done,
    /// Will not be done
    Skipped,
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TodoStatus::Todo => write!(f, "todo"),
            TodoStatus::Doing => write!(f, "doing"),
            TodoStatus::Done => write!(f, "done"),
            TodoStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl FromStr for TodoStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "doing" | "in_progress" | "inprogress" => TodoStatus::Doing,
            "done" | "completed" => TodoStatus::Done,
            "skipped" | "cancelled" | "canceled" => TodoStatus::Skipped,
            _ => TodoStatus::Todo,
        })
    }
}

impl TodoStatus {
    /// Still needs work
    pub fn is_pending(&self) -> bool {
        matches!(self, TodoStatus::Todo | TodoStatus::Doing)
    }

    fn checkbox(&self) -> &'static str {
        match self {
            TodoStatus::Todo => "[ ]",
            TodoStatus::Doing => "[~]",
            TodoStatus::Done => "[x]",
            TodoStatus::Skipped => "[-]",
        }
    }
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// 1-based position, dense after removals
    pub id: usize,
    pub content: String,
    pub status: TodoStatus,
}

/// Ordered step list with a single-active-item invariant
#[derive(Debug, Clone)]
pub struct TodoStore {
    items: Vec<TodoItem>,
    max_items: usize,
}

impl Default for TodoStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TODOS)
    }
}

impl TodoStore {
    pub fn new(max_items: usize) -> Self {
        Self {
            items: Vec::new(),
            max_items,
        }
    }

    /// Append one item; returns its id, or `None` when the list is full
    pub fn add(&mut self, content: impl Into<String>) -> Option<usize> {
        if self.items.len() >= self.max_items {
            return None;
        }
        let id = self.items.len() + 1;
        self.items.push(TodoItem {
            id,
            content: content.into(),
            status: TodoStatus::Todo,
        });
        Some(id)
    }

    /// Append items in order; anything past the capacity is dropped
    ///
    /// Returns the number of items actually added.
    pub fn add_multiple<I, S>(&mut self, contents: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        let mut dropped = 0;
        for content in contents {
            if self.add(content).is_some() {
                added += 1;
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::debug!(added, dropped, max = self.max_items, "Todo list full, items dropped");
        }
        added
    }

    /// Mark an item `Doing`
    ///
    /// Fails with [`AgentError::Conflict`] while a different item is `Doing`.
    /// Re-marking the active item is a no-op.
    pub fn mark_doing(&mut self, id: usize) -> Result<()> {
        if let Some(active) = self.doing() {
            if active.id == id {
                return Ok(());
            }
            return Err(AgentError::Conflict(format!(
                "todo {} is already in progress; finish it before starting {}",
                active.id, id
            )));
        }
        let item = self
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| AgentError::NotFound(format!("todo {}", id)))?;
        item.status = TodoStatus::Doing;
        Ok(())
    }

    /// Mark one item `Done`; returns false for an unknown id
    pub fn complete(&mut self, id: usize) -> bool {
        match self.items.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.status = TodoStatus::Done;
                true
            }
            None => false,
        }
    }

    /// Mark every matching item `Done`; unknown ids are ignored
    pub fn complete_multiple(&mut self, ids: &[usize]) {
        for id in ids {
            self.complete(*id);
        }
    }

    /// Remove an item and renumber the rest densely from 1
    pub fn skip(&mut self, id: usize) -> Result<TodoItem> {
        let index = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| AgentError::NotFound(format!("todo {}", id)))?;
        let mut removed = self.items.remove(index);
        removed.status = TodoStatus::Skipped;
        for (i, item) in self.items.iter_mut().enumerate() {
            item.id = i + 1;
        }
        Ok(removed)
    }

    /// Current `Doing` item, else the first `Todo` item promoted to `Doing`
    pub fn get_next_todo(&mut self) -> Option<TodoItem> {
        if let Some(active) = self.doing() {
            return Some(active.clone());
        }
        let next = self
            .items
            .iter_mut()
            .find(|item| item.status == TodoStatus::Todo)?;
        next.status = TodoStatus::Doing;
        Some(next.clone())
    }

    pub fn is_all_done_or_skipped(&self) -> bool {
        self.items.iter().all(|item| !item.status.is_pending())
    }

    pub fn doing(&self) -> Option<&TodoItem> {
        self.items
            .iter()
            .find(|item| item.status == TodoStatus::Doing)
    }

    pub fn get(&self, id: usize) -> Option<&TodoItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Copy of every item, in order
    pub fn get_all(&self) -> Vec<TodoItem> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn reset(&mut self) {
        self.items.clear();
    }

    /// Checkbox rendering shown to the model
    pub fn to_markdown(&self) -> String {
        if self.items.is_empty() {
            return "No todos".to_string();
        }
        self.items
            .iter()
            .map(|item| format!("- {} {}. {}", item.status.checkbox(), item.id, item.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
