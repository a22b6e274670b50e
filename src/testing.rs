//! Test doubles shared by unit tests

use crate::browser::{BrowserContext, BrowserContextFactory, PageState, TabId};
use crate::config::RuntimeConfig;
use crate::context::ExecutionContext;
use crate::error::{AgentError, Result};
use crate::history::MessageHistory;
use crate::llm::{LlmClient, LlmProvider, LlmResponse, ModelOptions, StreamEvent, ToolDefinition};
use crate::message::{ToolCall, Turn};
use crate::pubsub::ScopedEventChannel;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Pops the front of a script, repeating the last entry once one is left
fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// LLM client replaying scripted responses
///
/// Structured answers are keyed by the schema's `title`.
#[derive(Default)]
pub(crate) struct ScriptedLlm {
    responses: Mutex<VecDeque<LlmResponse>>,
    structured: Mutex<HashMap<String, VecDeque<serde_json::Value>>>,
    pub(crate) completions: AtomicUsize,
    pub(crate) seen_tools: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(self, response: LlmResponse) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub(crate) fn respond_text(self, text: &str) -> Self {
        self.respond(LlmResponse::text(text))
    }

    pub(crate) fn respond_tool(self, id: &str, name: &str, args: serde_json::Value) -> Self {
        self.respond(LlmResponse::tool_calls(vec![ToolCall::new(id, name, args)]))
    }

    pub(crate) fn structured(self, title: &str, value: serde_json::Value) -> Self {
        self.structured
            .lock()
            .unwrap()
            .entry(title.to_string())
            .or_default()
            .push_back(value);
        self
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _turns: &[Turn], tools: &[ToolDefinition]) -> Result<LlmResponse> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        self.seen_tools
            .lock()
            .unwrap()
            .extend(tools.iter().map(|t| t.name.clone()));
        let mut responses = self.responses.lock().unwrap();
        next_scripted(&mut responses)
            .ok_or_else(|| AgentError::Llm("No more mock responses available".into()))
    }

    async fn complete_streaming(
        &self,
        turns: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let response = self.complete(turns, tools).await?;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for word in response.content.split_inclusive(' ') {
                tx.send(StreamEvent::TextDelta(word.to_string())).await.ok();
            }
            tx.send(StreamEvent::Done(response)).await.ok();
        });
        Ok(rx)
    }

    async fn complete_structured(
        &self,
        _turns: &[Turn],
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let title = schema
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        let mut structured = self.structured.lock().unwrap();
        structured
            .get_mut(&title)
            .and_then(next_scripted)
            .ok_or_else(|| AgentError::Llm(format!("No scripted answer for {}", title)))
    }
}

pub(crate) struct StaticProvider {
    client: Arc<dyn LlmClient>,
}

impl StaticProvider {
    pub(crate) fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LlmProvider for StaticProvider {
    async fn model(&self, _options: &ModelOptions) -> Result<Arc<dyn LlmClient>> {
        Ok(self.client.clone())
    }
}

/// Browser context with a fixed page that counts lock calls
#[derive(Default)]
pub(crate) struct MockBrowser {
    pub(crate) closed_tabs: Vec<TabId>,
    pub(crate) locked: Mutex<Option<TabId>>,
    pub(crate) unlocks: AtomicUsize,
    pub(crate) cleanups: AtomicUsize,
}

#[async_trait]
impl BrowserContext for MockBrowser {
    async fn current_page(&self) -> Result<PageState> {
        Ok(PageState {
            tab_id: 1,
            url: "https://example.com".into(),
            title: "Example Domain".into(),
            summary: "[1] <a>More information...</a>".into(),
            screenshot: None,
        })
    }

    async fn lock_to_tab(&self, tab_id: TabId) -> Result<()> {
        if self.closed_tabs.contains(&tab_id) {
            return Err(AgentError::Browser(format!("Tab {} is closed", tab_id)));
        }
        *self.locked.lock().unwrap() = Some(tab_id);
        Ok(())
    }

    async fn unlock(&self) {
        *self.locked.lock().unwrap() = None;
        self.unlocks.fetch_add(1, Ordering::SeqCst);
    }

    async fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct MockBrowserFactory {
    pub(crate) created: Mutex<Vec<Arc<MockBrowser>>>,
    pub(crate) closed_tabs: Vec<TabId>,
    pub(crate) delay: Option<Duration>,
}

impl MockBrowserFactory {
    /// Factory whose browsers refuse to lock the given tab
    pub(crate) fn with_closed_tab(tab_id: TabId) -> Self {
        Self {
            closed_tabs: vec![tab_id],
            ..Self::default()
        }
    }

    /// Factory that takes `delay` to create each browser
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

#[async_trait]
impl BrowserContextFactory for MockBrowserFactory {
    async fn create(&self, _execution_id: &str) -> Result<Arc<dyn BrowserContext>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let browser = Arc::new(MockBrowser {
            closed_tabs: self.closed_tabs.clone(),
            ..MockBrowser::default()
        });
        self.created.lock().unwrap().push(browser.clone());
        Ok(browser)
    }
}

/// Context over a fresh channel and history
pub(crate) fn context_with(llm: Arc<dyn LlmClient>, config: RuntimeConfig) -> ExecutionContext {
    let history = Arc::new(Mutex::new(MessageHistory::from_config(&config.history)));
    ExecutionContext::new(
        "exec-test",
        Arc::new(config),
        history,
        ScopedEventChannel::new("exec-test", 200),
        Arc::new(MockBrowser::default()),
        Arc::new(StaticProvider::new(llm)),
    )
}

pub(crate) fn test_context() -> ExecutionContext {
    context_with(Arc::new(ScriptedLlm::new()), RuntimeConfig::default())
}
