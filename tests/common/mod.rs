//! Shared doubles for integration tests

#![allow(dead_code)]

use a3s_browser_agent::{
    AgentDeps, AgentError, BrowserContext, BrowserContextFactory, Event, ExecutionContext,
    ExecutionManager, LlmClient, LlmProvider, LlmResponse, MessageRole, ModelOptions, PageState,
    Result, RuntimeConfig, TabId, Tool, ToolCall, ToolDefinition, ToolOutput, ToolRegistry, Turn,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Replays free-text/tool-call responses in order and structured answers by
/// schema title; the last entry of each script repeats
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<LlmResponse>>,
    structured: Mutex<HashMap<String, VecDeque<serde_json::Value>>>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every free-text completion takes `delay` of (tokio) time
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn text(self, text: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(LlmResponse::text(text));
        self
    }

    pub fn tool(self, id: &str, name: &str, args: serde_json::Value) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(LlmResponse::tool_calls(vec![ToolCall::new(id, name, args)]));
        self
    }

    pub fn structured(self, title: &str, value: serde_json::Value) -> Self {
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
    async fn complete(&self, _turns: &[Turn], _tools: &[ToolDefinition]) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        next_scripted(&mut *self.responses.lock().unwrap())
            .ok_or_else(|| AgentError::Llm("script exhausted".into()))
    }

    async fn complete_structured(
        &self,
        _turns: &[Turn],
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let title = schema["title"].as_str().unwrap_or_default().to_string();
        self.structured
            .lock()
            .unwrap()
            .get_mut(&title)
            .and_then(next_scripted)
            .ok_or_else(|| AgentError::Llm(format!("no answer for {}", title)))
    }
}

/// Provider handing out one client, optionally never becoming ready
pub struct TestProvider {
    client: Arc<dyn LlmClient>,
    ready: bool,
}

impl TestProvider {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            ready: true,
        }
    }

    pub fn never_ready(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            ready: false,
        }
    }
}

#[async_trait]
impl LlmProvider for TestProvider {
    async fn model(&self, _options: &ModelOptions) -> Result<Arc<dyn LlmClient>> {
        Ok(self.client.clone())
    }

    async fn is_ready(&self) -> bool {
        self.ready
    }
}

/// Provider whose credentials are missing
pub struct UnauthenticatedProvider;

#[async_trait]
impl LlmProvider for UnauthenticatedProvider {
    async fn model(&self, _options: &ModelOptions) -> Result<Arc<dyn LlmClient>> {
        Err(AgentError::Config("API key not configured".into()))
    }
}

#[derive(Default)]
pub struct FakeBrowser {
    pub locked: Mutex<Vec<TabId>>,
    pub unlocks: AtomicUsize,
    pub cleanups: AtomicUsize,
}

#[async_trait]
impl BrowserContext for FakeBrowser {
    async fn current_page(&self) -> Result<PageState> {
        Ok(PageState {
            tab_id: 42,
            url: "https://shop.example/cart".into(),
            title: "Cart".into(),
            summary: "[1] <button>Checkout</button>".into(),
            screenshot: None,
        })
    }

    async fn lock_to_tab(&self, tab_id: TabId) -> Result<()> {
        self.locked.lock().unwrap().push(tab_id);
        Ok(())
    }

    async fn unlock(&self) {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
    }

    async fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeBrowserFactory {
    pub browsers: Mutex<Vec<Arc<FakeBrowser>>>,
}

impl FakeBrowserFactory {
    pub fn last(&self) -> Arc<FakeBrowser> {
        self.browsers.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl BrowserContextFactory for FakeBrowserFactory {
    async fn create(&self, _execution_id: &str) -> Result<Arc<dyn BrowserContext>> {
        let browser = Arc::new(FakeBrowser::default());
        self.browsers.lock().unwrap().push(browser.clone());
        Ok(browser)
    }
}

/// Tool that always succeeds with a fixed output
pub struct EchoTool(pub &'static str);

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "Echoes its arguments"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        args: &serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<ToolOutput> {
        Ok(ToolOutput::success(args.clone()))
    }
}

/// Tool that always fails
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "extract"
    }

    fn description(&self) -> &str {
        "Extracts page content"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        _args: &serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<ToolOutput> {
        anyhow::bail!("content script not injected")
    }
}

/// Tool that needs a human to log in first
pub struct LoginTool;

#[async_trait]
impl Tool for LoginTool {
    fn name(&self) -> &str {
        "open_account"
    }

    fn description(&self) -> &str {
        "Opens the account page"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        _args: &serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<ToolOutput> {
        Ok(ToolOutput::human_input("Please log in to your account"))
    }
}

pub struct Harness {
    pub manager: ExecutionManager,
    pub browsers: Arc<FakeBrowserFactory>,
}

pub fn harness_with(
    provider: Arc<dyn LlmProvider>,
    tools: Vec<Arc<dyn Tool>>,
    config: RuntimeConfig,
) -> Harness {
    let registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    let browsers = Arc::new(FakeBrowserFactory::default());
    let manager = ExecutionManager::new(
        config,
        AgentDeps::new(provider, Arc::new(registry), browsers.clone()),
    );
    Harness { manager, browsers }
}

pub fn harness(llm: ScriptedLlm, tools: Vec<Arc<dyn Tool>>) -> Harness {
    harness_with(
        Arc::new(TestProvider::new(Arc::new(llm))),
        tools,
        RuntimeConfig::default(),
    )
}

/// Published UI messages with the given role
pub fn messages(events: &[Event], role: MessageRole) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Message(m) if m.role == role => Some(m.content.clone()),
            _ => None,
        })
        .collect()
}
