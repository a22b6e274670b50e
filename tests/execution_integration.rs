//! Execution integration tests
//!
//! Drive `ExecutionManager` end to end with scripted models, fake tools and
//! a fake browser context.

mod common;

use a3s_browser_agent::{
    AgentError, Event, ExecutionConfig, ExecutionMetadata, ExecutionOptions, ExecutionState,
    HumanAction, MessageRole, RuntimeConfig, TurnKind,
};
use common::*;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn validated(llm: ScriptedLlm) -> ScriptedLlm {
    llm.structured("Classification", json!({"isSimple": true}))
        .structured("NextAction", json!({"toolName": "done_tool", "rationale": "Continue"}))
        .structured("Validation", json!({"isComplete": true, "reasoning": "Looks done"}))
}

// ─── Browse runs ─────────────────────────────────────────────────

#[tokio::test]
async fn test_browse_run_locks_tab_and_completes() {
    let llm = validated(
        ScriptedLlm::new()
            .text("The cart has one item")
            .tool("c1", "done_tool", json!({"summary": "Cart holds one item"})),
    );
    let h = harness(llm, vec![Arc::new(EchoTool("click"))]);
    let execution = h
        .manager
        .create("tab-42", ExecutionOptions::browse().with_tab(42))
        .await
        .unwrap();

    execution
        .run("What is in my cart?", &ExecutionMetadata::default())
        .await
        .unwrap();

    assert_eq!(execution.state(), ExecutionState::Completed);
    let events = execution.channel().buffer();
    assert_eq!(messages(&events, MessageRole::Assistant), vec!["Cart holds one item"]);
    assert!(messages(&events, MessageRole::Error).is_empty());

    let browser = h.browsers.last();
    assert_eq!(*browser.locked.lock().unwrap(), vec![42]);
    assert_eq!(browser.unlocks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tool_failure_is_folded_into_history() {
    let llm = validated(
        ScriptedLlm::new()
            .text("Reading the page")
            .tool("c1", "extract", json!({}))
            .text("Extraction failed, finishing")
            .tool("c2", "done_tool", json!({"summary": "Could not extract"})),
    );
    let h = harness(llm, vec![Arc::new(BrokenTool)]);
    let execution = h
        .manager
        .create("e1", ExecutionOptions::browse())
        .await
        .unwrap();

    execution
        .run("Extract the prices", &ExecutionMetadata::default())
        .await
        .unwrap();

    let ctx = execution.last_context().unwrap();
    let metrics = ctx.tool_metrics();
    assert!(!metrics["c1"].success);
    assert!(metrics["c2"].success);

    let history = execution.history();
    let turns = history.lock().unwrap().get_all();
    let failed = turns
        .iter()
        .find(|t| t.tool_call_id() == Some("c1"))
        .unwrap();
    assert_eq!(failed.kind(), TurnKind::Tool);
    assert!(failed.text().contains("content script not injected"));

    let names: Vec<_> = ctx
        .tool_metrics_summary()
        .into_iter()
        .map(|s| s.tool_name)
        .collect();
    assert_eq!(names, vec!["done_tool", "extract"]);
}

#[tokio::test(start_paused = true)]
async fn test_human_input_round_trip() {
    let llm = validated(
        ScriptedLlm::new()
            .text("The account page asks for a login")
            .tool("c1", "open_account", json!({}))
            .text("Logged in, balance visible")
            .tool("c2", "done_tool", json!({"summary": "Balance is $10"})),
    );
    let h = harness(llm, vec![Arc::new(LoginTool)]);
    let execution = h
        .manager
        .create("e1", ExecutionOptions::browse())
        .await
        .unwrap();

    let ui = execution.clone();
    let mut events = execution.channel().subscribe();
    let responder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Event::HumanInputRequest(request) = event {
                assert_eq!(request.prompt, "Please log in to your account");
                ui.respond_human_input(request.request_id, HumanAction::Done);
                return true;
            }
        }
        false
    });

    execution
        .run("Check my balance", &ExecutionMetadata::default())
        .await
        .unwrap();

    assert!(responder.await.unwrap());
    let events = execution.channel().buffer();
    assert_eq!(messages(&events, MessageRole::Assistant), vec!["Balance is $10"]);
    assert!(execution
        .last_context()
        .unwrap()
        .human_input_request_id()
        .is_none());
}

// ─── Cancellation ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_cancel_publishes_one_pause_message() {
    let llm = ScriptedLlm::new()
        .text("too late")
        .with_delay(Duration::from_secs(5));
    let h = harness(llm, vec![]);
    let execution = h
        .manager
        .create("e1", ExecutionOptions::chat())
        .await
        .unwrap();

    let running = execution.clone();
    let task =
        tokio::spawn(async move { running.run("Summarize", &ExecutionMetadata::default()).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(execution.state(), ExecutionState::Running);

    assert!(execution.cancel());
    assert!(!execution.cancel());
    assert_eq!(execution.state(), ExecutionState::Cancelling);
    assert!(!h.manager.cancel("e1").unwrap());

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_user_cancellation());
    assert_eq!(execution.state(), ExecutionState::Cancelled);

    let events = execution.channel().buffer();
    assert_eq!(
        messages(&events, MessageRole::Assistant),
        vec!["Task paused by user"]
    );
    assert!(messages(&events, MessageRole::Error).is_empty());
    assert_eq!(h.browsers.last().unlocks.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_run_preempts_first() {
    let llm = ScriptedLlm::new()
        .text("first answer")
        .text("second answer")
        .with_delay(Duration::from_secs(5));
    let h = harness(llm, vec![]);
    let execution = h
        .manager
        .create("e1", ExecutionOptions::chat())
        .await
        .unwrap();

    let running = execution.clone();
    let first =
        tokio::spawn(async move { running.run("first", &ExecutionMetadata::default()).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let first_ctx = execution.last_context().unwrap();

    execution
        .run("second", &ExecutionMetadata::default())
        .await
        .unwrap();

    let err = first.await.unwrap().unwrap_err();
    assert!(err.is_cancellation());
    assert!(!err.is_user_cancellation());
    assert!(first_ctx.is_cancelled());

    let last = execution.last_context().unwrap();
    assert!(!Arc::ptr_eq(&first_ctx, &last));
    assert!(!last.is_cancelled());
    assert_eq!(last.current_task().as_deref(), Some("second"));
    assert_eq!(execution.state(), ExecutionState::Completed);

    // internal preemption is silent
    let events = execution.channel().buffer();
    assert!(messages(&events, MessageRole::Error).is_empty());
    let answers = messages(&events, MessageRole::Assistant);
    assert_eq!(answers.last().map(String::as_str), Some("second answer"));
    assert!(!answers.iter().any(|m| m == "first answer" || m == "Task paused by user"));
}

#[tokio::test]
async fn test_reset_starts_fresh_conversation() {
    let h = harness(ScriptedLlm::new().text("an answer"), vec![]);
    let execution = h
        .manager
        .create("e1", ExecutionOptions::chat())
        .await
        .unwrap();
    execution
        .run("question", &ExecutionMetadata::default())
        .await
        .unwrap();

    execution.reset();
    assert!(execution.history().lock().unwrap().is_empty());
    assert!(execution.channel().buffer().is_empty());

    execution
        .run("new question", &ExecutionMetadata::default())
        .await
        .unwrap();
    let history = execution.history();
    let turns = history.lock().unwrap().get_all();
    assert!(!turns.iter().any(|t| t.text() == "question"));
    assert!(turns.iter().any(|t| t.text() == "new question"));
}

// ─── Errors ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_credentials_propagate_as_config_error() {
    let h = harness_with(
        Arc::new(UnauthenticatedProvider),
        vec![],
        RuntimeConfig::default(),
    );
    let execution = h
        .manager
        .create("e1", ExecutionOptions::chat())
        .await
        .unwrap();

    let err = execution
        .run("hello", &ExecutionMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Config(_)));
    assert_eq!(execution.state(), ExecutionState::Failed);

    let errors = messages(&execution.channel().buffer(), MessageRole::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("API key not configured"));
}

#[tokio::test(start_paused = true)]
async fn test_provider_never_ready_times_out() {
    let llm = Arc::new(ScriptedLlm::new().text("unused"));
    let h = harness_with(
        Arc::new(TestProvider::never_ready(llm.clone())),
        vec![],
        RuntimeConfig::default(),
    );
    let execution = h
        .manager
        .create("e1", ExecutionOptions::chat())
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let err = execution
        .run("hello", &ExecutionMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Config(_)));
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_incomplete_after_validation_attempts() {
    let llm = ScriptedLlm::new()
        .text("Searching")
        .tool("c1", "done_tool", json!({"summary": "maybe"}))
        .structured("Classification", json!({"isSimple": true}))
        .structured("NextAction", json!({"toolName": "done_tool", "rationale": "try"}))
        .structured(
            "Validation",
            json!({"isComplete": false, "reasoning": "No results shown"}),
        );
    let h = harness(llm, vec![]);
    let execution = h
        .manager
        .create("e1", ExecutionOptions::browse())
        .await
        .unwrap();

    let err = execution
        .run("Find flights", &ExecutionMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Incomplete { attempts: 3 }));
    let errors = messages(&execution.channel().buffer(), MessageRole::Error);
    assert_eq!(errors, vec!["Task incomplete after 3 attempts".to_string()]);
}

// ─── Lifecycle ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_reconnect_within_grace_keeps_replay() {
    let h = harness(ScriptedLlm::new().text("hello back"), vec![]);
    let execution = h
        .manager
        .create("e1", ExecutionOptions::chat())
        .await
        .unwrap();
    execution
        .run("hello", &ExecutionMetadata::default())
        .await
        .unwrap();

    h.manager.delete("e1", false).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let reclaimed = h
        .manager
        .get_or_create("e1", ExecutionOptions::chat())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&execution, &reclaimed));

    let mut subscription = reclaimed.channel().subscribe();
    let replayed = subscription.drain();
    let answers = messages(&replayed, MessageRole::Assistant);
    assert!(!answers.is_empty());
    assert!(answers.iter().all(|m| m == "hello back"));

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(h.manager.contains("e1"));
    assert!(!reclaimed.channel().is_destroyed());
}

#[tokio::test]
async fn test_capacity_reaps_finished_execution() {
    let config = RuntimeConfig::default()
        .with_execution(ExecutionConfig::default().with_max_concurrent(1));
    let h = harness_with(
        Arc::new(TestProvider::new(Arc::new(ScriptedLlm::new().text("ok")))),
        vec![],
        config,
    );

    let first = h
        .manager
        .create("a", ExecutionOptions::chat())
        .await
        .unwrap();
    first.run("hi", &ExecutionMetadata::default()).await.unwrap();

    h.manager
        .create("b", ExecutionOptions::chat())
        .await
        .unwrap();
    assert!(first.is_disposed());
    assert_eq!(h.browsers.last().cleanups.load(Ordering::SeqCst), 1);
    assert!(!h.manager.channels().contains("a"));

    let err = h
        .manager
        .create("c", ExecutionOptions::chat())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::CapacityExceeded { limit: 1 }));
}
