//! Human-in-the-loop pause
//!
//! The agent publishes a request on its channel and polls for a matching
//! response. The wait is a plain poll loop so that cancellation and the
//! timeout are both checked at the same point.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::pubsub::{Event, HumanAction};
use serde::{Deserialize, Serialize};

/// How a human-input pause ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanInputOutcome {
    /// The human finished the step; resume
    Done,
    /// The human asked to stop the task
    Aborted,
    /// Nobody answered within the timeout
    TimedOut,
}

/// Ask a human to act and wait for the answer
///
/// Only a response carrying this request's id is accepted. Returns a
/// cancellation error if the run is cancelled while waiting.
pub async fn wait_for_human_input(ctx: &ExecutionContext, prompt: &str) -> Result<HumanInputOutcome> {
    let request_id = format!("hi-{}", uuid::Uuid::new_v4());
    ctx.set_human_input_request_id(Some(request_id.clone()));

    // Subscribe before publishing so the answer cannot slip past
    let mut subscription = ctx.channel().subscribe();
    ctx.channel().publish_human_input_request(&request_id, prompt);
    tracing::info!(
        execution_id = %ctx.execution_id(),
        request_id = %request_id,
        "Waiting for human input"
    );

    let timeout = ctx.config().agent.human_input_timeout();
    let poll = ctx.config().agent.human_input_poll();
    let started = tokio::time::Instant::now();

    let outcome = loop {
        for event in subscription.drain() {
            if let Event::HumanInputResponse(response) = event {
                ctx.set_human_input_response(response);
            }
        }

        if let Some(response) = ctx.human_input_response() {
            break match response.action {
                HumanAction::Done => HumanInputOutcome::Done,
                HumanAction::Abort => HumanInputOutcome::Aborted,
            };
        }

        if let Err(e) = ctx.check_cancelled() {
            ctx.clear_human_input();
            return Err(e);
        }

        if started.elapsed() >= timeout {
            break HumanInputOutcome::TimedOut;
        }

        tokio::time::sleep(poll).await;
    };

    ctx.clear_human_input();
    tracing::info!(
        execution_id = %ctx.execution_id(),
        request_id = %request_id,
        outcome = ?outcome,
        "Human input resolved"
    );
    Ok(outcome)
}
