//! Prompt text and structured-output schemas for the agents

use serde::Deserialize;

pub(crate) const CHAT_SYSTEM_PROMPT: &str = "You are a browser assistant. Answer the user's \
question using the content of their open tabs when it is relevant. Be concise.";

pub(crate) fn browse_system_prompt(override_prompt: Option<&str>, done_tool: &str) -> String {
    match override_prompt {
        Some(prompt) => prompt.to_string(),
        None => format!(
            "You are a browser automation agent. Work in small steps: observe the page, \
             decide on exactly one tool, then call it. Keep the todo list current with \
             the todo_manager tool. When the task is finished call {} with a short summary.",
            done_tool
        ),
    }
}

pub(crate) fn observe_instruction(focus: &str) -> String {
    format!(
        "Describe the current page in two or three sentences, focusing on what matters for: {}",
        focus
    )
}

pub(crate) fn think_instruction(focus: &str, tools: &[String]) -> String {
    format!(
        "Current focus: {}\nChoose exactly one tool from [{}] for the next step and explain why in one sentence.",
        focus,
        tools.join(", ")
    )
}

pub(crate) fn act_instruction(tool: &str) -> String {
    format!("Call the {} tool now with the right arguments.", tool)
}

pub(crate) fn validation_instruction(task: &str) -> String {
    format!(
        "Original task: {}\nGiven everything above, is the task actually complete? \
         Explain your reasoning and, if it is not, suggest what to do next.",
        task
    )
}

pub(crate) fn classification_instruction(task: &str) -> String {
    format!(
        "Task: {}\nIs this a simple task that takes one or two browser actions?",
        task
    )
}

pub(crate) fn planning_instruction(task: &str, max_steps: usize) -> String {
    format!(
        "Task: {}\nBreak the task into at most {} short, concrete browser steps.",
        task, max_steps
    )
}

pub(crate) fn validation_feedback(validation: &Validation) -> String {
    let mut out = format!("The task is not complete yet. {}", validation.reasoning);
    if !validation.suggestions.is_empty() {
        out.push_str("\nSuggestions:");
        for suggestion in &validation.suggestions {
            out.push_str("\n- ");
            out.push_str(suggestion);
        }
    }
    out
}

// ============================================================================
// Schemas
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Classification {
    pub is_simple: bool,
}

pub(crate) fn classification_schema() -> serde_json::Value {
    serde_json::json!({
        "title": "Classification",
        "type": "object",
        "properties": { "isSimple": { "type": "boolean" } },
        "required": ["isSimple"]
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct Plan {
    pub steps: Vec<String>,
}

pub(crate) fn plan_schema() -> serde_json::Value {
    serde_json::json!({
        "title": "Plan",
        "type": "object",
        "properties": {
            "steps": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["steps"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NextAction {
    pub tool_name: String,
    #[serde(default)]
    pub rationale: String,
}

pub(crate) fn next_action_schema(tools: &[String]) -> serde_json::Value {
    serde_json::json!({
        "title": "NextAction",
        "type": "object",
        "properties": {
            "toolName": { "type": "string", "enum": tools },
            "rationale": { "type": "string" }
        },
        "required": ["toolName", "rationale"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Validation {
    pub is_complete: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

pub(crate) fn validation_schema() -> serde_json::Value {
    serde_json::json!({
        "title": "Validation",
        "type": "object",
        "properties": {
            "isComplete": { "type": "boolean" },
            "reasoning": { "type": "string" },
            "suggestions": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["isComplete", "reasoning"]
    })
}
