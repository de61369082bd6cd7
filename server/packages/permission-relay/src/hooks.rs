//! Agent hook adapters. Each hook reads one JSON document from stdin, talks
//! to a running relay over HTTP and prints at most one JSON reply to stdout.
//! Every failure degrades to "no output" so the agent falls back to its own
//! default behavior.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::{
    AgentResponseInput, Decision, PermissionInput, PermissionOutcome, ToolResultInput,
    WindowHandle,
};
use crate::transcript;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8765";
/// Upper bound the agent allows a permission hook before giving up on it.
pub const PERMISSION_HOOK_TIMEOUT: Duration = Duration::from_secs(58);
pub const NOTIFY_HOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum HookError {
    #[error("invalid hook input: {0}")]
    Input(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected http status: {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Permission,
    PostTool,
    Stop,
}

#[derive(Debug, Clone)]
pub struct HookContext {
    pub endpoint: String,
    /// Window the agent runs in, reported with every request.
    pub handle: Option<WindowHandle>,
}

impl HookContext {
    pub fn from_env() -> Self {
        let endpoint = std::env::var("PERMISSION_RELAY_ENDPOINT")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let handle = std::env::var("PERMISSION_RELAY_HANDLE")
            .ok()
            .and_then(|value| value.trim().parse().ok());
        Self { endpoint, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
struct PermissionHookInput {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PostToolHookInput {
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Option<Value>,
    #[serde(default, alias = "tool_response")]
    tool_result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StopHookInput {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    transcript_path: Option<PathBuf>,
}

/// Runs one hook over `input` and returns what should go to stdout.
pub fn run_hook(
    kind: HookKind,
    context: &HookContext,
    input: &str,
) -> Result<Option<String>, HookError> {
    match kind {
        HookKind::Permission => {
            let output = permission_hook(context, input)?;
            Ok(output.map(|value| value.to_string()))
        }
        HookKind::PostTool => {
            post_tool_hook(context, input)?;
            Ok(None)
        }
        HookKind::Stop => {
            stop_hook(context, input)?;
            Ok(None)
        }
    }
}

fn permission_hook(context: &HookContext, input: &str) -> Result<Option<Value>, HookError> {
    let input: PermissionHookInput = serde_json::from_str(input)?;
    let tool_name = input.tool_name.unwrap_or_else(|| "unknown".to_string());
    let request = PermissionInput {
        id: Some(permission_request_id(
            &input.session_id,
            &tool_name,
            std::process::id(),
            now_nanos(),
        )),
        tool_name: Some(tool_name),
        tool_input: input.tool_input,
        handle: context.handle,
    };

    let client = HttpClient::builder()
        .timeout(PERMISSION_HOOK_TIMEOUT)
        .build()?;
    let response = client
        .post(context.url("/v1/permissions"))
        .json(&request)
        .send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(HookError::HttpStatus(status));
    }
    let outcome: PermissionOutcome = response.json()?;
    tracing::debug!(decision = %outcome.decision, "hook: permission decided");
    Ok(permission_hook_output(outcome.decision))
}

fn post_tool_hook(context: &HookContext, input: &str) -> Result<(), HookError> {
    let input: PostToolHookInput = serde_json::from_str(input)?;
    let body = ToolResultInput {
        tool_name: input.tool_name,
        tool_input: input.tool_input,
        tool_result: input.tool_result,
        handle: context.handle,
    };
    notify(context, "/v1/tool-results", &body)
}

fn stop_hook(context: &HookContext, input: &str) -> Result<(), HookError> {
    let input: StopHookInput = serde_json::from_str(input)?;
    let Some(path) = input.transcript_path else {
        return Ok(());
    };
    let response = match transcript::last_assistant_text_in(&path)? {
        Some(text) if !text.is_empty() => text,
        _ => return Ok(()),
    };
    let body = AgentResponseInput {
        session_id: Some(input.session_id),
        response,
    };
    notify(context, "/v1/agent-responses", &body)
}

fn notify<T: serde::Serialize>(context: &HookContext, path: &str, body: &T) -> Result<(), HookError> {
    let client = HttpClient::builder().timeout(NOTIFY_HOOK_TIMEOUT).build()?;
    let response = client.post(context.url(path)).json(body).send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(HookError::HttpStatus(status));
    }
    Ok(())
}

pub fn permission_request_id(session_id: &str, tool_name: &str, pid: u32, nanos: u128) -> String {
    format!("{session_id}_{tool_name}_{pid}_{nanos}")
}

/// Behavior string the agent understands; `None` means "no opinion".
pub fn hook_behavior(decision: Decision) -> Option<&'static str> {
    match decision {
        Decision::Allow => Some("allow"),
        Decision::AllowAlways => Some("allowForever"),
        Decision::Deny => Some("deny"),
        Decision::NoOpinion => None,
    }
}

pub fn permission_hook_output(decision: Decision) -> Option<Value> {
    hook_behavior(decision).map(|behavior| {
        json!({
            "hookSpecificOutput": {
                "hookEventName": "PermissionRequest",
                "decision": { "behavior": behavior }
            }
        })
    })
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default()
}
