//! Message shapes exchanged with the remote client and the agent hooks.
//!
//! Frames on the duplex channel are JSON objects tagged by `"type"`. Input
//! parsing also accepts the snake_case spellings older clients send.

use chrono::{DateTime, Utc};
use permission_relay_error::ClientErrorPayload;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Opaque OS-level window identifier.
pub type WindowHandle = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    Allow,
    #[serde(alias = "always", alias = "allow_always", alias = "allowAlways")]
    AllowAlways,
    #[serde(alias = "reject")]
    Deny,
    /// No remote observer was available; the agent should fall back to its
    /// own default behavior.
    #[serde(alias = "no_opinion")]
    NoOpinion,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::AllowAlways => "allow-always",
            Self::Deny => "deny",
            Self::NoOpinion => "no-opinion",
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow | Self::AllowAlways)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "allow" | "once" => Ok(Self::Allow),
            "allow-always" | "allow_always" | "allowalways" | "always" => Ok(Self::AllowAlways),
            "deny" | "reject" => Ok(Self::Deny),
            "no-opinion" | "no_opinion" => Ok(Self::NoOpinion),
            _ => Err(format!("invalid decision: {value}")),
        }
    }
}

/// Unanswered or unparseable decisions never grant access.
pub(crate) fn default_decision() -> Decision {
    Decision::Deny
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WindowTarget {
    pub handle: WindowHandle,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WindowCandidate {
    pub handle: WindowHandle,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub class_name: String,
}

impl WindowCandidate {
    pub fn to_target(&self) -> WindowTarget {
        WindowTarget {
            handle: self.handle,
            title: self.title.clone(),
        }
    }
}

/// Completed tool invocation as retained in the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    #[schema(value_type = String)]
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub tool_input_summary: String,
    pub result_summary: String,
    #[serde(default)]
    pub handle: Option<WindowHandle>,
}

/// Permission request as posted by the agent hook.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PermissionInput {
    #[serde(default, alias = "request_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub tool_input: Option<Value>,
    #[serde(default, alias = "hwnd")]
    pub handle: Option<WindowHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PermissionOutcome {
    pub decision: Decision,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ToolResultInput {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub tool_input: Option<Value>,
    #[serde(default, alias = "tool_response")]
    #[schema(value_type = Object)]
    pub tool_result: Option<Value>,
    #[serde(default, alias = "hwnd")]
    pub handle: Option<WindowHandle>,
}

/// Decision delivered over the one-shot fallback channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DecisionInput {
    #[serde(default, alias = "request_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub decision: Option<Decision>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AgentResponseInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: "not_found".to_string(),
        }
    }
}

/// Events the relay pushes to the remote client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    PermissionRequest {
        id: String,
        tool_name: String,
        tool_input: Map<String, Value>,
        target: Option<WindowTarget>,
    },
    ToolResult(HistoryEntry),
    TargetUpdate(WindowTarget),
    Candidates {
        windows: Vec<WindowCandidate>,
    },
    HistorySnapshot {
        history: Vec<HistoryEntry>,
    },
    AgentResponse {
        session_id: String,
        response: String,
    },
    CommandResult {
        success: bool,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        error: ClientErrorPayload,
    },
    Pong,
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionRequest { .. } => "permission-request",
            Self::ToolResult(_) => "tool-result",
            Self::TargetUpdate(_) => "target-update",
            Self::Candidates { .. } => "candidates",
            Self::HistorySnapshot { .. } => "history-snapshot",
            Self::AgentResponse { .. } => "agent-response",
            Self::CommandResult { .. } => "command-result",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }
}

/// Messages the remote client sends over the duplex channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(alias = "permission_response")]
    Decision {
        #[serde(alias = "request_id")]
        id: String,
        #[serde(default = "default_decision")]
        decision: Decision,
    },
    #[serde(alias = "select_window")]
    SelectTarget {
        #[serde(alias = "hwnd")]
        handle: WindowHandle,
    },
    #[serde(alias = "refresh_windows")]
    RefreshWindows,
    Command {
        #[serde(default, alias = "hwnd")]
        handle: Option<WindowHandle>,
        #[serde(default)]
        message: String,
    },
    Ping,
}
