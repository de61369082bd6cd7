//! Orchestration of the permission, decision, tool-result and client-session
//! paths. Every entry point takes `&self`; shared state lives behind the
//! coordinator's own locks and is never exposed for direct mutation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use permission_relay_error::RelayError;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use utoipa::ToSchema;

use crate::automation::{AutomationError, WindowAutomation};
use crate::discovery::{self, DiscoveryConfig};
use crate::history::{truncate_chars, HistoryLog, DEFAULT_HISTORY_CAPACITY};
use crate::hub::{ClientConnection, ClientHub, ConnectionId, DEFAULT_OUTBOUND_QUEUE};
use crate::pending::{PendingRequestInfo, PendingRequestTable, PermissionRequest, Resolution};
use crate::protocol::{
    AgentResponseInput, ClientMessage, Decision, HistoryEntry, PermissionInput, ServerEvent,
    ToolResultInput, WindowHandle, WindowTarget,
};
use crate::registry::{ScanOutcome, TargetState, WindowRegistry};

/// Sits under the 58 s hard timeout the permission hook applies.
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(55);
pub const DEFAULT_SNAPSHOT_SIZE: usize = 20;
pub const DEFAULT_SUMMARY_CHARS: usize = 200;
pub const DEFAULT_MAX_PENDING: usize = 256;
pub const COMMAND_ECHO_CHARS: usize = 50;
/// Interval between WebSocket pings. A client that stays silent for two
/// intervals is dropped.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

const UNKNOWN_TOOL: &str = "unknown";

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub permission_timeout: Duration,
    pub history_capacity: usize,
    /// History entries pushed to a client when it connects.
    pub snapshot_size: usize,
    /// Display length of tool input/result summaries.
    pub summary_chars: usize,
    /// `None` leaves the pending table unbounded.
    pub max_pending: Option<usize>,
    pub outbound_queue: usize,
    pub keepalive_interval: Duration,
    pub discovery: DiscoveryConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            permission_timeout: DEFAULT_PERMISSION_TIMEOUT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            snapshot_size: DEFAULT_SNAPSHOT_SIZE,
            summary_chars: DEFAULT_SUMMARY_CHARS,
            max_pending: Some(DEFAULT_MAX_PENDING),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            discovery: DiscoveryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RelayStatus {
    pub status: String,
    pub client_connected: bool,
    pub pending: usize,
}

#[derive(Debug)]
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: RwLock<WindowRegistry>,
    history: Mutex<HistoryLog>,
    pending: PendingRequestTable,
    hub: ClientHub,
    /// Held across pending insert + broadcast and across client
    /// registration + replay, so a new client sees each request once.
    session_gate: Mutex<()>,
    automation: Arc<dyn WindowAutomation>,
}

/// Removes a pending entry when its waiter goes away, including when the
/// HTTP handler future is dropped mid-wait.
struct DiscardOnDrop<'a> {
    table: &'a PendingRequestTable,
    id: String,
    ticket: u64,
}

impl Drop for DiscardOnDrop<'_> {
    fn drop(&mut self) {
        if self.table.discard(&self.id, self.ticket) {
            tracing::debug!(id = %self.id, "permission: pending entry discarded");
        }
    }
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, automation: Arc<dyn WindowAutomation>) -> Self {
        Self {
            registry: RwLock::new(WindowRegistry::new()),
            history: Mutex::new(HistoryLog::new(config.history_capacity)),
            pending: PendingRequestTable::new(config.max_pending),
            hub: ClientHub::new(config.outbound_queue),
            session_gate: Mutex::new(()),
            automation,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn hub(&self) -> &ClientHub {
        &self.hub
    }

    pub fn pending(&self) -> &PendingRequestTable {
        &self.pending
    }

    /// Blocks until the remote client decides, the timeout elapses, or it is
    /// clear nobody is listening.
    pub async fn request_permission(&self, input: PermissionInput) -> Result<Decision, RelayError> {
        let id = match input.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(RelayError::InvalidRequest {
                    message: "permission request requires a non-empty id".to_string(),
                })
            }
        };
        let tool_name = input
            .tool_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_TOOL.to_string());
        let tool_input = normalize_tool_input(input.tool_input);

        if let Some(handle) = input.handle {
            self.report_handle(handle, true).await;
        }

        if !self.hub.is_connected().await {
            tracing::info!(id = %id, tool = %tool_name, "permission: no client connected, no opinion");
            return Ok(Decision::NoOpinion);
        }

        let target = self.registry.read().await.current().cloned();
        let event = ServerEvent::PermissionRequest {
            id: id.clone(),
            tool_name: tool_name.clone(),
            tool_input: tool_input.clone(),
            target: target.clone(),
        };
        let gate = self.session_gate.lock().await;
        let ticket = match self.pending.insert(PermissionRequest {
            id: id.clone(),
            tool_name: tool_name.clone(),
            tool_input,
            target,
        }) {
            Ok(ticket) => ticket,
            Err(err) => {
                tracing::warn!(id = %id, tool = %tool_name, error = %err, "permission: rejected, no opinion");
                return Ok(Decision::NoOpinion);
            }
        };
        let (id, ticket, receiver) = ticket.into_parts();
        let _guard = DiscardOnDrop {
            table: &self.pending,
            id: id.clone(),
            ticket,
        };

        tracing::info!(
            id = %id,
            tool = %tool_name,
            pending_count = self.pending.len(),
            "permission: request → client (awaiting decision)"
        );
        if let Err(err) = self.hub.broadcast(event).await {
            // The fallback channel can still resolve the request.
            tracing::debug!(id = %id, error = %err, "permission: broadcast failed, still waiting");
        }
        drop(gate);

        let wait_start = Instant::now();
        let decision = match tokio::time::timeout(self.config.permission_timeout, receiver).await {
            Ok(Ok(decision)) => {
                tracing::info!(
                    id = %id,
                    decision = %decision,
                    wait_ms = wait_start.elapsed().as_millis() as u64,
                    "permission: decision received"
                );
                decision
            }
            Ok(Err(_)) => {
                tracing::warn!(
                    id = %id,
                    wait_ms = wait_start.elapsed().as_millis() as u64,
                    "permission: waiter released without decision, denying"
                );
                Decision::Deny
            }
            Err(_) => {
                tracing::warn!(
                    id = %id,
                    tool = %tool_name,
                    timeout_ms = self.config.permission_timeout.as_millis() as u64,
                    "permission: TIMEOUT waiting for decision, denying"
                );
                Decision::Deny
            }
        };
        Ok(decision)
    }

    /// Completes a pending request. Stale and unknown ids are a no-op.
    pub fn resolve(&self, id: &str, decision: Decision) -> Resolution {
        let resolution = self.pending.resolve(id, decision);
        match resolution {
            Resolution::Resolved => {
                tracing::info!(id = %id, decision = %decision, "decision: resolved");
            }
            Resolution::NotFound => {
                tracing::debug!(id = %id, decision = %decision, "decision: no pending request");
            }
        }
        resolution
    }

    pub async fn record_tool_result(&self, input: ToolResultInput) -> HistoryEntry {
        let tool_name = input
            .tool_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_TOOL.to_string());
        let tool_input_summary = summarize(input.tool_input.as_ref(), self.config.summary_chars);
        let result_summary = summarize(input.tool_result.as_ref(), self.config.summary_chars);

        // Registry read and append happen under the history lock so entries
        // keep arrival order.
        let entry = {
            let mut history = self.history.lock().await;
            let handle = match input.handle {
                Some(handle) => Some(handle),
                None => self.registry.read().await.current_handle(),
            };
            let entry = HistoryEntry {
                timestamp: Utc::now(),
                tool_name,
                tool_input_summary,
                result_summary,
                handle,
            };
            let evicted = history.push(entry.clone());
            tracing::debug!(
                tool = %entry.tool_name,
                len = history.len(),
                evicted = evicted,
                "history: appended"
            );
            entry
        };

        if let Some(handle) = input.handle {
            self.report_handle(handle, false).await;
        }

        if let Err(err) = self.hub.broadcast(ServerEvent::ToolResult(entry.clone())).await {
            tracing::debug!(tool = %entry.tool_name, error = %err, "tool-result: not delivered");
        }
        entry
    }

    pub async fn record_agent_response(&self, input: AgentResponseInput) {
        let event = ServerEvent::AgentResponse {
            session_id: input.session_id.unwrap_or_default(),
            response: input.response,
        };
        if let Err(err) = self.hub.broadcast(event).await {
            tracing::debug!(error = %err, "agent-response: not delivered");
        }
    }

    /// Registers a new client and pushes the catch-up sequence: target,
    /// history snapshot, replayed pending requests, then discovery when no
    /// valid target is known.
    pub async fn connect_client(&self) -> ClientConnection {
        let gate = self.session_gate.lock().await;
        let connection = self.hub.register().await;
        let id = connection.id;

        let current = self.registry.read().await.current().cloned();
        let mut has_valid_target = false;
        if let Some(target) = current {
            let handle = target.handle;
            let valid = self
                .with_automation(move |automation| automation.is_valid(handle))
                .await
                .unwrap_or(false);
            if valid {
                has_valid_target = true;
                self.push(id, ServerEvent::TargetUpdate(target)).await;
            } else {
                tracing::debug!(connection = id, handle = handle, "connect: stored target no longer valid");
            }
        }

        let snapshot = self.history.lock().await.recent(self.config.snapshot_size);
        if !snapshot.is_empty() {
            self.push(id, ServerEvent::HistorySnapshot { history: snapshot })
                .await;
        }

        for request in self.pending.list() {
            self.push(
                id,
                ServerEvent::PermissionRequest {
                    id: request.id,
                    tool_name: request.tool_name,
                    tool_input: request.tool_input,
                    target: request.target,
                },
            )
            .await;
        }
        drop(gate);

        if !has_valid_target {
            self.refresh_windows().await;
        }

        connection
    }

    pub async fn disconnect_client(&self, id: ConnectionId) -> bool {
        self.hub.unregister(id).await
    }

    pub async fn handle_client_message(&self, connection: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::Decision { id, decision } => {
                self.resolve(&id, decision);
            }
            ClientMessage::SelectTarget { handle } => {
                if let Err(err) = self.select_target(handle).await {
                    self.push(
                        connection,
                        ServerEvent::Error {
                            error: err.to_client_payload(),
                        },
                    )
                    .await;
                }
            }
            ClientMessage::RefreshWindows => {
                self.refresh_windows().await;
            }
            ClientMessage::Command { handle, message } => {
                let result = self.run_command(handle, message).await;
                self.push(connection, result).await;
            }
            ClientMessage::Ping => {
                self.push(connection, ServerEvent::Pong).await;
            }
        }
    }

    /// Answers an unparseable frame with an `error` event to its sender only.
    pub async fn reject_client_frame(&self, connection: ConnectionId, message: String) {
        tracing::debug!(connection = connection, error = %message, "client: invalid frame");
        let err = RelayError::InvalidMessage { message };
        self.push(
            connection,
            ServerEvent::Error {
                error: err.to_client_payload(),
            },
        )
        .await;
    }

    pub async fn refresh_windows(&self) -> ScanOutcome {
        let config = self.config.discovery.clone();
        let candidates = self
            .with_automation(move |automation| discovery::scan(automation, &config))
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "discovery: scan failed");
                Vec::new()
            });

        let outcome = self.registry.write().await.apply_scan(candidates);
        let event = match &outcome {
            ScanOutcome::NoCandidates => {
                tracing::debug!("discovery: no candidate windows");
                None
            }
            ScanOutcome::SingleCandidate(target) => {
                tracing::info!(handle = target.handle, title = %target.title, "discovery: single candidate targeted");
                Some(ServerEvent::TargetUpdate(target.clone()))
            }
            ScanOutcome::MultipleCandidates(candidates) => {
                tracing::info!(count = candidates.len(), "discovery: multiple candidates");
                Some(ServerEvent::Candidates {
                    windows: candidates.clone(),
                })
            }
        };
        if let Some(event) = event {
            if let Err(err) = self.hub.broadcast(event).await {
                tracing::debug!(error = %err, "discovery: result not delivered");
            }
        }
        outcome
    }

    /// Accepts an explicit client selection once the adapter confirms the
    /// handle; an invalid handle changes nothing.
    pub async fn select_target(&self, handle: WindowHandle) -> Result<WindowTarget, RelayError> {
        let (valid, title) = self
            .with_automation(move |automation| {
                if automation.is_valid(handle) {
                    (true, automation.title(handle))
                } else {
                    (false, String::new())
                }
            })
            .await
            .map_err(|err| RelayError::AutomationFailed {
                handle: Some(handle),
                message: err.to_string(),
            })?;

        let selected = self.registry.write().await.select(handle, title, valid);
        let Some(target) = selected else {
            tracing::warn!(handle = handle, "select: rejected invalid window");
            return Err(RelayError::InvalidTarget { handle });
        };

        tracing::info!(handle = handle, title = %target.title, "select: target updated");
        if let Err(err) = self
            .hub
            .broadcast(ServerEvent::TargetUpdate(target.clone()))
            .await
        {
            tracing::debug!(error = %err, "select: target-update not delivered");
        }
        Ok(target)
    }

    /// Types `message` into the explicit handle or the current target.
    pub async fn run_command(&self, handle: Option<WindowHandle>, message: String) -> ServerEvent {
        let echo = truncate_chars(&message, COMMAND_ECHO_CHARS);
        if message.is_empty() {
            return command_failed(echo, "message is empty".to_string());
        }
        let handle = match handle {
            Some(handle) => handle,
            None => match self.registry.read().await.current_handle() {
                Some(handle) => handle,
                None => return command_failed(echo, "no target window selected".to_string()),
            },
        };

        let sent = self
            .with_automation(move |automation| automation.send_text(handle, &message))
            .await
            .and_then(|result| result);
        match sent {
            Ok(()) => {
                tracing::info!(handle = handle, chars = echo.chars().count(), "command: injected");
                ServerEvent::CommandResult {
                    success: true,
                    message: echo,
                    error: None,
                }
            }
            Err(err) => {
                tracing::warn!(handle = handle, error = %err, "command: injection failed");
                command_failed(echo, err.to_string())
            }
        }
    }

    pub async fn target_state(&self) -> TargetState {
        self.registry.read().await.state().clone()
    }

    pub async fn current_target(&self) -> Option<WindowTarget> {
        self.registry.read().await.current().cloned()
    }

    /// Full history, oldest first.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().await.snapshot()
    }

    pub fn pending_requests(&self) -> Vec<PendingRequestInfo> {
        self.pending.list()
    }

    pub async fn status(&self) -> RelayStatus {
        RelayStatus {
            status: "ok".to_string(),
            client_connected: self.hub.is_connected().await,
            pending: self.pending.len(),
        }
    }

    /// Drops the client and releases every waiter, which then denies.
    pub async fn shutdown(&self) {
        self.hub.clear().await;
        let drained = self.pending.drain();
        tracing::info!(drained = drained, "coordinator: shutdown");
    }

    /// Forces the registry onto a handle the agent reported. Announces the
    /// target when it changed or when `always_announce` is set.
    async fn report_handle(&self, handle: WindowHandle, always_announce: bool) {
        let title = self
            .with_automation(move |automation| automation.title(handle))
            .await
            .unwrap_or_default();
        let target = WindowTarget { handle, title };

        let changed = {
            let mut registry = self.registry.write().await;
            let changed = registry.current() != Some(&target);
            registry.replace(target.clone());
            changed
        };
        if changed {
            tracing::info!(handle = handle, title = %target.title, "target: reported by agent");
        }
        if changed || always_announce {
            if let Err(err) = self.hub.broadcast(ServerEvent::TargetUpdate(target)).await {
                tracing::debug!(handle = handle, error = %err, "target: update not delivered");
            }
        }
    }

    /// Sends to one connection; failures only matter for logging.
    async fn push(&self, connection: ConnectionId, event: ServerEvent) {
        let kind = event.kind();
        if let Err(err) = self.hub.send_to(connection, event).await {
            tracing::debug!(connection = connection, event = kind, error = %err, "client: event not delivered");
        }
    }

    /// Runs a possibly blocking adapter call off the event loop.
    async fn with_automation<F, T>(&self, call: F) -> Result<T, AutomationError>
    where
        F: FnOnce(&dyn WindowAutomation) -> T + Send + 'static,
        T: Send + 'static,
    {
        let automation = Arc::clone(&self.automation);
        tokio::task::spawn_blocking(move || call(automation.as_ref()))
            .await
            .map_err(|err| AutomationError::TaskFailed(err.to_string()))
    }
}

fn command_failed(message: String, error: String) -> ServerEvent {
    ServerEvent::CommandResult {
        success: false,
        message,
        error: Some(error),
    }
}

/// Objects pass through, `null` becomes empty, anything else is wrapped
/// under `"value"`.
pub fn normalize_tool_input(value: Option<Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) => Map::new(),
        Some(other) => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

fn summarize(value: Option<&Value>, max_chars: usize) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => truncate_chars(text, max_chars),
        Some(other) => truncate_chars(&other.to_string(), max_chars),
    }
}
