use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use permission_relay_error::{ErrorType, ProblemDetails, RelayError};
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::{Modify, OpenApi, ToSchema};

use crate::coordinator::{Coordinator, RelayStatus};
use crate::hub::ClientConnection;
use crate::pending::{PendingRequestInfo, Resolution};
use crate::protocol::{
    AgentResponseInput, ClientMessage, Decision, DecisionInput, HistoryEntry, PermissionInput,
    PermissionOutcome, StatusResponse, ToolResultInput, WindowCandidate, WindowTarget,
};
use crate::registry::TargetState;

const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Serialize, ToSchema)]
pub struct PendingListResponse {
    pub pending: Vec<PendingRequestInfo>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub history: Vec<HistoryEntry>,
}

pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    let v1_router = Router::new()
        .route("/health", get(get_health))
        .route("/permissions", post(post_permission).get(list_permissions))
        .route("/permissions/decision", post(post_decision))
        .route("/tool-results", post(post_tool_result))
        .route("/history", get(get_history))
        .route("/target", get(get_target))
        .route("/agent-responses", post(post_agent_response))
        .route("/ws", get(get_ws));

    // Paths the first generation of hook scripts post to.
    let legacy_router = Router::new()
        .route("/", post(post_permission))
        .route("/response", post(post_decision))
        .route("/tool-result", post(post_tool_result))
        .route("/claude-response", post(post_agent_response));

    let mut router = Router::new()
        .nest("/v1", v1_router)
        .merge(legacy_router)
        .with_state(coordinator);

    let http_logging = match std::env::var("PERMISSION_RELAY_LOG_HTTP") {
        Ok(value) if value == "0" || value.eq_ignore_ascii_case("false") => false,
        _ => true,
    };
    if http_logging {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|req: &Request<_>| {
                tracing::info_span!(
                    "http.request",
                    method = %req.method(),
                    uri = %req.uri()
                )
            })
            .on_request(|_req: &Request<_>, span: &Span| {
                tracing::debug!(parent: span, "request");
            })
            .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                tracing::info!(
                    parent: span,
                    status = %res.status(),
                    latency_ms = latency.as_millis()
                );
            });
        router = router.layer(trace_layer);
    }

    router
}

#[derive(OpenApi)]
#[openapi(
    paths(
        get_health,
        post_permission,
        list_permissions,
        post_decision,
        post_tool_result,
        get_history,
        get_target,
        post_agent_response
    ),
    components(
        schemas(
            RelayStatus,
            PermissionInput,
            PermissionOutcome,
            Decision,
            DecisionInput,
            StatusResponse,
            ToolResultInput,
            AgentResponseInput,
            PendingListResponse,
            PendingRequestInfo,
            HistoryResponse,
            HistoryEntry,
            TargetState,
            WindowTarget,
            WindowCandidate,
            ProblemDetails,
            ErrorType
        )
    ),
    tags(
        (name = "meta", description = "Service metadata"),
        (name = "permissions", description = "Permission requests and decisions"),
        (name = "activity", description = "Tool results, history and window target")
    ),
    modifiers(&ServerAddon)
)]
pub struct ApiDoc;

struct ServerAddon;

impl Modify for ServerAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.servers = Some(vec![utoipa::openapi::Server::new("http://localhost:8765")]);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = rejection.body_text();
        let err = match rejection {
            JsonRejection::MissingJsonContentType(_) => {
                RelayError::UnsupportedMediaType { message }
            }
            _ => RelayError::InvalidRequest { message },
        };
        ApiError::Relay(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem: ProblemDetails = match &self {
            ApiError::Relay(err) => err.to_problem_details(),
        };
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

#[utoipa::path(
    get,
    path = "/v1/health",
    responses((status = 200, body = RelayStatus)),
    tag = "meta"
)]
async fn get_health(State(coordinator): State<Arc<Coordinator>>) -> Json<RelayStatus> {
    Json(coordinator.status().await)
}

#[utoipa::path(
    post,
    path = "/v1/permissions",
    request_body = PermissionInput,
    responses(
        (status = 200, body = PermissionOutcome),
        (status = 400, body = ProblemDetails),
        (status = 415, body = ProblemDetails)
    ),
    tag = "permissions"
)]
async fn post_permission(
    State(coordinator): State<Arc<Coordinator>>,
    payload: Result<Json<PermissionInput>, JsonRejection>,
) -> Result<Json<PermissionOutcome>, ApiError> {
    let Json(input) = payload?;
    let decision = coordinator.request_permission(input).await?;
    Ok(Json(PermissionOutcome { decision }))
}

#[utoipa::path(
    get,
    path = "/v1/permissions",
    responses((status = 200, body = PendingListResponse)),
    tag = "permissions"
)]
async fn list_permissions(State(coordinator): State<Arc<Coordinator>>) -> Json<PendingListResponse> {
    Json(PendingListResponse {
        pending: coordinator.pending_requests(),
    })
}

#[utoipa::path(
    post,
    path = "/v1/permissions/decision",
    request_body = DecisionInput,
    responses(
        (status = 200, body = StatusResponse),
        (status = 400, body = ProblemDetails),
        (status = 404, body = StatusResponse)
    ),
    tag = "permissions"
)]
async fn post_decision(
    State(coordinator): State<Arc<Coordinator>>,
    payload: Result<Json<DecisionInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(input) = payload?;
    let id = match input.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            return Err(RelayError::InvalidRequest {
                message: "decision requires a request id".to_string(),
            }
            .into())
        }
    };
    let decision = input.decision.unwrap_or(Decision::Deny);
    let response = match coordinator.resolve(&id, decision) {
        Resolution::Resolved => (StatusCode::OK, Json(StatusResponse::ok())).into_response(),
        Resolution::NotFound => {
            (StatusCode::NOT_FOUND, Json(StatusResponse::not_found())).into_response()
        }
    };
    Ok(response)
}

#[utoipa::path(
    post,
    path = "/v1/tool-results",
    request_body = ToolResultInput,
    responses(
        (status = 200, body = StatusResponse),
        (status = 400, body = ProblemDetails),
        (status = 415, body = ProblemDetails)
    ),
    tag = "activity"
)]
async fn post_tool_result(
    State(coordinator): State<Arc<Coordinator>>,
    payload: Result<Json<ToolResultInput>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(input) = payload?;
    coordinator.record_tool_result(input).await;
    Ok(Json(StatusResponse::ok()))
}

#[utoipa::path(
    get,
    path = "/v1/history",
    responses((status = 200, body = HistoryResponse)),
    tag = "activity"
)]
async fn get_history(State(coordinator): State<Arc<Coordinator>>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        history: coordinator.history().await,
    })
}

#[utoipa::path(
    get,
    path = "/v1/target",
    responses((status = 200, body = TargetState)),
    tag = "activity"
)]
async fn get_target(State(coordinator): State<Arc<Coordinator>>) -> Json<TargetState> {
    Json(coordinator.target_state().await)
}

#[utoipa::path(
    post,
    path = "/v1/agent-responses",
    request_body = AgentResponseInput,
    responses(
        (status = 200, body = StatusResponse),
        (status = 400, body = ProblemDetails)
    ),
    tag = "activity"
)]
async fn post_agent_response(
    State(coordinator): State<Arc<Coordinator>>,
    payload: Result<Json<AgentResponseInput>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(input) = payload?;
    coordinator.record_agent_response(input).await;
    Ok(Json(StatusResponse::ok()))
}

async fn get_ws(
    ws: WebSocketUpgrade,
    State(coordinator): State<Arc<Coordinator>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(coordinator, socket))
}

async fn client_session(coordinator: Arc<Coordinator>, socket: WebSocket) {
    let keepalive = coordinator
        .config()
        .keepalive_interval
        .max(MIN_KEEPALIVE_INTERVAL);
    let ClientConnection { id, events } = coordinator.connect_client().await;
    let (mut sink, mut stream) = socket.split();

    // Ends when the hub drops this connection's sender: on disconnect or
    // when a newer client takes the slot.
    let writer = tokio::spawn(async move {
        let mut events = ReceiverStream::new(events);
        let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            let message = tokio::select! {
                event = events.next() => match event {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(payload) => Message::Text(payload),
                        Err(err) => {
                            tracing::warn!(connection = id, error = %err, "ws: failed to encode event");
                            continue;
                        }
                    },
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Vec::new()),
            };
            if sink.send(message).await.is_err() {
                tracing::debug!(connection = id, "ws: send failed, closing writer");
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    // Any inbound frame, pongs included, proves the peer is alive.
    let idle_deadline = keepalive * 2;
    loop {
        let frame = match tokio::time::timeout(idle_deadline, stream.next()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(
                    connection = id,
                    idle_ms = idle_deadline.as_millis() as u64,
                    "ws: client missed keepalive, dropping"
                );
                break;
            }
        };
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => coordinator.handle_client_message(id, message).await,
                Err(err) => coordinator.reject_client_frame(id, err.to_string()).await,
            },
            Ok(Message::Binary(_)) => {
                coordinator
                    .reject_client_frame(id, "binary frames are not supported".to_string())
                    .await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(connection = id, error = %err, "ws: receive failed");
                break;
            }
        }
    }

    coordinator.disconnect_client(id).await;
    writer.abort();
}
