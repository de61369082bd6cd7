use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use permission_relay::app::build_router;
use permission_relay::coordinator::{Coordinator, CoordinatorConfig};
use permission_relay::protocol::ServerEvent;
use permission_relay::testing::ScriptedAutomation;
use serde_json::{json, Value};
use tower::util::ServiceExt;

struct TestApp {
    app: Router,
    coordinator: Arc<Coordinator>,
}

impl TestApp {
    fn new() -> Self {
        let config = CoordinatorConfig {
            permission_timeout: Duration::from_secs(5),
            ..CoordinatorConfig::default()
        };
        let coordinator = Arc::new(Coordinator::new(
            config,
            Arc::new(ScriptedAutomation::new()),
        ));
        let app = build_router(coordinator.clone());
        Self { app, coordinator }
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("request");
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }
}

#[tokio::test]
async fn health_reports_client_and_pending_counts() {
    let test = TestApp::new();
    let (status, body) = test.send(Method::GET, "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"status": "ok", "client_connected": false, "pending": 0})
    );
}

#[tokio::test]
async fn permission_without_client_is_no_opinion() {
    let test = TestApp::new();
    let (status, body) = test
        .send(
            Method::POST,
            "/v1/permissions",
            Some(json!({"id": "r1", "tool_name": "Bash", "tool_input": {"command": "ls"}})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"decision": "no-opinion"}));
}

#[tokio::test]
async fn legacy_permission_route_accepts_request_id_and_hwnd() {
    let test = TestApp::new();
    let (status, body) = test
        .send(
            Method::POST,
            "/",
            Some(json!({"request_id": "legacy", "tool_name": "Edit", "hwnd": 1234})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision"], "no-opinion");

    let (_, target) = test.send(Method::GET, "/v1/target", None).await;
    assert_eq!(target["state"], "targeted");
    assert_eq!(target["target"]["handle"], 1234);
}

#[tokio::test]
async fn permission_without_id_is_a_problem() {
    let test = TestApp::new();
    let (status, body) = test
        .send(Method::POST, "/v1/permissions", Some(json!({"tool_name": "Bash"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "urn:permission-relay:error:invalid_request");
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn fallback_decision_resolves_waiting_request() {
    let test = TestApp::new();
    let mut client = test.coordinator.connect_client().await;

    let waiter = {
        let test_app = test.app.clone();
        tokio::spawn(async move {
            let request = Request::builder()
                .method(Method::POST)
                .uri("/v1/permissions")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"id": "r2", "tool_name": "Bash"}).to_string()))
                .expect("request");
            let response = test_app.oneshot(request).await.expect("response");
            let bytes = response
                .into_body()
                .collect()
                .await
                .expect("body")
                .to_bytes();
            serde_json::from_slice::<Value>(&bytes).expect("json")
        })
    };

    let event = tokio::time::timeout(Duration::from_secs(2), client.events.recv())
        .await
        .expect("event in time")
        .expect("open");
    assert!(matches!(event, ServerEvent::PermissionRequest { ref id, .. } if id == "r2"));

    let (_, pending) = test.send(Method::GET, "/v1/permissions", None).await;
    assert_eq!(pending["pending"][0]["id"], "r2");
    assert_eq!(pending["pending"][0]["tool_name"], "Bash");

    let (status, body) = test
        .send(
            Method::POST,
            "/response",
            Some(json!({"request_id": "r2", "decision": "always"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));

    let outcome = waiter.await.expect("join");
    assert_eq!(outcome, json!({"decision": "allow-always"}));

    let (status, body) = test
        .send(
            Method::POST,
            "/v1/permissions/decision",
            Some(json!({"id": "r2", "decision": "deny"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"status": "not_found"}));
}

#[tokio::test]
async fn decision_without_id_is_a_problem() {
    let test = TestApp::new();
    let (status, body) = test
        .send(
            Method::POST,
            "/v1/permissions/decision",
            Some(json!({"decision": "allow"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn tool_results_feed_history() {
    let test = TestApp::new();
    let (status, body) = test
        .send(
            Method::POST,
            "/tool-result",
            Some(json!({
                "tool_name": "Read",
                "tool_input": {"file_path": "src/lib.rs"},
                "tool_response": "ok"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));

    test.send(
        Method::POST,
        "/v1/tool-results",
        Some(json!({"tool_result": "second"})),
    )
    .await;

    let (_, history) = test.send(Method::GET, "/v1/history", None).await;
    let entries = history["history"].as_array().expect("history array");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["tool_name"], "Read");
    assert_eq!(entries[0]["tool_input_summary"], r#"{"file_path":"src/lib.rs"}"#);
    assert_eq!(entries[0]["result_summary"], "ok");
    assert_eq!(entries[1]["tool_name"], "unknown");
}

#[tokio::test]
async fn agent_response_is_forwarded_to_client() {
    let test = TestApp::new();
    let mut client = test.coordinator.connect_client().await;

    let (status, _) = test
        .send(
            Method::POST,
            "/claude-response",
            Some(json!({"session_id": "s1", "response": "All done."})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let event = client.events.recv().await.expect("event");
    assert_eq!(
        event,
        ServerEvent::AgentResponse {
            session_id: "s1".to_string(),
            response: "All done.".to_string(),
        }
    );
}

#[tokio::test]
async fn target_starts_unknown() {
    let test = TestApp::new();
    let (status, body) = test.send(Method::GET, "/v1/target", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"state": "unknown"}));
}

#[tokio::test]
async fn malformed_bodies_are_problems() {
    let test = TestApp::new();
    let (status, body) = test
        .send(Method::POST, "/v1/permissions", Some(json!({"id": 5})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "urn:permission-relay:error:invalid_request");

    let (status, body) = test
        .send(
            Method::POST,
            "/v1/permissions/decision",
            Some(json!({"id": "x", "decision": "maybe"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["title"], "Invalid Request");

    let (status, body) = test
        .send(Method::POST, "/v1/agent-responses", Some(json!({"session_id": "s", "response": 42})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn body_without_json_content_type_is_unsupported() {
    let test = TestApp::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/tool-results")
        .body(Body::from(r#"{"tool_name":"Read"}"#))
        .expect("request");
    let response = test.app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body["type"], "urn:permission-relay:error:unsupported_media_type");
    assert!(test.coordinator.history().await.is_empty());
}
