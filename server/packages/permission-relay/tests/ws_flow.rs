use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use permission_relay::app::build_router;
use permission_relay::coordinator::{Coordinator, CoordinatorConfig};
use permission_relay::hooks::{run_hook, HookContext, HookKind};
use permission_relay::testing::ScriptedAutomation;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct RelayHandle {
    base_url: String,
    ws_url: String,
    automation: Arc<ScriptedAutomation>,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn spawn_relay() -> RelayHandle {
    spawn_relay_with(CoordinatorConfig {
        permission_timeout: Duration::from_secs(5),
        ..CoordinatorConfig::default()
    })
    .await
}

async fn spawn_relay_with(config: CoordinatorConfig) -> RelayHandle {
    let automation = Arc::new(ScriptedAutomation::new());
    let coordinator = Arc::new(Coordinator::new(config, automation.clone()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    let app = build_router(coordinator);
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    RelayHandle {
        base_url: format!("http://{addr}"),
        ws_url: format!("ws://{addr}/v1/ws"),
        automation,
        server,
    }
}

async fn connect(relay: &RelayHandle) -> WsStream {
    let (socket, _) = tokio_tungstenite::connect_async(relay.ws_url.as_str())
        .await
        .expect("websocket connect");
    socket
}

async fn wait_for_client(base_url: &str, connected: bool) {
    let client = Client::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let health: Value = client
            .get(format!("{base_url}/v1/health"))
            .send()
            .await
            .expect("health")
            .json()
            .await
            .expect("health json");
        if health["client_connected"] == connected {
            return;
        }
        assert!(Instant::now() < deadline, "client state never became {connected}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn next_json(socket: &mut WsStream) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("frame within deadline")
            .expect("stream open")
            .expect("frame");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).expect("json frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn send_json(socket: &mut WsStream, value: Value) {
    socket
        .send(Message::Text(value.to_string()))
        .await
        .expect("send frame");
}

#[tokio::test]
async fn permission_round_trip_over_websocket() {
    let relay = spawn_relay().await;
    let mut socket = connect(&relay).await;
    wait_for_client(&relay.base_url, true).await;

    let base_url = relay.base_url.clone();
    let caller = tokio::spawn(async move {
        Client::new()
            .post(format!("{base_url}/v1/permissions"))
            .json(&json!({
                "id": "ws-1",
                "tool_name": "Write",
                "tool_input": {"file_path": "notes.md"}
            }))
            .send()
            .await
            .expect("post permission")
            .json::<Value>()
            .await
            .expect("decision json")
    });

    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "permission-request");
    assert_eq!(event["id"], "ws-1");
    assert_eq!(event["tool_input"]["file_path"], "notes.md");
    assert_eq!(event["target"], Value::Null);

    send_json(
        &mut socket,
        json!({"type": "permission_response", "request_id": "ws-1", "decision": "allow"}),
    )
    .await;

    let outcome = caller.await.expect("join");
    assert_eq!(outcome, json!({"decision": "allow"}));
}

#[tokio::test]
async fn ping_and_malformed_frames() {
    let relay = spawn_relay().await;
    let mut socket = connect(&relay).await;
    wait_for_client(&relay.base_url, true).await;

    send_json(&mut socket, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut socket).await, json!({"type": "pong"}));

    socket
        .send(Message::Text("{not json".to_string()))
        .await
        .expect("send garbage");
    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["error"]["type"], "invalid_message");

    send_json(&mut socket, json!({"type": "select-target", "handle": 404})).await;
    let event = next_json(&mut socket).await;
    assert_eq!(event["error"]["type"], "invalid_target");
}

#[tokio::test]
async fn window_selection_over_websocket() {
    let relay = spawn_relay().await;
    relay.automation.add_window(1, "left", "ConsoleWindowClass");
    relay.automation.add_window(2, "right", "ConsoleWindowClass");

    let mut socket = connect(&relay).await;
    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "candidates");
    assert_eq!(event["windows"].as_array().map(Vec::len), Some(2));

    send_json(&mut socket, json!({"type": "select_window", "hwnd": 2})).await;
    let event = next_json(&mut socket).await;
    assert_eq!(event, json!({"type": "target-update", "handle": 2, "title": "right"}));

    send_json(&mut socket, json!({"type": "command", "message": "continue"})).await;
    let event = next_json(&mut socket).await;
    assert_eq!(
        event,
        json!({"type": "command-result", "success": true, "message": "continue"})
    );
    assert_eq!(relay.automation.sent(), vec![(2, "continue".to_string())]);
}

#[tokio::test]
async fn newer_connection_closes_older_one() {
    let relay = spawn_relay().await;
    let mut first = connect(&relay).await;
    wait_for_client(&relay.base_url, true).await;

    let _second = connect(&relay).await;

    let closed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match first.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("first connection closed in time");
    assert!(closed);
    wait_for_client(&relay.base_url, true).await;
}

#[tokio::test]
async fn disconnect_clears_client_slot() {
    let relay = spawn_relay().await;
    let mut socket = connect(&relay).await;
    wait_for_client(&relay.base_url, true).await;

    socket.close(None).await.expect("close");
    wait_for_client(&relay.base_url, false).await;
}

#[tokio::test]
async fn silent_client_is_dropped_after_keepalive() {
    let relay = spawn_relay_with(CoordinatorConfig {
        permission_timeout: Duration::from_secs(5),
        keepalive_interval: Duration::from_millis(100),
        ..CoordinatorConfig::default()
    })
    .await;
    // Never polled, so the server's pings go unanswered.
    let _socket = connect(&relay).await;
    wait_for_client(&relay.base_url, true).await;
    wait_for_client(&relay.base_url, false).await;

    let started = Instant::now();
    let outcome: Value = Client::new()
        .post(format!("{}/v1/permissions", relay.base_url))
        .json(&json!({"id": "after-drop", "tool_name": "Bash"}))
        .send()
        .await
        .expect("post permission")
        .json()
        .await
        .expect("decision json");
    assert_eq!(outcome, json!({"decision": "no-opinion"}));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn hooks_talk_to_running_relay() {
    let relay = spawn_relay().await;
    let context = HookContext {
        endpoint: relay.base_url.clone(),
        handle: Some(77),
    };

    let permission_context = context.clone();
    let output = tokio::task::spawn_blocking(move || {
        run_hook(
            HookKind::Permission,
            &permission_context,
            r#"{"session_id":"s","tool_name":"Bash","tool_input":{"command":"ls"}}"#,
        )
    })
    .await
    .expect("join")
    .expect("hook");
    // No client connected: the agent keeps its own default.
    assert_eq!(output, None);

    let post_tool_context = context.clone();
    tokio::task::spawn_blocking(move || {
        run_hook(
            HookKind::PostTool,
            &post_tool_context,
            r#"{"tool_name":"Bash","tool_input":{"command":"ls"},"tool_response":"a.txt"}"#,
        )
    })
    .await
    .expect("join")
    .expect("hook");

    let history: Value = Client::new()
        .get(format!("{}/v1/history", relay.base_url))
        .send()
        .await
        .expect("history")
        .json()
        .await
        .expect("history json");
    assert_eq!(history["history"][0]["result_summary"], "a.txt");
    assert_eq!(history["history"][0]["handle"], 77);
}

#[tokio::test]
async fn permission_hook_prints_client_decision() {
    let relay = spawn_relay().await;
    let mut socket = connect(&relay).await;
    wait_for_client(&relay.base_url, true).await;

    let context = HookContext {
        endpoint: relay.base_url.clone(),
        handle: None,
    };
    let hook = tokio::task::spawn_blocking(move || {
        run_hook(
            HookKind::Permission,
            &context,
            r#"{"session_id":"sess","tool_name":"Edit","tool_input":{}}"#,
        )
    });

    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "permission-request");
    let id = event["id"].as_str().expect("id").to_string();
    assert!(id.starts_with("sess_Edit_"));

    send_json(&mut socket, json!({"type": "decision", "id": id, "decision": "always"})).await;

    let output = hook.await.expect("join").expect("hook").expect("output");
    let output: Value = serde_json::from_str(&output).expect("json output");
    assert_eq!(
        output["hookSpecificOutput"]["decision"]["behavior"],
        "allowForever"
    );
}
