//! Integration tests for the MCP client.
//!
//! These tests drive the mock MCP server binary through the full protocol flow.

use std::sync::Arc;
use std::time::Duration;

use homelink_mcp::{McpClient, McpError, McpManager, McpServerConfig, SessionState};
use serde_json::json;

const MOCK_TOOL_COUNT: usize = 8;

fn mock_config(name: &str) -> McpServerConfig {
    McpServerConfig::new(name, env!("CARGO_BIN_EXE_mock-mcp-server"))
        .with_shutdown_grace(Duration::from_secs(2))
}

async fn ready_client(config: McpServerConfig) -> McpClient {
    let client = McpClient::new(config);
    client.initialize().await.expect("Failed to initialize");
    client
}

#[tokio::test]
async fn test_initialize() {
    let client = McpClient::new(mock_config("test"));
    assert_eq!(client.state(), SessionState::Uninitialized);

    let info = client.initialize().await.expect("Failed to initialize");
    assert_eq!(info.server_info.name, "mock-mcp-server");
    assert_eq!(info.server_info.version, "1.0.0");
    assert_eq!(info.protocol_version, "2024-11-05");
    assert!(info.capabilities.tools.is_some());

    assert_eq!(client.state(), SessionState::Ready);
    assert!(client.pid().is_some());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_initialize_when_ready_returns_existing_session() {
    let client = ready_client(mock_config("test")).await;
    let pid = client.pid();

    let again = client.initialize().await.unwrap();
    assert_eq!(again.server_info.name, "mock-mcp-server");
    assert_eq!(client.pid(), pid);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_list_tools() {
    let client = ready_client(mock_config("test")).await;

    let tools = client.list_tools().await.expect("Failed to list tools");
    assert_eq!(tools.len(), MOCK_TOOL_COUNT);

    let turn_on = tools
        .iter()
        .find(|t| t.name == "turnOn")
        .expect("turnOn tool not found");
    assert_eq!(turn_on.description.as_deref(), Some("Turn on a device"));
    assert_eq!(turn_on.input_schema.kind, "object");
    assert!(turn_on.input_schema.properties.contains_key("deviceId"));
    assert_eq!(
        turn_on.input_schema.required,
        Some(vec!["deviceId".to_string()])
    );

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_list_tools_follows_pagination() {
    let client = ready_client(mock_config("paged").with_arg("--page-size").with_arg("3")).await;

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), MOCK_TOOL_COUNT);
    assert_eq!(tools[0].name, "turnOn");
    assert_eq!(tools[MOCK_TOOL_COUNT - 1].name, "clientReplies");

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_list_tools_stops_on_cursor_cycle() {
    let client = ready_client(mock_config("cycling").with_arg("--cycle-cursor")).await;

    // Pages: first -> "B" -> "A" -> "B" again, which was already followed.
    let tools = tokio::time::timeout(Duration::from_secs(5), client.list_tools())
        .await
        .expect("list_tools should stop when a cursor repeats")
        .unwrap();
    assert_eq!(tools.len(), 3);
    assert!(tools.iter().all(|t| t.name == "turnOn"));
    assert!(client.is_ready());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_call_tool() {
    let client = ready_client(mock_config("test")).await;

    let result = client
        .call_tool("turnOn", json!({"deviceId": "abc"}))
        .await
        .expect("Failed to call tool");

    assert!(!result.is_error());
    assert_eq!(result.text().as_deref(), Some("Device abc turned on"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_tool_level_error_is_a_result() {
    let client = ready_client(mock_config("test")).await;

    let result = client.call_tool("fail", json!({})).await.unwrap();
    assert!(result.is_error());
    assert_eq!(result.text().as_deref(), Some("device offline"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_tool_is_remote_error() {
    let client = ready_client(mock_config("test")).await;

    let err = client
        .call_tool("nonexistent", json!({}))
        .await
        .unwrap_err();
    match err {
        McpError::RemoteError {
            method,
            code,
            message,
            ..
        } => {
            assert_eq!(method, "tools/call");
            assert_eq!(code, -32602);
            assert!(message.contains("Unknown tool"));
        }
        other => panic!("expected RemoteError, got {other:?}"),
    }

    // A remote error fails one call, not the session.
    assert_eq!(client.state(), SessionState::Ready);
    assert!(client.call_tool("echo", json!({"message": "hi"})).await.is_ok());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_child_environment() {
    let client = ready_client(mock_config("test").with_log_level("debug")).await;

    let result = client.call_tool("env", json!({})).await.unwrap();
    let data = result.data.expect("env tool returns data");
    assert_eq!(data["transport"], "stdio");
    assert_eq!(data["logLevel"], "debug");

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_resolve_out_of_order() {
    let client = Arc::new(ready_client(mock_config("test")).await);

    let slow_client = client.clone();
    let slow = tokio::spawn(async move {
        slow_client
            .call_tool("slow", json!({"delay_ms": 400}))
            .await
    });
    let fast_client = client.clone();
    let fast = tokio::spawn(async move {
        fast_client
            .call_tool("slow", json!({"delay_ms": 50}))
            .await
    });
    let echoes: Vec<_> = (0..10)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let result = client
                    .call_tool("echo", json!({"message": format!("msg-{i}")}))
                    .await;
                (i, result)
            })
        })
        .collect();

    for echo in echoes {
        let (i, result) = echo.await.unwrap();
        assert_eq!(result.unwrap().text(), Some(format!("msg-{i}")));
    }
    assert_eq!(
        fast.await.unwrap().unwrap().text().as_deref(),
        Some("Slept for 50 ms")
    );
    assert_eq!(
        slow.await.unwrap().unwrap().text().as_deref(),
        Some("Slept for 400 ms")
    );
    assert_eq!(client.pending_requests(), 0);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_request_timeout() {
    let client = ready_client(
        mock_config("test").with_request_timeout(Duration::from_millis(300)),
    )
    .await;

    let err = client.call_tool("hang", json!({})).await.unwrap_err();
    match &err {
        McpError::RequestTimeout { method, timeout } => {
            assert_eq!(method, "tools/call");
            assert_eq!(*timeout, Duration::from_millis(300));
        }
        other => panic!("expected RequestTimeout, got {other:?}"),
    }
    assert!(err.to_string().contains("tools/call"));
    assert_eq!(client.pending_requests(), 0);

    // The session survives a timeout.
    assert_eq!(client.state(), SessionState::Ready);
    let result = client
        .call_tool("echo", json!({"message": "still here"}))
        .await
        .unwrap();
    assert_eq!(result.text().as_deref(), Some("still here"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_server_crash_fails_pending_calls() {
    let client = Arc::new(
        ready_client(mock_config("crash-test").with_arg("--crash-on").with_arg("crash")).await,
    );

    let waiting_client = client.clone();
    let waiting = tokio::spawn(async move { waiting_client.call_tool("hang", json!({})).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = client.call_tool("crash", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::ProcessExited { .. }), "{err:?}");
    assert!(err.to_string().starts_with("ProcessExited"));

    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, McpError::ProcessExited { .. }), "{err:?}");

    assert_eq!(client.state(), SessionState::Faulted);
    assert_eq!(client.pending_requests(), 0);
    assert!(matches!(
        client.list_tools().await,
        Err(McpError::NotInitialized)
    ));
}

#[tokio::test]
async fn test_reinitialize_after_crash() {
    let client = ready_client(mock_config("test")).await;
    let first_pid = client.pid();

    assert!(client.call_tool("crash", json!({})).await.is_err());
    assert_eq!(client.state(), SessionState::Faulted);

    client.initialize().await.expect("re-initialize after crash");
    assert_eq!(client.state(), SessionState::Ready);
    assert_ne!(client.pid(), first_pid);

    let result = client
        .call_tool("turnOn", json!({"deviceId": "lamp"}))
        .await
        .unwrap();
    assert_eq!(result.text().as_deref(), Some("Device lamp turned on"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_close_fails_pending_and_is_idempotent() {
    let client = Arc::new(ready_client(mock_config("test")).await);

    let waiting_client = client.clone();
    let waiting = tokio::spawn(async move { waiting_client.call_tool("hang", json!({})).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.pending_requests(), 1);

    client.close().await.unwrap();
    assert!(matches!(
        waiting.await.unwrap(),
        Err(McpError::ClientClosed)
    ));

    assert_eq!(client.state(), SessionState::Closed);
    assert_eq!(client.pid(), None);
    assert!(client.server_info().is_none());
    client.close().await.unwrap();

    assert!(matches!(
        client.call_tool("echo", json!({})).await,
        Err(McpError::NotInitialized)
    ));
}

/// Ignores SIGTERM and only exits once stdin reaches EOF.
#[cfg(unix)]
const EOF_ONLY_SERVER: &str = r#"
trap '' TERM
read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"eof-only","version":"0.1.0"}}}'
while read -r line; do :; done
"#;

#[cfg(unix)]
#[tokio::test]
async fn test_close_sends_eof_before_signalling() {
    let client = ready_client(
        McpServerConfig::new("eof-only", "sh")
            .with_args(vec!["-c".to_string(), EOF_ONLY_SERVER.to_string()])
            .with_shutdown_grace(Duration::from_secs(10)),
    )
    .await;

    let started = std::time::Instant::now();
    client.close().await.unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "close waited {:?}; the server should have exited on EOF",
        started.elapsed()
    );
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_initialize_after_close() {
    let client = ready_client(mock_config("test")).await;
    client.close().await.unwrap();

    client.initialize().await.unwrap();
    assert_eq!(client.state(), SessionState::Ready);
    assert_eq!(client.list_tools().await.unwrap().len(), MOCK_TOOL_COUNT);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_spawn_failure() {
    let client = McpClient::new(McpServerConfig::new(
        "missing",
        "/nonexistent/path/to/mcp-server",
    ));

    let err = client.initialize().await.unwrap_err();
    match err {
        McpError::SpawnFailed { command, .. } => {
            assert_eq!(command, "/nonexistent/path/to/mcp-server");
        }
        other => panic!("expected SpawnFailed, got {other:?}"),
    }
    assert_eq!(client.state(), SessionState::Uninitialized);
}

#[tokio::test]
async fn test_initialize_rejected() {
    let client = McpClient::new(mock_config("test").with_arg("--reject-init"));

    let err = client.initialize().await.unwrap_err();
    match err {
        McpError::InitializationRejected { code, message } => {
            assert_eq!(code, -32602);
            assert!(message.contains("Unsupported protocol version"));
        }
        other => panic!("expected InitializationRejected, got {other:?}"),
    }
    assert_eq!(client.state(), SessionState::Uninitialized);
    assert_eq!(client.pid(), None);
}

#[tokio::test]
async fn test_server_exits_during_handshake() {
    let client = McpClient::new(mock_config("test").with_arg("--exit-on-init"));

    let err = client.initialize().await.unwrap_err();
    assert!(
        matches!(err, McpError::InitializationFailed { .. }),
        "expected InitializationFailed, got {err:?}"
    );
    assert_eq!(client.state(), SessionState::Uninitialized);
    assert_eq!(client.pid(), None);
    assert!(client.server_info().is_none());
}

#[tokio::test]
async fn test_initialize_timeout() {
    let client = McpClient::new(
        mock_config("test")
            .with_arg("--silent-init")
            .with_init_timeout(Duration::from_millis(300)),
    );

    let err = client.initialize().await.unwrap_err();
    match err {
        McpError::InitializationTimeout { timeout } => {
            assert_eq!(timeout, Duration::from_millis(300));
        }
        other => panic!("expected InitializationTimeout, got {other:?}"),
    }
    assert_eq!(client.state(), SessionState::Uninitialized);
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let client = ready_client(mock_config("noisy").with_arg("--garbage")).await;

    assert_eq!(client.list_tools().await.unwrap().len(), MOCK_TOOL_COUNT);
    let result = client
        .call_tool("echo", json!({"message": "through the noise"}))
        .await
        .unwrap();
    assert_eq!(result.text().as_deref(), Some("through the noise"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_split_frames_are_reassembled() {
    let client = ready_client(mock_config("split").with_arg("--split")).await;

    let result = client
        .call_tool("turnOn", json!({"deviceId": "split-device"}))
        .await
        .unwrap();
    assert_eq!(result.text().as_deref(), Some("Device split-device turned on"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_server_requests_get_method_not_found() {
    let client = ready_client(mock_config("asking").with_arg("--ask-client")).await;

    let mut replies = Vec::new();
    for _ in 0..40 {
        let result = client.call_tool("clientReplies", json!({})).await.unwrap();
        replies = result
            .data
            .and_then(|d| d.as_array().cloned())
            .unwrap_or_default();
        if !replies.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    assert_eq!(replies.len(), 1, "expected one reply, got {replies:?}");
    assert_eq!(replies[0]["id"], "srv-1");
    assert_eq!(replies[0]["error"]["code"], -32601);
    assert_eq!(client.state(), SessionState::Ready);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_max_in_flight() {
    let client = Arc::new(ready_client(mock_config("capped").with_max_in_flight(1)).await);

    let waiting_client = client.clone();
    let waiting = tokio::spawn(async move { waiting_client.call_tool("hang", json!({})).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(
        client.call_tool("echo", json!({"message": "x"})).await,
        Err(McpError::TooManyRequests { limit: 1 })
    ));

    client.close().await.unwrap();
    assert!(waiting.await.unwrap().is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_manager_multiple_servers() {
    let mut manager = McpManager::new();
    manager.add_server(mock_config("server1"));
    manager.add_server(mock_config("server2"));
    manager.add_server(mock_config("server3"));

    assert_eq!(manager.connect_all().await, 3);
    assert!(manager.is_connected("server1"));
    assert!(manager.is_connected("server2"));
    assert!(manager.is_connected("server3"));

    let all_tools = manager.list_all_tools().await;
    assert_eq!(all_tools.len(), 3);
    for (name, tools) in &all_tools {
        assert_eq!(tools.len(), MOCK_TOOL_COUNT, "server {name}");
    }
    assert_eq!(manager.tool_count().await, 3 * MOCK_TOOL_COUNT);

    // Already connected servers are skipped.
    assert_eq!(manager.connect_all().await, 0);

    manager.shutdown_all().await;
    assert!(!manager.has_connections());
    assert_eq!(manager.config_count(), 3);
}

#[tokio::test]
async fn test_manager_partial_failure() {
    let mut manager = McpManager::new();
    manager.add_server(mock_config("good"));
    manager.add_server(McpServerConfig::new("bad", "nonexistent-mcp-server-12345"));

    assert_eq!(manager.connect_all().await, 1);
    assert_eq!(manager.connected_server_names(), vec!["good"]);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn test_manager_connect_by_name_and_flat_tools() {
    let mut manager = McpManager::new();
    manager.add_server(mock_config("server-a"));
    manager.add_server(mock_config("server-b"));

    let client = manager.connect_server_by_name("server-a").await.unwrap();
    assert!(client.is_ready());
    assert!(manager.is_connected("server-a"));
    assert!(!manager.is_connected("server-b"));

    let flat = manager.all_tools_flat().await;
    assert_eq!(flat.len(), MOCK_TOOL_COUNT);
    assert!(flat.iter().all(|(server, _)| server == "server-a"));

    let result = manager
        .call_tool("server-a", "echo", json!({"message": "hi"}))
        .await
        .unwrap();
    assert_eq!(result.text(), Some("hi".to_string()));

    assert!(manager.shutdown_server("server-a").await);
    assert!(!manager.is_connected("server-a"));
    assert_eq!(client.state(), SessionState::Closed);

    assert!(manager.remove_server("server-b").await);
    assert!(!manager.has_server("server-b"));
}
