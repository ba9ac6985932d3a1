#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use std::time::Instant;

use pretty_assertions::assert_eq;
use serde_json::json;
use tmuxai_core::TmuxaiErr;
use tmuxai_core::config_types::McpServerConfig;
use tmuxai_core::mcp_connection_manager::McpConnectionManager;
use tmuxai_core::mcp_connection_manager::McpTimeouts;

fn stdio_server_bin() -> String {
    static BIN: OnceLock<String> = OnceLock::new();
    BIN.get_or_init(|| {
        escargot::CargoBuild::new()
            .package("tmuxai-rmcp-client")
            .bin("test_stdio_server")
            .current_release()
            .current_target()
            .run()
            .expect("build test_stdio_server")
            .path()
            .to_string_lossy()
            .into_owned()
    })
    .clone()
}

fn stdio_spec(name: &str) -> McpServerConfig {
    McpServerConfig {
        name: name.to_string(),
        transport_type: "stdio".to_string(),
        command: Some(stdio_server_bin()),
        args: Vec::new(),
        env: HashMap::new(),
        url: None,
        headers: HashMap::new(),
        api_key: None,
        timeout: None,
        retry_count: 0,
        autoconnect: false,
    }
}

fn timeouts() -> McpTimeouts {
    McpTimeouts {
        startup: Duration::from_secs(20),
        list_tools: Duration::from_secs(10),
        tool_call: Duration::from_secs(10),
    }
}

fn args(value: serde_json::Value) -> Option<serde_json::Map<String, serde_json::Value>> {
    value.as_object().cloned()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_malformed_spec_leaves_the_rest_connected() {
    let mut malformed = stdio_spec("broken");
    malformed.transport_type = "websocket".to_string();

    let (registry, failures) = McpConnectionManager::new(
        vec![stdio_spec("alpha"), malformed, stdio_spec("beta")],
        timeouts(),
    )
    .await;

    assert_eq!(registry.server_names().await, vec!["alpha", "beta"]);
    assert_eq!(failures.keys().collect::<Vec<_>>(), vec!["broken"]);

    let catalog = registry.tool_catalog().await;
    assert_eq!(catalog.len(), 2);
    let mut tools = catalog[0].tools.clone();
    tools.sort();
    assert_eq!(tools, vec!["echo", "fail", "sleep"]);

    registry.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tool_calls_map_to_distinct_failures() {
    let mut slow = stdio_spec("slow");
    slow.timeout = Some(1);
    let (registry, failures) =
        McpConnectionManager::new(vec![stdio_spec("fast"), slow], timeouts()).await;
    assert!(failures.is_empty(), "{failures:?}");

    let text = registry
        .call_tool("fast", "echo", args(json!({ "message": "hi" })))
        .await
        .unwrap();
    assert_eq!(text, "ECHOING: hi");

    let err = registry
        .call_tool("fast", "fail", args(json!({ "message": "disk full" })))
        .await
        .unwrap_err();
    assert!(matches!(err, TmuxaiErr::ToolError(ref msg) if msg.contains("disk full")), "{err:?}");

    let err = registry
        .call_tool("slow", "sleep", args(json!({ "millis": 5_000 })))
        .await
        .unwrap_err();
    assert!(
        matches!(err, TmuxaiErr::ToolTimeout { ref server, timeout, .. }
            if server == "slow" && timeout == Duration::from_secs(1)),
        "{err:?}"
    );

    // The timed-out call leaves the other connection usable.
    let text = registry
        .call_tool("fast", "echo", args(json!({ "message": "still here" })))
        .await
        .unwrap();
    assert_eq!(text, "ECHOING: still here");

    let err = registry.call_tool("missing", "echo", None).await.unwrap_err();
    assert!(matches!(err, TmuxaiErr::ToolNotFound(_)), "{err:?}");

    registry.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_server_does_not_stall_calls_to_another() {
    let (registry, failures) =
        McpConnectionManager::new(vec![stdio_spec("fast"), stdio_spec("slow")], timeouts()).await;
    assert!(failures.is_empty(), "{failures:?}");

    let slow_call = registry.call_tool("slow", "sleep", args(json!({ "millis": 3_000 })));
    let fast_call = async {
        let started = Instant::now();
        let result = registry
            .call_tool("fast", "echo", args(json!({ "message": "meanwhile" })))
            .await;
        (result, started.elapsed())
    };
    let started = Instant::now();
    let (slow_result, (fast_result, fast_elapsed)) = tokio::join!(slow_call, fast_call);

    assert_eq!(fast_result.unwrap(), "ECHOING: meanwhile");
    assert!(fast_elapsed < Duration::from_secs(1), "{fast_elapsed:?}");
    assert_eq!(slow_result.unwrap(), "awake");
    assert!(started.elapsed() >= Duration::from_secs(3));

    registry.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replace_swaps_the_active_set() {
    let (registry, _) = McpConnectionManager::new(vec![stdio_spec("first")], timeouts()).await;
    assert_eq!(registry.list_tools("first").await.unwrap().len(), 3);

    let failures = registry.replace(vec![stdio_spec("second")]).await;

    assert!(failures.is_empty());
    assert_eq!(registry.server_names().await, vec!["second"]);
    let err = registry.list_tools("first").await.unwrap_err();
    assert!(matches!(err, TmuxaiErr::ToolNotFound(_)), "{err:?}");

    registry.close().await;
    assert!(registry.is_empty().await);
}
