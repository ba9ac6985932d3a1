use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use rmcp::ErrorData as McpError;
use rmcp::ServiceExt;
use rmcp::handler::server::ServerHandler;
use rmcp::model::CallToolRequestParam;
use rmcp::model::CallToolResult;
use rmcp::model::Content;
use rmcp::model::JsonObject;
use rmcp::model::ListToolsResult;
use rmcp::model::PaginatedRequestParam;
use rmcp::model::ServerCapabilities;
use rmcp::model::ServerInfo;
use rmcp::model::Tool;
use serde::Deserialize;
use serde_json::json;
use tokio::task;

/// Tools served to integration tests:
/// - `echo` returns `ECHOING: <message>`
/// - `fail` returns a tool-level error carrying `<message>`
/// - `sleep` waits `millis` before answering, for timeout tests
#[derive(Clone)]
struct TestToolServer {
    tools: Arc<Vec<Tool>>,
}

pub fn stdio() -> (tokio::io::Stdin, tokio::io::Stdout) {
    (tokio::io::stdin(), tokio::io::stdout())
}

impl TestToolServer {
    fn new() -> Self {
        let tools = vec![
            Self::tool(
                "echo",
                "Echo back the provided message.",
                json!({
                    "type": "object",
                    "properties": { "message": { "type": "string" } },
                    "required": ["message"],
                    "additionalProperties": false
                }),
            ),
            Self::tool(
                "fail",
                "Always report a tool error with the provided message.",
                json!({
                    "type": "object",
                    "properties": { "message": { "type": "string" } },
                    "required": ["message"]
                }),
            ),
            Self::tool(
                "sleep",
                "Sleep for the given number of milliseconds, then answer.",
                json!({
                    "type": "object",
                    "properties": { "millis": { "type": "integer" } },
                    "required": ["millis"]
                }),
            ),
        ];
        Self {
            tools: Arc::new(tools),
        }
    }

    fn tool(name: &'static str, description: &'static str, schema: serde_json::Value) -> Tool {
        #[expect(clippy::expect_used)]
        let schema: JsonObject =
            serde_json::from_value(schema).expect("tool schema should deserialize");

        Tool::new(
            Cow::Borrowed(name),
            Cow::Borrowed(description),
            Arc::new(schema),
        )
    }
}

#[derive(Deserialize)]
struct MessageArgs {
    message: String,
}

#[derive(Deserialize)]
struct SleepArgs {
    millis: u64,
}

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: Option<JsonObject>) -> Result<T, McpError> {
    let arguments =
        arguments.ok_or_else(|| McpError::invalid_params("missing arguments", None))?;
    serde_json::from_value(serde_json::Value::Object(arguments))
        .map_err(|err| McpError::invalid_params(err.to_string(), None))
}

impl ServerHandler for TestToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..ServerInfo::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools = self.tools.clone();
        async move {
            Ok(ListToolsResult {
                tools: (*tools).clone(),
                next_cursor: None,
            })
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        match request.name.as_ref() {
            "echo" => {
                let args: MessageArgs = parse_args(request.arguments)?;
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "ECHOING: {}",
                    args.message
                ))]))
            }
            "fail" => {
                let args: MessageArgs = parse_args(request.arguments)?;
                Ok(CallToolResult::error(vec![Content::text(args.message)]))
            }
            "sleep" => {
                let args: SleepArgs = parse_args(request.arguments)?;
                tokio::time::sleep(Duration::from_millis(args.millis)).await;
                Ok(CallToolResult::success(vec![Content::text("awake")]))
            }
            other => Err(McpError::invalid_params(
                format!("unknown tool: {other}"),
                None,
            )),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("starting rmcp test server");
    // Run the server with STDIO transport. If the client disconnects we simply
    // bubble up the error so the process exits.
    let service = TestToolServer::new();
    let running = service.serve(stdio()).await?;

    running.waiting().await?;
    task::yield_now().await;
    Ok(())
}
