//! Registry of live MCP server connections.
//!
//! The [`McpConnectionManager`] owns one [`RmcpClient`] per connected server,
//! keyed by the name the server was configured under. Servers that fail to
//! come up are left out and reported to the caller; the rest stay usable.

use std::collections::HashMap;
use std::collections::HashSet;
use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tmuxai_rmcp_client::ClientInfo;
use tmuxai_rmcp_client::JsonObject;
use tmuxai_rmcp_client::RequestTimeout;
use tmuxai_rmcp_client::RmcpClient;
use tmuxai_rmcp_client::text_from_call_tool_result;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::config_types::McpServerConfig;
use crate::config_types::McpServerTransportConfig;
use crate::error::Result;
use crate::error::TmuxaiErr;
use crate::protocol::ServerTools;
use crate::util::backoff;

/// Bounds applied to every MCP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McpTimeouts {
    /// Handshake, including the SSE `endpoint` event.
    pub startup: Duration,
    pub list_tools: Duration,
    /// Default for `tools/call` when the server entry sets no `timeout`.
    pub tool_call: Duration,
}

impl McpTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            startup: config.startup_timeout(),
            list_tools: config.list_tools_timeout(),
            tool_call: config.tool_timeout(),
        }
    }
}

impl Default for McpTimeouts {
    fn default() -> Self {
        Self {
            startup: Duration::from_secs(10),
            list_tools: Duration::from_secs(10),
            tool_call: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
struct ManagedClient {
    client: Arc<RmcpClient>,
    tool_timeout: Duration,
    /// Tool names listed right after the handshake. `None` when listing
    /// failed.
    tools: Option<Vec<String>>,
}

type ClientMap = Arc<HashMap<String, ManagedClient>>;

pub struct McpConnectionManager {
    /// Replaced wholesale, never edited in place.
    clients: RwLock<ClientMap>,
    timeouts: McpTimeouts,
}

impl McpConnectionManager {
    /// Registry with no servers.
    pub fn empty(timeouts: McpTimeouts) -> Self {
        Self {
            clients: RwLock::new(Arc::new(HashMap::new())),
            timeouts,
        }
    }

    /// Connect every server entry concurrently. Returns the registry together with
    /// the reason each missing server failed to come up.
    pub async fn new(
        specs: Vec<McpServerConfig>,
        timeouts: McpTimeouts,
    ) -> (Self, HashMap<String, anyhow::Error>) {
        let (clients, errors) = connect_all(specs, timeouts).await;
        let manager = Self {
            clients: RwLock::new(Arc::new(clients)),
            timeouts,
        };
        (manager, errors)
    }

    /// Names of the connected servers, sorted.
    pub async fn server_names(&self) -> Vec<String> {
        let clients = self.snapshot().await;
        let mut names: Vec<String> = clients.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot().await.is_empty()
    }

    /// Tools cached at connection time for every connected server.
    pub async fn tool_catalog(&self) -> Vec<ServerTools> {
        let clients = self.snapshot().await;
        let mut catalog: Vec<ServerTools> = clients
            .iter()
            .map(|(name, managed)| ServerTools {
                name: name.clone(),
                tools: managed.tools.clone().unwrap_or_default(),
            })
            .collect();
        catalog.sort_by(|a, b| a.name.cmp(&b.name));
        catalog
    }

    /// Ask `server` for its tools.
    pub async fn list_tools(&self, server: &str) -> Result<Vec<String>> {
        let managed = self.lookup(server).await?;
        let timeout = self.timeouts.list_tools;
        match managed.client.list_tools(Some(timeout)).await {
            Ok(tools) => Ok(tools.into_iter().map(|tool| tool.name.to_string()).collect()),
            Err(err) => Err(map_request_error(server, "tools/list", err)),
        }
    }

    /// Invoke `tool` on `server` and return the text of its result.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Option<JsonObject>,
    ) -> Result<String> {
        let managed = self.lookup(server).await?;
        info!("calling tool {tool} on MCP server {server}");

        let result = managed
            .client
            .call_tool(tool.to_string(), arguments, Some(managed.tool_timeout))
            .await
            .map_err(|err| map_request_error(server, "tools/call", err))?;

        let text = text_from_call_tool_result(&result);
        if result.is_error.unwrap_or(false) {
            warn!("tool {tool} on MCP server {server} returned an error: {text}");
            return Err(TmuxaiErr::ToolError(text));
        }
        Ok(text)
    }

    /// Shut down every connection. A server that does not shut down in time
    /// is logged and skipped.
    pub async fn close(&self) {
        let mut guard = self.clients.write().await;
        let old = std::mem::take(&mut *guard);
        shutdown_all(&old, self.timeouts.startup).await;
    }

    /// Close every connection and connect `specs` instead. Lookups wait until
    /// the new set is in place.
    pub async fn replace(&self, specs: Vec<McpServerConfig>) -> HashMap<String, anyhow::Error> {
        let mut guard = self.clients.write().await;
        let old = std::mem::take(&mut *guard);
        shutdown_all(&old, self.timeouts.startup).await;

        let (clients, errors) = connect_all(specs, self.timeouts).await;
        *guard = Arc::new(clients);
        errors
    }

    async fn snapshot(&self) -> ClientMap {
        Arc::clone(&*self.clients.read().await)
    }

    async fn lookup(&self, server: &str) -> Result<ManagedClient> {
        self.snapshot()
            .await
            .get(server)
            .cloned()
            .ok_or_else(|| TmuxaiErr::ToolNotFound(server.to_string()))
    }
}

async fn connect_all(
    specs: Vec<McpServerConfig>,
    timeouts: McpTimeouts,
) -> (HashMap<String, ManagedClient>, HashMap<String, anyhow::Error>) {
    let mut clients = HashMap::new();
    let mut errors = HashMap::new();
    let mut seen = HashSet::new();
    let mut join_set = JoinSet::new();

    for spec in specs {
        if !seen.insert(spec.name.clone()) {
            warn!("duplicate MCP server name '{}', skipping", spec.name);
            continue;
        }
        join_set.spawn(async move {
            let name = spec.name.clone();
            let result = connect_with_retries(spec, timeouts).await;
            (name, result)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        let (name, result) = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("MCP connection task failed: {err}");
                continue;
            }
        };
        match result {
            Ok(managed) => {
                info!("connected to MCP server {name}");
                clients.insert(name, managed);
            }
            Err(err) => {
                warn!("failed to connect to MCP server {name}: {err:#}");
                errors.insert(name, err);
            }
        }
    }

    (clients, errors)
}

async fn connect_with_retries(
    spec: McpServerConfig,
    timeouts: McpTimeouts,
) -> anyhow::Result<ManagedClient> {
    let transport = spec.transport().map_err(|msg| anyhow!(msg))?;
    let attempts = u64::from(spec.retry_count) + 1;

    let mut attempt = 0;
    loop {
        attempt += 1;
        match connect_once(&spec, &transport, timeouts).await {
            Ok(managed) => return Ok(managed),
            Err(err) if attempt < attempts => {
                warn!(
                    "attempt {attempt}/{attempts} to connect to MCP server {} failed: {err:#}",
                    spec.name
                );
                tokio::time::sleep(backoff(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn connect_once(
    spec: &McpServerConfig,
    transport: &McpServerTransportConfig,
    timeouts: McpTimeouts,
) -> anyhow::Result<ManagedClient> {
    let client = match transport {
        McpServerTransportConfig::Stdio { command, args, env } => {
            RmcpClient::new_stdio_client(
                OsString::from(command),
                args.iter().map(OsString::from).collect(),
                Some(env.clone()),
            )
            .await?
        }
        McpServerTransportConfig::Sse { url } => {
            RmcpClient::new_sse_client(
                url.clone(),
                spec.api_key.clone(),
                &spec.headers,
                Some(timeouts.startup),
            )
            .await?
        }
        McpServerTransportConfig::StreamableHttp { url } => {
            RmcpClient::new_streamable_http_client(url.clone(), spec.api_key.clone(), &spec.headers)?
        }
    };

    if let Err(err) = client.initialize(client_info(), Some(timeouts.startup)).await {
        client.shutdown().await;
        return Err(err);
    }

    let tools = match client.list_tools(Some(timeouts.list_tools)).await {
        Ok(tools) => Some(tools.into_iter().map(|tool| tool.name.to_string()).collect()),
        Err(err) => {
            warn!("failed to list tools of MCP server {}: {err:#}", spec.name);
            None
        }
    };

    Ok(ManagedClient {
        client: Arc::new(client),
        tool_timeout: spec.tool_timeout().unwrap_or(timeouts.tool_call),
        tools,
    })
}

async fn shutdown_all(clients: &HashMap<String, ManagedClient>, timeout: Duration) {
    for (name, managed) in clients.iter() {
        if tokio::time::timeout(timeout, managed.client.shutdown())
            .await
            .is_err()
        {
            warn!("timed out closing MCP server {name}");
        }
    }
}

fn client_info() -> ClientInfo {
    let mut info = ClientInfo::default();
    info.client_info.name = "tmuxai".to_string();
    info.client_info.version = env!("CARGO_PKG_VERSION").to_string();
    info
}

fn map_request_error(server: &str, operation: &str, err: anyhow::Error) -> TmuxaiErr {
    match err.downcast_ref::<RequestTimeout>() {
        Some(timeout) => TmuxaiErr::ToolTimeout {
            server: server.to_string(),
            operation: operation.to_string(),
            timeout: timeout.duration,
        },
        None => TmuxaiErr::ToolError(format!("{err:#}")),
    }
}
