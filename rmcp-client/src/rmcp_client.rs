use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use anyhow::anyhow;
use futures::FutureExt;
use rmcp::model::CallToolRequestParam;
use rmcp::model::CallToolResult;
use rmcp::model::ClientInfo;
use rmcp::model::JsonObject;
use rmcp::model::ServerInfo;
use rmcp::model::Tool;
use rmcp::service::RoleClient;
use rmcp::service::RunningService;
use rmcp::service::{self};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time;
use tracing::info;
use tracing::warn;

use crate::sse_transport;
use crate::sse_transport::SseTransport;
use crate::utils::build_http_client;
use crate::utils::create_env_for_mcp_server;
use crate::utils::run_with_timeout;

enum PendingTransport {
    ChildProcess(TokioChildProcess),
    StreamableHttp(StreamableHttpClientTransport<reqwest::Client>),
    Sse(SseTransport),
}

enum ClientState {
    Connecting {
        transport: Option<PendingTransport>,
    },
    Ready {
        service: Arc<RunningService<RoleClient, ClientInfo>>,
    },
}

/// MCP client implemented on top of the official `rmcp` SDK.
/// https://github.com/modelcontextprotocol/rust-sdk
pub struct RmcpClient {
    state: Mutex<ClientState>,
    /// Background tasks owned by the transport (SSE reader/writer).
    background: std::sync::Mutex<Vec<AbortHandle>>,
}

impl RmcpClient {
    pub async fn new_stdio_client(
        program: OsString,
        args: Vec<OsString>,
        env: Option<HashMap<String, String>>,
    ) -> io::Result<Self> {
        let program_name = program.to_string_lossy().into_owned();
        let mut command = Command::new(&program);
        command
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .env_clear()
            .envs(create_env_for_mcp_server(env))
            .args(&args);

        let (transport, stderr) = TokioChildProcess::builder(command)
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                loop {
                    match reader.next_line().await {
                        Ok(Some(line)) => {
                            info!("MCP server stderr ({program_name}): {line}");
                        }
                        Ok(None) => break,
                        Err(error) => {
                            warn!("Failed to read MCP server stderr ({program_name}): {error}");
                            break;
                        }
                    }
                }
            });
        }

        Ok(Self::connecting(PendingTransport::ChildProcess(transport), Vec::new()))
    }

    pub fn new_streamable_http_client(
        url: String,
        bearer_token: Option<String>,
        headers: &HashMap<String, String>,
    ) -> Result<Self> {
        let http_client = build_http_client(bearer_token.as_deref(), headers)?;
        let config = StreamableHttpClientTransportConfig::with_uri(url);
        let transport = StreamableHttpClientTransport::with_client(http_client, config);

        Ok(Self::connecting(
            PendingTransport::StreamableHttp(transport),
            Vec::new(),
        ))
    }

    /// Open the event stream of a legacy SSE server. The `endpoint` event must
    /// arrive within `timeout` for the connection to be usable.
    pub async fn new_sse_client(
        url: String,
        bearer_token: Option<String>,
        headers: &HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let http_client = build_http_client(bearer_token.as_deref(), headers)?;
        let mut transport = sse_transport::connect(http_client, &url, timeout).await?;
        let tasks = std::mem::take(&mut transport.tasks);

        Ok(Self::connecting(PendingTransport::Sse(transport), tasks))
    }

    fn connecting(transport: PendingTransport, background: Vec<AbortHandle>) -> Self {
        Self {
            state: Mutex::new(ClientState::Connecting {
                transport: Some(transport),
            }),
            background: std::sync::Mutex::new(background),
        }
    }

    /// Perform the initialization handshake with the MCP server.
    /// https://modelcontextprotocol.io/specification/2025-06-18/basic/lifecycle#initialization
    pub async fn initialize(
        &self,
        client_info: ClientInfo,
        timeout: Option<Duration>,
    ) -> Result<ServerInfo> {
        let transport = {
            let mut guard = self.state.lock().await;
            match &mut *guard {
                ClientState::Connecting { transport } => transport
                    .take()
                    .ok_or_else(|| anyhow!("client already initializing"))?,
                ClientState::Ready { .. } => {
                    return Err(anyhow!("client already initialized"));
                }
            }
        };

        let service_future = match transport {
            PendingTransport::ChildProcess(transport) => {
                service::serve_client(client_info, transport).boxed()
            }
            PendingTransport::StreamableHttp(transport) => {
                service::serve_client(client_info, transport).boxed()
            }
            PendingTransport::Sse(SseTransport { sink, stream, .. }) => {
                service::serve_client(client_info, (sink, stream)).boxed()
            }
        };

        let service = match timeout {
            Some(duration) => match time::timeout(duration, service_future).await {
                Ok(Ok(service)) => service,
                Ok(Err(err)) => return Err(handshake_failed_error(err)),
                Err(_) => return Err(handshake_timeout_error(duration)),
            },
            None => match service_future.await {
                Ok(service) => service,
                Err(err) => return Err(handshake_failed_error(err)),
            },
        };

        let server_info = service
            .peer()
            .peer_info()
            .cloned()
            .ok_or_else(|| anyhow!("handshake succeeded but server info was missing"))?;

        {
            let mut guard = self.state.lock().await;
            *guard = ClientState::Ready {
                service: Arc::new(service),
            };
        }

        Ok(server_info)
    }

    /// List every tool the server exposes, following pagination cursors.
    pub async fn list_tools(&self, timeout: Option<Duration>) -> Result<Vec<Tool>> {
        let service = self.service().await?;
        run_with_timeout(service.list_all_tools(), timeout, "tools/list").await
    }

    pub async fn call_tool(
        &self,
        name: String,
        arguments: Option<JsonObject>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResult> {
        let service = self.service().await?;
        let params = CallToolRequestParam {
            name: name.into(),
            arguments,
        };
        run_with_timeout(service.call_tool(params), timeout, "tools/call").await
    }

    async fn service(&self) -> Result<Arc<RunningService<RoleClient, ClientInfo>>> {
        let guard = self.state.lock().await;
        match &*guard {
            ClientState::Ready { service } => Ok(Arc::clone(service)),
            ClientState::Connecting { .. } => Err(anyhow!("MCP client not initialized")),
        }
    }

    pub async fn shutdown(&self) {
        if let Ok(service) = self.service().await {
            service.cancellation_token().cancel();
        }
        let tasks = match self.background.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            task.abort();
        }
    }
}

fn handshake_failed_error(err: impl Into<anyhow::Error>) -> anyhow::Error {
    let err = err.into();
    anyhow!("handshaking with MCP server failed: {err}")
}

fn handshake_timeout_error(duration: Duration) -> anyhow::Error {
    anyhow!("timed out handshaking with MCP server after {duration:?}")
}
