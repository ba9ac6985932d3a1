//! Client side of a single Model Context Protocol connection.
//!
//! [`RmcpClient`] wraps the official `rmcp` SDK and hides which transport is
//! in use: a spawned child process speaking over stdio, a streamable-HTTP
//! endpoint, or a legacy server-sent-events endpoint.

mod rmcp_client;
mod sse_transport;
mod utils;

pub use rmcp::model::CallToolResult;
pub use rmcp::model::ClientInfo;
pub use rmcp::model::JsonObject;
pub use rmcp::model::ServerInfo;
pub use rmcp::model::Tool;
pub use rmcp_client::RmcpClient;
pub use utils::RequestTimeout;
pub use utils::text_from_call_tool_result;
