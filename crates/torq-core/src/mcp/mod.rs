//! MCP client over HTTP
//!
//! Connects to a Model Context Protocol server that accepts JSON-RPC 2.0
//! requests via HTTP POST, performs the initialize handshake, discovers the
//! server's tools and calls them on demand.

pub mod types;

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, TorqError};
use crate::providers::REQUEST_TIMEOUT_SECS;
pub use types::{CallToolResult, ServerInfo, ToolContent, ToolInfo};
use types::*;

const SESSION_HEADER: &str = "mcp-session-id";

fn mcp_err(context: &str, e: impl std::fmt::Display) -> TorqError {
    TorqError::Mcp(format!("{}: {}", context, e))
}

/// A connected MCP server
pub struct McpClient {
    client: Client,
    url: String,
    session_id: Option<String>,
    next_id: AtomicI64,
    server_info: Option<ServerInfo>,
    tools: Vec<ToolInfo>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("url", &self.url)
            .field("server_info", &self.server_info)
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl McpClient {
    /// Connect to the server at `url`, run the handshake and list its tools
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to MCP server at {}", url);

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| mcp_err("Failed to build HTTP client", e))?;

        let mut mcp = Self {
            client,
            url: url.to_string(),
            session_id: None,
            next_id: AtomicI64::new(1),
            server_info: None,
            tools: Vec::new(),
        };

        mcp.initialize().await?;
        mcp.discover_tools().await?;
        Ok(mcp)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    fn post(&self, body: &impl serde::Serialize) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        if let Some(session) = &self.session_id {
            request = request.header(SESSION_HEADER, session);
        }
        request
    }

    /// Send a request and return its `result`, mapping JSON-RPC errors
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(RpcId::Number(id), method, params);
        debug!("MCP request {} (id {})", method, id);

        let response = self
            .post(&request)
            .send()
            .await
            .map_err(|e| mcp_err(&format!("{} request failed", method), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TorqError::Mcp(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let body = response
            .text()
            .await
            .map_err(|e| mcp_err("Failed to read response body", e))?;

        let rpc: JsonRpcResponse = if is_stream {
            parse_event_stream(&body)?
        } else {
            serde_json::from_str(&body).map_err(|e| mcp_err("Invalid JSON-RPC response", e))?
        };

        if let Some(err) = rpc.error {
            return Err(TorqError::Mcp(format!(
                "{} failed ({}): {}",
                method, err.code, err.message
            )));
        }
        rpc.result
            .ok_or_else(|| TorqError::Mcp(format!("{} response missing result", method)))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        let response = self
            .post(&notification)
            .send()
            .await
            .map_err(|e| mcp_err(&format!("{} notification failed", method), e))?;
        if !response.status().is_success() {
            return Err(TorqError::Mcp(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }
        Ok(())
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "torq",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = self.request("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| mcp_err("Invalid initialize result", e))?;
        info!(
            "MCP server {} ({}) speaks protocol {}",
            init.server_info.name,
            init.server_info.version.as_deref().unwrap_or("unknown version"),
            init.protocol_version
        );
        self.server_info = Some(init.server_info);

        self.notify("notifications/initialized", None).await
    }

    async fn discover_tools(&mut self) -> Result<()> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| mcp_err("Invalid tools/list result", e))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        for tool in &tools {
            debug!("Discovered MCP tool {}", tool.name);
        }
        info!("MCP tool discovery complete: {} tools", tools.len());
        self.tools = tools;
        Ok(())
    }

    /// Call a tool on the server. A result flagged `isError` is an error.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        if !self.tools.iter().any(|t| t.name == name) {
            return Err(TorqError::Mcp(format!("Unknown tool '{}'", name)));
        }
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let result = self.request("tools/call", Some(params)).await?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| mcp_err("Invalid tools/call result", e))?;
        if result.is_error {
            return Err(TorqError::Mcp(format!(
                "Tool '{}' failed: {}",
                name,
                result.text()
            )));
        }
        Ok(result)
    }
}

/// Take the first JSON-RPC response from a server-sent event stream
fn parse_event_stream(body: &str) -> Result<JsonRpcResponse> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .find_map(|data| serde_json::from_str::<JsonRpcResponse>(data).ok())
        .ok_or_else(|| TorqError::Mcp("No JSON-RPC response in event stream".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_stream() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[]}}\n\n";
        let resp = parse_event_stream(body).unwrap();
        assert_eq!(resp.id, RpcId::Number(1));
        assert!(resp.result.is_some());
    }

    #[test]
    fn test_parse_event_stream_skips_noise() {
        let body = ": keep-alive\ndata: not json\ndata: {\"jsonrpc\":\"2.0\",\"id\":\"a\",\"result\":{}}\n";
        let resp = parse_event_stream(body).unwrap();
        assert_eq!(resp.id, RpcId::String("a".to_string()));
    }

    #[test]
    fn test_parse_event_stream_empty() {
        let err = parse_event_stream("event: ping\n\n").unwrap_err();
        assert!(matches!(err, TorqError::Mcp(_)));
    }

    #[tokio::test]
    async fn test_connect_unreachable() {
        let err = McpClient::connect("http://127.0.0.1:1/mcp").await.unwrap_err();
        assert!(matches!(err, TorqError::Mcp(_)));
        assert!(err.to_string().contains("initialize"));
    }
}
