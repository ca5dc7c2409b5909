//! McpClient against an in-process JSON-RPC server

use axum::Json;
use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use torq_core::{McpClient, TorqError};

const SESSION: &str = "session-42";

async fn mcp_handler(headers: HeaderMap, Json(req): Json<Value>) -> Response {
    let method = req["method"].as_str().unwrap_or_default();
    let id = req.get("id").cloned().unwrap_or(Value::Null);

    if method != "initialize" {
        let session = headers.get("mcp-session-id").and_then(|v| v.to_str().ok());
        if session != Some(SESSION) {
            return StatusCode::BAD_REQUEST.into_response();
        }
    }

    let result = match method {
        "initialize" => {
            let body = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "mock-mcp", "version": "1.0.0"}
                }
            });
            return ([("mcp-session-id", SESSION)], Json(body)).into_response();
        }
        "notifications/initialized" => return StatusCode::ACCEPTED.into_response(),
        "tools/list" if req["params"]["cursor"].is_null() => json!({
            "tools": [{"name": "echo", "description": "Echo text", "inputSchema": {"type": "object"}}],
            "nextCursor": "page2"
        }),
        "tools/list" => json!({
            "tools": [{"name": "fail", "description": "Always fails"}]
        }),
        "tools/call" => match req["params"]["name"].as_str() {
            Some("echo") => json!({
                "content": [{"type": "text", "text": req["params"]["arguments"]["text"]}]
            }),
            _ => json!({
                "content": [{"type": "text", "text": "boom"}],
                "isError": true
            }),
        },
        _ => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": "Method not found"}
            }))
            .into_response();
        }
    };

    Json(json!({"jsonrpc": "2.0", "id": id, "result": result})).into_response()
}

async fn start_mock() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/mcp", post(mcp_handler));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/mcp", addr)
}

#[tokio::test]
async fn connect_discovers_all_tool_pages() {
    let url = start_mock().await;
    let client = McpClient::connect(&url).await.unwrap();
    assert_eq!(client.server_info().unwrap().name, "mock-mcp");
    assert_eq!(client.tool_names(), vec!["echo", "fail"]);
    assert_eq!(client.tools()[0].input_schema["type"], "object");
}

#[tokio::test]
async fn call_tool_returns_text() {
    let url = start_mock().await;
    let mut client = McpClient::connect(&url).await.unwrap();
    let result = client
        .call_tool("echo", json!({"text": "hello mcp"}))
        .await
        .unwrap();
    assert_eq!(result.text(), "hello mcp");
}

#[tokio::test]
async fn tool_errors_map_to_mcp_error() {
    let url = start_mock().await;
    let mut client = McpClient::connect(&url).await.unwrap();

    let err = client.call_tool("fail", json!({})).await.unwrap_err();
    assert!(matches!(err, TorqError::Mcp(_)));
    assert!(err.to_string().contains("boom"));

    let err = client.call_tool("missing", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("Unknown tool"));
}
