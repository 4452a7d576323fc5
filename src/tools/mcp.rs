//! Model Context Protocol over HTTP
//!
//! JSON-RPC 2.0 requests are POSTed to a single endpoint. Responses may be
//! plain JSON or a short `text/event-stream` carrying the JSON-RPC message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{OnceCell, RwLock};
use uuid::Uuid;

use super::{ContentItem, ToolArguments, ToolBackend, ToolDefinition};
use crate::config::McpServerConfig;
use crate::{Error, Result};

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "mcp-session-id";

/// JSON-RPC request
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    method: &'a str,
    params: Value,
}

/// JSON-RPC response
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// JSON-RPC error
#[derive(Debug, Deserialize)]
struct RpcError {
    code: Option<i64>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    tools: Vec<McpTool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    is_error: bool,
}

/// Tools served by a remote MCP server
pub struct McpHttpBackend {
    id: String,
    url: String,
    client: reqwest::Client,
    session: OnceCell<Option<String>>,
    tools: RwLock<Option<Vec<ToolDefinition>>>,
}

impl McpHttpBackend {
    #[must_use]
    pub fn new(config: &McpServerConfig) -> Self {
        Self {
            id: config.id.clone(),
            url: config.url.clone(),
            client: reqwest::Client::new(),
            session: OnceCell::new(),
            tools: RwLock::new(None),
        }
    }

    /// Drop the cached tool list so the next lookup refetches it
    pub async fn invalidate_tools(&self) {
        *self.tools.write().await = None;
    }

    async fn session_id(&self) -> Result<Option<String>> {
        self.session
            .get_or_try_init(|| self.initialize())
            .await
            .cloned()
    }

    async fn initialize(&self) -> Result<Option<String>> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }
        });

        let (_, session) = self.send("initialize", params, None, true).await?;
        self.send("notifications/initialized", json!({}), session.as_deref(), false)
            .await?;

        tracing::info!(server = %self.id, url = %self.url, "mcp session initialized");
        Ok(session)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let session = self.session_id().await?;
        let (result, _) = self.send(method, params, session.as_deref(), true).await?;
        Ok(result)
    }

    /// POST one message; notifications (`expect_reply == false`) carry no id
    async fn send(
        &self,
        method: &str,
        params: Value,
        session: Option<&str>,
        expect_reply: bool,
    ) -> Result<(Value, Option<String>)> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: expect_reply.then(|| Uuid::new_v4().to_string()),
            method,
            params,
        };

        let mut builder = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(&request);
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.send().await?;
        let status = response.status();
        let session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tool(format!(
                "mcp server {} returned {status} for {method}: {body}",
                self.id
            )));
        }

        if !expect_reply {
            return Ok((Value::Null, session));
        }

        let body = response.text().await?;
        let payload = if is_event_stream {
            event_stream_payload(&body).ok_or_else(|| {
                Error::Tool(format!("mcp server {} sent no data for {method}", self.id))
            })?
        } else {
            body.as_str()
        };

        let rpc: RpcResponse = serde_json::from_str(payload)?;
        if let Some(error) = rpc.error {
            return Err(Error::Tool(format!(
                "mcp {method} failed ({}): {}",
                error.code.unwrap_or_default(),
                error.message.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        Ok((rpc.result.unwrap_or(Value::Null), session))
    }
}

/// Last `data:` payload of a server-sent event stream
fn event_stream_payload(body: &str) -> Option<&str> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .next_back()
}

#[async_trait]
impl ToolBackend for McpHttpBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn active_tools(&self) -> Result<Vec<ToolDefinition>> {
        if let Some(tools) = self.tools.read().await.as_ref() {
            return Ok(tools.clone());
        }

        let result = self.request("tools/list", json!({})).await?;
        let list: ListToolsResult = serde_json::from_value(result)?;
        let tools: Vec<ToolDefinition> = list
            .tools
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.name,
                description: t.description.unwrap_or_default(),
                parameters: t
                    .input_schema
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            })
            .collect();

        tracing::debug!(server = %self.id, count = tools.len(), "mcp tools listed");
        *self.tools.write().await = Some(tools.clone());
        Ok(tools)
    }

    async fn call(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ContentItem>> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        let result: CallToolResult = serde_json::from_value(result)?;

        let items: Vec<ContentItem> = result
            .content
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<ContentItem>(value) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::debug!(
                        server = %self.id,
                        tool = name,
                        error = %e,
                        "skipping unsupported content"
                    );
                    None
                }
            })
            .collect();

        if result.is_error {
            let text = items
                .iter()
                .filter_map(|i| match i {
                    ContentItem::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            return Err(Error::Tool(text));
        }

        Ok(items)
    }
}
