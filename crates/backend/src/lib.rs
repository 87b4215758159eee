//! mcpredact_backend
//!
//! Transport to the real, upstream MCP server. Two shapes: a subprocess
//! talking newline-delimited JSON-RPC over stdio, or a plain HTTP endpoint.
//! Neither transport knows anything about redaction or audit — that's the
//! middleware's job; this crate only gets bytes there and back.

use async_trait::async_trait;
use mcpredact_protocol::{ResourceRequest, ResourceResponse, ToolRequest, ToolResponse};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned an error response: {0}")]
    Upstream(String),
    #[error("upstream process exited without a response")]
    ProcessExited,
}

/// A tool descriptor as reported by the upstream server's `tools/list`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<UpstreamTool>,
}

/// What the proxy can ask the upstream MCP server to do.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<UpstreamTool>, BackendError>;
    async fn call_tool(&self, req: &ToolRequest) -> Result<ToolResponse, BackendError>;
    async fn read_resource(&self, req: &ResourceRequest) -> Result<ResourceResponse, BackendError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Speaks newline-delimited JSON-RPC to a child process over its stdin and
/// stdout. Requests are serialized one at a time under `inner`'s lock, since
/// the proxy never needs more than one in-flight call to a given upstream.
pub struct StdioBackend {
    inner: Mutex<StdioInner>,
    next_id: AtomicU64,
}

struct StdioInner {
    child: Child,
    stdout: BufReader<tokio::process::ChildStdout>,
}

impl StdioBackend {
    pub async fn spawn(command: &str, args: &[String]) -> Result<Self, BackendError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .spawn()?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stdout = BufReader::new(stdout);

        Ok(StdioBackend {
            inner: Mutex::new(StdioInner { child, stdout }),
            next_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest { jsonrpc: "2.0", id, method, params };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let mut guard = self.inner.lock().await;
        let stdin = guard.child.stdin.as_mut().ok_or(BackendError::ProcessExited)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;

        let mut buf = String::new();
        let bytes_read = guard.stdout.read_line(&mut buf).await?;
        if bytes_read == 0 {
            return Err(BackendError::ProcessExited);
        }

        let response: JsonRpcResponse = serde_json::from_str(buf.trim_end())?;
        if let Some(err) = response.error {
            return Err(BackendError::Upstream(err.to_string()));
        }
        response.result.ok_or_else(|| BackendError::Upstream("response had neither result nor error".into()))
    }
}

#[async_trait]
impl Backend for StdioBackend {
    async fn list_tools(&self) -> Result<Vec<UpstreamTool>, BackendError> {
        let result = self.request("tools/list", serde_json::json!({})).await?;
        let parsed: ToolsListResult = serde_json::from_value(result)?;
        Ok(parsed.tools)
    }

    async fn call_tool(&self, req: &ToolRequest) -> Result<ToolResponse, BackendError> {
        let params = serde_json::json!({"name": req.tool_name, "arguments": req.arguments});
        let result = self.request("tools/call", params).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn read_resource(&self, req: &ResourceRequest) -> Result<ResourceResponse, BackendError> {
        let params = serde_json::json!({"uri": req.uri});
        let result = self.request("resources/read", params).await?;
        Ok(serde_json::from_value(result)?)
    }
}

/// Speaks plain HTTP JSON-RPC to a remote MCP-compatible endpoint.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>) -> Self {
        HttpBackend {
            client: reqwest::Client::new(),
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest { jsonrpc: "2.0", id, method, params };
        let response: JsonRpcResponse = self.client.post(&self.url).json(&request).send().await?.json().await?;
        if let Some(err) = response.error {
            return Err(BackendError::Upstream(err.to_string()));
        }
        response.result.ok_or_else(|| BackendError::Upstream("response had neither result nor error".into()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_tools(&self) -> Result<Vec<UpstreamTool>, BackendError> {
        let result = self.request("tools/list", serde_json::json!({})).await?;
        let parsed: ToolsListResult = serde_json::from_value(result)?;
        Ok(parsed.tools)
    }

    async fn call_tool(&self, req: &ToolRequest) -> Result<ToolResponse, BackendError> {
        let params = serde_json::json!({"name": req.tool_name, "arguments": req.arguments});
        let result = self.request("tools/call", params).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn read_resource(&self, req: &ResourceRequest) -> Result<ResourceResponse, BackendError> {
        let params = serde_json::json!({"uri": req.uri});
        let result = self.request("resources/read", params).await?;
        Ok(serde_json::from_value(result)?)
    }
}
