use std::borrow::Cow;
use std::sync::Arc;

use rmcp::{model::*, service::RequestContext, ErrorData as McpError, RoleServer, ServerHandler};
use serde_json::Map;

use mcpredact_backend::Backend;
use mcpredact_kernel::Pipeline;
use mcpredact_middleware::ProxyError;
use mcpredact_protocol::{ResourceRequest, ResourceResponse, ToolInvocation, ToolRequest, ToolResponse};

/// MCP server that forwards `tools/list` straight through to the upstream
/// server, but routes `tools/call` and `resources/read` through the
/// redaction pipelines before a response ever reaches the client.
pub struct RedactingServer {
    backend: Arc<dyn Backend>,
    tool_pipeline: Pipeline<ToolInvocation, ToolResponse, ProxyError>,
    resource_pipeline: Pipeline<ResourceRequest, ResourceResponse, ProxyError>,
}

impl RedactingServer {
    pub fn new(
        backend: Arc<dyn Backend>,
        tool_pipeline: Pipeline<ToolInvocation, ToolResponse, ProxyError>,
        resource_pipeline: Pipeline<ResourceRequest, ResourceResponse, ProxyError>,
    ) -> Self {
        RedactingServer { backend, tool_pipeline, resource_pipeline }
    }
}

impl ServerHandler for RedactingServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().enable_resources().build(),
            server_info: Implementation {
                name: "mcpredact".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Transparent MCP proxy. Forwards tool calls and resource reads to the \
                 configured upstream server, redacting PII and payment-card data from \
                 the responses before they reach the client."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = self.backend.list_tools().await.map_err(|e| {
            tracing::error!("failed to list tools from upstream: {e}");
            McpError::internal_error(format!("upstream unreachable: {e}"), None)
        })?;

        let mcp_tools: Vec<Tool> = tools
            .into_iter()
            .map(|t| {
                let schema = match t.input_schema {
                    serde_json::Value::Object(map) => map,
                    _ => Map::new(),
                };
                Tool {
                    name: Cow::Owned(t.name),
                    title: None,
                    description: Some(Cow::Owned(t.description)),
                    input_schema: Arc::new(schema),
                    output_schema: None,
                    annotations: None,
                    execution: None,
                    icons: None,
                    meta: None,
                }
            })
            .collect();

        Ok(ListToolsResult { tools: mcp_tools, next_cursor: None, meta: None })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool_name = request.name.to_string();
        let arguments = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(Map::new()));

        tracing::info!(tool = %tool_name, "forwarding tool call through redaction pipeline");

        let invocation = ToolInvocation::new(ToolRequest { tool_name, arguments });
        let response = self.tool_pipeline.run(invocation).await.map_err(|e| {
            tracing::error!("tool call failed: {e}");
            McpError::internal_error(e.to_string(), None)
        })?;

        match response {
            ToolResponse::Standard(body) => {
                let mut content = Vec::with_capacity(body.content.len());
                for block in body.content {
                    if block.is_text() {
                        content.push(Content::text(block.text.unwrap_or_default()));
                        continue;
                    }
                    // Opaque carrier (image/audio/embedded_resource): round-trip
                    // the block through its own wire shape instead of collapsing
                    // it into an empty text block.
                    let kind = block.kind.clone();
                    match serde_json::to_value(&block).and_then(serde_json::from_value::<Content>) {
                        Ok(c) => content.push(c),
                        Err(e) => {
                            tracing::warn!(kind = %kind, error = %e, "dropping content block with unrecognized shape");
                        }
                    }
                }
                if body.is_error {
                    Ok(CallToolResult::error(content))
                } else {
                    Ok(CallToolResult::success(content))
                }
            }
            ToolResponse::Legacy(value) => Ok(CallToolResult::success(vec![Content::text(value.to_string())])),
        }
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let uri = request.uri.clone();
        tracing::info!(uri = %uri, "forwarding resource read through redaction pipeline");

        let response = self.resource_pipeline.run(ResourceRequest { uri }).await.map_err(|e| {
            tracing::error!("resource read failed: {e}");
            McpError::internal_error(e.to_string(), None)
        })?;

        let contents = response
            .contents
            .into_iter()
            .map(|item| ResourceContents::text(item.text.unwrap_or_default(), item.uri))
            .collect();

        Ok(ReadResourceResult { contents })
    }
}
