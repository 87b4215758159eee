mod server;

use std::sync::Arc;

use anyhow::Result;
use rmcp::{transport::stdio, ServiceExt};

use mcpredact_audit_log::AuditSink;
use mcpredact_backend::{Backend, HttpBackend, StdioBackend};
use mcpredact_common::{Config, UpstreamTarget};
use mcpredact_kernel::{terminal, Middleware, Pipeline};
use mcpredact_middleware::{AuditMiddleware, PiiResourceMiddleware, PiiToolMiddleware, ProxyError};
use mcpredact_ner::{ComprehendNerClient, NerClient};
use mcpredact_protocol::{ResourceRequest, ResourceResponse, ToolInvocation, ToolResponse};

use server::RedactingServer;

#[tokio::main]
async fn main() -> Result<()> {
    mcpredact_common::init_tracing();
    tracing::info!("mcpredact starting");

    let config = Config::from_env()?;

    let backend: Arc<dyn Backend> = match &config.upstream {
        UpstreamTarget::Stdio { command, args } => Arc::new(StdioBackend::spawn(command, args).await?),
        UpstreamTarget::Http { url } => Arc::new(HttpBackend::new(url.clone())),
    };

    let profile = mcpredact_profiles::get_profile(&config.compliance_profile);
    tracing::info!(profile = profile.name, "resolved compliance profile");

    let ner_client: Option<Arc<dyn NerClient>> = if config.comprehend_enabled {
        Some(Arc::new(ComprehendNerClient::from_env(config.aws_region.clone()).await))
    } else {
        None
    };

    let audit_sink = Arc::new(AuditSink::open(config.audit_log_path.as_str(), config.audit_enabled)?);

    let tool_pipeline = build_tool_pipeline(Arc::clone(&backend), profile.clone(), ner_client.clone(), audit_sink, &config);
    let resource_pipeline = build_resource_pipeline(Arc::clone(&backend), profile, ner_client);

    let srv = RedactingServer::new(backend, tool_pipeline, resource_pipeline);
    let service = srv.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {e:?}");
    })?;

    tracing::info!("mcpredact ready on stdio");
    service.waiting().await?;

    Ok(())
}

fn build_tool_pipeline(
    backend: Arc<dyn Backend>,
    profile: mcpredact_profiles::Profile,
    ner_client: Option<Arc<dyn NerClient>>,
    audit_sink: Arc<AuditSink>,
    config: &Config,
) -> Pipeline<ToolInvocation, ToolResponse, ProxyError> {
    let layers: Vec<Arc<dyn Middleware<ToolInvocation, ToolResponse, ProxyError>>> = vec![
        Arc::new(AuditMiddleware::new(audit_sink, config.compliance_profile.clone())),
        Arc::new(PiiToolMiddleware::new(profile, ner_client)),
    ];
    let term = terminal(move |invocation: ToolInvocation| {
        let backend = Arc::clone(&backend);
        async move { Ok(backend.call_tool(&invocation.request).await?) }
    });
    Pipeline::new(layers, term)
}

fn build_resource_pipeline(
    backend: Arc<dyn Backend>,
    profile: mcpredact_profiles::Profile,
    ner_client: Option<Arc<dyn NerClient>>,
) -> Pipeline<ResourceRequest, ResourceResponse, ProxyError> {
    let layers: Vec<Arc<dyn Middleware<ResourceRequest, ResourceResponse, ProxyError>>> =
        vec![Arc::new(PiiResourceMiddleware::new(profile, ner_client))];
    let term = terminal(move |req: ResourceRequest| {
        let backend = Arc::clone(&backend);
        async move { Ok(backend.read_resource(&req).await?) }
    });
    Pipeline::new(layers, term)
}
