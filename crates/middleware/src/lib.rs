//! mcpredact_middleware
//!
//! The three onion layers the proxy is built from:
//!
//! - `PiiToolMiddleware` / `PiiResourceMiddleware` — stage-1 pattern masking
//!   and stage-2 NER over tool and resource responses.
//! - `AuditMiddleware` — emits one `AuditEntry` per tool call, reading the
//!   redaction summary the PII layer published through the invocation's
//!   write-once annotation slot.
//!
//! Tool calls run `audit ▸ pii-tool ▸ backend`; resource reads run
//! `pii-resource ▸ backend` (no audit layer — resources are static
//! reference content, not auditable calls).

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use mcpredact_audit_log::{truncate_input_parameters, AuditLogError, AuditSink};
use mcpredact_audit_spec::{AuditEntry, CallStatus};
use mcpredact_backend::BackendError;
use mcpredact_kernel::{KernelError, Middleware, Next};
use mcpredact_ner::{redact_with_ner, NerClient, NerError};
use mcpredact_profiles::Profile;
use mcpredact_protocol::{RedactionSummary, ResourceRequest, ResourceResponse, ToolInvocation, ToolResponse};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("upstream error: {0}")]
    Upstream(#[from] BackendError),
    #[error("ner error: {0}")]
    Ner(#[from] NerError),
    /// A second write to an already-populated annotation slot. Should not
    /// occur by construction; if it does, the offending content is never
    /// returned to the caller rather than risking a leak of raw text.
    #[error("internal masking error: redaction annotation was already set for this invocation")]
    InternalMasking,
}

async fn redact_text(
    profile: &Profile,
    ner_client: Option<&Arc<dyn NerClient>>,
    language: &str,
    text: String,
) -> Result<(String, RedactionSummary), ProxyError> {
    let mut summary = RedactionSummary::default();
    let mut current = text;

    if profile.stage1_enabled {
        let (masked, local) = mcpredact_patterns::redact_string(&current);
        current = masked;
        summary.merge(local);
    }

    if profile.stage2_enabled {
        if let Some(client) = ner_client {
            let (masked, local) = redact_with_ner(client.as_ref(), &current, language, &profile.allowed_ner_types).await?;
            current = masked;
            summary.merge(local);
        }
    }

    Ok((current, summary))
}

/// Stage-1 + stage-2 redaction over a tool response's text content blocks.
pub struct PiiToolMiddleware {
    profile: Profile,
    ner_client: Option<Arc<dyn NerClient>>,
    language: String,
}

impl PiiToolMiddleware {
    pub fn new(profile: Profile, ner_client: Option<Arc<dyn NerClient>>) -> Self {
        PiiToolMiddleware { profile, ner_client, language: "en".to_string() }
    }

    async fn redact_response(&self, response: ToolResponse) -> Result<(ToolResponse, RedactionSummary), ProxyError> {
        let mut summary = RedactionSummary::default();
        let mut body = match response {
            ToolResponse::Standard(body) => body,
            legacy @ ToolResponse::Legacy(_) => return Ok((legacy, summary)),
        };

        for block in body.content.iter_mut() {
            if !block.is_text() {
                continue;
            }
            let text = block.text.take().unwrap_or_default();
            let (masked, local) = redact_text(&self.profile, self.ner_client.as_ref(), &self.language, text).await?;
            summary.merge(local);
            block.text = Some(masked);
        }
        Ok((ToolResponse::Standard(body), summary))
    }
}

#[async_trait]
impl Middleware<ToolInvocation, ToolResponse, ProxyError> for PiiToolMiddleware {
    async fn handle(&self, req: ToolInvocation, next: Next<ToolInvocation, ToolResponse, ProxyError>) -> Result<ToolResponse, ProxyError> {
        let annotation = req.annotation_handle();
        let response = next.call(req).await?;

        // Legacy shape (no `content` field) and tool-level errors are
        // treated as non-PII by contract: pass through unchanged, but the
        // annotation slot still gets an explicit (empty) summary so the
        // audit layer reads a real zero rather than an absent slot.
        if matches!(response, ToolResponse::Legacy(_)) || response.is_error() {
            annotation.set(RedactionSummary::default()).map_err(|_| ProxyError::InternalMasking)?;
            return Ok(response);
        }

        let (redacted, summary) = self.redact_response(response).await?;
        annotation.set(summary).map_err(|_| ProxyError::InternalMasking)?;
        Ok(redacted)
    }
}

/// Stage-1 + stage-2 redaction over a resource response's text contents.
pub struct PiiResourceMiddleware {
    profile: Profile,
    ner_client: Option<Arc<dyn NerClient>>,
    language: String,
}

impl PiiResourceMiddleware {
    pub fn new(profile: Profile, ner_client: Option<Arc<dyn NerClient>>) -> Self {
        PiiResourceMiddleware { profile, ner_client, language: "en".to_string() }
    }
}

#[async_trait]
impl Middleware<ResourceRequest, ResourceResponse, ProxyError> for PiiResourceMiddleware {
    async fn handle(&self, req: ResourceRequest, next: Next<ResourceRequest, ResourceResponse, ProxyError>) -> Result<ResourceResponse, ProxyError> {
        let mut response = next.call(req).await?;
        for item in response.contents.iter_mut() {
            if !item.is_text() {
                continue;
            }
            let text = item.text.take().unwrap_or_default();
            let (masked, _local) = redact_text(&self.profile, self.ner_client.as_ref(), &self.language, text).await?;
            item.text = Some(masked);
        }
        Ok(response)
    }
}

fn serialize_arguments(arguments: &serde_json::Value) -> String {
    serde_json::to_string(arguments).unwrap_or_default()
}

fn response_size_bytes(response: &ToolResponse) -> u64 {
    serde_json::to_vec(response).map(|bytes| bytes.len() as u64).unwrap_or(0)
}

/// Emits one `AuditEntry` per tool call. Reads the redaction summary the
/// inner `PiiToolMiddleware` publishes through the invocation's annotation
/// slot — this middleware clones the handle before handing the invocation
/// to `next`, since the kernel moves it by value.
pub struct AuditMiddleware {
    sink: Arc<AuditSink>,
    compliance_profile: String,
}

impl AuditMiddleware {
    pub fn new(sink: Arc<AuditSink>, compliance_profile: impl Into<String>) -> Self {
        AuditMiddleware { sink, compliance_profile: compliance_profile.into() }
    }

    fn emit(&self, entry: AuditEntry) {
        if let Err(err) = self.sink.append(&entry) {
            log_append_failure(err);
        }
    }
}

fn log_append_failure(err: AuditLogError) {
    tracing::warn!(error = %err, "failed to append audit log entry");
}

#[async_trait]
impl Middleware<ToolInvocation, ToolResponse, ProxyError> for AuditMiddleware {
    async fn handle(&self, req: ToolInvocation, next: Next<ToolInvocation, ToolResponse, ProxyError>) -> Result<ToolResponse, ProxyError> {
        let upstream_tool = req.request.tool_name.clone();
        let input_parameters = truncate_input_parameters(&serialize_arguments(&req.request.arguments));
        let annotation = req.annotation_handle();
        let start = Instant::now();

        let result = next.call(req).await;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let summary = annotation.get().cloned().unwrap_or_default();
                let output_size_bytes = response_size_bytes(&response);
                let status = if response.is_error() { CallStatus::Error } else { CallStatus::Success };
                self.emit(AuditEntry::new(
                    upstream_tool,
                    self.compliance_profile.clone(),
                    input_parameters,
                    output_size_bytes,
                    summary.count,
                    summary.types,
                    execution_time_ms,
                    status,
                    None,
                    Utc::now(),
                ));
                Ok(response)
            }
            Err(err) => {
                self.emit(AuditEntry::new(
                    upstream_tool,
                    self.compliance_profile.clone(),
                    input_parameters,
                    0,
                    0,
                    Default::default(),
                    execution_time_ms,
                    CallStatus::Error,
                    Some(err.to_string()),
                    Utc::now(),
                ));
                Err(err)
            }
        }
    }
}
