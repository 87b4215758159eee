//! mcpredact_protocol
//!
//! The request/response envelopes the core middleware operates on. These
//! are deliberately thin: framing, transport, and JSON-RPC are someone
//! else's problem (see `mcpredact_backend`); this crate only models the
//! already-parsed shapes the spec calls `ToolRequest`/`ToolResponse`/etc.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

/// A single content block inside a tool response.
///
/// Only `type == "text"` is redaction-eligible; everything else (`image`,
/// `audio`, `embedded_resource`, or any future kind) is carried through
/// untouched via `extra` so the proxy never drops fields it doesn't
/// understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock {
            kind: "text".into(),
            text: Some(text.into()),
            extra: serde_json::Map::new(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == "text" && self.text.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolResponseBody {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

/// A tool response, or the legacy shape (anything lacking a `content`
/// array) that must be detected and passed through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Standard(ToolResponseBody),
    Legacy(serde_json::Value),
}

impl ToolResponse {
    pub fn is_error(&self) -> bool {
        match self {
            ToolResponse::Standard(body) => body.is_error,
            ToolResponse::Legacy(_) => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceItem {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResourceItem {
    pub fn is_text(&self) -> bool {
        self.text.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub contents: Vec<ResourceItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// What the PII middleware found and masked while walking one response.
///
/// Monotone for the lifetime of a request: `merge` only ever grows `count`
/// and accretes `types`, never shrinks either.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedactionSummary {
    pub count: u64,
    pub types: BTreeSet<String>,
}

impl RedactionSummary {
    pub fn record(&mut self, category: impl Into<String>) {
        self.count += 1;
        self.types.insert(category.into());
    }

    pub fn merge(&mut self, other: RedactionSummary) {
        self.count += other.count;
        self.types.extend(other.types);
    }
}

/// A tool request plus the write-once side channel the PII middleware uses
/// to publish a `RedactionSummary` to the audit middleware.
///
/// The composition kernel moves `ToolInvocation` by value down the onion, so
/// the annotation is stored behind `Arc<OnceLock<_>>`: the audit layer
/// clones the `Arc` before handing the invocation to `next`, and reads
/// through its own clone once `next` returns.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub request: ToolRequest,
    annotation: Arc<OnceLock<RedactionSummary>>,
}

impl ToolInvocation {
    pub fn new(request: ToolRequest) -> Self {
        ToolInvocation {
            request,
            annotation: Arc::new(OnceLock::new()),
        }
    }

    /// Clone the shared handle into the annotation slot. Cheap: an `Arc`
    /// bump, not a deep copy.
    pub fn annotation_handle(&self) -> Arc<OnceLock<RedactionSummary>> {
        Arc::clone(&self.annotation)
    }

    /// Publish the redaction summary. Returns `Err` if the slot was already
    /// populated (a logic error: the PII middleware should run at most once
    /// per invocation).
    pub fn set_annotation(&self, summary: RedactionSummary) -> Result<(), RedactionSummary> {
        self.annotation.set(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_response_without_content_round_trips() {
        let raw = serde_json::json!({"result": "ok", "foo": 1});
        let parsed: ToolResponse = serde_json::from_value(raw.clone()).unwrap();
        assert!(matches!(parsed, ToolResponse::Legacy(_)));
        assert_eq!(serde_json::to_value(&parsed).unwrap(), raw);
    }

    #[test]
    fn standard_response_with_content_parses_as_standard() {
        let raw = serde_json::json!({
            "content": [{"type": "text", "text": "hi"}],
            "is_error": false
        });
        let parsed: ToolResponse = serde_json::from_value(raw).unwrap();
        match parsed {
            ToolResponse::Standard(body) => {
                assert_eq!(body.content.len(), 1);
                assert!(body.content[0].is_text());
            }
            ToolResponse::Legacy(_) => panic!("expected standard shape"),
        }
    }

    #[test]
    fn opaque_content_blocks_round_trip_their_extra_fields() {
        let raw = serde_json::json!({"type": "image", "data": "base64stuff", "mimeType": "image/png"});
        let block: ContentBlock = serde_json::from_value(raw.clone()).unwrap();
        assert!(!block.is_text());
        assert_eq!(serde_json::to_value(&block).unwrap(), raw);
    }

    #[test]
    fn annotation_is_write_once() {
        let inv = ToolInvocation::new(ToolRequest {
            tool_name: "search".into(),
            arguments: serde_json::json!({}),
        });
        let handle = inv.annotation_handle();
        assert!(handle.get().is_none());

        let mut summary = RedactionSummary::default();
        summary.record("email");
        assert!(inv.set_annotation(summary.clone()).is_ok());
        assert_eq!(handle.get(), Some(&summary));
        assert!(inv.set_annotation(RedactionSummary::default()).is_err());
    }

    #[test]
    fn redaction_summary_merge_is_monotone() {
        let mut a = RedactionSummary::default();
        a.record("email");
        let mut b = RedactionSummary::default();
        b.record("ssn");
        b.record("email");
        a.merge(b);
        assert_eq!(a.count, 3);
        assert_eq!(a.types.len(), 2);
    }
}
