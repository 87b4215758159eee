//! mcpredact_ner
//!
//! Stage 2: contextual PII detection via Amazon Comprehend, for the PII that
//! stage-1 regexes can't reliably catch (names, addresses, free-text
//! financial references). Text is chunked to Comprehend's per-call byte
//! limit before being sent, and entities come back as byte offsets into the
//! chunk, which this crate re-anchors into the caller's original string.

use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

use mcpredact_protocol::RedactionSummary;

/// Comprehend's hard per-call limit is 5,000 UTF-8 bytes; a safety margin is
/// kept since some text gets re-encoded along the way.
pub const MAX_CHUNK_BYTES: usize = 4500;

#[derive(Debug, Error)]
pub enum NerError {
    #[error("ner backend call failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiEntity {
    pub begin_offset: usize,
    pub end_offset: usize,
    pub entity_type: String,
    pub score_percent: u32,
}

/// The two opaque operations Comprehend's `ContainsPiiEntities` /
/// `DetectPiiEntities` provide. `contains_pii` is the cheap pre-check;
/// `detect_pii` is only called for chunks the pre-check flags.
#[async_trait]
pub trait NerClient: Send + Sync {
    async fn contains_pii(&self, text: &str, language: &str) -> Result<bool, NerError>;
    async fn detect_pii(&self, text: &str, language: &str) -> Result<Vec<PiiEntity>, NerError>;
}

/// Split `text` into `(byte_offset, chunk)` pairs, each at most
/// `MAX_CHUNK_BYTES` bytes, preferring to split at a trailing newline within
/// the window and falling back to the nearest valid UTF-8 char boundary at
/// or before the limit.
pub fn split_into_chunks(text: &str) -> Vec<(usize, &str)> {
    let bytes = text.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < bytes.len() {
        let remaining = bytes.len() - start;
        if remaining <= MAX_CHUNK_BYTES {
            chunks.push((start, &text[start..]));
            break;
        }

        let window_end = start + MAX_CHUNK_BYTES;
        let split_at = match text[start..window_end].rfind('\n') {
            Some(rel) => start + rel + 1,
            None => floor_char_boundary(text, window_end),
        };

        // Pathological case: no boundary found in the whole window (e.g. one
        // giant multi-byte-heavy token); force progress at the floor boundary.
        let split_at = if split_at <= start {
            floor_char_boundary(text, window_end).max(start + 1)
        } else {
            split_at
        };

        chunks.push((start, &text[start..split_at]));
        start = split_at;
    }

    chunks
}

/// Binary-search down from `idx` for the nearest valid `char` boundary.
fn floor_char_boundary(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Run `client` over `text`, masking entities whose type is in
/// `allowed_types` (an empty set means "all types allowed").
///
/// `contains_pii` is called exactly once, as a cheap yes/no gate over at
/// most the first `MAX_CHUNK_BYTES` of the whole text — not per chunk. Once
/// that gate passes, every chunk gets an unconditional `detect_pii` call;
/// a chunk that looks clean on its own is not skipped, since the probe
/// already decided the request as a whole is worth the expensive call.
/// Each chunk's entities are replaced in descending `begin_offset` order
/// (offsets are local to that chunk) and the redacted chunks are rejoined
/// with `\n`.
pub async fn redact_with_ner(
    client: &dyn NerClient,
    text: &str,
    language: &str,
    allowed_types: &BTreeSet<String>,
) -> Result<(String, RedactionSummary), NerError> {
    let probe_len = floor_char_boundary(text, text.len().min(MAX_CHUNK_BYTES));
    if !client.contains_pii(&text[..probe_len], language).await? {
        return Ok((text.to_string(), RedactionSummary::default()));
    }

    let mut summary = RedactionSummary::default();
    let mut redacted_chunks: Vec<String> = Vec::new();

    for (_, chunk) in split_into_chunks(text) {
        let mut entities = client.detect_pii(chunk, language).await?;
        entities.retain(|e| allowed_types.is_empty() || allowed_types.contains(&e.entity_type));
        entities.sort_by(|a, b| b.begin_offset.cmp(&a.begin_offset));

        let mut out = chunk.to_string();
        for e in entities {
            if e.begin_offset > e.end_offset || e.end_offset > out.len() {
                continue;
            }
            if !out.is_char_boundary(e.begin_offset) || !out.is_char_boundary(e.end_offset) {
                continue;
            }
            out.replace_range(e.begin_offset..e.end_offset, &format!("[REDACTED:{}]", e.entity_type));
            summary.record(e.entity_type.to_lowercase());
        }
        redacted_chunks.push(out);
    }

    Ok((redacted_chunks.join("\n"), summary))
}

/// `NerClient` backed by Amazon Comprehend's PII detection API.
pub struct ComprehendNerClient {
    client: aws_sdk_comprehend::Client,
}

impl ComprehendNerClient {
    pub fn new(client: aws_sdk_comprehend::Client) -> Self {
        ComprehendNerClient { client }
    }

    pub async fn from_env(region: impl Into<String>) -> Self {
        let region_provider = aws_config::Region::new(region.into());
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        ComprehendNerClient {
            client: aws_sdk_comprehend::Client::new(&config),
        }
    }
}

#[async_trait]
impl NerClient for ComprehendNerClient {
    async fn contains_pii(&self, text: &str, language: &str) -> Result<bool, NerError> {
        let lang = language
            .parse::<aws_sdk_comprehend::types::LanguageCode>()
            .map_err(|e| NerError::Backend(e.to_string()))?;
        let resp = self
            .client
            .contains_pii_entities()
            .text(text)
            .language_code(lang)
            .send()
            .await
            .map_err(|e| NerError::Backend(e.to_string()))?;
        Ok(resp.labels().iter().any(|l| l.score().unwrap_or(0.0) > 0.5))
    }

    async fn detect_pii(&self, text: &str, language: &str) -> Result<Vec<PiiEntity>, NerError> {
        let lang = language
            .parse::<aws_sdk_comprehend::types::LanguageCode>()
            .map_err(|e| NerError::Backend(e.to_string()))?;
        let resp = self
            .client
            .detect_pii_entities()
            .text(text)
            .language_code(lang)
            .send()
            .await
            .map_err(|e| NerError::Backend(e.to_string()))?;

        Ok(resp
            .entities()
            .iter()
            .filter_map(|e| {
                Some(PiiEntity {
                    begin_offset: usize::try_from(e.begin_offset()?).ok()?,
                    end_offset: usize::try_from(e.end_offset()?).ok()?,
                    entity_type: e.r#type().map(|t| t.as_str().to_string()).unwrap_or_default(),
                    score_percent: (e.score().unwrap_or(0.0) * 100.0) as u32,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn split_into_chunks_respects_byte_cap() {
        let text = "a".repeat(10_000);
        let chunks = split_into_chunks(&text);
        assert!(chunks.len() > 1);
        for (_, chunk) in &chunks {
            assert!(chunk.len() <= MAX_CHUNK_BYTES);
        }
        let rebuilt: String = chunks.iter().map(|(_, c)| *c).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn split_into_chunks_prefers_newline_boundary() {
        let mut text = String::new();
        for _ in 0..100 {
            text.push_str(&"x".repeat(80));
            text.push('\n');
        }
        let chunks = split_into_chunks(&text);
        for (_, chunk) in &chunks[..chunks.len() - 1] {
            assert!(chunk.ends_with('\n'));
        }
    }

    #[test]
    fn split_into_chunks_handles_multibyte_text_without_panicking() {
        let text = "héllo wörld ".repeat(2000);
        let chunks = split_into_chunks(&text);
        let rebuilt: String = chunks.iter().map(|(_, c)| *c).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn chunk_offsets_are_correct() {
        let text = "a".repeat(9000);
        let chunks = split_into_chunks(&text);
        let mut expected = 0;
        for (offset, chunk) in &chunks {
            assert_eq!(*offset, expected);
            expected += chunk.len();
        }
        assert_eq!(expected, text.len());
    }

    struct FakeClient {
        entities: Vec<PiiEntity>,
    }

    #[async_trait]
    impl NerClient for FakeClient {
        async fn contains_pii(&self, _text: &str, _language: &str) -> Result<bool, NerError> {
            Ok(!self.entities.is_empty())
        }

        async fn detect_pii(&self, _text: &str, _language: &str) -> Result<Vec<PiiEntity>, NerError> {
            Ok(self.entities.clone())
        }
    }

    #[tokio::test]
    async fn redact_with_ner_applies_spans_in_descending_order() {
        let text = "Alice works with Bob in Springfield";
        let client = FakeClient {
            entities: vec![
                PiiEntity { begin_offset: 0, end_offset: 5, entity_type: "NAME".into(), score_percent: 99 },
                PiiEntity { begin_offset: 17, end_offset: 20, entity_type: "NAME".into(), score_percent: 95 },
                PiiEntity { begin_offset: 24, end_offset: 36, entity_type: "LOCATION".into(), score_percent: 90 },
            ],
        };
        let allowed: BTreeSet<String> = BTreeSet::new();
        let (out, summary) = redact_with_ner(&client, text, "en", &allowed).await.unwrap();
        assert_eq!(out, "[REDACTED:NAME] works with [REDACTED:NAME] in [REDACTED:LOCATION]");
        assert_eq!(summary.count, 3);
        assert!(summary.types.contains("name"));
        assert!(summary.types.contains("location"));
    }

    #[tokio::test]
    async fn redact_with_ner_filters_by_allowed_types() {
        let text = "Alice lives in Springfield";
        let client = FakeClient {
            entities: vec![
                PiiEntity { begin_offset: 0, end_offset: 5, entity_type: "NAME".into(), score_percent: 99 },
                PiiEntity { begin_offset: 15, end_offset: 27, entity_type: "LOCATION".into(), score_percent: 90 },
            ],
        };
        let mut allowed = BTreeSet::new();
        allowed.insert("NAME".to_string());
        let (out, summary) = redact_with_ner(&client, text, "en", &allowed).await.unwrap();
        assert_eq!(out, "[REDACTED:NAME] lives in Springfield");
        assert_eq!(summary.count, 1);
    }

    #[tokio::test]
    async fn redact_with_ner_short_circuits_when_the_global_probe_finds_nothing() {
        struct CountingClient {
            contains_calls: Mutex<u32>,
            detect_calls: Mutex<u32>,
        }

        #[async_trait]
        impl NerClient for CountingClient {
            async fn contains_pii(&self, _text: &str, _language: &str) -> Result<bool, NerError> {
                *self.contains_calls.lock().unwrap() += 1;
                Ok(false)
            }
            async fn detect_pii(&self, _text: &str, _language: &str) -> Result<Vec<PiiEntity>, NerError> {
                *self.detect_calls.lock().unwrap() += 1;
                Ok(vec![])
            }
        }

        let client = CountingClient { contains_calls: Mutex::new(0), detect_calls: Mutex::new(0) };
        let allowed = BTreeSet::new();
        let (out, summary) = redact_with_ner(&client, "nothing interesting here", "en", &allowed).await.unwrap();
        assert_eq!(out, "nothing interesting here");
        assert_eq!(summary.count, 0);
        assert_eq!(*client.contains_calls.lock().unwrap(), 1);
        assert_eq!(*client.detect_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn redact_with_ner_probes_once_then_calls_detect_unconditionally_per_chunk() {
        // ~4,600 bytes across 46 lines: enough to force at least two chunks.
        let mut text = String::new();
        for _ in 0..46 {
            text.push_str(&"x".repeat(100));
            text.push('\n');
        }
        let text = text.trim_end_matches('\n').to_string();

        struct CountingClient {
            contains_calls: Mutex<u32>,
            detect_calls: Mutex<u32>,
        }

        #[async_trait]
        impl NerClient for CountingClient {
            async fn contains_pii(&self, _text: &str, _language: &str) -> Result<bool, NerError> {
                *self.contains_calls.lock().unwrap() += 1;
                Ok(true)
            }
            // Each chunk looks "clean" on its own probe, but detect_pii must
            // still run unconditionally once the global gate has passed.
            async fn detect_pii(&self, _text: &str, _language: &str) -> Result<Vec<PiiEntity>, NerError> {
                *self.detect_calls.lock().unwrap() += 1;
                Ok(vec![])
            }
        }

        let client = CountingClient { contains_calls: Mutex::new(0), detect_calls: Mutex::new(0) };
        let allowed = BTreeSet::new();
        let chunk_count = split_into_chunks(&text).len();
        assert!(chunk_count >= 2);

        redact_with_ner(&client, &text, "en", &allowed).await.unwrap();

        assert_eq!(*client.contains_calls.lock().unwrap(), 1);
        assert_eq!(*client.detect_calls.lock().unwrap() as usize, chunk_count);
    }
}
