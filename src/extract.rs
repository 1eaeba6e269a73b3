//! The extraction workflow: two agent invocations over one page set.
//!
//! The first invocation carries the three-pass text prompt (transcribe, build
//! a registry of precision-critical values, verify each one through the OCR
//! tool). The second is an independent conversation asking only for the
//! heading structure as JSON.
//!
//! The workflow is deliberately forgiving on the way out: a failed text pass
//! yields `text: None` with the error recorded, an unparseable structure
//! reply yields an empty header list, and tool results gathered before any
//! failure are always preserved. The only hard errors happen before the
//! first network call (empty page set, bad configuration).

use crate::agent::AgentLoop;
use crate::error::DocsightError;
use crate::output::{DocumentData, ExtractionStats, HeaderInfo};
use crate::prompts::{page_context, PROMPT_STRUCTURE, PROMPT_TEXT};
use crate::store::PageImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Instant;
use tracing::{info, warn};

/// Models habitually wrap JSON answers in markdown fences despite being told
/// not to; strip one fence pair when present.
static JSON_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?```").unwrap());

/// Run the full extraction over `pages` using a prepared agent.
///
/// The agent must already have the OCR tool registered; both passes reset its
/// conversation first, so a shared instance is fine.
///
/// # Errors
/// Only configuration-level problems detected before any network activity:
/// an empty page set. Pass-level failures are reported inside the returned
/// [`DocumentData`].
pub async fn describe_document(
    agent: &mut AgentLoop,
    pages: &[PageImage],
) -> Result<DocumentData, DocsightError> {
    if pages.is_empty() {
        return Err(DocsightError::NoPages);
    }

    let total_start = Instant::now();
    let page_numbers: Vec<u32> = pages.iter().map(|p| p.number).collect();
    info!(pages = pages.len(), "starting document extraction");

    // ── Pass 1: full text with OCR verification ──────────────────────────
    let text_start = Instant::now();
    agent.reset();
    let text_prompt = format!("{}{}", PROMPT_TEXT, page_context(&page_numbers));
    let text_reply = agent.invoke(&text_prompt, pages).await;
    let text_duration_ms = text_start.elapsed().as_millis() as u64;

    if let Some(ref error) = text_reply.error {
        warn!(%error, "text pass ended without an answer");
    }

    // ── Pass 2: heading structure, independent conversation ──────────────
    let structure_start = Instant::now();
    agent.reset();
    let structure_prompt = format!("{}{}", PROMPT_STRUCTURE, page_context(&page_numbers));
    let structure_reply = agent.invoke(&structure_prompt, pages).await;
    let structure_duration_ms = structure_start.elapsed().as_millis() as u64;

    let headers = structure_reply
        .text
        .as_deref()
        .map(parse_structure)
        .unwrap_or_default();
    info!(headers = headers.len(), "structure pass parsed");

    // ── Assemble best-effort result ──────────────────────────────────────
    let mut tool_records = text_reply.tool_records;
    tool_records.extend(structure_reply.tool_records);
    let ocr_calls = tool_records.len();

    let stats = ExtractionStats {
        total_pages: pages.len(),
        text_iterations: text_reply.iterations,
        structure_iterations: structure_reply.iterations,
        ocr_calls,
        text_duration_ms,
        structure_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    Ok(DocumentData {
        text: text_reply.text,
        headers,
        tool_records,
        text_error: text_reply.error,
        stats,
    })
}

/// Synchronous wrapper around [`describe_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn describe_document_sync(
    agent: &mut AgentLoop,
    pages: &[PageImage],
) -> Result<DocumentData, DocsightError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DocsightError::HttpClientFailed(format!("failed to create runtime: {e}")))?
        .block_on(describe_document(agent, pages))
}

/// Parse the structure reply into validated headers.
///
/// Tolerates a surrounding markdown fence. Entries missing any of `level`,
/// `title`, `page` (or carrying the wrong type) are dropped silently; a reply
/// that is not JSON at all yields an empty list rather than an error.
pub fn parse_structure(text: &str) -> Vec<HeaderInfo> {
    let cleaned = strip_json_fence(text);

    let parsed: Value = match serde_json::from_str(cleaned) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "structure reply is not valid JSON");
            return Vec::new();
        }
    };

    let Some(entries) = parsed.get("headers").and_then(|h| h.as_array()) else {
        warn!("structure reply has no 'headers' array");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let level = entry.get("level")?.as_u64()?;
            let title = entry.get("title")?.as_str()?;
            let page = entry.get("page")?.as_u64()?;
            Some(HeaderInfo {
                level: level as u32,
                title: title.to_string(),
                page: page as u32,
            })
        })
        .collect()
}

fn strip_json_fence(text: &str) -> &str {
    match JSON_FENCE_RE.captures(text) {
        Some(captures) => captures.get(1).map(|m| m.as_str()).unwrap_or(text),
        None => text.trim(),
    }
}
