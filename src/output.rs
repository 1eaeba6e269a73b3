//! Output types for document extraction.
//!
//! Everything here is serde-first: results are written to disk as JSON by the
//! CLI and consumed programmatically by library users, so the field names are
//! part of the public contract.

use crate::agent::ToolCallRecord;
use crate::error::AgentError;
use serde::{Deserialize, Serialize};

/// One heading in the document's hierarchical structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInfo {
    /// 1 for top-level sections, 2 for subsections, and so on.
    pub level: u32,
    pub title: String,
    /// 1-based page the heading appears on.
    pub page: u32,
}

/// Aggregate counters for one extraction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages submitted to the model.
    pub total_pages: usize,
    /// Model-loop iterations consumed by the text pass.
    pub text_iterations: u32,
    /// Model-loop iterations consumed by the structure pass.
    pub structure_iterations: u32,
    /// OCR tool calls executed across both passes.
    pub ocr_calls: usize,
    /// Wall-clock of the text pass.
    pub text_duration_ms: u64,
    /// Wall-clock of the structure pass.
    pub structure_duration_ms: u64,
    /// Wall-clock of the whole run.
    pub total_duration_ms: u64,
}

/// Best-effort result of a full document extraction.
///
/// The workflow never fails because a pass failed: `text` may be `None` (see
/// `text_error`), the structure defaults to no headers, and every OCR result
/// gathered along the way is preserved either way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentData {
    /// Full document text with OCR-verified values substituted in, when the
    /// text pass converged.
    pub text: Option<String>,
    /// Hierarchical heading structure; empty when the structure pass failed
    /// or the reply was unparseable.
    pub headers: Vec<HeaderInfo>,
    /// Every tool call executed across both passes, in dispatch order.
    pub tool_records: Vec<ToolCallRecord>,
    /// Why the text pass ended without an answer, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_error: Option<AgentError>,
    pub stats: ExtractionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_data_serialises_to_json() {
        let data = DocumentData {
            text: Some("hello".into()),
            headers: vec![HeaderInfo {
                level: 1,
                title: "Intro".into(),
                page: 1,
            }],
            tool_records: Vec::new(),
            text_error: None,
            stats: ExtractionStats {
                total_pages: 1,
                ..Default::default()
            },
        };

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["headers"][0]["level"], 1);
        assert_eq!(json["stats"]["total_pages"], 1);
        assert!(json.get("text_error").is_none(), "None error is omitted");

        let back: DocumentData = serde_json::from_value(json).unwrap();
        assert_eq!(back.text.as_deref(), Some("hello"));
    }
}
