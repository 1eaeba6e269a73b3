//! Secondary OCR client: one image, one question, a strict reply grammar.
//!
//! The OCR model is asked through an OpenAI-compatible chat endpoint with a
//! system instruction that pins the reply to three labelled fields:
//!
//! ```text
//! VALUE: <the extracted value, or NONE>
//! CONTEXT: <text fragment around the value>
//! EXPLANATION: <where it looked, what it found>
//! ```
//!
//! The labels are a fixed contract between the instruction and the parser
//! here, honoured verbatim. Values are returned exactly as read from the
//! document — any digit normalisation is the caller's concern, not this
//! client's.

use crate::client::http::{post_json, Throttle};
use crate::config::OcrConfig;
use crate::error::{DocsightError, ModelError};
use crate::prompts::{OCR_SYSTEM_PROMPT, OCR_NO_ANSWER};
use crate::tool::ToolCallResult;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Replies can weave CONTEXT and EXPLANATION over several lines; each field
/// runs until the next label or the end of the text. Each pattern is matched
/// against the full reply independently, so consuming the terminating label
/// is harmless.
static VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)VALUE:\s*(.*?)(?:\nCONTEXT:|\nEXPLANATION:|\z)").unwrap());
static CONTEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)CONTEXT:\s*(.*?)(?:\nEXPLANATION:|\z)").unwrap());
static EXPLANATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)EXPLANATION:\s*(.*)").unwrap());

/// Minimum digit run for the label-free fallback: shorter runs are too likely
/// to be noise rather than an identifier.
const FALLBACK_MIN_DIGITS: usize = 10;

/// Seam between the tool adapter and the concrete OCR client.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Ask one question about one page image. Never batches.
    async fn extract(
        &self,
        png: &[u8],
        prompt: &str,
        page_num: u32,
    ) -> Result<ToolCallResult, ModelError>;
}

/// REST client for the secondary OCR model.
#[derive(Debug)]
pub struct QwenOcrClient {
    client: reqwest::Client,
    config: OcrConfig,
    throttle: Throttle,
    calls_made: AtomicU64,
}

impl QwenOcrClient {
    pub fn new(config: OcrConfig) -> Result<Self, DocsightError> {
        if config.api_key.is_empty() {
            return Err(DocsightError::MissingApiKey {
                provider: "qwen".into(),
                env_hint: "DASHSCOPE_API_KEY".into(),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DocsightError::HttpClientFailed(e.to_string()))?;

        let throttle = Throttle::new(config.min_interval);
        Ok(Self {
            client,
            config,
            throttle,
            calls_made: AtomicU64::new(0),
        })
    }

    /// Number of completed `extract` calls on this instance.
    pub fn calls_made(&self) -> u64 {
        self.calls_made.load(Ordering::Relaxed)
    }

    fn url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }

    fn build_payload(&self, png: &[u8], prompt: &str, page_num: u32) -> Value {
        let image_url = format!("data:image/png;base64,{}", STANDARD.encode(png));
        json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "system",
                    "content": [{ "type": "text", "text": OCR_SYSTEM_PROMPT }]
                },
                {
                    "role": "user",
                    "content": [
                        { "type": "image_url", "image_url": { "url": image_url } },
                        {
                            "type": "text",
                            "text": format!(
                                "Page {page_num}. Task: {prompt}\n\nAnswer in the VALUE/CONTEXT/EXPLANATION format."
                            )
                        }
                    ]
                }
            ],
            "temperature": 0.0,
            "top_p": 0.9,
        })
    }
}

#[async_trait]
impl OcrEngine for QwenOcrClient {
    async fn extract(
        &self,
        png: &[u8],
        prompt: &str,
        page_num: u32,
    ) -> Result<ToolCallResult, ModelError> {
        let payload = self.build_payload(png, prompt, page_num);

        let raw = post_json(
            &self.client,
            &self.url(),
            Some(&self.config.api_key),
            &payload,
            &self.config.retry,
            &self.throttle,
        )
        .await?;

        self.calls_made.fetch_add(1, Ordering::Relaxed);

        let text = reply_text(&raw)?;
        let result = parse_ocr_reply(&text);
        info!(
            page = page_num,
            prompt,
            status = ?result.status,
            value = %result.value,
            "OCR reply parsed"
        );
        Ok(result)
    }
}

/// Pull the assistant text out of a chat-completions reply.
///
/// `content` is a plain string on most deployments but some return a list of
/// typed blocks; both are accepted. No choices or empty text is a schema
/// mismatch and never retried.
fn reply_text(raw: &Value) -> Result<String, ModelError> {
    let content = raw
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .ok_or_else(|| ModelError::Parse("no choices[0].message.content in reply".into()))?;

    let text = match content {
        Value::String(s) => s.trim().to_string(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                Value::String(s) => Some(s.as_str()),
                Value::Object(_) if block.get("type").and_then(|t| t.as_str()) == Some("text") => {
                    block.get("text").and_then(|t| t.as_str())
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        _ => return Err(ModelError::Parse("content is neither string nor list".into())),
    };

    if text.is_empty() {
        return Err(ModelError::Parse("empty content in OCR reply".into()));
    }
    Ok(text)
}

/// Parse the three-label grammar into a structured result.
///
/// Sentinel, `-`, or empty VALUE means the model looked and found nothing.
/// When no label appears anywhere but the reply is substantially a digit run
/// (at least [`FALLBACK_MIN_DIGITS`]), the digits are accepted as the value —
/// some model snapshots answer bare identifiers despite the instruction.
pub fn parse_ocr_reply(text: &str) -> ToolCallResult {
    let value_match = VALUE_RE.captures(text).map(|c| c[1].trim().to_string());
    let context = CONTEXT_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default();
    let explanation = EXPLANATION_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default();

    if value_match.is_none() && context.is_empty() && explanation.is_empty() {
        let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= FALLBACK_MIN_DIGITS {
            return ToolCallResult::ok(
                digits,
                text.trim(),
                "fallback: reply carried no labels, extracted the digit run",
            );
        }
    }

    let value_raw = value_match.unwrap_or_default();
    if value_raw.is_empty() || value_raw == "-" || value_raw.eq_ignore_ascii_case(OCR_NO_ANSWER) {
        let mut result = ToolCallResult::no_data(explanation);
        result.context = context;
        return result;
    }

    ToolCallResult::ok(value_raw, context, explanation)
}
