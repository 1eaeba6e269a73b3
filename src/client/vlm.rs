//! Primary vision-language client: multimodal requests, tool declarations,
//! and text-vs-function-call reply parsing.
//!
//! The wire contract is the vendor's `generateContent` shape: a `contents`
//! array of role-tagged turns, each a list of parts, plus an optional `tools`
//! array of function declarations. The reply is `candidates[0].content.parts`,
//! where each part is either `text` or `functionCall`.
//!
//! A malformed reply is a [`ModelError::Parse`] — an incompatible upstream
//! schema, not a network problem — and is never retried. Transport-level
//! failures are retried inside [`crate::client::http`] before they ever
//! surface here.

use crate::client::http::{post_json, Throttle};
use crate::config::VlmConfig;
use crate::error::{DocsightError, ModelError};
use crate::message::{turns_to_wire, Turn};
use crate::tool::{declarations_to_wire, ToolCallRequest, ToolDeclaration};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Parsed reply from the primary model.
#[derive(Debug, Clone)]
pub struct VlmReply {
    /// Concatenation of the reply's text parts (joined with newlines), if any.
    pub text: Option<String>,
    /// Tool invocations the model requested, in reply order.
    pub calls: Vec<ToolCallRequest>,
    /// The raw response body, for logging and forensics.
    pub raw: Value,
}

/// Seam between the agent loop and the concrete primary client, so the loop
/// can be driven by a scripted model in tests.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Submit the full conversation (and tool declarations, when the caller
    /// wants function calling) and parse the reply.
    async fn invoke(
        &self,
        turns: &[Turn],
        tools: Option<&[ToolDeclaration]>,
    ) -> Result<VlmReply, ModelError>;
}

/// REST client for the primary vision-language model.
#[derive(Debug)]
pub struct GeminiClient {
    client: reqwest::Client,
    config: VlmConfig,
    throttle: Throttle,
    calls_made: AtomicU64,
}

impl GeminiClient {
    pub fn new(config: VlmConfig) -> Result<Self, DocsightError> {
        if config.api_key.is_empty() {
            return Err(DocsightError::MissingApiKey {
                provider: "gemini".into(),
                env_hint: "GEMINI_API_KEY".into(),
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

    /// Number of completed `invoke` calls on this instance.
    pub fn calls_made(&self) -> u64 {
        self.calls_made.load(Ordering::Relaxed)
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.config.api_base.trim_end_matches('/'),
            self.config.model,
            self.config.api_key
        )
    }

    fn build_payload(turns: &[Turn], tools: Option<&[ToolDeclaration]>) -> Value {
        let mut payload = json!({ "contents": turns_to_wire(turns) });
        if let Some(tools) = tools {
            if !tools.is_empty() {
                payload["tools"] = declarations_to_wire(tools);
            }
        }
        payload
    }
}

#[async_trait]
impl VisionModel for GeminiClient {
    async fn invoke(
        &self,
        turns: &[Turn],
        tools: Option<&[ToolDeclaration]>,
    ) -> Result<VlmReply, ModelError> {
        let payload = Self::build_payload(turns, tools);
        info!(
            model = %self.config.model,
            turns = turns.len(),
            with_tools = tools.is_some(),
            "primary model request"
        );

        let raw = post_json(
            &self.client,
            &self.url(),
            None,
            &payload,
            &self.config.retry,
            &self.throttle,
        )
        .await?;

        self.calls_made.fetch_add(1, Ordering::Relaxed);
        parse_reply(raw, tools.is_some())
    }
}

/// Parse the reply body into text and function calls.
///
/// With tools, a reply may contain only calls, only text, or both; deciding
/// what "neither" means is the agent loop's job, so an empty-but-well-formed
/// parts array parses successfully here. Without tools, exactly one text part
/// is expected.
fn parse_reply(raw: Value, with_tools: bool) -> Result<VlmReply, ModelError> {
    let parts = raw
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| ModelError::Parse("no candidates[0].content.parts in reply".into()))?;

    if with_tools {
        let mut calls = Vec::new();
        let mut text_parts: Vec<&str> = Vec::new();

        for part in parts {
            if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(|n| n.as_str())
                    .ok_or_else(|| ModelError::Parse("functionCall without a name".into()))?;
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                debug!(tool = name, "model requested a function call");
                calls.push(ToolCallRequest::new(name, args));
            } else if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                text_parts.push(text);
            }
        }

        let text = if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join("\n"))
        };

        Ok(VlmReply { text, calls, raw })
    } else {
        let text = parts
            .first()
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| ModelError::Parse("expected a text part in reply".into()))?
            .to_string();

        Ok(VlmReply {
            text: Some(text),
            calls: Vec::new(),
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> VlmConfig {
        let mut config = VlmConfig::new("test-key").with_api_base(server.uri());
        config.min_interval = Duration::from_millis(0);
        config
    }

    fn reply_with_parts(parts: Value) -> Value {
        json!({ "candidates": [{ "content": { "parts": parts } }] })
    }

    #[tokio::test]
    async fn invoke_without_tools_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(reply_with_parts(json!([{ "text": "The document says hello." }]))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(test_config(&server)).unwrap();
        let turn = Turn::user().with_text("transcribe").with_png(b"png bytes");
        let reply = client.invoke(&[turn], None).await.unwrap();

        assert_eq!(reply.text.as_deref(), Some("The document says hello."));
        assert!(reply.calls.is_empty());
        assert_eq!(client.calls_made(), 1);

        // The request must carry the prompt and the inline image in one turn.
        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "transcribe");
        assert!(body["contents"][0]["parts"][1]["inline_data"]["data"].is_string());
        assert!(body.get("tools").is_none());
    }

    #[tokio::test]
    async fn invoke_with_tools_parses_calls_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_with_parts(json!([
                { "text": "checking two fields" },
                { "functionCall": { "name": "ask_ocr", "args": { "page_num": 1, "prompt": "find the id" } } },
                { "functionCall": { "name": "ask_ocr", "args": { "page_num": 2, "prompt": "find the url" } } },
            ]))))
            .mount(&server)
            .await;

        let client = GeminiClient::new(test_config(&server)).unwrap();
        let tools = [ToolDeclaration::new("ask_ocr", "ocr", json!({"type": "object"}))];
        let reply = client
            .invoke(&[Turn::user().with_text("go")], Some(&tools))
            .await
            .unwrap();

        assert_eq!(reply.text.as_deref(), Some("checking two fields"));
        assert_eq!(reply.calls.len(), 2);
        assert_eq!(reply.calls[0].name, "ask_ocr");
        assert_eq!(reply.calls[0].args["page_num"], 1);
        assert_eq!(reply.calls[1].args["page_num"], 2);

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(
            body["tools"][0]["function_declarations"][0]["name"],
            "ask_ocr"
        );
    }

    #[tokio::test]
    async fn missing_candidates_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let client = GeminiClient::new(test_config(&server)).unwrap();
        let err = client
            .invoke(&[Turn::user().with_text("hi")], None)
            .await
            .expect_err("empty candidates must not parse");

        assert!(matches!(err, ModelError::Parse(_)), "got: {err}");
    }

    #[test]
    fn text_parts_join_with_newlines() {
        let raw = json!({ "candidates": [{ "content": { "parts": [
            { "text": "first" },
            { "text": "second" },
        ] } }] });
        let reply = parse_reply(raw, true).unwrap();
        assert_eq!(reply.text.as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn calls_only_reply_has_no_text() {
        let raw = json!({ "candidates": [{ "content": { "parts": [
            { "functionCall": { "name": "ask_ocr", "args": {} } },
        ] } }] });
        let reply = parse_reply(raw, true).unwrap();
        assert!(reply.text.is_none());
        assert_eq!(reply.calls.len(), 1);
        assert_eq!(reply.calls[0].args, json!({}));
    }

    #[test]
    fn empty_api_key_is_rejected_before_any_network() {
        let err = GeminiClient::new(VlmConfig::new("")).expect_err("empty key");
        assert!(matches!(err, DocsightError::MissingApiKey { .. }));
    }
}
