//! Tool declarations, call results, and the OCR tool adapter.
//!
//! The primary model requests capabilities by name; everything it may invoke
//! is registered up front as a [`ToolHandler`] with a schema-bearing
//! [`ToolDeclaration`]. Arguments arrive as a JSON object and are decoded
//! explicitly into a typed bundle before dispatch — there is no dynamic
//! parameter binding, so a malformed call degrades into a per-call error
//! result instead of a crash deep inside a handler.

use crate::client::ocr::OcrEngine;
use crate::error::ToolExecutionError;
use crate::store::PageStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// A capability the primary model may invoke: name, description, and a
/// JSON-schema parameter object. Immutable once registered; names must be
/// unique across the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDeclaration {
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        ToolDeclaration {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Convert declarations to the primary API's `tools` array:
/// one object holding every function declaration.
pub fn declarations_to_wire(declarations: &[ToolDeclaration]) -> Value {
    let functions: Vec<Value> = declarations
        .iter()
        .map(|d| {
            json!({
                "name": d.name,
                "description": d.description,
                "parameters": d.parameters,
            })
        })
        .collect();
    json!([{ "function_declarations": functions }])
}

/// A tool invocation requested by the model inside a model turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    pub args: Value,
}

impl ToolCallRequest {
    pub fn new<S: Into<String>>(name: S, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Outcome class of one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// A value was extracted.
    Ok,
    /// The question was understood but the value is absent from the page.
    NoData,
    /// The call failed (bad page, handler failure, unknown tool).
    Error,
}

/// The structured outcome of one tool call, fed back to the model verbatim
/// as a function response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResult {
    pub status: ToolStatus,
    /// Extracted value, exactly as read from the document. Empty unless `Ok`.
    pub value: String,
    /// Text fragment surrounding the value on the page.
    pub context: String,
    /// Where the model looked and what it found (or why it failed).
    pub explanation: String,
    /// Page the call targeted, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_num: Option<u32>,
}

impl ToolCallResult {
    pub fn ok(value: impl Into<String>, context: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Ok,
            value: value.into(),
            context: context.into(),
            explanation: explanation.into(),
            page_num: None,
        }
    }

    pub fn no_data(explanation: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::NoData,
            value: String::new(),
            context: String::new(),
            explanation: explanation.into(),
            page_num: None,
        }
    }

    pub fn error(explanation: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            value: String::new(),
            context: String::new(),
            explanation: explanation.into(),
            page_num: None,
        }
    }

    pub fn on_page(mut self, page_num: u32) -> Self {
        self.page_num = Some(page_num);
        self
    }

    /// JSON form used in the function-response part.
    pub fn to_wire(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"status": "error"}))
    }
}

/// A named capability the agent loop can dispatch to.
///
/// Handlers receive the raw argument object from the model and are expected
/// to decode it themselves; returning `Err` reports an execution failure the
/// loop downgrades to an `error`-status result.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn declaration(&self) -> ToolDeclaration;

    async fn call(&self, args: Value) -> Result<ToolCallResult, ToolExecutionError>;
}

/// Arguments of the `ask_ocr` tool, decoded from the model's call.
#[derive(Debug, Deserialize)]
pub struct OcrToolArgs {
    pub page_num: u32,
    pub prompt: String,
}

/// Exposes the OCR client as the `ask_ocr` tool.
///
/// Resolves the requested page against the page store and delegates to the
/// OCR engine — no business logic beyond page resolution lives here.
pub struct OcrTool {
    engine: Arc<dyn OcrEngine>,
    store: Arc<dyn PageStore>,
}

impl OcrTool {
    pub fn new(engine: Arc<dyn OcrEngine>, store: Arc<dyn PageStore>) -> Self {
        Self { engine, store }
    }
}

#[async_trait]
impl ToolHandler for OcrTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration::new(
            "ask_ocr",
            "Extract one precision-critical value from a page image via OCR",
            json!({
                "type": "object",
                "properties": {
                    "page_num": {
                        "type": "integer",
                        "description": "1-based page number to read"
                    },
                    "prompt": {
                        "type": "string",
                        "description": "What to extract, e.g. 'find the registration number, anchor: header'"
                    }
                },
                "required": ["page_num", "prompt"]
            }),
        )
    }

    async fn call(&self, args: Value) -> Result<ToolCallResult, ToolExecutionError> {
        let args: OcrToolArgs = serde_json::from_value(args)
            .map_err(|e| ToolExecutionError(format!("invalid ask_ocr arguments: {e}")))?;

        // A page miss is a caller bug, not a transient failure: report it
        // without spending an OCR call.
        let Some(page) = self.store.load(args.page_num) else {
            warn!(page = args.page_num, "ask_ocr requested a page that is not in the store");
            return Ok(ToolCallResult::error(format!(
                "page {} is not available",
                args.page_num
            ))
            .on_page(args.page_num));
        };

        info!(page = args.page_num, prompt = %args.prompt, "ask_ocr dispatch");
        let result = self
            .engine
            .extract(&page.png, &args.prompt, args.page_num)
            .await
            .map_err(|e| ToolExecutionError(e.to_string()))?;

        Ok(result.on_page(args.page_num))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::store::{MemoryPageStore, PageImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubEngine {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OcrEngine for StubEngine {
        async fn extract(
            &self,
            _png: &[u8],
            prompt: &str,
            _page_num: u32,
        ) -> Result<ToolCallResult, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolCallResult::ok("42", format!("near '{prompt}'"), "stub"))
        }
    }

    fn tool_with_pages(pages: Vec<PageImage>) -> (OcrTool, Arc<StubEngine>) {
        let engine = Arc::new(StubEngine {
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryPageStore::from_pages(&pages));
        (OcrTool::new(engine.clone(), store), engine)
    }

    #[test]
    fn declaration_shape() {
        let (tool, _) = tool_with_pages(vec![]);
        let decl = tool.declaration();
        assert_eq!(decl.name, "ask_ocr");
        assert_eq!(decl.parameters["required"], json!(["page_num", "prompt"]));

        let wire = declarations_to_wire(&[decl]);
        assert_eq!(wire[0]["function_declarations"][0]["name"], "ask_ocr");
    }

    #[tokio::test]
    async fn missing_page_errors_without_calling_ocr() {
        let (tool, engine) = tool_with_pages(vec![PageImage::new(1, vec![0])]);

        let result = tool
            .call(json!({"page_num": 9, "prompt": "find the id"}))
            .await
            .expect("page miss is a result, not an execution error");

        assert_eq!(result.status, ToolStatus::Error);
        assert_eq!(result.page_num, Some(9));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0, "OCR must not be called");
    }

    #[tokio::test]
    async fn present_page_passes_through_engine_result() {
        let (tool, engine) = tool_with_pages(vec![PageImage::new(2, b"png".to_vec())]);

        let result = tool
            .call(json!({"page_num": 2, "prompt": "find the id"}))
            .await
            .unwrap();

        assert_eq!(result.status, ToolStatus::Ok);
        assert_eq!(result.value, "42");
        assert_eq!(result.page_num, Some(2));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_arguments_report_execution_error() {
        let (tool, engine) = tool_with_pages(vec![PageImage::new(1, vec![0])]);

        let err = tool
            .call(json!({"page": "one"}))
            .await
            .expect_err("missing fields must fail decoding");

        assert!(err.to_string().contains("invalid ask_ocr arguments"));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn result_wire_form_uses_snake_case_status() {
        let wire = ToolCallResult::no_data("nothing on page").on_page(4).to_wire();
        assert_eq!(wire["status"], "no_data");
        assert_eq!(wire["page_num"], 4);
    }
}
