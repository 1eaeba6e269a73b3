//! The agent loop: iterative tool-calling against the primary model.
//!
//! One [`AgentLoop`] instance owns one conversation. Every iteration submits
//! the **full accumulated history** — not just the latest turn — together
//! with the registered tool declarations, then acts on the reply:
//!
//! ```text
//! AwaitingModel ──▶ has tool calls ──▶ execute, fold responses ──▶ AwaitingModel
//!        │
//!        ├──────▶ has text          ──▶ done (final answer)
//!        └──────▶ neither           ──▶ done (contract violation)
//! ```
//!
//! Tool calls within one iteration may fan out across a small bounded pool;
//! responses are folded back **in request order** regardless of completion
//! order, because the downstream model matches call *k* to response *k*
//! positionally. A failing handler is downgraded to an `error`-status result
//! for that one call — the loop itself never aborts mid-flight, and `invoke`
//! always returns a structured [`AgentReply`] rather than raising.

use crate::client::vlm::VisionModel;
use crate::config::ExtractionConfig;
use crate::error::{AgentError, DocsightError};
use crate::message::Turn;
use crate::store::PageImage;
use crate::tool::{ToolCallRequest, ToolCallResult, ToolDeclaration, ToolHandler};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One executed tool call: what was asked, with what arguments, and what came
/// back. Accumulated across all iterations of an invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: serde_json::Value,
    pub result: ToolCallResult,
}

/// Outcome of one `invoke`. Always returned — on failure `text` is `None`
/// and `error` explains why, with every tool result gathered so far intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    /// The model's final text answer, when the loop converged.
    pub text: Option<String>,
    /// Every tool call executed, in dispatch order across iterations.
    pub tool_records: Vec<ToolCallRecord>,
    /// Iterations consumed (1-based; equals the number of model calls made).
    pub iterations: u32,
    /// Why the loop stopped without an answer, if it did.
    pub error: Option<AgentError>,
}

impl AgentReply {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.text.is_some()
    }
}

/// Iterative tool-calling driver for the primary model.
///
/// The conversation is explicit state owned by this instance: it survives
/// across `invoke` calls for conversational continuity, and [`reset`]
/// starts a fresh session on the same instance.
///
/// [`reset`]: AgentLoop::reset
pub struct AgentLoop {
    model: Arc<dyn VisionModel>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    /// Declarations in registration order, resubmitted on every iteration.
    declarations: Vec<ToolDeclaration>,
    history: Vec<Turn>,
    max_iterations: u32,
    tool_workers: usize,
}

impl AgentLoop {
    pub fn new(model: Arc<dyn VisionModel>, config: &ExtractionConfig) -> Self {
        Self {
            model,
            handlers: HashMap::new(),
            declarations: Vec::new(),
            history: Vec::new(),
            max_iterations: config.max_iterations,
            tool_workers: config.tool_workers.max(1),
        }
    }

    /// Register a tool. Names must be unique.
    pub fn register_tool(&mut self, handler: Arc<dyn ToolHandler>) -> Result<(), DocsightError> {
        let declaration = handler.declaration();
        if self.handlers.contains_key(&declaration.name) {
            return Err(DocsightError::InvalidConfig(format!(
                "duplicate tool name: {}",
                declaration.name
            )));
        }
        info!(tool = %declaration.name, "registered tool");
        self.handlers.insert(declaration.name.clone(), handler);
        self.declarations.push(declaration);
        Ok(())
    }

    /// Drop the conversation, keeping the registered tools. A fresh session
    /// on the same instance.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// The accumulated conversation, read-only.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Run the tool-calling loop to a final answer, an error, or the
    /// iteration budget.
    pub async fn invoke(&mut self, prompt: &str, images: &[PageImage]) -> AgentReply {
        let mut opening = Turn::user().with_text(prompt);
        for image in images {
            opening = opening.with_png(&image.png);
        }
        self.history.push(opening);

        let mut records: Vec<ToolCallRecord> = Vec::new();
        let declarations = self.declarations.clone();
        let tools = (!declarations.is_empty()).then_some(declarations.as_slice());

        for iteration in 1..=self.max_iterations {
            debug!(iteration, max = self.max_iterations, "tool-calling iteration");

            let reply = match self.model.invoke(&self.history, tools).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(iteration, error = %e, "primary model call failed");
                    return AgentReply {
                        text: None,
                        tool_records: records,
                        iterations: iteration,
                        error: Some(AgentError::Model {
                            detail: e.to_string(),
                        }),
                    };
                }
            };

            if !reply.calls.is_empty() {
                info!(iteration, calls = reply.calls.len(), "model requested tool calls");

                let mut call_turn = Turn::model();
                for call in &reply.calls {
                    call_turn = call_turn.with_function_call(&call.name, call.args.clone());
                }
                self.history.push(call_turn);

                // Bounded fan-out; `buffered` yields in request order even
                // when later calls complete first.
                let results: Vec<ToolCallResult> =
                    stream::iter(reply.calls.iter().map(|call| self.execute_call(call)))
                        .buffered(self.tool_workers)
                        .collect()
                        .await;

                let mut response_turn = Turn::user();
                for (call, result) in reply.calls.iter().zip(results) {
                    response_turn =
                        response_turn.with_function_response(&call.name, result.to_wire());
                    records.push(ToolCallRecord {
                        name: call.name.clone(),
                        args: call.args.clone(),
                        result,
                    });
                }
                self.history.push(response_turn);
                continue;
            }

            if let Some(text) = reply.text.filter(|t| !t.trim().is_empty()) {
                info!(iteration, "model returned the final text answer");
                self.history.push(Turn::model().with_text(&text));
                return AgentReply {
                    text: Some(text),
                    tool_records: records,
                    iterations: iteration,
                    error: None,
                };
            }

            warn!(iteration, "model returned neither calls nor text");
            return AgentReply {
                text: None,
                tool_records: records,
                iterations: iteration,
                error: Some(AgentError::EmptyReply),
            };
        }

        warn!(max = self.max_iterations, "iteration budget exhausted");
        AgentReply {
            text: None,
            tool_records: records,
            iterations: self.max_iterations,
            error: Some(AgentError::BudgetExceeded {
                max_iterations: self.max_iterations,
            }),
        }
    }

    /// Execute one call, downgrading every failure mode to an `error`-status
    /// result so a single bad call cannot abort the iteration.
    async fn execute_call(&self, call: &ToolCallRequest) -> ToolCallResult {
        let Some(handler) = self.handlers.get(&call.name) else {
            warn!(tool = %call.name, "model requested an unregistered tool");
            return ToolCallResult::error(format!("unknown tool: {}", call.name));
        };

        match handler.call(call.args.clone()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool handler failed");
                ToolCallResult::error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::vlm::VlmReply;
    use crate::error::{ModelError, ToolExecutionError};
    use crate::message::Part;
    use crate::tool::ToolStatus;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted model: pops one canned reply per invocation and records how
    /// many turns each invocation saw.
    struct ScriptedModel {
        script: Mutex<Vec<Result<VlmReply, ModelError>>>,
        invocations: AtomicUsize,
        turns_seen: Mutex<Vec<usize>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<VlmReply, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                invocations: AtomicUsize::new(0),
                turns_seen: Mutex::new(Vec::new()),
            })
        }

        fn invocations(&self) -> usize {
            self.invocations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedModel {
        async fn invoke(
            &self,
            turns: &[Turn],
            _tools: Option<&[ToolDeclaration]>,
        ) -> Result<VlmReply, ModelError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.turns_seen.lock().unwrap().push(turns.len());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                panic!("scripted model ran out of replies");
            }
            script.remove(0)
        }
    }

    fn text_reply(text: &str) -> Result<VlmReply, ModelError> {
        Ok(VlmReply {
            text: Some(text.to_string()),
            calls: Vec::new(),
            raw: Value::Null,
        })
    }

    fn call_reply(calls: Vec<ToolCallRequest>) -> Result<VlmReply, ModelError> {
        Ok(VlmReply {
            text: None,
            calls,
            raw: Value::Null,
        })
    }

    fn empty_reply() -> Result<VlmReply, ModelError> {
        Ok(VlmReply {
            text: None,
            calls: Vec::new(),
            raw: Value::Null,
        })
    }

    /// Echoes the `q` argument back; optionally sleeps to scramble
    /// completion order under parallel execution.
    struct EchoTool {
        calls: AtomicUsize,
        delays_ms: Vec<u64>,
    }

    impl EchoTool {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delays_ms: Vec::new(),
            })
        }

        fn with_delays(delays_ms: Vec<u64>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delays_ms,
            })
        }
    }

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration::new(
                "echo",
                "echoes the question back",
                json!({"type": "object", "properties": {"q": {"type": "string"}}, "required": ["q"]}),
            )
        }

        async fn call(&self, args: Value) -> Result<ToolCallResult, ToolExecutionError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(&delay) = self.delays_ms.get(index) {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            let q = args["q"].as_str().unwrap_or_default().to_string();
            Ok(ToolCallResult::ok(q, "", "echoed"))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration::new("broken", "always fails", json!({"type": "object"}))
        }

        async fn call(&self, _args: Value) -> Result<ToolCallResult, ToolExecutionError> {
            Err(ToolExecutionError("handler blew up".into()))
        }
    }

    fn agent_with(
        model: Arc<dyn VisionModel>,
        handlers: Vec<Arc<dyn ToolHandler>>,
        config: &ExtractionConfig,
    ) -> AgentLoop {
        let mut agent = AgentLoop::new(model, config);
        for handler in handlers {
            agent.register_tool(handler).unwrap();
        }
        agent
    }

    #[tokio::test]
    async fn simple_text_response_converges_in_one_iteration() {
        let model = ScriptedModel::new(vec![text_reply("All done.")]);
        let mut agent = agent_with(model.clone(), vec![EchoTool::new()], &ExtractionConfig::default());

        let reply = agent.invoke("hello", &[]).await;

        assert!(reply.is_success());
        assert_eq!(reply.text.as_deref(), Some("All done."));
        assert_eq!(reply.iterations, 1);
        assert!(reply.tool_records.is_empty());
        assert_eq!(model.invocations(), 1);
    }

    #[tokio::test]
    async fn nine_tool_rounds_then_text_makes_ten_model_calls() {
        let mut script: Vec<Result<VlmReply, ModelError>> = (0..9)
            .map(|i| call_reply(vec![ToolCallRequest::new("echo", json!({"q": format!("q{i}")}))]))
            .collect();
        script.push(text_reply("final answer"));

        let model = ScriptedModel::new(script);
        let mut agent = agent_with(model.clone(), vec![EchoTool::new()], &ExtractionConfig::default());

        let reply = agent.invoke("go", &[]).await;

        assert!(reply.is_success());
        assert_eq!(reply.text.as_deref(), Some("final answer"));
        assert_eq!(reply.iterations, 10);
        assert_eq!(model.invocations(), 10);
        assert_eq!(reply.tool_records.len(), 9);
        for (i, record) in reply.tool_records.iter().enumerate() {
            assert_eq!(record.args["q"], format!("q{i}"), "record {i} out of position");
            assert_eq!(record.result.value, format!("q{i}"));
        }
    }

    #[tokio::test]
    async fn full_history_is_resubmitted_each_iteration() {
        let script = vec![
            call_reply(vec![ToolCallRequest::new("echo", json!({"q": "a"}))]),
            call_reply(vec![ToolCallRequest::new("echo", json!({"q": "b"}))]),
            text_reply("done"),
        ];
        let model = ScriptedModel::new(script);
        let mut agent = agent_with(model.clone(), vec![EchoTool::new()], &ExtractionConfig::default());

        agent.invoke("go", &[]).await;

        // Opening turn, then +2 turns (call + response) per tool round.
        let seen = model.turns_seen.lock().unwrap().clone();
        assert_eq!(seen, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn handler_failure_becomes_error_result_and_loop_continues() {
        let script = vec![
            call_reply(vec![ToolCallRequest::new("broken", json!({}))]),
            text_reply("recovered"),
        ];
        let model = ScriptedModel::new(script);
        let mut agent = agent_with(
            model.clone(),
            vec![Arc::new(FailingTool)],
            &ExtractionConfig::default(),
        );

        let reply = agent.invoke("go", &[]).await;

        assert!(reply.is_success(), "loop must survive a failing handler");
        assert_eq!(reply.text.as_deref(), Some("recovered"));
        assert_eq!(reply.tool_records.len(), 1);
        assert_eq!(reply.tool_records[0].result.status, ToolStatus::Error);
        assert!(reply.tool_records[0].result.explanation.contains("blew up"));
    }

    #[tokio::test]
    async fn unknown_tool_is_synthesized_error_without_dispatch() {
        let script = vec![
            call_reply(vec![
                ToolCallRequest::new("echo", json!({"q": "real"})),
                ToolCallRequest::new("nonexistent", json!({})),
            ]),
            text_reply("done"),
        ];
        let model = ScriptedModel::new(script);
        let echo = EchoTool::new();
        let mut agent = agent_with(model, vec![echo.clone()], &ExtractionConfig::default());

        let reply = agent.invoke("go", &[]).await;

        assert!(reply.is_success());
        assert_eq!(reply.tool_records.len(), 2);
        assert_eq!(reply.tool_records[0].result.status, ToolStatus::Ok);
        assert_eq!(reply.tool_records[1].result.status, ToolStatus::Error);
        assert!(reply.tool_records[1]
            .result
            .explanation
            .contains("unknown tool"));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1, "only the real tool runs");
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_structured_error() {
        let script: Vec<Result<VlmReply, ModelError>> = (0..3)
            .map(|i| call_reply(vec![ToolCallRequest::new("echo", json!({"q": format!("{i}")}))]))
            .collect();
        let model = ScriptedModel::new(script);
        let config = ExtractionConfig::builder().max_iterations(3).build().unwrap();
        let mut agent = agent_with(model.clone(), vec![EchoTool::new()], &config);

        let reply = agent.invoke("go", &[]).await;

        assert!(reply.text.is_none());
        assert!(matches!(
            reply.error,
            Some(AgentError::BudgetExceeded { max_iterations: 3 })
        ));
        assert_eq!(reply.iterations, 3);
        assert_eq!(reply.tool_records.len(), 3, "partial results are preserved");
        assert_eq!(model.invocations(), 3);
    }

    #[tokio::test]
    async fn parallel_execution_preserves_request_order() {
        // First call is slowest; without ordered folding its result would
        // land last.
        let script = vec![
            call_reply(vec![
                ToolCallRequest::new("echo", json!({"q": "slow"})),
                ToolCallRequest::new("echo", json!({"q": "medium"})),
                ToolCallRequest::new("echo", json!({"q": "fast"})),
            ]),
            text_reply("done"),
        ];
        let model = ScriptedModel::new(script);
        let echo = EchoTool::with_delays(vec![120, 60, 0]);
        let config = ExtractionConfig::builder().tool_workers(3).build().unwrap();
        let mut agent = agent_with(model, vec![echo], &config);

        let reply = agent.invoke("go", &[]).await;

        let values: Vec<&str> = reply
            .tool_records
            .iter()
            .map(|r| r.result.value.as_str())
            .collect();
        assert_eq!(values, vec!["slow", "medium", "fast"]);

        // The function-response turn must mirror the same order.
        let response_turn = &agent.history()[2];
        let names: Vec<String> = response_turn
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionResponse { response, .. } => {
                    Some(response["value"].as_str().unwrap_or_default().to_string())
                }
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["slow", "medium", "fast"]);
    }

    #[tokio::test]
    async fn empty_reply_terminates_with_contract_violation() {
        let model = ScriptedModel::new(vec![empty_reply()]);
        let mut agent = agent_with(model, vec![EchoTool::new()], &ExtractionConfig::default());

        let reply = agent.invoke("go", &[]).await;

        assert!(reply.text.is_none());
        assert!(matches!(reply.error, Some(AgentError::EmptyReply)));
    }

    #[tokio::test]
    async fn model_failure_returns_outcome_not_panic() {
        let script = vec![
            call_reply(vec![ToolCallRequest::new("echo", json!({"q": "one"}))]),
            Err(ModelError::Parse("schema drifted".into())),
        ];
        let model = ScriptedModel::new(script);
        let mut agent = agent_with(model, vec![EchoTool::new()], &ExtractionConfig::default());

        let reply = agent.invoke("go", &[]).await;

        assert!(reply.text.is_none());
        assert!(matches!(reply.error, Some(AgentError::Model { .. })));
        assert_eq!(reply.tool_records.len(), 1, "earlier results survive the failure");
    }

    #[tokio::test]
    async fn call_and_response_turns_alternate_in_history() {
        let script = vec![
            call_reply(vec![ToolCallRequest::new("echo", json!({"q": "x"}))]),
            text_reply("done"),
        ];
        let model = ScriptedModel::new(script);
        let mut agent = agent_with(model, vec![EchoTool::new()], &ExtractionConfig::default());

        agent.invoke("go", &[PageImage::new(1, b"png".to_vec())]).await;

        let history = agent.history();
        assert_eq!(history.len(), 4);
        assert!(matches!(history[1].parts[0], Part::FunctionCall { .. }));
        assert!(matches!(history[2].parts[0], Part::FunctionResponse { .. }));
        assert!(matches!(history[3].parts[0], Part::Text(_)));
    }

    #[tokio::test]
    async fn reset_clears_history_keeps_tools() {
        let model = ScriptedModel::new(vec![text_reply("a"), text_reply("b")]);
        let mut agent = agent_with(model, vec![EchoTool::new()], &ExtractionConfig::default());

        agent.invoke("first", &[]).await;
        assert!(!agent.history().is_empty());

        agent.reset();
        assert!(agent.history().is_empty());

        let reply = agent.invoke("second", &[]).await;
        assert!(reply.is_success());
        assert_eq!(agent.history().len(), 2, "fresh session after reset");
    }

    #[test]
    fn duplicate_tool_registration_is_rejected() {
        let model = ScriptedModel::new(vec![]);
        let mut agent = AgentLoop::new(model, &ExtractionConfig::default());
        agent.register_tool(EchoTool::new()).unwrap();
        let err = agent.register_tool(EchoTool::new());
        assert!(err.is_err());
    }
}
