//! # docsight
//!
//! Agentic document extraction with a Vision Language Model and a
//! precision-OCR verifier.
//!
//! ## Why this crate?
//!
//! A VLM reads a rendered page the way a human does — structure, reading
//! order, tables all come out right — but it misreads exactly the values
//! where a single character matters: registration numbers, URLs, names.
//! Instead of trusting one model with everything, this crate lets the VLM do
//! the reading and hands every precision-critical span to a dedicated OCR
//! model through a tool-calling loop, then substitutes the OCR answers back
//! into the transcript. OCR is authoritative; the VLM is the narrator.
//!
//! ## Pipeline Overview
//!
//! ```text
//! page PNGs
//!  │
//!  ├─ 1. Workflow   three-pass text prompt + independent structure prompt
//!  ├─ 2. Agent      tool-calling loop over the full conversation history
//!  ├─ 3. VLM        primary multimodal model (text / functionCall replies)
//!  ├─ 4. ask_ocr    page lookup + secondary OCR model, bounded fan-out
//!  └─ 5. Output     verified text + header structure + call records
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsight::{
//!     AgentLoop, ExtractionConfig, GeminiClient, MemoryPageStore, OcrConfig, OcrTool,
//!     PageImage, QwenOcrClient, VlmConfig, describe_document,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pages = vec![PageImage::new(1, std::fs::read("page-001.png")?)];
//!
//!     let vlm = Arc::new(GeminiClient::new(VlmConfig::new("<gemini key>"))?);
//!     let ocr = Arc::new(QwenOcrClient::new(OcrConfig::new("<qwen key>"))?);
//!     let store = Arc::new(MemoryPageStore::from_pages(&pages));
//!
//!     let config = ExtractionConfig::builder().tool_workers(5).build()?;
//!     let mut agent = AgentLoop::new(vlm, &config);
//!     agent.register_tool(Arc::new(OcrTool::new(ocr, store)))?;
//!
//!     let data = describe_document(&mut agent, &pages).await?;
//!     println!("{}", data.text.as_deref().unwrap_or("<no text>"));
//!     eprintln!("{} headers, {} OCR calls", data.headers.len(), data.stats.ocr_calls);
//!     Ok(())
//! }
//! ```
//!
//! Rasterisation is out of scope on purpose: any renderer that produces one
//! PNG per page feeds this crate (`pdftoppm -png -r 150 doc.pdf page` works).
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docsight` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docsight = { version = "0.2", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod message;
pub mod output;
pub mod prompts;
pub mod store;
pub mod tool;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agent::{AgentLoop, AgentReply, ToolCallRecord};
pub use client::http::Throttle;
pub use client::ocr::{OcrEngine, QwenOcrClient};
pub use client::vlm::{GeminiClient, VisionModel, VlmReply};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, OcrConfig, RetryPolicy, VlmConfig};
pub use error::{AgentError, DocsightError, ModelError, ToolExecutionError, TransportError};
pub use extract::{describe_document, describe_document_sync, parse_structure};
pub use message::{Part, Role, Turn};
pub use output::{DocumentData, ExtractionStats, HeaderInfo};
pub use store::{DiskPageStore, MemoryPageStore, PageImage, PageStore};
pub use tool::{OcrTool, ToolCallRequest, ToolCallResult, ToolDeclaration, ToolHandler, ToolStatus};
