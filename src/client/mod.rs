//! Model clients and the transport layer they share.
//!
//! Both outbound clients go through exactly one retry/backoff/throttle
//! implementation. Keeping a single resilient-call primitive means the two
//! vendors cannot drift apart in how they classify transient failures — each
//! client only contributes its wire format and a [`crate::config::RetryPolicy`]
//! value.
//!
//! ## Data Flow
//!
//! ```text
//! agent ──▶ vlm ──────▶ http ──▶ primary endpoint
//!   │                    ▲
//!   └─▶ tool ──▶ ocr ────┘  (secondary endpoint)
//! ```
//!
//! 1. [`http`] — throttled POST with status-classified retries; the only
//!    place that sleeps on backoff
//! 2. [`vlm`]  — primary vision-language client: multimodal `contents`
//!    payloads, text vs. function-call reply parsing
//! 3. [`ocr`]  — secondary OCR client: one image, one question, a strict
//!    three-label reply grammar

pub mod http;
pub mod ocr;
pub mod vlm;
