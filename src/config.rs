//! Configuration types for agentic document extraction.
//!
//! All behaviour is controlled through explicit config structs passed into
//! constructors: [`VlmConfig`] and [`OcrConfig`] for the two model clients,
//! [`RetryPolicy`] for the shared HTTP retry discipline, and
//! [`ExtractionConfig`] (built via [`ExtractionConfigBuilder`]) for the
//! workflow. The library never reads the environment — only the outermost
//! entry point (the CLI binary) does, and it translates what it finds into
//! these structs.
//!
//! # Design choice: builder over constructor
//! A ten-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::DocsightError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Retry discipline shared by both model clients.
///
/// Transient statuses (429 and 5xx) are retried with pure exponential
/// backoff: the sleep before attempt *n+1* is `backoff_base^(n-1)` seconds.
/// Any other ≥400 status fails immediately without consuming attempts.
/// Both vendors get their own copy because their rate-limit behaviour
/// differs; the policy value itself is read-only at runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of HTTP attempts, including the first. Default: 3.
    pub max_attempts: u32,
    /// Base of the exponential backoff, in seconds. Default: 1.5.
    ///
    /// With 3 attempts the wait sequence is 1.5⁰ = 1 s, then 1.5¹ = 1.5 s —
    /// short enough not to stall the pipeline, long enough to let a
    /// rate-limited endpoint recover.
    pub backoff_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the retry that follows `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.backoff_base.powi(attempt.saturating_sub(1) as i32))
    }
}

/// Configuration for the primary vision-language model client.
#[derive(Clone)]
pub struct VlmConfig {
    /// API key. Required — construction fails when empty.
    pub api_key: String,
    /// Model identifier. Default: "gemini-2.5-flash".
    pub model: String,
    /// Base URL of the generateContent endpoint family.
    /// Overridable for tests and proxies.
    pub api_base: String,
    /// Per-call HTTP timeout. Default: 60 s.
    pub timeout_secs: u64,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
    /// Minimum spacing between consecutive call initiations. Default: 600 ms.
    ///
    /// The free tier of the primary API rate-limits aggressively; spacing
    /// calls out avoids burning retry attempts on self-inflicted 429s.
    pub min_interval: Duration,
}

impl VlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gemini-2.5-flash".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_secs: 60,
            retry: RetryPolicy::default(),
            min_interval: Duration::from_millis(600),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

impl fmt::Debug for VlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VlmConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

/// Configuration for the secondary OCR model client.
#[derive(Clone)]
pub struct OcrConfig {
    /// API key. Required — construction fails when empty.
    pub api_key: String,
    /// Model identifier. Default: "qwen-vl-plus".
    pub model: String,
    /// OpenAI-compatible endpoint base (the client appends
    /// `/chat/completions`).
    pub api_base: String,
    /// Per-call HTTP timeout. Default: 60 s.
    pub timeout_secs: u64,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
    /// Minimum spacing between consecutive call initiations. Default: 200 ms.
    pub min_interval: Duration,
}

impl OcrConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "qwen-vl-plus".to_string(),
            api_base: "https://dashscope-intl.aliyuncs.com/compatible-mode/v1".to_string(),
            timeout_secs: 60,
            retry: RetryPolicy::default(),
            min_interval: Duration::from_millis(200),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

/// Configuration for the agent loop and extraction workflow.
///
/// Built via [`ExtractionConfig::builder()`] or
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use docsight::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .max_iterations(12)
///     .tool_workers(5)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Upper bound on tool-calling iterations per agent invocation. Default: 10.
    ///
    /// The only guard against a model that keeps requesting tools forever.
    /// Reaching it terminates the invocation with a structured
    /// budget-exceeded error carrying everything gathered so far.
    pub max_iterations: u32,

    /// Number of OCR tool calls executed concurrently within one loop
    /// iteration. Default: 1 (fully sequential).
    ///
    /// Tool calls are network-bound; a small pool (around 5 in production)
    /// cuts verification-pass wall-clock substantially. Results are folded
    /// back in request order regardless of completion order, so raising this
    /// never changes output.
    pub tool_workers: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tool_workers: 1,
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn max_iterations(mut self, n: u32) -> Self {
        self.config.max_iterations = n;
        self
    }

    pub fn tool_workers(mut self, n: usize) -> Self {
        self.config.tool_workers = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, DocsightError> {
        let c = &self.config;
        if c.max_iterations == 0 {
            return Err(DocsightError::InvalidConfig(
                "max_iterations must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_backoff_is_pure_exponential() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff_base: 2.0,
        };
        assert_eq!(policy.backoff_after(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_after(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_after(3), Duration::from_secs(4));
    }

    #[test]
    fn builder_defaults() {
        let config = ExtractionConfig::builder().build().unwrap();
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.tool_workers, 1);
    }

    #[test]
    fn builder_rejects_zero_iterations() {
        let err = ExtractionConfig::builder().max_iterations(0).build();
        assert!(err.is_err());
    }

    #[test]
    fn tool_workers_clamped_to_one() {
        let config = ExtractionConfig::builder().tool_workers(0).build().unwrap();
        assert_eq!(config.tool_workers, 1);
    }

    #[test]
    fn debug_output_redacts_api_keys() {
        let vlm = format!("{:?}", VlmConfig::new("sk-secret"));
        assert!(!vlm.contains("sk-secret"), "got: {vlm}");
        let ocr = format!("{:?}", OcrConfig::new("sk-secret"));
        assert!(!ocr.contains("sk-secret"), "got: {ocr}");
    }
}
