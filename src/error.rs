//! Error types for the docsight library.
//!
//! Three distinct layers reflect three distinct failure modes:
//!
//! * [`DocsightError`] — **Fatal**: extraction cannot start at all (missing
//!   credentials, empty page set, invalid configuration). Returned as
//!   `Err(DocsightError)` from the top-level workflow before any network
//!   activity happens.
//!
//! * [`TransportError`] / [`ModelError`] — **Client-level**: an outbound model
//!   call failed after the retry policy was exhausted, or a reply did not
//!   match the vendor's wire contract. Surfaced by the model clients;
//!   a parse failure is never retried because retrying cannot fix a schema
//!   mismatch.
//!
//! * [`AgentError`] — **Structured, non-fatal**: the agent loop terminated
//!   without a final answer (iteration budget, upstream error, empty reply).
//!   Carried *inside* [`crate::agent::AgentReply`] rather than raised, so the
//!   caller always receives the tool results gathered so far.
//!
//! The separation lets callers decide their own tolerance: abort on the first
//! failed pass, log and continue, or inspect partial results post-run.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docsight library.
///
/// Per-pass failures are reported as [`AgentError`] inside
/// [`crate::agent::AgentReply`] rather than propagated here.
#[derive(Debug, Error)]
pub enum DocsightError {
    /// A required API key was empty at client construction time.
    #[error("API key for '{provider}' is missing.\nPass it in the client config; the CLI reads {env_hint} from the environment.")]
    MissingApiKey { provider: String, env_hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The workflow was started with no pages to read.
    #[error("No pages to process: the page set is empty")]
    NoPages,

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client construction failed: {0}")]
    HttpClientFailed(String),
}

/// A POST to a model endpoint failed for good.
///
/// Produced by [`crate::client::http::post_json`] once the retry policy is
/// exhausted (transient statuses, network errors) or immediately on a
/// non-retryable 4xx. The attempt count is always the number of HTTP requests
/// actually issued.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint kept answering with an error status.
    #[error("HTTP {status} after {attempts} attempt(s): {body_snippet}")]
    Status {
        status: u16,
        attempts: u32,
        /// First 400 bytes of the last response body, for log forensics.
        body_snippet: String,
    },

    /// Connect/timeout failure with no HTTP status to classify.
    #[error("network error after {attempts} attempt(s): {source}")]
    Network {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
}

/// A model call failed: either transport gave up or the reply shape was wrong.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The reply did not match the vendor's documented schema
    /// (no candidates, missing content, empty choices). Not retryable.
    #[error("unexpected response shape: {0}")]
    Parse(String),
}

/// A registered tool's handler failed while executing a call.
///
/// Caught at the agent-loop boundary and downgraded to a per-call
/// `error`-status result; one bad tool call never aborts an otherwise
/// productive loop.
#[derive(Debug, Clone, Error)]
#[error("tool execution failed: {0}")]
pub struct ToolExecutionError(pub String);

/// Why an agent-loop invocation ended without a final text answer.
///
/// Serializable and cloneable so it can live inside
/// [`crate::agent::AgentReply`] next to the partial tool results.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum AgentError {
    /// The iteration budget ran out while the model was still requesting tools.
    #[error("tool-calling budget of {max_iterations} iterations exhausted")]
    BudgetExceeded { max_iterations: u32 },

    /// The primary model call failed (transport exhausted or reply malformed).
    #[error("model call failed: {detail}")]
    Model { detail: String },

    /// The model returned neither function calls nor text — an upstream
    /// contract violation.
    #[error("model returned neither function calls nor text")]
    EmptyReply,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_status_display() {
        let e = TransportError::Status {
            status: 429,
            attempts: 3,
            body_snippet: "rate limited".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("429"), "got: {msg}");
        assert!(msg.contains("3 attempt"), "got: {msg}");
    }

    #[test]
    fn agent_error_round_trips_through_json() {
        let e = AgentError::BudgetExceeded { max_iterations: 10 };
        let json = serde_json::to_string(&e).unwrap();
        let back: AgentError = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, AgentError::BudgetExceeded { max_iterations: 10 }));
    }

    #[test]
    fn missing_api_key_mentions_env_hint() {
        let e = DocsightError::MissingApiKey {
            provider: "gemini".into(),
            env_hint: "GEMINI_API_KEY".into(),
        };
        assert!(e.to_string().contains("GEMINI_API_KEY"));
    }
}
