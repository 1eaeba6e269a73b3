//! Resilient POST: the single retry/backoff/throttle primitive.
//!
//! Every outbound model call in this crate funnels through [`post_json`].
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 5xx from model APIs are transient and frequent under load.
//! The backoff before the retry that follows attempt *n* is
//! `backoff_base^(n-1)` seconds — pure exponential, no cap. Any other ≥400
//! status is a caller bug (bad key, malformed payload) and fails immediately
//! without consuming the remaining attempts. Connect and timeout errors are
//! treated as transient because they carry no status to prove otherwise.
//!
//! ## Throttling
//!
//! A [`Throttle`] spaces out call *initiations* on one client instance.
//! It is consulted before every attempt — retries count as calls — and its
//! timestamp is refreshed after every attempt, success or failure.

use crate::config::RetryPolicy;
use crate::error::TransportError;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Whether a status may succeed on retry: 429 or any 5xx.
pub fn is_transient(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Minimum spacing between call initiations on one client instance.
///
/// Uses [`Instant`] (monotonic) so wall-clock adjustments cannot produce
/// negative elapsed times. The first call on a fresh throttle never blocks.
/// The timestamp is a single mutually-exclusive critical section: concurrent
/// callers of the same client serialise here and each reserves its own slot.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Block until `min_interval` has elapsed since the previous recorded
    /// call, then record "now" as the new last-call time.
    ///
    /// The lock is held across the sleep so two concurrent callers cannot
    /// both observe the old timestamp and start together.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "throttling");
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Refresh the last-call timestamp after an attempt completes, so the
    /// next initiation is measured from the most recent activity.
    pub async fn mark(&self) {
        *self.last_call.lock().await = Some(Instant::now());
    }
}

/// Issue a JSON POST with throttling and status-classified retries.
///
/// * 2xx   → parsed body returned.
/// * 429 / 5xx → retried with exponential backoff while attempts remain,
///   then [`TransportError::Status`] with the last status and a body snippet.
/// * other ≥400 → [`TransportError::Status`] immediately, no retry.
/// * network error → retried like a transient status, then
///   [`TransportError::Network`] with the underlying cause.
///
/// Each attempt is logged with its index, status, and latency.
pub async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    policy: &RetryPolicy,
    throttle: &Throttle,
) -> Result<Value, TransportError> {
    let max = policy.max_attempts.max(1);
    let mut last_status: Option<(u16, String)> = None;

    for attempt in 1..=max {
        throttle.acquire().await;
        let start = Instant::now();

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let latency_ms = start.elapsed().as_millis() as u64;
                throttle.mark().await;

                if response.status().is_success() {
                    debug!(attempt, status, latency_ms, "request succeeded");
                    return response.json().await.map_err(|e| TransportError::Network {
                        attempts: attempt,
                        source: e,
                    });
                }

                let snippet: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(400)
                    .collect();

                if !is_transient(status) {
                    warn!(attempt, status, latency_ms, "non-retryable status");
                    return Err(TransportError::Status {
                        status,
                        attempts: attempt,
                        body_snippet: snippet,
                    });
                }

                last_status = Some((status, snippet));
                if attempt < max {
                    let backoff = policy.backoff_after(attempt);
                    warn!(
                        attempt,
                        status,
                        latency_ms,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient status, retrying"
                    );
                    sleep(backoff).await;
                }
            }
            Err(e) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                throttle.mark().await;

                if attempt < max {
                    let backoff = policy.backoff_after(attempt);
                    warn!(
                        attempt,
                        latency_ms,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "network error, retrying"
                    );
                    sleep(backoff).await;
                } else {
                    warn!(attempt, latency_ms, error = %e, "network error, giving up");
                    return Err(TransportError::Network {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    let (status, body_snippet) = last_status.unwrap_or((0, String::new()));
    Err(TransportError::Status {
        status,
        attempts: max,
        body_snippet,
    })
}
