// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! GraphQL client for the warehouse API.
//!
//! Handles:
//! - Bearer auth via the token manager
//! - Classification of transport and protocol errors into [`RemoteError`]
//! - Exponential backoff with jitter for throttling and system errors

use crate::error::{RateLimitReason, RemoteError};
use crate::services::token::AccessTokenProvider;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Substring the API uses when an account is out of complexity credits.
const CREDITS_SHORTFALL_MARKER: &str = "not enough credits";

/// Backoff parameters for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Upper bound of random jitter as a fraction of the computed delay
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `attempt` (0-based), without jitter:
    /// `min(max_delay, base_delay * multiplier^attempt)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.base_delay.as_secs_f64() * exp;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Backoff plus up to `jitter_ratio` of random jitter, drawn per call and
    /// capped at `max_delay`.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        let jitter_bound = delay.as_secs_f64() * self.jitter_ratio;
        let jitter = if jitter_bound > 0.0 {
            rand::thread_rng().gen_range(0.0..jitter_bound)
        } else {
            0.0
        };
        (delay + Duration::from_secs_f64(jitter)).min(self.max_delay)
    }

    /// Delay for a failed attempt, honouring a remote retry hint when it asks
    /// for longer than our own curve.
    fn delay_for(&self, attempt: u32, error: &RemoteError) -> Duration {
        let delay = self.delay_with_jitter(attempt);
        match error {
            RemoteError::RateLimit {
                retry_after: Some(hint),
                ..
            } => delay.max(*hint).min(self.max_delay),
            _ => delay,
        }
    }
}

/// GraphQL response envelope.
#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<serde_json::Value>,
}

/// Retrying GraphQL client.
#[derive(Clone)]
pub struct GraphqlClient {
    http: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn AccessTokenProvider>,
    retry: RetryPolicy,
}

impl GraphqlClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: String,
        tokens: Arc<dyn AccessTokenProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            endpoint,
            tokens,
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Execute a query or mutation, retrying transient failures.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        document: &str,
        variables: serde_json::Value,
    ) -> Result<T, RemoteError> {
        self.execute_with_policy(document, variables, &self.retry)
            .await
    }

    /// Execute exactly once, for operations that must not be repeated blindly.
    pub async fn execute_once<T: DeserializeOwned>(
        &self,
        document: &str,
        variables: serde_json::Value,
    ) -> Result<T, RemoteError> {
        self.execute_with_policy(document, variables, &RetryPolicy::none())
            .await
    }

    async fn execute_with_policy<T: DeserializeOwned>(
        &self,
        document: &str,
        variables: serde_json::Value,
        policy: &RetryPolicy,
    ) -> Result<T, RemoteError> {
        let mut attempt = 0;
        loop {
            match self.execute_attempt(document, &variables).await {
                Ok(data) => return Ok(data),
                Err(err) => {
                    if let RemoteError::Authentication { .. } = err {
                        self.tokens.invalidate().await;
                    }

                    if !err.is_retryable() || attempt >= policy.max_retries {
                        return Err(err);
                    }

                    let delay = policy.delay_for(attempt, &err);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        kind = err.kind(),
                        error = %err,
                        "Retrying warehouse API call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One request: token, POST, classify.
    async fn execute_attempt<T: DeserializeOwned>(
        &self,
        document: &str,
        variables: &serde_json::Value,
    ) -> Result<T, RemoteError> {
        let token = self.tokens.access_token().await?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&token.value)
            .json(&serde_json::json!({
                "query": document,
                "variables": variables,
            }))
            .send()
            .await
            .map_err(|e| RemoteError::system(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::system(format!("Failed to read response: {}", e)))?;

        let envelope: GraphQLResponse<serde_json::Value> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) => return Err(classify_status(status, &body)),
        };

        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            return Err(classify_errors(&errors));
        }

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let data = envelope
            .data
            .filter(|data| !data.is_null())
            .ok_or_else(|| RemoteError::system("GraphQL response missing data field"))?;

        serde_json::from_value(data)
            .map_err(|e| RemoteError::system(format!("Failed to parse GraphQL data: {}", e)))
    }
}

/// Classify a non-success HTTP status without a usable GraphQL envelope.
fn classify_status(status: reqwest::StatusCode, body: &str) -> RemoteError {
    let code = Some(status.as_u16().to_string());
    let message = format!("HTTP {}: {}", status, truncate(body, 200));

    match status.as_u16() {
        401 => RemoteError::Authentication { message, code },
        403 => RemoteError::Authorization { message, code },
        429 => RemoteError::RateLimit {
            message,
            code,
            reason: RateLimitReason::Throttled,
            retry_after: None,
        },
        _ => RemoteError::System { message, code },
    }
}

/// Map a GraphQL error envelope to a [`RemoteError`], using the first error.
pub fn classify_errors(errors: &[GraphQLError]) -> RemoteError {
    let Some(first) = errors.first() else {
        return RemoteError::system("Empty GraphQL error list");
    };

    let message = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    let extensions = first.extensions.clone();
    let code = extensions
        .as_ref()
        .and_then(|ext| ext.get("code"))
        .and_then(|c| match c {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

    if message.to_ascii_lowercase().contains(CREDITS_SHORTFALL_MARKER) {
        return RemoteError::RateLimit {
            message,
            code,
            reason: RateLimitReason::InsufficientCredits,
            retry_after: retry_hint(extensions.as_ref()),
        };
    }

    match code.as_deref().map(str::to_ascii_uppercase).as_deref() {
        Some("UNAUTHENTICATED") => RemoteError::Authentication { message, code },
        Some("FORBIDDEN") => RemoteError::Authorization { message, code },
        Some("BAD_USER_INPUT") | Some("GRAPHQL_VALIDATION_FAILED") => RemoteError::Validation {
            message,
            code,
            details: extensions,
        },
        Some("RATE_LIMITED") | Some("THROTTLED") => RemoteError::RateLimit {
            message,
            code,
            reason: RateLimitReason::Throttled,
            retry_after: retry_hint(extensions.as_ref()),
        },
        _ => RemoteError::System { message, code },
    }
}

/// Parse a retry hint from `retry_after` (seconds) or `time_remaining`
/// (e.g. "3 seconds").
fn retry_hint(extensions: Option<&serde_json::Value>) -> Option<Duration> {
    let ext = extensions?;
    if let Some(secs) = ext.get("retry_after").and_then(|v| v.as_f64()) {
        return Some(Duration::from_secs_f64(secs.max(0.0)));
    }
    ext.get("time_remaining")
        .and_then(|v| v.as_str())
        .and_then(|s| s.split_whitespace().next())
        .and_then(|n| n.parse::<f64>().ok())
        .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
