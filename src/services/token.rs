// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access token lifecycle for the warehouse API.
//!
//! Handles:
//! - Deriving short-lived bearer tokens from the long-lived refresh token
//! - Proactive refresh before expiry (5-minute margin)
//! - Single-flight refresh so concurrent callers share one refresh call

use crate::error::RemoteError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

/// Margin before token expiration when we proactively refresh (5 minutes).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Bearer token with expiry information.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token still has at least the refresh margin left at `now`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Source of bearer tokens for remote calls.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Return a token valid for at least the refresh margin.
    async fn access_token(&self) -> Result<AccessToken, RemoteError>;

    /// Drop any cached token so the next call re-derives one.
    async fn invalidate(&self);
}

/// Token refresh response from the auth endpoint.
#[derive(Debug, Clone, Deserialize)]
struct TokenRefreshResponse {
    access_token: String,
    /// Lifetime in seconds
    expires_in: i64,
}

/// Owns the credential and the cached access token.
///
/// The cached token is the only cross-call shared mutable state in the
/// remote layer; it is written only while holding the refresh gate.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    /// Long-lived refresh token, immutable for the process lifetime.
    credential: String,
    cached: RwLock<Option<AccessToken>>,
    /// Serializes refreshes; waiters re-check the cache after acquiring it.
    refresh_gate: Mutex<()>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, token_url: String, credential: String) -> Self {
        Self {
            http,
            token_url,
            credential,
            cached: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Get a valid (non-expired, not about to expire) access token.
    ///
    /// 1. Check the cache (fast path - no I/O)
    /// 2. Acquire the refresh gate
    /// 3. Re-check the cache (another task may have refreshed meanwhile)
    /// 4. Refresh against the auth endpoint and cache the result
    pub async fn get_valid_token(&self) -> Result<AccessToken, RemoteError> {
        if let Some(token) = self.cached_if_fresh().await {
            return Ok(token);
        }

        let _guard = self.refresh_gate.lock().await;

        if let Some(token) = self.cached_if_fresh().await {
            return Ok(token);
        }

        self.refresh_locked().await
    }

    /// Discard the cached token and derive a new one.
    ///
    /// Callers that queue behind an in-flight forced refresh receive the
    /// token it produced instead of refreshing a second time.
    pub async fn force_refresh(&self) -> Result<AccessToken, RemoteError> {
        let stale = self.cached.read().await.clone();

        let _guard = self.refresh_gate.lock().await;

        let current = self.cached.read().await.clone();
        if let Some(token) = current {
            if stale.as_ref() != Some(&token) && token.is_fresh_at(Utc::now()) {
                return Ok(token);
            }
        }

        *self.cached.write().await = None;
        self.refresh_locked().await
    }

    /// Report whether the cached token is usable, without refreshing.
    pub async fn is_valid(&self) -> bool {
        self.cached_if_fresh().await.is_some()
    }

    async fn cached_if_fresh(&self) -> Option<AccessToken> {
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|token| token.is_fresh_at(Utc::now()))
            .cloned()
    }

    /// Perform the refresh call. Must be called with the refresh gate held.
    async fn refresh_locked(&self) -> Result<AccessToken, RemoteError> {
        tracing::info!("Refreshing warehouse access token");

        let response = self
            .http
            .post(&self.token_url)
            .json(&serde_json::json!({ "refresh_token": self.credential }))
            .send()
            .await
            .map_err(|e| {
                RemoteError::authentication(format!("Token refresh request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Token refresh rejected");
            return Err(RemoteError::Authentication {
                message: format!("Token refresh failed with status {}", status),
                code: Some(status.as_u16().to_string()),
            });
        }

        let refreshed: TokenRefreshResponse = response.json().await.map_err(|e| {
            RemoteError::authentication(format!("Failed to parse token response: {}", e))
        })?;

        let token = AccessToken {
            value: refreshed.access_token,
            expires_at: Utc::now() + Duration::seconds(refreshed.expires_in),
        };

        if !token.is_fresh_at(Utc::now()) {
            return Err(RemoteError::authentication(format!(
                "Refreshed token lifetime of {}s is below the refresh margin",
                refreshed.expires_in
            )));
        }

        *self.cached.write().await = Some(token.clone());

        tracing::info!(expires_at = %token.expires_at, "Access token refreshed and cached");
        Ok(token)
    }
}

#[async_trait]
impl AccessTokenProvider for TokenManager {
    async fn access_token(&self) -> Result<AccessToken, RemoteError> {
        self.get_valid_token().await
    }

    async fn invalidate(&self) {
        let _guard = self.refresh_gate.lock().await;
        *self.cached.write().await = None;
    }
}

/// Fixed token, for tests and for callers that manage tokens elsewhere.
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> Result<AccessToken, RemoteError> {
        Ok(AccessToken {
            value: self.0.clone(),
            expires_at: Utc::now() + Duration::hours(24),
        })
    }

    async fn invalidate(&self) {}
}
