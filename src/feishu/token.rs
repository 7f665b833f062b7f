//! Tenant access token cache shared by every outbound platform call.
//!
//! The token is process-lifetime state: created lazily on the first call,
//! refreshed in place, never explicitly destroyed. Refresh is single-writer —
//! two callers racing past expiry perform exactly one exchange.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::FeishuError;

/// Seconds subtracted from the platform-reported TTL so a refresh happens
/// before actual platform-side expiry can race in-flight calls.
pub const EXPIRY_MARGIN_SECS: i64 = 300;

/// TTL assumed when the exchange response omits one.
const DEFAULT_EXPIRE_SECS: i64 = 7200;

/// A freshly exchanged bearer token and its platform-reported lifetime.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    /// Bearer token value.
    pub token: String,
    /// Platform-reported lifetime in seconds.
    pub expires_in: i64,
}

/// The credential-exchange call: app identity → bearer token + TTL.
///
/// A trait seam so tests can substitute a counting double for the HTTP
/// exchanger.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Perform one credential exchange.
    ///
    /// # Errors
    ///
    /// Returns [`FeishuError::Auth`] when the call errors or the platform
    /// returns a non-success status.
    async fn exchange(&self) -> Result<TokenGrant, FeishuError>;
}

/// A cached token and the epoch second after which it must not be used.
struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Cache for the tenant access token, shared by all outbound calls.
pub struct TokenCache {
    exchange: Arc<dyn TokenExchange>,
    state: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    /// Create an empty cache backed by the given exchanger.
    pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
        Self {
            exchange,
            state: RwLock::new(None),
        }
    }

    /// Return the cached token, refreshing it first when expired.
    ///
    /// Callers must treat a failure as fatal to the current operation only:
    /// log, abort that single call, and let the next call retry. The cache
    /// itself never retries.
    ///
    /// # Errors
    ///
    /// Returns [`FeishuError::Auth`] when the exchange fails.
    pub async fn token(&self) -> Result<String, FeishuError> {
        let now = chrono::Utc::now().timestamp();

        {
            let state = self.state.read().await;
            if let Some(cached) = state.as_ref() {
                if now < cached.expires_at {
                    return Ok(cached.token.clone());
                }
            }
        }

        let mut state = self.state.write().await;
        // Another caller may have refreshed while we waited for the write lock.
        if let Some(cached) = state.as_ref() {
            if now < cached.expires_at {
                debug!("token refreshed by concurrent caller");
                return Ok(cached.token.clone());
            }
        }

        let grant = self.exchange.exchange().await?;
        let expires_at = now
            .saturating_add(grant.expires_in)
            .saturating_sub(EXPIRY_MARGIN_SECS);
        info!(expires_at, "tenant access token refreshed");
        *state = Some(CachedToken {
            token: grant.token.clone(),
            expires_at,
        });
        Ok(grant.token)
    }
}

// ---------------------------------------------------------------------------
// HTTP exchanger
// ---------------------------------------------------------------------------

/// Exchange response from `POST /auth/v3/tenant_access_token/internal`.
///
/// Unlike the rest of the API surface, this endpoint carries the token at the
/// top level next to the business code.
#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    code: i64,
    msg: Option<String>,
    tenant_access_token: Option<String>,
    expire: Option<i64>,
}

/// HTTP implementation of [`TokenExchange`] against the Feishu auth endpoint.
pub struct TenantTokenExchange {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    app_secret: String,
}

impl TenantTokenExchange {
    /// Create an exchanger for the given API base URL and app identity.
    pub fn new(http: reqwest::Client, base_url: &str, app_id: &str, app_secret: &str) -> Self {
        Self {
            http,
            base_url: base_url.to_owned(),
            app_id: app_id.to_owned(),
            app_secret: app_secret.to_owned(),
        }
    }
}

#[async_trait]
impl TokenExchange for TenantTokenExchange {
    async fn exchange(&self) -> Result<TokenGrant, FeishuError> {
        let url = format!("{}/auth/v3/tenant_access_token/internal", self.base_url);
        let body = serde_json::json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret,
        });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FeishuError::Auth(e.to_string()))?;
        let parsed: ExchangeResponse = resp
            .json()
            .await
            .map_err(|e| FeishuError::Auth(e.to_string()))?;

        if parsed.code != 0 {
            return Err(FeishuError::Auth(format!(
                "exchange rejected with code {}: {}",
                parsed.code,
                parsed.msg.unwrap_or_default()
            )));
        }

        let token = parsed
            .tenant_access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FeishuError::Auth("exchange response carried no token".to_owned()))?;

        Ok(TokenGrant {
            token,
            expires_in: parsed.expire.unwrap_or(DEFAULT_EXPIRE_SECS),
        })
    }
}
