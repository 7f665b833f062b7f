//! Feishu (Lark) platform adapter: REST client, credential cache, attachment
//! pipeline, typed event payloads, and the long-lived event-stream channel.
//!
//! All outbound calls go through [`client::FeishuClient`], which acquires a
//! tenant access token from [`token::TokenCache`] on every call (the cache
//! no-ops while the token is still valid).

pub mod client;
pub mod event;
pub mod media;
pub mod stream;
pub mod token;

/// Errors from the Feishu platform surface.
#[derive(Debug, thiserror::Error)]
pub enum FeishuError {
    /// Credential exchange failed or the platform rejected the token.
    /// Fatal to the single call that needed the token, never to the process.
    #[error("credential exchange failed: {0}")]
    Auth(String),

    /// Connectivity or timeout on a REST call.
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The platform returned a non-success business code.
    #[error("platform API error {code}: {msg}")]
    Api {
        /// Platform business code (0 means success).
        code: i64,
        /// Platform error description.
        msg: String,
    },

    /// Binary asset download or upload failed.
    #[error("asset transfer failed: {0}")]
    Asset(String),

    /// Malformed payload: undecodable event JSON or attachment encoding.
    #[error("malformed payload: {0}")]
    Decode(String),
}
