//! REST client for the Feishu open platform.
//!
//! Every operation acquires a token from the shared [`TokenCache`] before the
//! call; the cache no-ops while the token is still valid. All calls carry a
//! short timeout so a stalled platform endpoint cannot wedge a dispatch task.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::token::TokenCache;
use super::FeishuError;

/// Default API base for the Feishu open platform.
pub const DEFAULT_BASE_URL: &str = "https://open.feishu.cn/open-apis";

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for all REST operations.
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Header carrying the platform-side request id, logged for traceability.
const LOG_ID_HEADER: &str = "X-Tt-Logid";

/// How the `receive_id` of an outbound message is scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveIdType {
    /// User-scoped id for direct conversations.
    OpenId,
    /// Chat-scoped id for group conversations.
    ChatId,
}

impl ReceiveIdType {
    /// The query-parameter value the platform expects.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenId => "open_id",
            Self::ChatId => "chat_id",
        }
    }
}

/// The adapter's own platform identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    /// The bot's open_id.
    pub open_id: String,
    /// The bot's application display name.
    pub app_name: String,
}

/// The chat-platform REST surface the translation engine depends on.
///
/// A trait seam so the normalizer, dispatcher, and attachment pipeline can be
/// exercised against a recording double in tests.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Send a message to a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error when the token cannot be acquired, the request fails,
    /// or the platform returns a non-success code.
    async fn send_message(
        &self,
        receive_id: &str,
        receive_id_type: ReceiveIdType,
        msg_type: &str,
        content: &str,
    ) -> Result<(), FeishuError>;

    /// Reply to an existing message, threading onto it.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`PlatformApi::send_message`].
    async fn reply_message(
        &self,
        message_id: &str,
        msg_type: &str,
        content: &str,
    ) -> Result<(), FeishuError>;

    /// Upload image bytes, returning the opaque `image_key` handle.
    ///
    /// # Errors
    ///
    /// Returns [`FeishuError::Asset`] when the platform rejects the upload.
    async fn upload_image(&self, image: Vec<u8>) -> Result<String, FeishuError>;

    /// Fetch a binary asset referenced by an inbound message.
    ///
    /// # Errors
    ///
    /// Returns [`FeishuError::Asset`] on any non-success HTTP status; callers
    /// treat this as non-fatal and substitute placeholder text.
    async fn download_resource(
        &self,
        message_id: &str,
        file_key: &str,
    ) -> Result<Vec<u8>, FeishuError>;

    /// Best-effort display-name lookup for a platform user.
    ///
    /// Returns `Ok(None)` when the platform declines the lookup; callers fall
    /// back to a generic label.
    ///
    /// # Errors
    ///
    /// Returns an error only for token or transport failures.
    async fn user_display_name(&self, open_id: &str) -> Result<Option<String>, FeishuError>;

    /// Fetch the adapter's own platform identity.
    ///
    /// # Errors
    ///
    /// Returns an error when the identity cannot be fetched; the registration
    /// handshake treats this as non-fatal.
    async fn bot_identity(&self) -> Result<BotIdentity, FeishuError>;
}

/// Response envelope shared by most of the API surface.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload, mapping a non-success business code to an error.
    fn into_data(self) -> Result<Option<T>, FeishuError> {
        if self.code != 0 {
            return Err(FeishuError::Api {
                code: self.code,
                msg: self.msg,
            });
        }
        Ok(self.data)
    }
}

#[derive(Debug, Deserialize)]
struct SendMessageData {
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadImageData {
    image_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfoData {
    user: Option<UserInfo>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    name: Option<String>,
}

/// `GET /bot/v3/info` carries the bot object at the top level, not in `data`.
#[derive(Debug, Deserialize)]
struct BotInfoResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    bot: Option<BotInfo>,
}

#[derive(Debug, Deserialize)]
struct BotInfo {
    open_id: Option<String>,
    app_name: Option<String>,
}

/// Client for the Feishu open platform REST API.
pub struct FeishuClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenCache>,
}

/// Build the HTTP client used for all REST calls, with connect and request
/// timeouts applied.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to build HTTP client with timeouts, using default");
            reqwest::Client::default()
        })
}

impl FeishuClient {
    /// Create a client against the given base URL, sharing the token cache.
    pub fn new(http: reqwest::Client, base_url: &str, tokens: Arc<TokenCache>) -> Self {
        Self {
            http,
            base_url: base_url.to_owned(),
            tokens,
        }
    }

    /// Log the platform request id when the response carries one.
    fn log_request_id(resp: &reqwest::Response) {
        if let Some(id) = resp
            .headers()
            .get(LOG_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            debug!(log_id = id, "platform request id");
        }
    }
}

#[async_trait]
impl PlatformApi for FeishuClient {
    async fn send_message(
        &self,
        receive_id: &str,
        receive_id_type: ReceiveIdType,
        msg_type: &str,
        content: &str,
    ) -> Result<(), FeishuError> {
        let token = self.tokens.token().await?;
        let url = format!("{}/im/v1/messages", self.base_url);
        let body = serde_json::json!({
            "receive_id": receive_id,
            "msg_type": msg_type,
            "content": content,
        });

        let resp = self
            .http
            .post(&url)
            .query(&[("receive_id_type", receive_id_type.as_str())])
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        Self::log_request_id(&resp);

        let envelope: ApiEnvelope<SendMessageData> = resp.json().await?;
        let data = envelope.into_data()?;
        let message_id = data.and_then(|d| d.message_id).unwrap_or_default();
        debug!(receive_id, message_id = %message_id, "message sent");
        Ok(())
    }

    async fn reply_message(
        &self,
        message_id: &str,
        msg_type: &str,
        content: &str,
    ) -> Result<(), FeishuError> {
        let token = self.tokens.token().await?;
        let url = format!("{}/im/v1/messages/{message_id}/reply", self.base_url);
        let body = serde_json::json!({
            "msg_type": msg_type,
            "content": content,
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        Self::log_request_id(&resp);

        let envelope: ApiEnvelope<SendMessageData> = resp.json().await?;
        envelope.into_data()?;
        debug!(message_id, "reply sent");
        Ok(())
    }

    async fn upload_image(&self, image: Vec<u8>) -> Result<String, FeishuError> {
        let token = self.tokens.token().await?;
        let url = format!("{}/im/v1/images", self.base_url);

        let form = reqwest::multipart::Form::new()
            .text("image_type", "message")
            .part(
                "image",
                reqwest::multipart::Part::bytes(image).file_name("image.jpg"),
            );

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .multipart(form)
            .send()
            .await?;
        Self::log_request_id(&resp);

        let envelope: ApiEnvelope<UploadImageData> = resp.json().await?;
        let data = envelope.into_data()?;
        data.and_then(|d| d.image_key)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| FeishuError::Asset("upload response carried no image_key".to_owned()))
    }

    async fn download_resource(
        &self,
        message_id: &str,
        file_key: &str,
    ) -> Result<Vec<u8>, FeishuError> {
        let token = self.tokens.token().await?;
        let url = format!(
            "{}/im/v1/messages/{message_id}/resources/{file_key}",
            self.base_url
        );

        let resp = self
            .http
            .get(&url)
            .query(&[("type", "image")])
            .bearer_auth(&token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            warn!(message_id, file_key, %status, body = %preview, "asset download failed");
            return Err(FeishuError::Asset(format!(
                "download of {file_key} failed with HTTP {status}"
            )));
        }

        let bytes = resp.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn user_display_name(&self, open_id: &str) -> Result<Option<String>, FeishuError> {
        let token = self.tokens.token().await?;
        let url = format!("{}/contact/v3/users/{open_id}", self.base_url);

        let resp = self
            .http
            .get(&url)
            .query(&[("user_id_type", "open_id")])
            .bearer_auth(&token)
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!(open_id, status = %resp.status(), "user lookup returned non-success status");
        }

        let envelope: ApiEnvelope<UserInfoData> = resp.json().await?;
        if envelope.code != 0 {
            warn!(open_id, code = envelope.code, msg = %envelope.msg, "user lookup declined");
            return Ok(None);
        }
        Ok(envelope
            .data
            .and_then(|d| d.user)
            .and_then(|u| u.name)
            .filter(|n| !n.is_empty()))
    }

    async fn bot_identity(&self) -> Result<BotIdentity, FeishuError> {
        let token = self.tokens.token().await?;
        let url = format!("{}/bot/v3/info", self.base_url);

        let resp = self.http.get(&url).bearer_auth(&token).send().await?;
        let parsed: BotInfoResponse = resp.json().await?;

        if parsed.code != 0 {
            return Err(FeishuError::Api {
                code: parsed.code,
                msg: parsed.msg,
            });
        }

        let bot = parsed
            .bot
            .ok_or_else(|| FeishuError::Decode("bot info response carried no bot".to_owned()))?;
        Ok(BotIdentity {
            open_id: bot.open_id.unwrap_or_default(),
            app_name: bot.app_name.unwrap_or_else(|| "Kaisy".to_owned()),
        })
    }
}
