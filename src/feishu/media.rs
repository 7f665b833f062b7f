//! Attachment pipeline: fetch binary assets referenced by inbound events and
//! upload binary assets referenced by outbound replies.
//!
//! Binary payloads crossing the canonical-message boundary travel as base64
//! text, either bare or behind a `base64://` reference prefix from the agent
//! side. Both encodings are accepted and normalized to raw bytes before
//! upload.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::debug;

use super::client::PlatformApi;
use super::FeishuError;

/// Textual reference prefix the agent side uses for embedded image bytes.
pub const BASE64_REF_PREFIX: &str = "base64://";

/// Retrieval/upload pipeline for binary assets.
pub struct AttachmentPipeline {
    api: Arc<dyn PlatformApi>,
}

impl AttachmentPipeline {
    /// Create a pipeline over the given platform API.
    pub fn new(api: Arc<dyn PlatformApi>) -> Self {
        Self { api }
    }

    /// Authenticated fetch of an asset scoped to the originating message.
    ///
    /// # Errors
    ///
    /// Returns [`FeishuError::Asset`] on any download failure; callers treat
    /// this as non-fatal and substitute placeholder text.
    pub async fn download(&self, message_id: &str, file_key: &str) -> Result<Vec<u8>, FeishuError> {
        let bytes = self.api.download_resource(message_id, file_key).await?;
        debug!(message_id, file_key, size = bytes.len(), "asset downloaded");
        Ok(bytes)
    }

    /// Decode an agent-supplied image payload and upload it, returning the
    /// platform handle referencing the stored asset.
    ///
    /// # Errors
    ///
    /// Returns [`FeishuError::Decode`] for an undecodable payload or
    /// [`FeishuError::Asset`] when the upload fails.
    pub async fn upload(&self, payload: &str) -> Result<String, FeishuError> {
        let bytes = decode_image_payload(payload)?;
        let image_key = self.api.upload_image(bytes).await?;
        debug!(image_key = %image_key, "asset uploaded");
        Ok(image_key)
    }
}

/// Normalize an image payload to raw bytes, stripping the `base64://`
/// reference prefix when present.
///
/// # Errors
///
/// Returns [`FeishuError::Decode`] when the payload is not valid base64.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, FeishuError> {
    let encoded = payload.strip_prefix(BASE64_REF_PREFIX).unwrap_or(payload);
    BASE64
        .decode(encoded.trim())
        .map_err(|e| FeishuError::Decode(format!("undecodable image payload: {e}")))
}

/// Encode downloaded asset bytes for the canonical-message boundary.
pub fn encode_image(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}
