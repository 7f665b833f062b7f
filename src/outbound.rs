//! Outbound dispatch: canonical replies back onto the chat platform.
//!
//! Dispatch is fire-and-forget: failures are logged, never propagated, and
//! one segment's failure does not abort the remaining segments. Segments of
//! one message go out strictly in sequence; distinct messages are dispatched
//! concurrently and may interleave their platform calls.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::feishu::client::{PlatformApi, ReceiveIdType};
use crate::feishu::media::AttachmentPipeline;
use crate::message::{Conversation, Message, Segment};

/// Converts canonical reply messages into chat-platform API calls.
pub struct OutboundDispatcher {
    api: Arc<dyn PlatformApi>,
    attachments: AttachmentPipeline,
}

impl OutboundDispatcher {
    /// Create a dispatcher over the given platform API.
    pub fn new(api: Arc<dyn PlatformApi>) -> Self {
        let attachments = AttachmentPipeline::new(Arc::clone(&api));
        Self { api, attachments }
    }

    /// Dispatch one reply message, segment by segment.
    pub async fn dispatch(&self, message: Message) {
        if message.synthetic {
            debug!(
                message_id = %message.message_id,
                "dropping synthetic message echoed back by the bus"
            );
            return;
        }

        let Some((receive_id, receive_id_type)) = route(&message) else {
            warn!(
                message_id = %message.message_id,
                platform = %message.platform,
                "cannot determine message receiver, dropping reply"
            );
            return;
        };

        // The threaded-reply call answers a single message, so only the first
        // text segment threads; everything after goes out as a plain send.
        let mut reply_target = message.reply_target.as_deref();

        for segment in &message.segments {
            match segment {
                Segment::Text(text) => {
                    if text.trim().is_empty() {
                        continue;
                    }
                    let content = serde_json::json!({ "text": text }).to_string();
                    let result = match reply_target.take() {
                        Some(target) => self.api.reply_message(target, "text", &content).await,
                        None => {
                            self.api
                                .send_message(&receive_id, receive_id_type, "text", &content)
                                .await
                        }
                    };
                    if let Err(e) = result {
                        warn!(
                            receive_id = %receive_id,
                            error = %e,
                            "text segment dropped after send failure"
                        );
                    }
                }
                Segment::Image(payload) => {
                    self.send_image(&receive_id, receive_id_type, payload).await;
                }
                Segment::Emoji(_) | Segment::Unsupported(_) => {
                    // No platform-native equivalent; skipped.
                }
            }
        }
    }

    /// Decode, upload, and send one image segment, best-effort.
    async fn send_image(&self, receive_id: &str, receive_id_type: ReceiveIdType, payload: &str) {
        let image_key = match self.attachments.upload(payload).await {
            Ok(key) => key,
            Err(e) => {
                warn!(receive_id, error = %e, "image segment dropped after upload failure");
                return;
            }
        };

        let content = serde_json::json!({ "image_key": image_key }).to_string();
        if let Err(e) = self
            .api
            .send_message(receive_id, receive_id_type, "image", &content)
            .await
        {
            warn!(
                receive_id,
                image_key = %image_key,
                error = %e,
                "image segment dropped after send failure"
            );
        }
    }
}

/// Resolve the platform receiver from the conversation, falling back to the
/// sender identity when a reply carries only a user.
fn route(message: &Message) -> Option<(String, ReceiveIdType)> {
    match &message.conversation {
        Some(Conversation::Group(chat_id)) => Some((chat_id.clone(), ReceiveIdType::ChatId)),
        Some(Conversation::Direct(user_id)) => Some((user_id.clone(), ReceiveIdType::OpenId)),
        None => message
            .sender
            .as_ref()
            .filter(|s| !s.user_id.is_empty())
            .map(|s| (s.user_id.clone(), ReceiveIdType::OpenId)),
    }
}
