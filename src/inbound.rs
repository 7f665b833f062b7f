//! Inbound normalization: raw chat-platform events into canonical messages.
//!
//! Normalization never raises for bad content: unparseable timestamps fall
//! back to the wall clock, failed asset downloads and unknown content types
//! fall back to placeholder text segments, and a failed display-name lookup
//! falls back to a generic label. The only event that produces no message at
//! all is one sent by an automated actor (the adapter's own echo).

use std::sync::Arc;

use tracing::{debug, warn};

use crate::feishu::client::PlatformApi;
use crate::feishu::event::{
    ImageContent, MessageEvent, Mention, TextContent, APP_SENDER_TYPE, GROUP_CHAT_TYPE,
};
use crate::feishu::media::{encode_image, AttachmentPipeline};
use crate::message::{Conversation, Message, Segment, Sender};

/// Display name used when the user lookup fails or declines.
pub const FALLBACK_SENDER_NAME: &str = "Feishu user";

/// Placeholder for an image whose bytes are not carried inline.
const IMAGE_LABEL: &str = "[image]";

/// Placeholder when the referenced asset could not be fetched.
const IMAGE_FAILED_LABEL: &str = "[image download failed]";

/// Result of rewriting mention placeholders inside message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionRewrite {
    /// Text with every placeholder key replaced by `@<name:user_id>`.
    pub text: String,
    /// True when a mention carried the adapter's account-tenant marker.
    pub mentions_self: bool,
    /// The mentioned self id, when [`Self::mentions_self`] is set.
    pub mentioned_self_id: Option<String>,
}

/// Replace each mention placeholder with a formatted reference and detect
/// self-mentions.
///
/// Keys are unique tokens, so plain substring replacement is order-independent
/// and idempotent: text that no longer contains a key is left untouched.
pub fn rewrite_mentions(text: &str, mentions: &[Mention]) -> MentionRewrite {
    let mut rewritten = text.to_owned();
    let mut mentions_self = false;
    let mut mentioned_self_id = None;

    for mention in mentions {
        let open_id = mention
            .id
            .as_ref()
            .and_then(|id| id.open_id.as_deref())
            .unwrap_or("");

        if mention.tenant_key.as_deref().is_some_and(|k| !k.is_empty()) && !open_id.is_empty() {
            mentions_self = true;
            mentioned_self_id = Some(open_id.to_owned());
        }

        if !mention.key.is_empty() && !open_id.is_empty() {
            let replacement = format!("@<{}:{}>", mention.name, open_id);
            rewritten = rewritten.replace(&mention.key, &replacement);
        }
    }

    MentionRewrite {
        text: rewritten,
        mentions_self,
        mentioned_self_id,
    }
}

/// Parse a platform-native millisecond timestamp string into epoch seconds,
/// substituting the current wall clock when it does not parse.
pub fn parse_timestamp(create_time_ms: &str) -> i64 {
    match create_time_ms.trim().parse::<i64>() {
        Ok(ms) => ms.checked_div(1000).unwrap_or_default(),
        Err(_) => chrono::Utc::now().timestamp(),
    }
}

/// Converts raw chat-platform events into canonical messages.
pub struct InboundNormalizer {
    platform: String,
    api: Arc<dyn PlatformApi>,
    attachments: AttachmentPipeline,
}

impl InboundNormalizer {
    /// Create a normalizer tagging messages with the given platform name.
    pub fn new(platform: &str, api: Arc<dyn PlatformApi>) -> Self {
        let attachments = AttachmentPipeline::new(Arc::clone(&api));
        Self {
            platform: platform.to_owned(),
            api,
            attachments,
        }
    }

    /// Normalize one event into a canonical message.
    ///
    /// Returns `None` for events sent by automated actors, which would
    /// otherwise echo the adapter's own output back into the pipeline.
    pub async fn normalize(&self, event: &MessageEvent) -> Option<Message> {
        if event.sender.sender_type == APP_SENDER_TYPE {
            debug!(
                message_id = %event.message.message_id,
                "discarding event from automated actor"
            );
            return None;
        }

        let user_id = sender_user_id(event);
        let display_name = self.resolve_display_name(&user_id).await;

        let message = &event.message;
        let conversation = if message.chat_type == GROUP_CHAT_TYPE {
            Conversation::Group(message.chat_id.clone())
        } else {
            Conversation::Direct(user_id.clone())
        };
        let timestamp = parse_timestamp(&message.create_time);

        let (segments, rewrite) = self.parse_content(event).await;

        Some(Message {
            platform: self.platform.clone(),
            message_id: message.message_id.clone(),
            timestamp,
            sender: Some(Sender {
                user_id,
                display_name,
            }),
            conversation: Some(conversation),
            segments,
            reply_target: Some(message.message_id.clone()),
            mentions_self: rewrite.mentions_self,
            mentioned_self_id: rewrite.mentioned_self_id,
            synthetic: false,
        })
    }

    /// Best-effort display-name lookup; failure is non-fatal.
    async fn resolve_display_name(&self, user_id: &str) -> String {
        if user_id.is_empty() {
            return FALLBACK_SENDER_NAME.to_owned();
        }
        match self.api.user_display_name(user_id).await {
            Ok(Some(name)) => name,
            Ok(None) => FALLBACK_SENDER_NAME.to_owned(),
            Err(e) => {
                warn!(user_id, error = %e, "user lookup failed, using fallback label");
                FALLBACK_SENDER_NAME.to_owned()
            }
        }
    }

    /// Parse declared content into segments, applying mention rewriting.
    ///
    /// Always yields at least one segment.
    async fn parse_content(&self, event: &MessageEvent) -> (Vec<Segment>, MentionRewrite) {
        let message = &event.message;

        match message.message_type.as_str() {
            "text" => {
                let text = match serde_json::from_str::<TextContent>(&message.content) {
                    Ok(content) => content.text,
                    Err(e) => {
                        warn!(
                            message_id = %message.message_id,
                            error = %e,
                            "undecodable text content, passing raw body through"
                        );
                        message.content.clone()
                    }
                };
                let rewrite = rewrite_mentions(&text, &message.mentions);
                (vec![Segment::Text(rewrite.text.clone())], rewrite)
            }
            "image" => {
                let segments = self
                    .parse_image(message.message_id.as_str(), &message.content)
                    .await;
                (segments, rewrite_mentions("", &message.mentions))
            }
            other => (
                vec![Segment::Text(format!("[{other}]"))],
                rewrite_mentions("", &message.mentions),
            ),
        }
    }

    /// Resolve an image reference through the attachment pipeline.
    async fn parse_image(&self, message_id: &str, content: &str) -> Vec<Segment> {
        let image_key = match serde_json::from_str::<ImageContent>(content) {
            Ok(content) => content.image_key,
            Err(e) => {
                warn!(message_id, error = %e, "undecodable image content");
                String::new()
            }
        };
        if image_key.is_empty() || message_id.is_empty() {
            return vec![Segment::Text(IMAGE_LABEL.to_owned())];
        }

        match self.attachments.download(message_id, &image_key).await {
            Ok(bytes) => vec![Segment::Image(encode_image(&bytes))],
            Err(e) => {
                warn!(message_id, image_key = %image_key, error = %e, "asset download failed");
                vec![Segment::Text(IMAGE_FAILED_LABEL.to_owned())]
            }
        }
    }
}

/// Pick the sender's user id: the app-scoped id when present, else the
/// tenant-scoped id.
fn sender_user_id(event: &MessageEvent) -> String {
    event
        .sender
        .sender_id
        .as_ref()
        .and_then(|id| id.open_id.clone().or_else(|| id.user_id.clone()))
        .unwrap_or_default()
}
