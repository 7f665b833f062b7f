//! Typed payloads for events delivered over the event-stream channel.
//!
//! Raw frames are decoded once, at the channel boundary, into these immutable
//! structures; nothing downstream touches loosely-typed JSON. Every field the
//! platform may omit is an `Option` or carries a serde default.

use serde::Deserialize;

use super::FeishuError;

/// Event type tag for inbound chat messages.
pub const MESSAGE_EVENT_TYPE: &str = "im.message.receive_v1";

/// Chat-type tag marking a group conversation; anything else is direct.
pub const GROUP_CHAT_TYPE: &str = "group";

/// Sender type tag marking an automated/application actor.
pub const APP_SENDER_TYPE: &str = "app";

/// Envelope around one event frame.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    /// Routing header.
    pub header: EventHeader,
    /// Message payload; absent for non-message event types.
    pub event: Option<MessageEvent>,
}

/// Routing header of an event frame.
#[derive(Debug, Clone, Deserialize)]
pub struct EventHeader {
    /// Platform-assigned event id.
    #[serde(default)]
    pub event_id: String,
    /// Event type tag, e.g. [`MESSAGE_EVENT_TYPE`].
    #[serde(default)]
    pub event_type: String,
}

/// A received chat message event.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    /// Who sent the message.
    pub sender: EventSender,
    /// The message body.
    pub message: EventMessage,
}

/// Sender block of a message event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventSender {
    /// Sender ids in the platform's several id spaces.
    #[serde(default)]
    pub sender_id: Option<SenderId>,
    /// `"user"` for humans, [`APP_SENDER_TYPE`] for automated actors.
    #[serde(default)]
    pub sender_type: String,
    /// Account-tenant marker of the sender.
    #[serde(default)]
    pub tenant_key: Option<String>,
}

/// Sender id spaces.
#[derive(Debug, Clone, Deserialize)]
pub struct SenderId {
    /// App-scoped user id. The id space the adapter routes by.
    #[serde(default)]
    pub open_id: Option<String>,
    /// Tenant-scoped user id.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Message body of a message event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    /// Platform message id, unique per event.
    pub message_id: String,
    /// Creation time in epoch milliseconds, as a decimal string.
    #[serde(default)]
    pub create_time: String,
    /// Conversation id.
    #[serde(default)]
    pub chat_id: String,
    /// Conversation kind tag; [`GROUP_CHAT_TYPE`] or a direct-chat tag.
    #[serde(default)]
    pub chat_type: String,
    /// Declared content type: `"text"`, `"image"`, or another tag.
    #[serde(default)]
    pub message_type: String,
    /// Content as a nested JSON string, shaped by `message_type`.
    #[serde(default)]
    pub content: String,
    /// Mention entries referenced by placeholder keys inside the text.
    #[serde(default)]
    pub mentions: Vec<Mention>,
}

/// One mention entry in a message.
#[derive(Debug, Clone, Deserialize)]
pub struct Mention {
    /// Placeholder token inside the text, e.g. `@_user_1`. Unique per entry.
    #[serde(default)]
    pub key: String,
    /// Ids of the mentioned account.
    #[serde(default)]
    pub id: Option<MentionId>,
    /// Display name of the mentioned account.
    #[serde(default)]
    pub name: String,
    /// Account-tenant marker; present when the mention targets the adapter's
    /// own identity.
    #[serde(default)]
    pub tenant_key: Option<String>,
}

/// Id spaces of a mentioned account.
#[derive(Debug, Clone, Deserialize)]
pub struct MentionId {
    /// App-scoped user id of the mentioned account.
    #[serde(default)]
    pub open_id: Option<String>,
}

/// Nested content of a `text` message.
#[derive(Debug, Deserialize)]
pub struct TextContent {
    /// The message text.
    #[serde(default)]
    pub text: String,
}

/// Nested content of an `image` message.
#[derive(Debug, Deserialize)]
pub struct ImageContent {
    /// Asset reference resolvable through the attachment pipeline.
    #[serde(default)]
    pub image_key: String,
}

/// Decode one raw frame into an event envelope.
///
/// # Errors
///
/// Returns [`FeishuError::Decode`] for malformed JSON.
pub fn decode_envelope(frame: &str) -> Result<EventEnvelope, FeishuError> {
    serde_json::from_str(frame).map_err(|e| FeishuError::Decode(format!("bad event frame: {e}")))
}
