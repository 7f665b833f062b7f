//! Canonical message model exchanged with the agent message bus.
//!
//! This is the only structure that crosses the bus boundary, serialized as a
//! JSON text frame with snake_case field names. The agent side implements the
//! same contract; neither side sees platform wire formats.

use serde::{Deserialize, Serialize};

/// Identity of the user a message came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Platform user id (Feishu open_id).
    pub user_id: String,
    /// Resolved display name, or a generic fallback label.
    pub display_name: String,
}

/// Destination of a message: a one-on-one chat or a shared group.
///
/// Exactly one variant applies to any inbound message; the variant determines
/// outbound routing (`Direct` → user-scoped id, `Group` → chat-scoped id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Conversation {
    /// One-on-one conversation with the given platform user id.
    Direct(String),
    /// Group conversation with the given platform chat id.
    Group(String),
}

/// One unit of message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    /// Plain text.
    Text(String),
    /// Image bytes as base64, or a `base64://`-prefixed reference on the
    /// agent→platform direction.
    Image(String),
    /// Emoji code. No platform-native equivalent is assumed outbound.
    Emoji(String),
    /// Content type the adapter does not understand; carries the raw type
    /// label. Dropped outbound, rendered as a bracketed label inbound.
    Unsupported(String),
}

/// The platform-neutral message exchanged with the agent message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Fixed identifier of this adapter instance (config `bus.platform`).
    pub platform: String,
    /// Platform message id, unique per inbound event. Internally generated
    /// messages use a fixed synthetic id.
    pub message_id: String,
    /// Seconds since epoch, derived from platform-native milliseconds or the
    /// wall clock when the platform value does not parse.
    pub timestamp: i64,
    /// Sending identity. Absent on outbound replies.
    #[serde(default)]
    pub sender: Option<Sender>,
    /// Conversation the message belongs to. Always present inbound.
    #[serde(default)]
    pub conversation: Option<Conversation>,
    /// Ordered content segments. Never empty: unsupported content falls back
    /// to a placeholder text segment.
    pub segments: Vec<Segment>,
    /// Original platform message id, echoed back by the agent so a reply can
    /// thread onto the message it answers.
    #[serde(default)]
    pub reply_target: Option<String>,
    /// True when the adapter's own identity was mentioned in the message.
    #[serde(default)]
    pub mentions_self: bool,
    /// The adapter's own platform user id, when a self-mention revealed it.
    #[serde(default)]
    pub mentioned_self_id: Option<String>,
    /// True for messages the adapter generated itself (self-registration).
    /// The dispatcher drops synthetic messages echoed back by the bus.
    #[serde(default)]
    pub synthetic: bool,
}

/// Message id used for the self-registration announcement.
pub const REGISTRATION_MESSAGE_ID: &str = "bot_register";

/// Text body of the self-registration announcement.
pub const REGISTRATION_BODY: &str = "[Bot Self Registration]";

impl Message {
    /// Build the synthetic self-registration announcement for the given bot
    /// identity.
    pub fn registration(platform: &str, bot_open_id: &str, bot_name: &str) -> Self {
        Self {
            platform: platform.to_owned(),
            message_id: REGISTRATION_MESSAGE_ID.to_owned(),
            timestamp: chrono::Utc::now().timestamp(),
            sender: Some(Sender {
                user_id: bot_open_id.to_owned(),
                display_name: bot_name.to_owned(),
            }),
            conversation: None,
            segments: vec![Segment::Text(REGISTRATION_BODY.to_owned())],
            reply_target: None,
            mentions_self: false,
            mentioned_self_id: None,
            synthetic: true,
        }
    }
}
