//! Conversation/user allow-and-deny gate.
//!
//! Consulted on the raw event before normalization forwards a message to the
//! bus. Blacklist entries always deny; in whitelist mode an event passes only
//! when its chat or its user is whitelisted.

use tracing::debug;

use crate::config::ChatConfig;

/// Pass/fail gate over chat and user ids.
pub struct ChatGate {
    config: ChatConfig,
}

impl ChatGate {
    /// Create a gate from the configured lists.
    pub fn new(config: ChatConfig) -> Self {
        Self { config }
    }

    /// Decide whether an event from this chat and user may pass.
    pub fn permits(&self, chat_id: &str, user_id: &str) -> bool {
        let config = &self.config;

        if config.chat_blacklist.iter().any(|c| c == chat_id)
            || config.user_blacklist.iter().any(|u| u == user_id)
        {
            debug!(chat_id, user_id, "event denied by blacklist");
            return false;
        }

        if config.whitelist_mode {
            let allowed = config.chat_whitelist.iter().any(|c| c == chat_id)
                || config.user_whitelist.iter().any(|u| u == user_id);
            if !allowed {
                debug!(chat_id, user_id, "event not whitelisted");
            }
            return allowed;
        }

        true
    }
}
