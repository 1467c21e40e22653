//! Per-chat channel configuration.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cb_domain::message::ChatKind;

/// Settings for a specific channel (chat).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub chat_id: String,
    pub chat_kind: ChatKind,
    #[serde(default)]
    pub name: String,
    #[serde(default = "d_true")]
    pub enabled: bool,

    /// Agent handling this channel when no rule overrides it.
    #[serde(default)]
    pub assigned_agent: Option<String>,
    /// Forward inbound messages to these chats.
    #[serde(default)]
    pub forward_to: Vec<String>,
    #[serde(default = "d_true")]
    pub auto_reply: bool,

    /// Empty = all commands allowed.
    #[serde(default)]
    pub allowed_commands: HashSet<String>,
    /// Deny-set; takes precedence over the allow-set.
    #[serde(default)]
    pub blocked_commands: HashSet<String>,
    /// Regex the message text must match to be processed.
    #[serde(default)]
    pub message_filter: Option<String>,

    /// Messages per minute, 0 = no limit.
    #[serde(default)]
    pub rate_limit: u32,
    #[serde(default)]
    pub cooldown_seconds: u32,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: u64,
}

fn d_true() -> bool {
    true
}

impl ChannelConfig {
    pub fn new(chat_id: &str, chat_kind: ChatKind) -> Self {
        Self {
            chat_id: chat_id.to_owned(),
            chat_kind,
            name: String::new(),
            enabled: true,
            assigned_agent: None,
            forward_to: Vec::new(),
            auto_reply: true,
            allowed_commands: HashSet::new(),
            blocked_commands: HashSet::new(),
            message_filter: None,
            rate_limit: 0,
            cooldown_seconds: 0,
            created_at: Utc::now(),
            last_activity: None,
            message_count: 0,
        }
    }

    /// Channel-level filter: disabled channels, denied commands, and
    /// messages failing the regex filter are not processed.
    pub fn should_process(&self, message: &str, command: Option<&str>) -> bool {
        if !self.enabled {
            return false;
        }

        if let Some(cmd) = command {
            if self.blocked_commands.contains(cmd) {
                return false;
            }
            if !self.allowed_commands.is_empty() && !self.allowed_commands.contains(cmd) {
                return false;
            }
        }

        if let Some(pattern) = &self.message_filter {
            // An invalid filter pattern is ignored rather than blocking.
            if let Ok(re) = regex::Regex::new(pattern) {
                if !re.is_match(message) {
                    return false;
                }
            }
        }

        true
    }
}
