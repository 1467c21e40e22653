//! The unified message model.
//!
//! Every transport adapter normalizes platform events into
//! [`UnifiedMessage`] on ingress and consumes [`OutgoingMessage`] on egress.
//! These types are the only message representation the core ever sees.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport & kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Supported messenger transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Telegram,
    Discord,
    Signal,
    GoogleChat,
    WebChat,
    Api,
    Webhook,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::Signal => "signal",
            Self::GoogleChat => "google_chat",
            Self::WebChat => "webchat",
            Self::Api => "api",
            Self::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Message content kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    File,
    Location,
    Sticker,
    Command,
    Callback,
}

/// The shape of the conversation a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    #[default]
    Direct,
    Group,
    Thread,
    Channel,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Thread => "thread",
            Self::Channel => "channel",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Users
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A sender as seen by its home transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalUser {
    pub transport: Transport,
    /// The sender's ID on the platform.
    pub platform_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CanonicalUser {
    /// The provider-peer ID: `<transport>:<platform_id>`.
    ///
    /// This is the key the identity-link table resolves from.
    pub fn peer_id(&self) -> String {
        format!("{}:{}", self.transport, self.platform_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A normalized inbound message, produced by transport adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedMessage {
    pub id: String,
    pub transport: Transport,
    #[serde(default)]
    pub kind: MessageKind,
    pub content: String,
    pub sender: CanonicalUser,
    pub chat_id: String,
    #[serde(default)]
    pub chat_kind: ChatKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Platform-specific raw payload, kept only for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl UnifiedMessage {
    /// Extract the leading `/command` from the content, if any.
    ///
    /// Returns the bare command without arguments (`"/echo hi"` → `"/echo"`).
    pub fn command(&self) -> Option<&str> {
        let content = self.content.trim_start();
        if !content.starts_with('/') {
            return None;
        }
        Some(content.split_whitespace().next().unwrap_or(content))
    }
}

/// A message to be sent through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub chat_id: String,
    pub content: String,
    /// `None` fans out to every registered adapter.
    #[serde(default)]
    pub transport: Option<Transport>,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutgoingMessage {
    pub fn text(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            content: content.into(),
            transport: None,
            kind: MessageKind::Text,
            reply_to: None,
            attachments: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn to_transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }
}

/// Per-transport result of an egress fan-out.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SendReport {
    pub success: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl SendReport {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty() && !self.success.is_empty()
    }
}
