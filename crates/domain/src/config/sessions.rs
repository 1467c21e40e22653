use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::message::ChatKind;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions & identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session routing configuration — controls how inbound messages map to
/// session keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Unique ID for this agent instance.
    #[serde(default = "d_agent_id")]
    pub agent_id: String,

    /// DM scoping strategy.  `per_channel_peer` is the safe default for
    /// multi-user inboxes (prevents cross-user context leakage).
    #[serde(default)]
    pub dm_scope: DmScope,

    /// Key suffix used by the `main` DM scope.
    #[serde(default = "d_main_key")]
    pub main_key: String,

    /// Collapse the same human across transports into one canonical identity.
    #[serde(default)]
    pub identity_links: Vec<IdentityLink>,

    /// Session lifecycle rules (resets, idle timeouts).
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Commands that force a session reset.  Config-provided, not hard-coded.
    #[serde(default = "d_reset_commands")]
    pub reset_commands: Vec<String>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            agent_id: d_agent_id(),
            dm_scope: DmScope::PerChannelPeer,
            main_key: d_main_key(),
            identity_links: Vec::new(),
            lifecycle: LifecycleConfig::default(),
            reset_commands: d_reset_commands(),
        }
    }
}

/// How DM sessions are scoped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DmScope {
    /// `agent:<agentId>:<mainKey>` — one shared DM session per agent.
    Main,
    /// `agent:<agentId>:dm:<peerId>` — isolated per peer.
    PerPeer,
    /// `agent:<agentId>:<transport>:dm:<peerId>` — isolated per
    /// transport+peer.  **Recommended default** for multi-user inboxes.
    #[default]
    PerChannelPeer,
}

/// Maps many raw peer IDs to one canonical identity so "Alice on Telegram"
/// and "Alice on Discord" share the same DM session.
///
/// Peer IDs are prefixed: `telegram:123`, `discord:987`, `signal:+33…`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityLink {
    /// The canonical identity key (e.g. `"alice"`).
    pub canonical: String,
    /// Raw peer IDs that all resolve to `canonical`.
    pub peer_ids: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reset lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session lifecycle rules with per-(chat kind, transport) overrides.
///
/// A session with neither a daily hour nor an idle timeout never auto-resets
/// (reset commands still work).  `daily_reset_hour` marks a session stale
/// once its last activity precedes the most recent crossing of that hour
/// (UTC); `idle_minutes` marks it stale after that much inactivity.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LifecycleConfig {
    /// Daily reset hour (0–23, UTC).  `None` disables daily reset.
    #[serde(default)]
    pub daily_reset_hour: Option<u8>,

    /// Idle timeout in minutes.  If the last message was more than this many
    /// minutes ago, the session is reset on the next inbound message.
    #[serde(default)]
    pub idle_minutes: Option<u32>,

    /// Per-chat-kind overrides (keys: `"direct"`, `"group"`, `"thread"`,
    /// `"channel"`).
    #[serde(default)]
    pub reset_by_kind: HashMap<String, ResetOverride>,

    /// Per-transport overrides (keys: `"telegram"`, `"discord"`, …).
    #[serde(default)]
    pub reset_by_transport: HashMap<String, ResetOverride>,
}

impl LifecycleConfig {
    /// Resolve the effective policy for a (chat kind, transport) pair.
    ///
    /// Per-transport overrides take precedence over per-kind overrides,
    /// which take precedence over the global defaults.
    pub fn resolve(&self, kind: ChatKind, transport: &str) -> (Option<u8>, Option<u32>) {
        let mut daily = self.daily_reset_hour;
        let mut idle = self.idle_minutes;

        if let Some(ovr) = self.reset_by_kind.get(kind.as_str()) {
            if ovr.daily_reset_hour.is_some() {
                daily = ovr.daily_reset_hour;
            }
            if ovr.idle_minutes.is_some() {
                idle = ovr.idle_minutes;
            }
        }

        if let Some(ovr) = self.reset_by_transport.get(transport) {
            if ovr.daily_reset_hour.is_some() {
                daily = ovr.daily_reset_hour;
            }
            if ovr.idle_minutes.is_some() {
                idle = ovr.idle_minutes;
            }
        }

        (daily, idle)
    }
}

/// Override fields for per-kind or per-transport lifecycle rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetOverride {
    pub daily_reset_hour: Option<u8>,
    pub idle_minutes: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Metadata carried with every inbound message, used to compute the
/// session key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InboundMetadata {
    /// Transport tag: `"telegram"`, `"discord"`, …
    pub transport: Option<String>,
    /// Canonical peer ID of the human who sent the message.
    pub peer_id: Option<String>,
    /// Chat / group / server ID.
    pub chat_id: Option<String>,
    /// Thread or topic ID.
    pub thread_id: Option<String>,
    /// The shape of the conversation.
    #[serde(default)]
    pub chat_kind: ChatKind,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_agent_id() -> String {
    "default".into()
}
fn d_main_key() -> String {
    "main".into()
}
fn d_reset_commands() -> Vec<String> {
    vec!["/reset".into(), "/new".into()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_override_wins_over_kind_override() {
        let mut cfg = LifecycleConfig {
            daily_reset_hour: Some(4),
            idle_minutes: Some(60),
            ..Default::default()
        };
        cfg.reset_by_kind.insert(
            "group".into(),
            ResetOverride {
                daily_reset_hour: Some(6),
                idle_minutes: None,
            },
        );
        cfg.reset_by_transport.insert(
            "discord".into(),
            ResetOverride {
                daily_reset_hour: Some(8),
                idle_minutes: Some(30),
            },
        );

        assert_eq!(cfg.resolve(ChatKind::Group, "telegram"), (Some(6), Some(60)));
        assert_eq!(cfg.resolve(ChatKind::Group, "discord"), (Some(8), Some(30)));
        assert_eq!(cfg.resolve(ChatKind::Direct, "telegram"), (Some(4), Some(60)));
    }

    #[test]
    fn default_reset_commands() {
        let cfg = SessionsConfig::default();
        assert!(cfg.reset_commands.contains(&"/reset".to_string()));
    }
}
