use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Access-control seed data loaded at startup.
///
/// The runtime tables (group settings, per-user grants, elevations) are
/// mutated through the permission manager; this section only provides the
/// initial state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccessConfig {
    /// The bot owner's canonical user ID.
    #[serde(default)]
    pub owner: Option<String>,

    /// Global admins — bypass every lock and blacklist.
    #[serde(default)]
    pub global_admins: HashSet<String>,

    /// Canonical user IDs denied everywhere.
    #[serde(default)]
    pub global_blacklist: HashSet<String>,

    /// When non-empty, only these users may talk to the bot at all.
    #[serde(default)]
    pub allowed_users: HashSet<String>,

    /// IP addresses denied on the API/WebChat transports.
    #[serde(default)]
    pub ip_blacklist: HashSet<String>,

    /// When non-empty, only these IPs are accepted.
    #[serde(default)]
    pub ip_whitelist: HashSet<String>,

    /// Default elevation TTL in minutes for `/elevated on`.
    #[serde(default = "d_elevation_minutes")]
    pub elevation_minutes: u32,
}

fn d_elevation_minutes() -> u32 {
    30
}
