use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single token-bucket rule.
///
/// Refill rate is `capacity / window_secs`; `burst` caps the bucket (may
/// exceed `capacity` for bursty kinds).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitRule {
    pub capacity: u32,
    pub window_secs: u32,
    /// Defaults to `capacity` when omitted.
    #[serde(default)]
    pub burst: Option<u32>,
    /// Cooldown applied after a denial; further grants deferred until it
    /// elapses.
    #[serde(default)]
    pub cooldown_secs: u32,
}

impl LimitRule {
    pub fn burst_capacity(&self) -> u32 {
        self.burst.unwrap_or(self.capacity)
    }

    /// Tokens per second.
    pub fn rate(&self) -> f64 {
        f64::from(self.capacity) / f64::from(self.window_secs)
    }
}

/// Runtime-overridable rules keyed by limit kind tag
/// (`requests`, `tokens`, `commands`, `uploads`, `websocket`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub rules: HashMap<String, LimitRule>,
}
