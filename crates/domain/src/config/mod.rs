mod access;
mod executor;
mod fleet;
mod heartbeat;
mod queue;
mod ratelimit;
mod server;
mod sessions;
mod streaming;
mod workspace;

pub use access::*;
pub use executor::*;
pub use fleet::*;
pub use heartbeat::*;
pub use queue::*;
pub use ratelimit::*;
pub use server::*;
pub use sessions::*;
pub use streaming::*;
pub use workspace::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn error(field: &str, message: &str) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}

fn warning(field: &str, message: &str) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Warning,
        field: field.into(),
        message: message.into(),
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(error("server.host", "host must not be empty"));
        }

        if self.sessions.agent_id.is_empty() {
            errors.push(error("sessions.agent_id", "agent_id must not be empty"));
        }
        if self.sessions.main_key.is_empty() {
            errors.push(error("sessions.main_key", "main_key must not be empty"));
        }
        if let Some(hour) = self.sessions.lifecycle.daily_reset_hour {
            if hour > 23 {
                errors.push(error(
                    "sessions.lifecycle.daily_reset_hour",
                    "hour must be in 0..=23",
                ));
            }
        }

        for (kind, rule) in &self.rate_limit.rules {
            if rule.capacity == 0 || rule.window_secs == 0 {
                errors.push(error(
                    &format!("rate_limit.rules.{kind}"),
                    "capacity and window_secs must be greater than 0",
                ));
            }
        }

        if self.streaming.min_update_interval_ms == 0 {
            errors.push(warning(
                "streaming.min_update_interval_ms",
                "0 disables debouncing; platform edits will be sent per append",
            ));
        }
        if self.streaming.chunk.max_length < self.streaming.chunk.min_chunk_size {
            errors.push(error(
                "streaming.chunk.max_length",
                "max_length must be at least min_chunk_size",
            ));
        }

        if self.queue.max_concurrent == 0 {
            errors.push(error("queue.max_concurrent", "must be greater than 0"));
        }

        if self.fleet.sticky_sessions && self.fleet.sticky_ttl_secs == 0 {
            errors.push(warning(
                "fleet.sticky_ttl_secs",
                "sticky sessions with a zero TTL never stick",
            ));
        }

        if self.executor.binary.is_empty() {
            errors.push(warning(
                "executor.binary",
                "no executor binary configured; turns will fail until set",
            ));
        }
        if self.executor.timeout_secs == 0 {
            errors.push(error("executor.timeout_secs", "must be greater than 0"));
        }

        if self.heartbeat.failure_threshold == 0 || self.heartbeat.recovery_threshold == 0 {
            errors.push(error(
                "heartbeat",
                "failure_threshold and recovery_threshold must be greater than 0",
            ));
        }

        errors
    }
}
