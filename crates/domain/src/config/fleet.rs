use serde::{Deserialize, Serialize};

/// How the fleet supervisor distributes users across gateway instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    #[default]
    RoundRobin,
    LeastConnections,
    Random,
    /// Stable hash of the user ID modulo the available set.
    IpHash,
    Weighted,
}

/// Multi-gateway fleet settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub strategy: BalanceStrategy,

    /// Reuse a prior gateway assignment for a user until its TTL expires or
    /// the gateway becomes unavailable.
    #[serde(default = "d_true")]
    pub sticky_sessions: bool,

    #[serde(default = "d_sticky_ttl")]
    pub sticky_ttl_secs: u64,

    /// Interval between `/health` probes of each gateway.
    #[serde(default = "d_health_interval")]
    pub health_check_interval_secs: u64,

    /// Consecutive failures before a gateway is marked unhealthy.
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive successes before an unhealthy gateway is healthy again.
    #[serde(default = "d_recovery_threshold")]
    pub recovery_threshold: u32,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            strategy: BalanceStrategy::RoundRobin,
            sticky_sessions: true,
            sticky_ttl_secs: d_sticky_ttl(),
            health_check_interval_secs: d_health_interval(),
            failure_threshold: d_failure_threshold(),
            recovery_threshold: d_recovery_threshold(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_sticky_ttl() -> u64 {
    3600
}
fn d_health_interval() -> u64 {
    30
}
fn d_failure_threshold() -> u32 {
    3
}
fn d_recovery_threshold() -> u32 {
    2
}
