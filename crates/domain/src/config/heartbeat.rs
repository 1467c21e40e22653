use serde::{Deserialize, Serialize};

/// Default probe parameters for the heartbeat monitor.  Individual probes
/// may override any of these at registration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "d_interval")]
    pub interval_secs: u64,

    /// A probe exceeding this counts as a failure.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,

    /// Consecutive failures before a probe goes unhealthy.
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive successes before an unhealthy probe is healthy again.
    #[serde(default = "d_recovery_threshold")]
    pub recovery_threshold: u32,

    /// Invoke the probe's recovery callback on the transition to unhealthy.
    #[serde(default = "d_true")]
    pub auto_recover: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: d_interval(),
            timeout_secs: d_timeout(),
            failure_threshold: d_failure_threshold(),
            recovery_threshold: d_recovery_threshold(),
            auto_recover: true,
        }
    }
}

fn d_interval() -> u64 {
    30
}
fn d_timeout() -> u64 {
    10
}
fn d_failure_threshold() -> u32 {
    3
}
fn d_recovery_threshold() -> u32 {
    2
}
fn d_true() -> bool {
    true
}
