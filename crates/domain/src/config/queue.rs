use serde::{Deserialize, Serialize};

/// Background task-queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum concurrent workers.
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent: usize,

    /// Default per-task timeout in seconds.
    #[serde(default = "d_timeout")]
    pub default_timeout_secs: u64,

    #[serde(default = "d_retries")]
    pub default_max_retries: u32,

    /// Base delay for exponential retry backoff.
    #[serde(default = "d_retry_delay")]
    pub retry_base_delay_secs: f64,

    /// Optional minimum gap between task starts, in seconds.
    #[serde(default)]
    pub rate_limit_gap_secs: Option<f64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: d_max_concurrent(),
            default_timeout_secs: d_timeout(),
            default_max_retries: d_retries(),
            retry_base_delay_secs: d_retry_delay(),
            rate_limit_gap_secs: None,
        }
    }
}

fn d_max_concurrent() -> usize {
    5
}
fn d_timeout() -> u64 {
    300
}
fn d_retries() -> u32 {
    3
}
fn d_retry_delay() -> f64 {
    1.0
}
