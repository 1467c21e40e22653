use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// External AI executor (subprocess) settings.
///
/// Credentials are read from `api_key_env` and passed to the subprocess via
/// its environment, never on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Path or name of the executor binary.
    #[serde(default = "d_binary")]
    pub binary: String,

    /// Per-turn timeout in seconds.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,

    /// Default model when neither the turn nor the user overrides it.
    #[serde(default)]
    pub model: Option<String>,

    /// Default working directory for turns without a session directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Environment variable holding the executor API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,

    /// Default "thinking" budget in tokens.  Heuristic tunable.
    #[serde(default)]
    pub thinking_budget: Option<u32>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            binary: d_binary(),
            timeout_secs: d_timeout(),
            model: None,
            working_dir: None,
            api_key_env: d_api_key_env(),
            thinking_budget: None,
        }
    }
}

fn d_binary() -> String {
    "cursor-agent".into()
}
fn d_timeout() -> u64 {
    300
}
fn d_api_key_env() -> String {
    "CURSOR_API_KEY".into()
}
