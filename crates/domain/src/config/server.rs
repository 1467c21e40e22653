use serde::{Deserialize, Serialize};

/// HTTP control-surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Disable to run headless (no /health, /ready endpoints).
    #[serde(default = "d_true")]
    pub control_surface: bool,
    /// Locale for user-visible error messages (`en`, `zh-TW`, `zh-CN`).
    #[serde(default = "d_locale")]
    pub locale: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            control_surface: true,
            locale: d_locale(),
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8900
}
fn d_true() -> bool {
    true
}
fn d_locale() -> String {
    "en".into()
}
