use serde::{Deserialize, Serialize};

/// Draft-streaming update policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Minimum gap between platform edits.
    #[serde(default = "d_min_interval")]
    pub min_update_interval_ms: u64,

    /// Buffered characters that trigger an update.
    #[serde(default = "d_batch_chars")]
    pub batch_chars: usize,

    /// Hard ceiling on platform edits per second.
    #[serde(default = "d_max_eps")]
    pub max_updates_per_second: f64,

    /// Debounce window for scheduled flushes.
    #[serde(default = "d_debounce")]
    pub debounce_ms: u64,

    /// Blinking-cursor glyph appended between flushes.
    #[serde(default = "d_cursor")]
    pub cursor: String,

    /// Show the cursor glyph at all.
    #[serde(default = "d_true")]
    pub show_cursor: bool,

    #[serde(default)]
    pub chunk: ChunkConfig,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            min_update_interval_ms: d_min_interval(),
            batch_chars: d_batch_chars(),
            max_updates_per_second: d_max_eps(),
            debounce_ms: d_debounce(),
            cursor: d_cursor(),
            show_cursor: true,
            chunk: ChunkConfig::default(),
        }
    }
}

/// Chunker limits.  Platform budgets subtract a safety margin from the
/// documented hard limit (Telegram 4096, Discord 2000).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkConfig {
    #[serde(default = "d_max_length")]
    pub max_length: usize,
    #[serde(default = "d_min_chunk")]
    pub min_chunk_size: usize,
    /// Prefix each chunk with a `[i/N]` indicator.
    #[serde(default)]
    pub add_indicators: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_length: d_max_length(),
            min_chunk_size: d_min_chunk(),
            add_indicators: false,
        }
    }
}

impl ChunkConfig {
    pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;
    pub const DISCORD_MESSAGE_LIMIT: usize = 2000;
    /// Safety margin subtracted from platform limits.
    pub const MARGIN: usize = 100;

    pub fn telegram_budget() -> usize {
        Self::TELEGRAM_MESSAGE_LIMIT - Self::MARGIN
    }

    pub fn discord_budget() -> usize {
        Self::DISCORD_MESSAGE_LIMIT - Self::MARGIN
    }
}

fn d_min_interval() -> u64 {
    300
}
fn d_batch_chars() -> usize {
    20
}
fn d_max_eps() -> f64 {
    3.0
}
fn d_debounce() -> u64 {
    100
}
fn d_cursor() -> String {
    "▌".into()
}
fn d_true() -> bool {
    true
}
fn d_max_length() -> usize {
    4000
}
fn d_min_chunk() -> usize {
    100
}
