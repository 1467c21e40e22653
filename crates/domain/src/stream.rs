use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// A boxed async stream, used for executor streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One unit of streamed executor output.
///
/// A terminal delta carries `final = true`.  On failure the stream emits a
/// single delta with `error` set and then terminates.
#[derive(Debug, Clone, Serialize)]
pub struct TextDelta {
    pub text: String,
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TextDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            error: None,
        }
    }

    pub fn done() -> Self {
        Self {
            text: String::new(),
            is_final: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            is_final: true,
            error: Some(message.into()),
        }
    }
}

/// Whether a turn may touch the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorScope {
    /// Ask-only: the executor must not modify files.
    #[default]
    ReadOnly,
    /// Edit-capable.
    Edit,
}

/// Per-turn options handed to the executor bridge.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    /// Model override (explicit param > per-user setting > config default).
    pub model: Option<String>,
    /// Verbosity level for executor diagnostics (0 = quiet).
    pub verbosity: u8,
    /// "Thinking" budget in tokens.  Heuristic tunable, not a contract.
    pub thinking_budget: Option<u32>,
    pub scope: ExecutorScope,
    /// Per-session working directory.
    pub working_dir: Option<std::path::PathBuf>,
}
