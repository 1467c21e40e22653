//! The executor seam.
//!
//! The external AI executor is a black box behind this trait: the runtime
//! creates a chat handle once per session, then streams each turn's reply
//! as text deltas.  Tests substitute a scripted implementation.

pub mod cli;

use async_trait::async_trait;

use cb_domain::stream::{BoxStream, ExecutorOptions, TextDelta};
use cb_domain::Result;

pub use cli::CliExecutor;

#[async_trait]
pub trait Executor: Send + Sync {
    /// Create an executor-side chat, returning its handle.  The handle is
    /// cached in the session registry and passed to subsequent runs so the
    /// executor preserves context.
    async fn create_chat(&self) -> Result<String>;

    /// Run one turn.  Yields a finite sequence of text deltas; the terminal
    /// delta carries `final = true`.  On failure the stream emits a single
    /// error delta and terminates.
    async fn run(
        &self,
        prompt: &str,
        chat_handle: Option<&str>,
        options: &ExecutorOptions,
    ) -> Result<BoxStream<'static, TextDelta>>;
}
