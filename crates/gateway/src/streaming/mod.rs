//! Outbound reply streaming: debounced draft edits plus platform-limit
//! chunking of the finished reply.

pub mod chunker;
pub mod draft;

pub use chunker::MessageChunker;
pub use draft::{DraftStreamer, DraftUpdate, StreamState};
