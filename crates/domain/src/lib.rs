//! Shared types for the CursorBot message plane.
//!
//! Everything that crosses a crate boundary lives here: the configuration
//! tree, the error taxonomy and its localized templates, the unified message
//! model, executor stream types, structured trace events, and environment
//! validation.

pub mod config;
pub mod env;
pub mod error;
pub mod i18n;
pub mod message;
pub mod redact;
pub mod stream;
pub mod trace;

pub use error::{Error, ErrorCode, ErrorContext, Result};
