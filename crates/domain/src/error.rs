use std::collections::HashMap;

use serde::Serialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error codes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Numeric error codes, grouped by thousand.
///
/// 1xxx internal, 2xxx validation, 3xxx auth/permissions, 4xxx resources,
/// 5xxx rate limiting, 6xxx external services, 7xxx commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "u16")]
pub enum ErrorCode {
    Unknown,
    Internal,
    Timeout,
    Validation,
    InvalidInput,
    MissingRequired,
    Unauthorized,
    Forbidden,
    ElevationRequired,
    NotFound,
    AlreadyExists,
    TooManyRequests,
    QuotaExceeded,
    LlmError,
    PlatformError,
    NetworkError,
    Unavailable,
    InvalidCommand,
    CommandFailed,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Unknown => 1000,
            Self::Internal => 1001,
            Self::Timeout => 1003,
            Self::Validation => 2000,
            Self::InvalidInput => 2001,
            Self::MissingRequired => 2002,
            Self::Unauthorized => 3001,
            Self::Forbidden => 3002,
            Self::ElevationRequired => 3005,
            Self::NotFound => 4001,
            Self::AlreadyExists => 4002,
            Self::TooManyRequests => 5001,
            Self::QuotaExceeded => 5002,
            Self::LlmError => 6001,
            Self::PlatformError => 6002,
            Self::NetworkError => 6004,
            Self::Unavailable => 6005,
            Self::InvalidCommand => 7001,
            Self::CommandFailed => 7002,
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        code.as_u16()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Optional context attached to an error as it crosses component boundaries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorContext {
    pub user_id: Option<String>,
    pub transport: Option<String>,
    pub request_id: Option<String>,
    pub cause: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared error type used across all CursorBot crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("unauthorized: {rule}")]
    Unauthorized { rule: String },

    #[error("forbidden: missing permission {permission}")]
    Forbidden { permission: String },

    #[error("elevation required for {action}")]
    ElevationRequired { action: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limit exceeded, retry after {retry_after:.1}s")]
    RateLimitExceeded { retry_after: f64 },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("executor failure: {reason}")]
    ExecutorFailure { reason: ExecutorFailureReason },

    #[error("command failed: {command}")]
    CommandFailure { command: String },

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

/// Classification of an executor subprocess failure, derived from its exit
/// code and stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorFailureReason {
    Timeout,
    Unauthorized,
    Unavailable,
    Internal,
}

impl std::fmt::Display for ExecutorFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Unauthorized => "unauthorized",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

impl Error {
    /// Map the error to its taxonomy code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => ErrorCode::Internal,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Unauthorized { .. } => ErrorCode::Unauthorized,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            Self::ElevationRequired { .. } => ErrorCode::ElevationRequired,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::AlreadyExists,
            Self::RateLimitExceeded { .. } => ErrorCode::TooManyRequests,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::ExecutorFailure { .. } => ErrorCode::LlmError,
            Self::CommandFailure { .. } => ErrorCode::CommandFailed,
            Self::Config(_) => ErrorCode::MissingRequired,
        }
    }

    /// Render the user-visible message for this error in the given locale.
    ///
    /// Rate-limit errors interpolate the retry delay; elevation errors carry
    /// the `/elevated on` hint from the template table.
    pub fn user_message(&self, locale: &str) -> String {
        let template = crate::i18n::template(self.code(), locale);
        match self {
            Self::RateLimitExceeded { retry_after } => {
                format!("{template} ({:.0}s)", retry_after.ceil())
            }
            _ => template.to_owned(),
        }
    }

    /// Structured details for logging / API responses.
    pub fn details(&self) -> HashMap<&'static str, serde_json::Value> {
        let mut map = HashMap::new();
        match self {
            Self::Forbidden { permission } => {
                map.insert("permission", serde_json::json!(permission));
            }
            Self::ElevationRequired { action } => {
                map.insert("action", serde_json::json!(action));
            }
            Self::RateLimitExceeded { retry_after } => {
                map.insert("retry_after", serde_json::json!(retry_after));
            }
            Self::Unauthorized { rule } => {
                map.insert("rule", serde_json::json!(rule));
            }
            Self::ExecutorFailure { reason } => {
                map.insert("reason", serde_json::json!(reason));
            }
            Self::CommandFailure { command } => {
                map.insert("command", serde_json::json!(command));
            }
            _ => {}
        }
        map
    }
}

pub type Result<T> = std::result::Result<T, Error>;
