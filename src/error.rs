//! Error types for PicoClaw
//!
//! This module defines all error types used throughout the gateway.
//! Uses `thiserror` for ergonomic error handling with automatic `Display`
//! and `Error` trait implementations.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Classification of an LLM provider failure.
///
/// The kind decides what the fallback chain does next: cool the entry down
/// and move on, or abort the whole chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// 413 or context-window overflow — the request is too large.
    TokenLimit,
    /// 429 — rate limit or quota exhausted.
    RateLimit,
    /// Connection or read deadline exceeded.
    Timeout,
    /// 401/403 — invalid or expired credentials.
    Auth,
    /// 5xx, connection resets, overload — worth retrying elsewhere.
    Transient,
    /// Malformed request, unknown model, anything no provider can fix.
    Fatal,
}

impl ProviderErrorKind {
    /// String label used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenLimit => "token_limit",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Auth => "auth",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }
}

/// Structured provider error: classification plus the underlying message.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns `true` if the fallback chain should cool this entry down and
    /// try the next one.
    ///
    /// Retriable kinds: `TokenLimit`, `RateLimit`, `Timeout`, `Transient`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::TokenLimit
                | ProviderErrorKind::RateLimit
                | ProviderErrorKind::Timeout
                | ProviderErrorKind::Transient
        )
    }

    /// Returns `true` if the same request could succeed against a different
    /// provider. `Auth` and `Fatal` fail everywhere, so the chain stops.
    pub fn should_fallback(&self) -> bool {
        !matches!(self.kind, ProviderErrorKind::Auth | ProviderErrorKind::Fatal)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ProviderErrorKind::TokenLimit => write!(f, "Token limit: {}", self.message),
            ProviderErrorKind::RateLimit => write!(f, "Rate limit: {}", self.message),
            ProviderErrorKind::Timeout => write!(f, "Timeout: {}", self.message),
            ProviderErrorKind::Auth => write!(f, "Authentication error: {}", self.message),
            ProviderErrorKind::Transient => write!(f, "Transient error: {}", self.message),
            ProviderErrorKind::Fatal => write!(f, "Fatal provider error: {}", self.message),
        }
    }
}

impl From<ProviderError> for PicoError {
    fn from(err: ProviderError) -> Self {
        PicoError::Provider(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for PicoClaw operations.
#[derive(Error, Debug)]
pub enum PicoError {
    /// Configuration-related errors (invalid config, missing required fields).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Structured provider error with classification for retry/fallback decisions.
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    /// Tool execution errors (invalid parameters, execution failures).
    #[error("Tool error: {0}")]
    Tool(String),

    /// Session management errors (invalid state, persistence failures).
    #[error("Session error: {0}")]
    Session(String),

    /// Resource not found (sessions, tools, servers, webhooks).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication or authorization failures at the gateway surface.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// An operation exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A bounded queue or worker pool rejected new work.
    #[error("Overloaded: {0}")]
    Overloaded(String),

    /// An MCP server disappeared while calls were in flight.
    #[error("Server gone: {0}")]
    ServerGone(String),

    /// Malformed wire data (JSON-RPC lines, webhook payloads).
    #[error("Parse error: {0}")]
    Parse(String),

    /// MCP protocol-level errors (handshake failures, tool errors).
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Memory engine errors (vector store, embedding API).
    #[error("Memory error: {0}")]
    Memory(String),

    /// Message bus channel closed unexpectedly.
    #[error("Bus error: channel closed")]
    BusClosed,

    /// Standard I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PicoError {
    /// Metric label for this error, used by the recorder.
    pub fn metric_label(&self) -> &'static str {
        match self {
            PicoError::Config(_) => "config",
            PicoError::Provider(p) => p.kind.as_str(),
            PicoError::Tool(_) => "tool",
            PicoError::Session(_) => "session",
            PicoError::NotFound(_) => "not_found",
            PicoError::Unauthorized(_) => "unauthorized",
            PicoError::Timeout(_) => "timeout",
            PicoError::Overloaded(_) => "overloaded",
            PicoError::ServerGone(_) => "server_gone",
            PicoError::Parse(_) => "parse",
            PicoError::Mcp(_) => "mcp",
            PicoError::Memory(_) => "memory",
            PicoError::BusClosed => "bus_closed",
            PicoError::Io(_) => "io",
            PicoError::Json(_) => "json",
            PicoError::Http(_) => "http",
        }
    }
}

/// A specialized `Result` type for PicoClaw operations.
pub type Result<T> = std::result::Result<T, PicoError>;
