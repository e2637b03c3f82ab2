//! Provider error classification.
//!
//! Maps HTTP status codes and well-known message substrings onto
//! [`ProviderErrorKind`]. Status wins over substrings; unrecognized errors
//! classify as `Transient` so the fallback chain keeps trying, while known
//! request-structure failures classify as `Fatal` and abort immediately.

use crate::error::{ProviderError, ProviderErrorKind};

/// Classify an HTTP status code, if it maps unambiguously.
pub fn classify_status(status: u16) -> Option<ProviderErrorKind> {
    match status {
        413 => Some(ProviderErrorKind::TokenLimit),
        429 => Some(ProviderErrorKind::RateLimit),
        401 | 403 => Some(ProviderErrorKind::Auth),
        400 | 404 | 422 => Some(ProviderErrorKind::Fatal),
        500..=599 => Some(ProviderErrorKind::Transient),
        _ => None,
    }
}

/// Classify an error message string by substring patterns.
///
/// Priority order: token limit > auth > rate limit > timeout > fatal
/// request-structure errors. Anything unrecognized is `Transient`.
pub fn classify_message(msg: &str) -> ProviderErrorKind {
    let lower = msg.to_lowercase();

    if contains_any(
        &lower,
        &[
            "context length",
            "context_length_exceeded",
            "maximum context",
            "too many tokens",
            "prompt is too long",
            "request too large",
            "413",
        ],
    ) {
        return ProviderErrorKind::TokenLimit;
    }

    if contains_any(
        &lower,
        &[
            "invalid_api_key",
            "invalid api key",
            "incorrect api key",
            "invalid token",
            "authentication",
            "unauthorized",
            "forbidden",
            "access denied",
            "401",
            "403",
            "no credentials found",
            "no api key found",
        ],
    ) {
        return ProviderErrorKind::Auth;
    }

    if contains_any(
        &lower,
        &[
            "rate_limit",
            "rate limit",
            "too many requests",
            "429",
            "exceeded your current quota",
            "resource_exhausted",
            "quota exceeded",
            "usage limit",
        ],
    ) {
        return ProviderErrorKind::RateLimit;
    }

    if contains_any(
        &lower,
        &[
            "timeout",
            "timed out",
            "deadline exceeded",
            "operation was canceled",
            "request canceled",
        ],
    ) {
        return ProviderErrorKind::Timeout;
    }

    // Request-structure errors no provider can recover from.
    if contains_any(
        &lower,
        &[
            "string should match pattern",
            "tool_use.id",
            "tool_use_id",
            "invalid request format",
            "model not found",
            "unknown model",
        ],
    ) {
        return ProviderErrorKind::Fatal;
    }

    ProviderErrorKind::Transient
}

/// Classify a provider failure from an optional HTTP status plus message.
pub fn classify(status: Option<u16>, msg: &str) -> ProviderError {
    let kind = status
        .and_then(classify_status)
        .unwrap_or_else(|| classify_message(msg));
    ProviderError::new(kind, msg)
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}
