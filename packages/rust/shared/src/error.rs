//! Error types for award search.
//!
//! Library crates use [`AwardSearchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all award search operations.
#[derive(Debug, thiserror::Error)]
pub enum AwardSearchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to a site, reader, or LLM endpoint.
    #[error("network error: {0}")]
    Network(String),

    /// HTML, JSON, or LLM response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Cache storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// LLM service error (API failure, open circuit, empty completion).
    #[error("llm error: {0}")]
    Llm(String),

    /// Content retrieval failed for the whole batch.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Neither the cache nor retrieval produced a single source.
    #[error("no sources found for query")]
    NoResults,

    /// A bounded operation did not finish in time.
    #[error("timed out after {0} ms")]
    Timeout(u64),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AwardSearchError>;

impl AwardSearchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = AwardSearchError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = AwardSearchError::Timeout(1500);
        assert_eq!(err.to_string(), "timed out after 1500 ms");

        let err = AwardSearchError::parse("intent reply contains no JSON object");
        assert!(err.to_string().starts_with("parse error:"));
    }
}
