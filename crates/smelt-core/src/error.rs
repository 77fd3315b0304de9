//! Error types for smelt-core.

use std::time::Duration;

use thiserror::Error;

use crate::request::ValidationError;

/// Result type for smelt-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in smelt-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The batch was rejected before any compilation started.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The client exhausted its admission window.
    #[error("rate limit exceeded, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Unknown or expired compilation id.
    #[error("compilation not found: {0}")]
    NotFound(String),

    /// Every plugin in the compilation failed, nothing to package.
    #[error("compilation {0} produced no modules")]
    NoArtifacts(String),

    /// The compiler process could not be started.
    #[error("failed to spawn compiler '{program}': {message}")]
    Spawn { program: String, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to write the download archive.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Compiler lookup failed.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// Anything else outside the compiler's control.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is safe to show to API clients verbatim.
    ///
    /// Spawn, IO, archive and toolchain errors may carry host paths.
    pub fn is_client_visible(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::RateLimited { .. } | Self::NotFound(_) | Self::NoArtifacts(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_errors_hidden() {
        let err = Error::Io(std::io::Error::other("/tmp/smelt/secret"));
        assert!(!err.is_client_visible());

        let err = Error::NotFound("abc".to_string());
        assert!(err.is_client_visible());
        assert_eq!(err.to_string(), "compilation not found: abc");
    }

    #[test]
    fn test_rate_limited_message() {
        let err = Error::RateLimited {
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(err.to_string(), "rate limit exceeded, retry after 42s");
    }
}
