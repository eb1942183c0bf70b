//! Error taxonomy for the retrieval engine.
//!
//! Four failure classes cross the engine boundary:
//!
//! | Variant | Meaning | Retryable |
//! |---------|---------|-----------|
//! | [`AtlasError::NotFound`] | A referenced slug/id does not exist in scope | no |
//! | [`AtlasError::InvalidArgument`] | Caller passed an unusable parameter | no |
//! | [`AtlasError::Upstream`] | Vector index, lexical index, or embedder failed | yes |
//! | [`AtlasError::Store`] | The backing database itself errored | maybe |
//!
//! `NotFound` is deliberately distinct from "zero search results": a search
//! with an unknown scope slug returns an empty page, while a path-finding
//! request with an unknown table anchor returns `NotFound`, so callers can
//! tell "bad reference" from "no matches".
//!
//! Partial resolver results and truncated path enumerations are *flagged
//! successes*, not errors.

use thiserror::Error;

/// Engine-level error type.
#[derive(Debug, Error)]
pub enum AtlasError {
    /// A referenced entity (by slug or id) does not exist in scope.
    #[error("{what} not found")]
    NotFound { what: String },

    /// The caller supplied an argument the engine cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An external collaborator (vector index, lexical index, embedding
    /// generator) failed or timed out. Retryable.
    #[error("{operation} unavailable: {message}")]
    Upstream { operation: String, message: String },

    /// The backing store errored.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl AtlasError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn upstream(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Upstream {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }
}

pub type Result<T> = std::result::Result<T, AtlasError>;
