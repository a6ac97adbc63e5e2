//! Centralized error types for mailquery.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailquery library.
///
/// Contradictory queries are not errors: they compile to an operation that
/// yields nothing. Only backend failures, backend disagreement and bad
/// caller input surface here.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The relational store failed to answer a query or count.
    #[error("Relational backend error: {0}")]
    Relational(String),

    /// The full-text index failed to open a searcher or run a query.
    #[error("Full-text index error: {0}")]
    TextIndex(String),

    /// The relational store and the full-text index disagree about which
    /// items belong to the current batch.
    #[error("Inconsistent search results: {0}")]
    Inconsistent(String),

    /// A pagination cursor could not be applied to the query.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// The result stream was used after `close()`.
    #[error("Search results have been closed")]
    Closed,

    /// An operation was iterated before `begin()`.
    #[error("Search operation was not started")]
    NotStarted,

    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A mailbox fixture file could not be decoded.
    #[error("Invalid mailbox file '{path}': {reason}")]
    InvalidFixture { path: PathBuf, reason: String },
}

/// Convenience alias for `Result<T, SearchError>`.
pub type Result<T> = std::result::Result<T, SearchError>;

impl SearchError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error should be reported to the person running the
    /// search, as opposed to being an internal fault worth a bug report.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::Inconsistent(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inconsistency_is_internal() {
        assert!(!SearchError::Inconsistent("id 7".into()).is_user_visible());
        assert!(SearchError::Relational("down".into()).is_user_visible());
        assert!(SearchError::InvalidCursor("bad".into()).is_user_visible());
    }

    #[test]
    fn test_io_helper_keeps_path() {
        let err = SearchError::io(
            "/tmp/box.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/box.json"));
    }
}
