//! Error types for agrisync-core

use thiserror::Error;

/// Result type alias using agrisync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in agrisync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or operation not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A domain record failed validation at construction time
    #[error("Validation failed: {field} {reason}")]
    Validation {
        /// Offending field name
        field: &'static str,
        /// Human readable reason
        reason: &'static str,
    },
}

impl Error {
    pub(crate) const fn validation(field: &'static str, reason: &'static str) -> Self {
        Self::Validation { field, reason }
    }
}
