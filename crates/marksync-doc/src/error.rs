//! Error types for the document model.

use thiserror::Error;

/// Errors raised by the document tree and table projection.
#[derive(Debug, Error, PartialEq)]
pub enum DocError {
    /// A table block could not be interpreted.
    #[error("malformed table: {0}")]
    MalformedTable(String),

    /// A projected cell-line sequence could not be mapped back to a table.
    #[error("invalid table projection: {0}")]
    InvalidProjection(String),
}

impl DocError {
    pub fn malformed_table(msg: impl Into<String>) -> Self {
        Self::MalformedTable(msg.into())
    }

    pub fn invalid_projection(msg: impl Into<String>) -> Self {
        Self::InvalidProjection(msg.into())
    }
}

/// Result type for document operations.
pub type Result<T> = std::result::Result<T, DocError>;
