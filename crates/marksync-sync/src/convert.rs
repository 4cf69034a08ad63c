//! External text-converter boundary.
//!
//! The markdown⇄structured-content converter is a trusted external
//! collaborator, not reimplemented here. Its calls are bounded by an
//! explicit timeout, and empty or whitespace-only input short-circuits to
//! empty output without invoking it at all. A timeout aborts only the one
//! conversion it bounded.

use std::time::Duration;

use async_trait::async_trait;
use marksync_doc::Document;
use thiserror::Error;
use tokio::time::timeout;

use crate::error::{Result, SyncError};

/// Failure reported by a converter implementation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConvertError(pub String);

impl ConvertError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The markdown⇄structured-content conversion pair.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn markdown_to_storage(&self, markdown: &str)
        -> std::result::Result<Document, ConvertError>;

    async fn storage_to_markdown(&self, doc: &Document)
        -> std::result::Result<String, ConvertError>;
}

/// Convert markdown to structured content within `budget`.
pub async fn markdown_to_storage<C>(
    converter: &C,
    markdown: &str,
    budget: Duration,
) -> Result<Document>
where
    C: Converter + ?Sized,
{
    if markdown.trim().is_empty() {
        return Ok(Document::default());
    }
    match timeout(budget, converter.markdown_to_storage(markdown)).await {
        Ok(Ok(doc)) => Ok(doc),
        Ok(Err(e)) => Err(SyncError::conversion(e.to_string())),
        Err(_) => Err(SyncError::ConversionTimeout { timeout: budget }),
    }
}

/// Convert structured content to markdown within `budget`.
pub async fn storage_to_markdown<C>(
    converter: &C,
    doc: &Document,
    budget: Duration,
) -> Result<String>
where
    C: Converter + ?Sized,
{
    if doc.is_empty() {
        return Ok(String::new());
    }
    match timeout(budget, converter.storage_to_markdown(doc)).await {
        Ok(Ok(markdown)) => Ok(markdown),
        Ok(Err(e)) => Err(SyncError::conversion(e.to_string())),
        Err(_) => Err(SyncError::ConversionTimeout { timeout: budget }),
    }
}
