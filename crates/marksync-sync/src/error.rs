//! Page-level error taxonomy.
//!
//! Operation-level failures (target not found, validation) never surface
//! here; they are absorbed into the apply report and only influence the
//! fallback decision. These errors are the page-level outcomes a caller
//! must handle. A merge conflict is not an error either; it is a result
//! state on [`marksync_engine::MergeResult`].

use std::io;
use std::time::Duration;

use marksync_doc::PageId;
use thiserror::Error;

/// Errors surfaced by the sync layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The external converter failed.
    #[error("conversion failed: {reason}")]
    Conversion { reason: String },

    /// The external converter exceeded its time budget. Aborts only the
    /// conversion it bounded.
    #[error("conversion timed out after {timeout:?}")]
    ConversionTimeout { timeout: Duration },

    /// A remote write carried a stale version. Fail-fast: re-merge and
    /// retry is the calling orchestrator's decision.
    #[error("version conflict: wrote with {expected}, remote is at {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    /// The remote rejected our credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The page does not exist remotely.
    #[error("page not found: {0}")]
    PageNotFound(PageId),

    /// Still rate-limited after exhausting the retry budget.
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Could not acquire the per-page baseline lock within the bounded
    /// wait. Another sync pass holds the page.
    #[error("page {page_id} is locked by another sync pass")]
    Contention { page_id: PageId },

    /// The baseline record exists but could not be decoded.
    #[error("baseline store: {0}")]
    Baseline(String),

    /// Transport-level I/O failure.
    #[error("transport: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    pub fn conversion(reason: impl Into<String>) -> Self {
        Self::Conversion {
            reason: reason.into(),
        }
    }

    pub fn baseline(msg: impl Into<String>) -> Self {
        Self::Baseline(msg.into())
    }

    pub fn contention(page_id: impl Into<PageId>) -> Self {
        Self::Contention {
            page_id: page_id.into(),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
