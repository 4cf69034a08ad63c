//! Diff, surgical edit, and three-way merge engines for marksync.
//!
//! The pipeline: two document trees go through [`diff`] to produce an
//! ordered operation list, [`apply`] plays that list against a target tree
//! and reports per-operation outcomes, and [`merge`] reconciles local and
//! remote markdown against a baseline, routing table regions through the
//! cell projection so merges happen at cell granularity.
//!
//! Everything here is stateless and synchronous; persistence and the
//! remote boundary live in `marksync-sync`.

mod diff;
mod editor;
mod merge;

pub use diff::diff;
pub use editor::{apply, ApplyOutcome, ApplyReport, OpResult};
pub use merge::{
    merge, ConflictSpan, MergeResult, LOCAL_MARKER, REMOTE_MARKER, SIDE_SEPARATOR,
};
