//! Per-page sync cycle.
//!
//! One page, one pass, strictly ordered under the page's baseline lock:
//! baseline read → remote snapshot read → three-way merge → (conflict ⇒
//! stop, nothing written) → convert → tree diff → surgical apply →
//! fallback check → remote write → baseline write. The lock guard covers
//! every exit path, so two concurrent passes can never interleave on the
//! same page, and the baseline is only ever written after the cycle fully
//! completed.
//!
//! Processing is single-threaded and sequential per page; cycles for
//! different pages share no mutable state beyond their own baseline
//! records.

use marksync_doc::PageId;
use marksync_engine::{apply, diff, merge, ApplyReport, ConflictSpan};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::baseline::BaselineStore;
use crate::config::SyncConfig;
use crate::convert::{self, Converter};
use crate::error::Result;
use crate::transport::{write_with_retry, PageTransport};

/// What one sync pass did, for the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub page_id: PageId,
    /// Merged markdown, carrying conflict markers when unresolved.
    pub merged_markdown: String,
    pub has_conflict: bool,
    pub conflicts: Vec<ConflictSpan>,
    /// Per-operation apply outcomes; `None` when no surgical pass ran
    /// (conflict, or nothing to push).
    pub apply: Option<ApplyReport>,
    /// Whether the surgical result was discarded for full replacement.
    pub fallback: bool,
    pub remote_written: bool,
    /// Remote version after this pass.
    pub version: u64,
}

/// The sync engine: transport + converter + baseline store + policy.
pub struct SyncEngine<T, C> {
    transport: T,
    converter: C,
    baselines: BaselineStore,
    config: SyncConfig,
}

impl<T: PageTransport, C: Converter> SyncEngine<T, C> {
    pub fn new(transport: T, converter: C, baselines: BaselineStore) -> Self {
        Self::with_config(transport, converter, baselines, SyncConfig::default())
    }

    pub fn with_config(
        transport: T,
        converter: C,
        baselines: BaselineStore,
        config: SyncConfig,
    ) -> Self {
        Self {
            transport,
            converter,
            baselines,
            config,
        }
    }

    pub fn baselines(&self) -> &BaselineStore {
        &self.baselines
    }

    /// Push local markdown to the remote page.
    pub async fn push_page(&self, page_id: &PageId, local_markdown: &str) -> Result<SyncOutcome> {
        let _lock = self.baselines.lock(page_id, self.config.lock_wait)?;

        let baseline = self.baselines.read(page_id)?;
        let snapshot = self.transport.read_page(page_id).await?;
        let remote_markdown = convert::storage_to_markdown(
            &self.converter,
            &snapshot.content,
            self.config.converter_timeout,
        )
        .await?;

        let merged = merge(
            baseline.as_ref().map(|b| b.markdown.as_str()),
            local_markdown,
            &remote_markdown,
        );

        if merged.has_conflict {
            info!(%page_id, spans = merged.conflicts.len(), "merge conflict, nothing written");
            return Ok(SyncOutcome {
                page_id: page_id.clone(),
                merged_markdown: merged.merged,
                has_conflict: true,
                conflicts: merged.conflicts,
                apply: None,
                fallback: false,
                remote_written: false,
                version: snapshot.version,
            });
        }

        if merged.merged == remote_markdown {
            // Remote already carries the merged state; just settle the
            // baseline.
            debug!(%page_id, "nothing to push");
            self.baselines
                .write(page_id, &merged.merged, snapshot.version)?;
            return Ok(SyncOutcome {
                page_id: page_id.clone(),
                merged_markdown: merged.merged,
                has_conflict: false,
                conflicts: Vec::new(),
                apply: None,
                fallback: false,
                remote_written: false,
                version: snapshot.version,
            });
        }

        let new_content = convert::markdown_to_storage(
            &self.converter,
            &merged.merged,
            self.config.converter_timeout,
        )
        .await?;

        let ops = diff(&snapshot.content, &new_content);
        let mut working = snapshot.content.clone();
        let report = apply(&mut working, &ops);

        let fallback = should_fall_back(&report, self.config.fallback_ratio);
        let content = if fallback {
            warn!(
                %page_id,
                failed = report.failed(),
                total = report.total(),
                "operation failure ratio over threshold, falling back to full replacement"
            );
            new_content.clone()
        } else {
            working
        };

        let version = write_with_retry(
            &self.transport,
            page_id,
            &content,
            snapshot.version,
            &self.config,
        )
        .await?;

        self.baselines.write(page_id, &merged.merged, version)?;
        debug!(%page_id, version, fallback, "push complete");

        Ok(SyncOutcome {
            page_id: page_id.clone(),
            merged_markdown: merged.merged,
            has_conflict: false,
            conflicts: Vec::new(),
            apply: Some(report),
            fallback,
            remote_written: true,
            version,
        })
    }

    /// Pull the remote page into local markdown. Writes nothing remotely;
    /// on a clean merge the baseline advances to the remote version and
    /// the returned markdown is the new local content.
    pub async fn pull_page(&self, page_id: &PageId, local_markdown: &str) -> Result<SyncOutcome> {
        let _lock = self.baselines.lock(page_id, self.config.lock_wait)?;

        let baseline = self.baselines.read(page_id)?;
        let snapshot = self.transport.read_page(page_id).await?;
        let remote_markdown = convert::storage_to_markdown(
            &self.converter,
            &snapshot.content,
            self.config.converter_timeout,
        )
        .await?;

        let merged = merge(
            baseline.as_ref().map(|b| b.markdown.as_str()),
            local_markdown,
            &remote_markdown,
        );

        if merged.has_conflict {
            info!(%page_id, spans = merged.conflicts.len(), "merge conflict on pull");
        } else {
            self.baselines
                .write(page_id, &merged.merged, snapshot.version)?;
            debug!(%page_id, version = snapshot.version, "pull complete");
        }

        Ok(SyncOutcome {
            page_id: page_id.clone(),
            has_conflict: merged.has_conflict,
            conflicts: merged.conflicts,
            merged_markdown: merged.merged,
            apply: None,
            fallback: false,
            remote_written: false,
            version: snapshot.version,
        })
    }
}

/// The fallback policy: discard the surgical result when more than
/// `ratio` of the operations failed. At exactly the threshold the
/// surgical result is kept.
fn should_fall_back(report: &ApplyReport, ratio: f64) -> bool {
    report.total() > 0 && report.failure_ratio() > ratio
}
