//! Page snapshots and sync baselines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::PageId;
use crate::node::Document;

/// A page as read from the remote side: structured content plus the
/// authoritative, monotonically increasing version number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub page_id: PageId,
    pub version: u64,
    pub content: Document,
}

impl PageSnapshot {
    pub fn new(page_id: impl Into<PageId>, version: u64, content: Document) -> Self {
        Self {
            page_id: page_id.into(),
            version,
            content,
        }
    }
}

/// The last successfully synced state of a page, used as the common
/// ancestor for three-way merge.
///
/// Written only after a push or pull fully completes, never on a partial
/// or aborted sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub page_id: PageId,
    pub markdown: String,
    pub version: u64,
    pub synced_at: DateTime<Utc>,
}

impl Baseline {
    pub fn new(page_id: impl Into<PageId>, markdown: impl Into<String>, version: u64) -> Self {
        Self {
            page_id: page_id.into(),
            markdown: markdown.into(),
            version,
            synced_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn test_baseline_serde_roundtrip() {
        let baseline = Baseline::new("page-1", "# Title\n", 7);
        let json = serde_json::to_string(&baseline).unwrap();
        let back: Baseline = serde_json::from_str(&json).unwrap();
        assert_eq!(back, baseline);
    }

    #[test]
    fn test_snapshot_holds_document() {
        let doc = Document::new(vec![Node::paragraph("hello")]);
        let snap = PageSnapshot::new("page-1", 3, doc.clone());
        assert_eq!(snap.version, 3);
        assert_eq!(snap.content, doc);
    }
}
