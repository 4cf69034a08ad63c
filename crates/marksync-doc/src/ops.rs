//! Edit operations against a document.
//!
//! All surgical changes to a remote page are expressed as operations. Each
//! operation addresses its target through a [`Locator`], either a stable
//! node id or a legacy position signature, so the editor depends on the
//! addressing capability, never on which wire format produced the document.
//!
//! Operations are applied in a fixed precedence order (delete → insert →
//! update-text → heading-level → table ops) so earlier operations never
//! invalidate the addressing used by later ones. [`sort_ops`] restores that
//! order regardless of discovery order.

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;
use crate::node::{Node, PositionSignature};

/// Addressing capability for an operation target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "kebab-case")]
pub enum Locator {
    /// Preferred: stable node identity, O(1) lookup, unaffected by
    /// reordering of unrelated nodes.
    Id { id: NodeId },
    /// Legacy fallback: derived position signature. Fragile under
    /// concurrent structural change.
    Signature { signature: PositionSignature },
}

impl Locator {
    pub fn id(id: impl Into<NodeId>) -> Self {
        Locator::Id { id: id.into() }
    }

    pub fn signature(signature: PositionSignature) -> Self {
        Locator::Signature { signature }
    }
}

/// A single surgical edit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum EditOp {
    /// Remove a whole top-level block.
    DeleteBlock { target: Locator },

    /// Insert a new top-level block at `index` in the block list.
    ///
    /// Anchored by index rather than a locator: deletes sort first, so the
    /// indices of a freshly diffed document remain valid.
    InsertBlock { index: usize, node: Node },

    /// Replace the literal text of a block. Children are untouched, which
    /// is what keeps nested opaque subtrees byte-identical.
    UpdateText { target: Locator, text: String },

    /// Change a heading's level. Valid levels are 1..=6.
    ChangeHeadingLevel { target: Locator, level: u8 },

    /// Insert a row into a table at `row`.
    TableInsertRow {
        target: Locator,
        row: usize,
        cells: Vec<String>,
    },

    /// Delete a table row.
    TableDeleteRow { target: Locator, row: usize },

    /// Replace the text of one table cell.
    TableUpdateCell {
        target: Locator,
        row: usize,
        col: usize,
        text: String,
    },
}

impl EditOp {
    /// The locator this operation addresses, if any.
    ///
    /// `InsertBlock` is index-anchored and has no locator.
    pub fn target(&self) -> Option<&Locator> {
        match self {
            EditOp::DeleteBlock { target }
            | EditOp::UpdateText { target, .. }
            | EditOp::ChangeHeadingLevel { target, .. }
            | EditOp::TableInsertRow { target, .. }
            | EditOp::TableDeleteRow { target, .. }
            | EditOp::TableUpdateCell { target, .. } => Some(target),
            EditOp::InsertBlock { .. } => None,
        }
    }

    /// Fixed application precedence.
    pub fn precedence(&self) -> u8 {
        match self {
            EditOp::DeleteBlock { .. } => 0,
            EditOp::InsertBlock { .. } => 1,
            EditOp::UpdateText { .. } => 2,
            EditOp::ChangeHeadingLevel { .. } => 3,
            EditOp::TableInsertRow { .. }
            | EditOp::TableDeleteRow { .. }
            | EditOp::TableUpdateCell { .. } => 4,
        }
    }

    pub fn is_table_op(&self) -> bool {
        self.precedence() == 4
    }

    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EditOp::DeleteBlock { .. } | EditOp::InsertBlock { .. }
        )
    }
}

/// Stable-sort operations into precedence order.
///
/// Discovery order is preserved within each class, which matters for table
/// row deletes (emitted high-to-low so row indices stay valid).
pub fn sort_ops(mut ops: Vec<EditOp>) -> Vec<EditOp> {
    ops.sort_by_key(EditOp::precedence);
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(text: &str) -> EditOp {
        EditOp::UpdateText {
            target: Locator::id("n1"),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_precedence_order() {
        let ops = vec![
            EditOp::TableUpdateCell {
                target: Locator::id("t1"),
                row: 0,
                col: 0,
                text: "x".into(),
            },
            update("hello"),
            EditOp::InsertBlock {
                index: 1,
                node: Node::paragraph("new"),
            },
            EditOp::DeleteBlock {
                target: Locator::id("n2"),
            },
        ];

        let sorted = sort_ops(ops);
        let precedences: Vec<u8> = sorted.iter().map(EditOp::precedence).collect();
        assert_eq!(precedences, vec![0, 1, 2, 4]);
    }

    #[test]
    fn test_sort_is_stable_within_class() {
        let ops = vec![
            EditOp::TableDeleteRow {
                target: Locator::id("t1"),
                row: 3,
            },
            EditOp::TableDeleteRow {
                target: Locator::id("t1"),
                row: 1,
            },
            update("a"),
        ];
        let sorted = sort_ops(ops);
        assert_eq!(
            sorted[1],
            EditOp::TableDeleteRow {
                target: Locator::id("t1"),
                row: 3,
            }
        );
        assert_eq!(
            sorted[2],
            EditOp::TableDeleteRow {
                target: Locator::id("t1"),
                row: 1,
            }
        );
    }

    #[test]
    fn test_target_accessor() {
        assert!(update("x").target().is_some());
        let insert = EditOp::InsertBlock {
            index: 0,
            node: Node::paragraph("p"),
        };
        assert!(insert.target().is_none());
        assert!(insert.is_structural());
    }

    #[test]
    fn test_op_serde_roundtrip() {
        let op = EditOp::TableUpdateCell {
            target: Locator::id("table-9"),
            row: 2,
            col: 1,
            text: "cell".into(),
        };
        let json = serde_json::to_string(&op).unwrap();
        let back: EditOp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
        assert!(back.is_table_op());
    }
}
