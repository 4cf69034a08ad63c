//! Surgical editor: apply an operation list to a document.
//!
//! Two addressing paths, selected per operation by its locator:
//!
//! - **Stable id**: an id→index map is built once per call and maintained
//!   incrementally across structural ops, so lookups stay O(1) amortized and
//!   unrelated reordering cannot break addressing.
//! - **Position signature**: signatures are recomputed against the current
//!   tree and matched exactly. If concurrent structural edits shifted
//!   ordinals, the target is simply not found. That fragility is inherent to
//!   the legacy format and is reported, not compensated.
//!
//! A single failing operation never aborts the pass: `TargetNotFound` is a
//! no-op, a validation failure aborts only that operation, and the full
//! list is always attempted. The caller inspects the report's failure ratio
//! to decide whether to keep the surgical result or fall back to full
//! replacement.

use std::collections::HashMap;

use marksync_doc::{Document, EditOp, Locator, Node, NodeId, NodeKind};
use serde::Serialize;
use tracing::debug;

/// Outcome of one operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ApplyOutcome {
    Applied,
    /// The locator resolved to nothing. Non-fatal no-op.
    TargetNotFound,
    /// The target resolved but the payload was not applicable to it.
    Invalid { reason: String },
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// One operation paired with what happened to it.
#[derive(Clone, Debug, Serialize)]
pub struct OpResult {
    pub op: EditOp,
    pub outcome: ApplyOutcome,
}

/// Structured result of an apply pass: every operation, in order, with its
/// outcome.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ApplyReport {
    pub results: Vec<OpResult>,
}

impl ApplyReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn applied(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.is_applied())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.applied()
    }

    /// `failed / total`; 0.0 for an empty pass.
    pub fn failure_ratio(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.failed() as f64 / self.total() as f64
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &OpResult> {
        self.results.iter().filter(|r| !r.outcome.is_applied())
    }
}

/// Apply `ops` to `doc` in the given order (callers pass precedence-sorted
/// lists from the diff engine). Never aborts early; returns an outcome for
/// every operation.
pub fn apply(doc: &mut Document, ops: &[EditOp]) -> ApplyReport {
    let mut index = IdIndex::build(doc);
    let mut results = Vec::with_capacity(ops.len());

    for op in ops {
        let outcome = apply_one(doc, &mut index, op);
        if !outcome.is_applied() {
            debug!(?op, ?outcome, "operation not applied");
        }
        results.push(OpResult {
            op: op.clone(),
            outcome,
        });
    }

    ApplyReport { results }
}

/// Id → block-index map, kept current across structural edits.
struct IdIndex {
    by_id: HashMap<NodeId, usize>,
}

impl IdIndex {
    fn build(doc: &Document) -> Self {
        let by_id = doc
            .blocks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.id.clone().map(|id| (id, i)))
            .collect();
        Self { by_id }
    }

    fn removed(&mut self, at: usize) {
        self.by_id.retain(|_, idx| *idx != at);
        for idx in self.by_id.values_mut() {
            if *idx > at {
                *idx -= 1;
            }
        }
    }

    fn inserted(&mut self, at: usize, node: &Node) {
        for idx in self.by_id.values_mut() {
            if *idx >= at {
                *idx += 1;
            }
        }
        if let Some(id) = &node.id {
            self.by_id.insert(id.clone(), at);
        }
    }
}

fn resolve(doc: &Document, index: &IdIndex, locator: &Locator) -> Option<usize> {
    match locator {
        Locator::Id { id } => index.by_id.get(id).copied(),
        Locator::Signature { signature } => {
            // Recomputed against the current tree on every lookup; exact
            // match only.
            doc.signatures().iter().position(|s| s == signature)
        }
    }
}

fn apply_one(doc: &mut Document, index: &mut IdIndex, op: &EditOp) -> ApplyOutcome {
    match op {
        EditOp::DeleteBlock { target } => {
            let Some(at) = resolve(doc, index, target) else {
                return ApplyOutcome::TargetNotFound;
            };
            if doc.blocks[at].is_opaque() {
                return invalid("delete would target an opaque extension block");
            }
            doc.blocks.remove(at);
            index.removed(at);
            ApplyOutcome::Applied
        }

        EditOp::InsertBlock { index: at, node } => {
            let at = (*at).min(doc.blocks.len());
            doc.blocks.insert(at, node.clone());
            index.inserted(at, node);
            ApplyOutcome::Applied
        }

        EditOp::UpdateText { target, text } => {
            let Some(at) = resolve(doc, index, target) else {
                return ApplyOutcome::TargetNotFound;
            };
            let block = &mut doc.blocks[at];
            if block.is_opaque() {
                return invalid("update would target an opaque extension block");
            }
            block.text = text.clone();
            // Inline children are superseded by the new literal text, but
            // anything holding an opaque subtree must survive untouched.
            block.children.retain(Node::contains_opaque);
            ApplyOutcome::Applied
        }

        EditOp::ChangeHeadingLevel { target, level } => {
            if !(1..=6).contains(level) {
                return invalid(format!("heading level {level} outside 1..=6"));
            }
            let Some(at) = resolve(doc, index, target) else {
                return ApplyOutcome::TargetNotFound;
            };
            let block = &mut doc.blocks[at];
            if block.heading_level().is_none() {
                return invalid(format!("target is {}, not a heading", block.kind));
            }
            block.kind = NodeKind::Heading { level: *level };
            ApplyOutcome::Applied
        }

        EditOp::TableInsertRow { target, row, cells } => {
            with_table(doc, index, target, |table_node| {
                let body_rows = table_node.children.len().saturating_sub(1);
                if *row > body_rows {
                    return invalid(format!("row {row} out of bounds ({body_rows} rows)"));
                }
                table_node
                    .children
                    .insert(row + 1, Node::table_row(cells.iter().cloned()));
                ApplyOutcome::Applied
            })
        }

        EditOp::TableDeleteRow { target, row } => {
            with_table(doc, index, target, |table_node| {
                let body_rows = table_node.children.len().saturating_sub(1);
                if *row >= body_rows {
                    return invalid(format!("row {row} out of bounds ({body_rows} rows)"));
                }
                table_node.children.remove(row + 1);
                ApplyOutcome::Applied
            })
        }

        EditOp::TableUpdateCell {
            target,
            row,
            col,
            text,
        } => with_table(doc, index, target, |table_node| {
            let body_rows = table_node.children.len().saturating_sub(1);
            if *row >= body_rows {
                return invalid(format!("row {row} out of bounds ({body_rows} rows)"));
            }
            let row_node = &mut table_node.children[row + 1];
            if *col >= row_node.children.len() {
                return invalid(format!(
                    "col {col} out of bounds ({} cells)",
                    row_node.children.len()
                ));
            }
            let cell = &mut row_node.children[*col];
            cell.text = text.clone();
            cell.children.retain(Node::contains_opaque);
            ApplyOutcome::Applied
        }),
    }
}

fn with_table(
    doc: &mut Document,
    index: &IdIndex,
    target: &Locator,
    f: impl FnOnce(&mut Node) -> ApplyOutcome,
) -> ApplyOutcome {
    let Some(at) = resolve(doc, index, target) else {
        return ApplyOutcome::TargetNotFound;
    };
    let block = &mut doc.blocks[at];
    if !block.is_table() {
        return invalid(format!("target is {}, not a table", block.kind));
    }
    f(block)
}

fn invalid(reason: impl Into<String>) -> ApplyOutcome {
    ApplyOutcome::Invalid {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use marksync_doc::{Alignment, Table};

    fn doc() -> Document {
        Document::new(vec![
            Node::heading(1, "Title").with_id("h1"),
            Node::paragraph("first").with_id("p1"),
            Node::paragraph("second").with_id("p2"),
        ])
    }

    #[test]
    fn test_update_text_by_id() {
        let mut d = doc();
        let report = apply(
            &mut d,
            &[EditOp::UpdateText {
                target: Locator::id("p1"),
                text: "rewritten".into(),
            }],
        );
        assert_eq!(report.applied(), 1);
        assert_eq!(d.blocks[1].text, "rewritten");
    }

    #[test]
    fn test_target_not_found_is_noop_and_pass_continues() {
        let mut d = doc();
        let report = apply(
            &mut d,
            &[
                EditOp::DeleteBlock {
                    target: Locator::id("ghost"),
                },
                EditOp::UpdateText {
                    target: Locator::id("p2"),
                    text: "still applied".into(),
                },
            ],
        );
        assert_eq!(report.results[0].outcome, ApplyOutcome::TargetNotFound);
        assert!(report.results[1].outcome.is_applied());
        assert_eq!(d.blocks[2].text, "still applied");
        assert_eq!(report.failure_ratio(), 0.5);
    }

    #[test]
    fn test_heading_level_validation() {
        let mut d = doc();
        let report = apply(
            &mut d,
            &[
                EditOp::ChangeHeadingLevel {
                    target: Locator::id("h1"),
                    level: 9,
                },
                EditOp::ChangeHeadingLevel {
                    target: Locator::id("p1"),
                    level: 2,
                },
                EditOp::ChangeHeadingLevel {
                    target: Locator::id("h1"),
                    level: 3,
                },
            ],
        );
        assert!(matches!(report.results[0].outcome, ApplyOutcome::Invalid { .. }));
        assert!(matches!(report.results[1].outcome, ApplyOutcome::Invalid { .. }));
        assert!(report.results[2].outcome.is_applied());
        assert_eq!(d.blocks[0].heading_level(), Some(3));
    }

    #[test]
    fn test_delete_keeps_id_index_current() {
        let mut d = doc();
        let report = apply(
            &mut d,
            &[
                EditOp::DeleteBlock {
                    target: Locator::id("p1"),
                },
                EditOp::UpdateText {
                    target: Locator::id("p2"),
                    text: "found after shift".into(),
                },
            ],
        );
        assert_eq!(report.applied(), 2);
        assert_eq!(d.blocks.len(), 2);
        assert_eq!(d.blocks[1].text, "found after shift");
    }

    #[test]
    fn test_insert_clamps_index() {
        let mut d = doc();
        let report = apply(
            &mut d,
            &[EditOp::InsertBlock {
                index: usize::MAX,
                node: Node::paragraph("tail"),
            }],
        );
        assert_eq!(report.applied(), 1);
        assert_eq!(d.blocks.last().unwrap().text, "tail");
    }

    #[test]
    fn test_signature_path_applies_and_breaks_under_drift() {
        let legacy = Document::new(vec![
            Node::heading(2, "Keep"),
            Node::paragraph("match me"),
        ]);
        let sig = legacy.signatures()[1].clone();

        // Applies against the unchanged tree.
        let mut d = legacy.clone();
        let report = apply(
            &mut d,
            &[EditOp::ChangeHeadingLevel {
                target: Locator::signature(legacy.signatures()[0].clone()),
                level: 4,
            }],
        );
        assert_eq!(report.applied(), 1);

        // A concurrent structural edit shifted ordinals: the stored
        // signature no longer resolves. Documented limitation.
        let mut drifted = Document::new(vec![
            Node::paragraph("inserted above"),
            legacy.blocks[0].clone(),
            legacy.blocks[1].clone(),
        ]);
        let report = apply(
            &mut drifted,
            &[EditOp::UpdateText {
                target: Locator::signature(sig),
                text: "x".into(),
            }],
        );
        assert_eq!(report.results[0].outcome, ApplyOutcome::TargetNotFound);
    }

    #[test]
    fn test_table_ops_roundtrip_through_editor() {
        let table = Table {
            alignments: vec![Alignment::None; 2],
            header: vec!["H1".into(), "H2".into()],
            rows: vec![vec!["A".into(), "B".into()], vec!["C".into(), "D".into()]],
        };
        let mut d = Document::new(vec![table.to_node().with_id("t1")]);

        let report = apply(
            &mut d,
            &[
                EditOp::TableDeleteRow {
                    target: Locator::id("t1"),
                    row: 1,
                },
                EditOp::TableInsertRow {
                    target: Locator::id("t1"),
                    row: 1,
                    cells: vec!["E".into(), "F".into()],
                },
                EditOp::TableUpdateCell {
                    target: Locator::id("t1"),
                    row: 0,
                    col: 0,
                    text: "A2".into(),
                },
                EditOp::TableUpdateCell {
                    target: Locator::id("t1"),
                    row: 5,
                    col: 0,
                    text: "out of range".into(),
                },
            ],
        );

        assert_eq!(report.applied(), 3);
        assert!(matches!(report.results[3].outcome, ApplyOutcome::Invalid { .. }));

        let result = Table::from_node(&d.blocks[0]).unwrap();
        assert_eq!(
            result.rows,
            vec![
                vec!["A2".to_string(), "B".to_string()],
                vec!["E".to_string(), "F".to_string()],
            ]
        );
    }

    #[test]
    fn test_opaque_subtree_survives_diff_and_apply() {
        let macro_body = "<vendor:chart data=\"q3\"/>";
        let old = Document::new(vec![
            Node::paragraph("intro").with_id("p1"),
            Node::opaque(macro_body).with_id("m1"),
            Node::paragraph("outro").with_id("p2"),
        ]);
        let mut new = old.clone();
        new.blocks[0].text = "intro, revised".into();
        new.blocks[2].text = "outro, revised".into();

        let ops = diff(&old, &new);
        let mut target = old.clone();
        let report = apply(&mut target, &ops);

        assert_eq!(report.failed(), 0);
        assert_eq!(target.blocks[1], old.blocks[1]);
        assert_eq!(target.blocks[1].text, macro_body);
        assert_eq!(target.blocks[0].text, "intro, revised");
    }

    #[test]
    fn test_failure_ratio_on_empty_pass() {
        let mut d = doc();
        let report = apply(&mut d, &[]);
        assert_eq!(report.failure_ratio(), 0.0);
    }
}
