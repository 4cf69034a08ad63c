//! Tree diff: compute the ordered operation list between two documents.
//!
//! Matching prefers stable-id equality. Blocks without ids fall back to
//! position-signature matching, where only an unchanged signature matches:
//! a block whose signature changed is treated as delete-old + insert-new,
//! never as an update. That asymmetry is the documented cost of the legacy
//! path.
//!
//! Matched blocks whose relative order changed are moved: the block is
//! deleted and its new-side version reinserted, so applying the op list
//! always reproduces the new document's ordering.
//!
//! Opaque extension blocks are excluded from candidacy on both sides: no
//! operation is ever emitted for them, and their content never feeds a
//! comparison.

use std::collections::{HashMap, HashSet};

use marksync_doc::{sort_ops, Document, EditOp, Locator, Node, Table};
use tracing::debug;

/// Compute the operations that transform `old` into `new`, sorted into
/// the fixed precedence order (delete → insert → update-text →
/// heading-level → table ops).
pub fn diff(old: &Document, new: &Document) -> Vec<EditOp> {
    let old_sigs = old.signatures();
    let new_sigs = new.signatures();

    let new_by_id: HashMap<_, usize> = new
        .blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| !b.is_opaque())
        .filter_map(|(i, b)| b.id.as_ref().map(|id| (id.clone(), i)))
        .collect();

    let mut matched: Vec<(usize, usize)> = Vec::new();
    let mut used_new: HashSet<usize> = HashSet::new();
    let mut unmatched_old: Vec<usize> = Vec::new();

    for (oi, block) in old.blocks.iter().enumerate() {
        if block.is_opaque() {
            continue;
        }
        if let Some(id) = &block.id {
            if let Some(&ni) = new_by_id.get(id) {
                matched.push((oi, ni));
                used_new.insert(ni);
                continue;
            }
            unmatched_old.push(oi);
            continue;
        }
        // Legacy path: exact signature match only.
        let sig = &old_sigs[oi];
        let hit = new
            .blocks
            .iter()
            .enumerate()
            .position(|(ni, b)| {
                !b.is_opaque() && b.id.is_none() && !used_new.contains(&ni) && &new_sigs[ni] == sig
            });
        match hit {
            Some(ni) => {
                matched.push((oi, ni));
                used_new.insert(ni);
            }
            None => unmatched_old.push(oi),
        }
    }

    let mut ops: Vec<EditOp> = Vec::new();

    for oi in unmatched_old {
        ops.push(EditOp::DeleteBlock {
            target: locator_for(&old.blocks[oi], &old_sigs[oi]),
        });
    }

    // Matched pairs outside the longest order-preserving run have moved.
    // The op vocabulary has no move, so a moved block is deleted and its
    // new-side version reinserted at the new position.
    let keep = order_preserving(&matched);
    let mut inserts: Vec<(usize, Node)> = Vec::new();

    for (ni, block) in new.blocks.iter().enumerate() {
        if block.is_opaque() || used_new.contains(&ni) {
            continue;
        }
        inserts.push((ni, block.clone()));
    }

    for (k, &(oi, ni)) in matched.iter().enumerate() {
        if keep[k] {
            continue;
        }
        ops.push(EditOp::DeleteBlock {
            target: locator_for(&old.blocks[oi], &old_sigs[oi]),
        });
        inserts.push((ni, new.blocks[ni].clone()));
    }

    // Ascending target indices: each insert lands without displacing the
    // ones after it.
    inserts.sort_by_key(|(index, _)| *index);
    for (index, node) in inserts {
        ops.push(EditOp::InsertBlock { index, node });
    }

    for (k, &(oi, ni)) in matched.iter().enumerate() {
        if !keep[k] {
            continue;
        }
        let target = locator_for(&old.blocks[oi], &old_sigs[oi]);
        diff_pair(&old.blocks[oi], &new.blocks[ni], target, &mut ops);
    }

    debug!(op_count = ops.len(), "computed tree diff");
    sort_ops(ops)
}

/// Longest run of matched pairs whose new-side indices are increasing:
/// those keep their relative order and stay in place. Quadratic, which is
/// fine at page scale.
fn order_preserving(matched: &[(usize, usize)]) -> Vec<bool> {
    let n = matched.len();
    let mut len = vec![1usize; n];
    let mut prev = vec![usize::MAX; n];
    let mut best = 0;
    for i in 0..n {
        for j in 0..i {
            if matched[j].1 < matched[i].1 && len[j] + 1 > len[i] {
                len[i] = len[j] + 1;
                prev[i] = j;
            }
        }
        if len[i] > len[best] {
            best = i;
        }
    }
    let mut keep = vec![false; n];
    if n > 0 {
        let mut k = best;
        loop {
            keep[k] = true;
            if prev[k] == usize::MAX {
                break;
            }
            k = prev[k];
        }
    }
    keep
}

fn locator_for(block: &Node, sig: &marksync_doc::PositionSignature) -> Locator {
    match &block.id {
        Some(id) => Locator::id(id.clone()),
        None => Locator::signature(sig.clone()),
    }
}

/// Emit the ops turning one matched block into its counterpart.
fn diff_pair(old_block: &Node, new_block: &Node, target: Locator, ops: &mut Vec<EditOp>) {
    if old_block.is_table() && new_block.is_table() {
        diff_tables(old_block, new_block, target, ops);
        return;
    }

    match (old_block.heading_level(), new_block.heading_level()) {
        (Some(ol), Some(nl)) if ol != nl => ops.push(EditOp::ChangeHeadingLevel {
            target: target.clone(),
            level: nl,
        }),
        _ => {}
    }

    if old_block.text != new_block.text {
        ops.push(EditOp::UpdateText {
            target,
            text: new_block.text.clone(),
        });
    }
}

/// Cell-granular table diff.
///
/// Column-count or header changes replace the whole table; row and cell
/// edits are surgical. Row deletes are emitted high-to-low so indices in
/// the same operation batch stay valid.
fn diff_tables(old_block: &Node, new_block: &Node, target: Locator, ops: &mut Vec<EditOp>) {
    let (old_table, new_table) = match (Table::from_node(old_block), Table::from_node(new_block)) {
        (Ok(o), Ok(n)) => (o, n),
        _ => {
            replace_block(target, new_block, ops);
            return;
        }
    };

    if old_table.cols() != new_table.cols() || old_table.header != new_table.header {
        replace_block(target, new_block, ops);
        return;
    }

    let common = old_table.rows.len().min(new_table.rows.len());

    for row in (new_table.rows.len()..old_table.rows.len()).rev() {
        ops.push(EditOp::TableDeleteRow {
            target: target.clone(),
            row,
        });
    }
    for row in old_table.rows.len()..new_table.rows.len() {
        ops.push(EditOp::TableInsertRow {
            target: target.clone(),
            row,
            cells: new_table.rows[row].clone(),
        });
    }
    for row in 0..common {
        for col in 0..old_table.cols() {
            if old_table.rows[row][col] != new_table.rows[row][col] {
                ops.push(EditOp::TableUpdateCell {
                    target: target.clone(),
                    row,
                    col,
                    text: new_table.rows[row][col].clone(),
                });
            }
        }
    }
}

fn replace_block(target: Locator, new_block: &Node, ops: &mut Vec<EditOp>) {
    // InsertBlock index is resolved after deletes; the replacement lands
    // where the diff's insert pass puts it. Since matched blocks keep their
    // position, reuse of the same slot is expressed as delete + insert at
    // the end of the list.
    ops.push(EditOp::DeleteBlock {
        target: target.clone(),
    });
    ops.push(EditOp::InsertBlock {
        index: usize::MAX, // clamped to end by the editor
        node: new_block.clone(),
    });
}
