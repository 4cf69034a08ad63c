//! Baseline-centric three-way merge with cell-granular table handling.
//!
//! Table regions are detected structurally (pulldown-cmark offsets, no
//! regex), projected to one line per cell, and merged by the same generic
//! line-level three-way merge as the surrounding prose. Because disjoint
//! cells occupy independent projected lines, edits to different cells of
//! the same row merge automatically; only a genuinely contested cell
//! conflicts, and the markers wrap that single cell.
//!
//! When no baseline exists the merge degrades to a deterministic two-way
//! comparison: identical inputs pass through, any divergence is wrapped in
//! one conflict block. Merging never fails.

use marksync_doc::table::{
    is_projected_line, is_projection_start, projected_cell_address, projected_cell_text,
    unescape_cell, with_cell_text,
};
use marksync_doc::Table;
use pulldown_cmark::{Event, Options, Parser, Tag};
use serde::Serialize;
use similar::{capture_diff_slices, Algorithm, DiffTag};
use tracing::debug;

/// Marker opening the local side of a conflict.
pub const LOCAL_MARKER: &str = "<<<<<<< local";
/// Marker separating the two sides.
pub const SIDE_SEPARATOR: &str = "=======";
/// Marker closing the remote side.
pub const REMOTE_MARKER: &str = ">>>>>>> remote";

/// A half-open line range of the merged output still in conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ConflictSpan {
    pub start_line: usize,
    pub end_line: usize,
}

/// Outcome of a merge. A conflict is a result state, not an error.
#[derive(Clone, Debug, Serialize)]
pub struct MergeResult {
    pub merged: String,
    pub has_conflict: bool,
    pub conflicts: Vec<ConflictSpan>,
}

impl MergeResult {
    fn clean(merged: String) -> Self {
        Self {
            merged,
            has_conflict: false,
            conflicts: Vec::new(),
        }
    }
}

/// Merge `local` and `remote` against `baseline`.
///
/// `baseline` is `None` when a page has never completed a sync; the merge
/// then falls back to the two-way comparison described in the module docs.
pub fn merge(baseline: Option<&str>, local: &str, remote: &str) -> MergeResult {
    // Fast paths keep the common cases byte-exact: no projection, no
    // reformatting.
    if local == remote {
        return MergeResult::clean(local.to_string());
    }
    if let Some(base) = baseline {
        if local == base {
            return MergeResult::clean(remote.to_string());
        }
        if remote == base {
            return MergeResult::clean(local.to_string());
        }
    }

    let local_lines = project_tables(local);
    let remote_lines = project_tables(remote);

    let (mut merged_lines, mut conflicted) = match baseline {
        Some(base) => {
            let base_lines = project_tables(base);
            merge_three(&base_lines, &local_lines, &remote_lines)
        }
        None => merge_two(&local_lines, &remote_lines),
    };

    if conflicted {
        merged_lines = collapse_cell_conflicts(merged_lines);
    }
    let final_lines = unproject_lines(merged_lines);
    let conflicts = conflict_spans(&final_lines);
    conflicted = conflicted || !conflicts.is_empty();

    debug!(
        conflicted,
        spans = conflicts.len(),
        "three-way merge complete"
    );

    let mut merged = final_lines.join("\n");
    if !merged.is_empty() && (local.ends_with('\n') || remote.ends_with('\n')) {
        merged.push('\n');
    }

    MergeResult {
        merged,
        has_conflict: conflicted,
        conflicts,
    }
}

// ── table region projection ─────────────────────────────────────────────

/// Split `text` into lines, replacing each structurally detected table
/// region with its cell-line projection.
fn project_tables(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();

    // Byte offset of the start of each line, for mapping event ranges.
    let mut line_starts = Vec::with_capacity(lines.len());
    let mut offset = 0;
    for line in &lines {
        line_starts.push(offset);
        offset += line.len() + 1;
    }
    let line_of = |byte: usize| -> usize {
        match line_starts.binary_search(&byte) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        }
    };

    let parser = Parser::new_ext(text, Options::ENABLE_TABLES);
    let mut regions: Vec<(usize, usize)> = Vec::new();
    for (event, range) in parser.into_offset_iter() {
        if let Event::Start(Tag::Table(_)) = event {
            let start = line_of(range.start);
            let end = line_of(range.end.saturating_sub(1)) + 1;
            regions.push((start, end));
        }
    }

    let mut out = Vec::with_capacity(lines.len());
    let mut cursor = 0;
    for (start, end) in regions {
        for line in &lines[cursor..start] {
            out.push((*line).to_string());
        }
        let region = &lines[start..end];
        match Table::parse_markdown(region) {
            Some(table) => out.extend(table.project()),
            // Not actually a well-formed pipe table: leave it as prose.
            None => out.extend(region.iter().map(|l| (*l).to_string())),
        }
        cursor = end;
    }
    for line in &lines[cursor..] {
        out.push((*line).to_string());
    }
    out
}

/// Inverse of [`project_tables`]: rebuild pipe tables from maximal runs of
/// projected lines. A run still interrupted by marker blocks (a structural
/// table conflict the cell collapse could not fold) is resolved by
/// materializing each side of the region as a full table and re-conflicting
/// the rendered rows, so projection tags never reach the output.
fn unproject_lines(lines: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        match table_region_end(&lines, i) {
            Some(end) => {
                out.extend(rebuild_region(&lines[i..end]));
                i = end;
            }
            None => {
                out.push(lines[i].clone());
                i += 1;
            }
        }
    }
    out
}

/// End of the table region opening at `start`, if one does: a maximal run
/// of projected lines and conflict blocks that carry projected lines.
fn table_region_end(lines: &[String], start: usize) -> Option<usize> {
    let mut end = start;
    loop {
        if end >= lines.len() {
            break;
        }
        if is_projected_line(&lines[end]) {
            end += 1;
        } else if let Some(block_end) = conflict_block_end(lines, end) {
            if lines[end..block_end].iter().any(|l| is_projected_line(l)) {
                end = block_end;
            } else {
                break;
            }
        } else {
            break;
        }
    }
    (end > start).then_some(end)
}

/// `Some(end)` when a well-formed conflict block starts at `i`.
fn conflict_block_end(lines: &[String], i: usize) -> Option<usize> {
    if lines.get(i).map(String::as_str) != Some(LOCAL_MARKER) {
        return None;
    }
    let mut j = i + 1;
    while j < lines.len() && lines[j] != REMOTE_MARKER {
        j += 1;
    }
    (j < lines.len()).then_some(j + 1)
}

/// Turn one table region back into markdown. A conflict-free region
/// unprojects directly; a region holding marker blocks is split into its
/// local and remote views, each view rendered as a complete table, and the
/// rendered rows re-conflicted line by line. Shared rows (header, separator,
/// untouched body rows) come out clean either way.
fn rebuild_region(region: &[String]) -> Vec<String> {
    if !region.iter().any(|l| l == LOCAL_MARKER) {
        // One projection per table tag; adjacent projections unproject
        // independently.
        let mut out = Vec::with_capacity(region.len());
        let mut i = 0;
        while i < region.len() {
            let mut j = i + 1;
            while j < region.len() && !is_projection_start(&region[j]) {
                j += 1;
            }
            match Table::unproject(&region[i..j]) {
                Ok(table) => out.extend(table.to_markdown()),
                Err(_) => out.extend(region[i..j].iter().cloned()),
            }
            i = j;
        }
        return out;
    }
    let (local_side, remote_side) = split_sides(region);
    let local_rendered = unproject_lines(local_side);
    let remote_rendered = unproject_lines(remote_side);
    merge_two(&local_rendered, &remote_rendered).0
}

/// Split a marker-bearing region into its two views. Lines outside any
/// conflict block are common and land on both sides.
fn split_sides(region: &[String]) -> (Vec<String>, Vec<String>) {
    let mut local = Vec::with_capacity(region.len());
    let mut remote = Vec::with_capacity(region.len());
    let mut side = None;
    for line in region {
        match line.as_str() {
            LOCAL_MARKER => side = Some(true),
            SIDE_SEPARATOR if side.is_some() => side = Some(false),
            REMOTE_MARKER => side = None,
            _ => match side {
                Some(true) => local.push(line.clone()),
                Some(false) => remote.push(line.clone()),
                None => {
                    local.push(line.clone());
                    remote.push(line.clone());
                }
            },
        }
    }
    (local, remote)
}

// ── generic line merge ──────────────────────────────────────────────────

/// A contiguous change against the base side.
#[derive(Debug)]
struct Hunk {
    old_start: usize,
    old_end: usize,
    new_lines: Vec<String>,
}

fn edit_hunks(old: &[String], new: &[String]) -> Vec<Hunk> {
    capture_diff_slices(Algorithm::Myers, old, new)
        .into_iter()
        .filter(|op| op.tag() != DiffTag::Equal)
        .map(|op| Hunk {
            old_start: op.old_range().start,
            old_end: op.old_range().end,
            new_lines: new[op.new_range()].to_vec(),
        })
        .collect()
}

/// Replay one side's hunks that fall inside `[start, end)` of the base.
fn apply_hunks(base: &[String], start: usize, end: usize, hunks: &[&Hunk]) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = start;
    for hunk in hunks {
        out.extend(base[pos..hunk.old_start].iter().cloned());
        out.extend(hunk.new_lines.iter().cloned());
        pos = hunk.old_end;
    }
    out.extend(base[pos..end].iter().cloned());
    out
}

fn push_conflict(out: &mut Vec<String>, local: Vec<String>, remote: Vec<String>) {
    out.push(LOCAL_MARKER.to_string());
    out.extend(local);
    out.push(SIDE_SEPARATOR.to_string());
    out.extend(remote);
    out.push(REMOTE_MARKER.to_string());
}

/// diff3-style combination of two edit scripts over a shared base.
fn merge_three(base: &[String], local: &[String], remote: &[String]) -> (Vec<String>, bool) {
    let local_hunks = edit_hunks(base, local);
    let remote_hunks = edit_hunks(base, remote);

    let mut out = Vec::with_capacity(base.len().max(local.len()).max(remote.len()));
    let mut conflicted = false;
    let (mut li, mut ri) = (0usize, 0usize);
    let mut pos = 0usize;

    loop {
        let next_local = local_hunks.get(li).map(|h| h.old_start);
        let next_remote = remote_hunks.get(ri).map(|h| h.old_start);
        let next = match (next_local, next_remote) {
            (None, None) => {
                out.extend(base[pos..].iter().cloned());
                break;
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (Some(a), Some(b)) => a.min(b),
        };

        out.extend(base[pos..next].iter().cloned());

        // Seed the cluster with exactly one hunk: the earliest, preferring
        // a pure insert on a tie so it attaches before a replace at the
        // same point instead of deadlocking the walk.
        let start = next;
        let mut end = next;
        let mut cluster_local: Vec<&Hunk> = Vec::new();
        let mut cluster_remote: Vec<&Hunk> = Vec::new();

        let seed_local = match (local_hunks.get(li), remote_hunks.get(ri)) {
            (Some(_), None) => true,
            (None, _) => false,
            (Some(l), Some(r)) => {
                (l.old_start, l.old_end != l.old_start) < (r.old_start, r.old_end != r.old_start)
                    || (l.old_start, l.old_end) == (r.old_start, r.old_end)
            }
        };
        if seed_local {
            let h = &local_hunks[li];
            end = end.max(h.old_end);
            cluster_local.push(h);
            li += 1;
        } else {
            let h = &remote_hunks[ri];
            end = end.max(h.old_end);
            cluster_remote.push(h);
            ri += 1;
        }

        // Grow the cluster with every hunk overlapping it, either side.
        loop {
            let mut grew = false;
            if let Some(h) = local_hunks.get(li) {
                if overlaps(h, start, end) {
                    end = end.max(h.old_end);
                    cluster_local.push(h);
                    li += 1;
                    grew = true;
                }
            }
            if let Some(h) = remote_hunks.get(ri) {
                if overlaps(h, start, end) {
                    end = end.max(h.old_end);
                    cluster_remote.push(h);
                    ri += 1;
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        let base_slice = &base[start..end];
        let local_version = apply_hunks(base, start, end, &cluster_local);
        let remote_version = apply_hunks(base, start, end, &cluster_remote);

        if local_version == base_slice {
            out.extend(remote_version);
        } else if remote_version == base_slice {
            out.extend(local_version);
        } else if local_version == remote_version {
            out.extend(local_version);
        } else {
            conflicted = true;
            push_conflict(&mut out, local_version, remote_version);
        }

        pos = end;
    }

    (out, conflicted)
}

/// Cluster membership: real overlap with the region, or a pure insert at
/// the exact point of another pure insert. A replace at the boundary of an
/// insert is not a conflict; the insert attaches before it.
fn overlaps(h: &Hunk, start: usize, end: usize) -> bool {
    if h.old_start < end {
        return true;
    }
    h.old_start == end && start == end && h.old_end == h.old_start
}

/// Deterministic two-way comparison for pages with no baseline: shared
/// runs pass through, each divergent run becomes one conflict block.
fn merge_two(local: &[String], remote: &[String]) -> (Vec<String>, bool) {
    let mut out = Vec::new();
    let mut conflicted = false;
    for op in capture_diff_slices(Algorithm::Myers, local, remote) {
        match op.tag() {
            DiffTag::Equal => out.extend(local[op.old_range()].iter().cloned()),
            _ => {
                let local_side: Vec<String> = local[op.old_range()].to_vec();
                let remote_side: Vec<String> = remote[op.new_range()].to_vec();
                conflicted = true;
                push_conflict(&mut out, local_side, remote_side);
            }
        }
    }
    (out, conflicted)
}

// ── cell-level conflict collapsing ──────────────────────────────────────

/// Fold a conflict block whose two sides are the same single projected
/// cell into one cell line carrying both versions, so the table can still
/// be rebuilt and the markers scope to exactly that cell.
fn collapse_cell_conflicts(lines: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if lines[i] == LOCAL_MARKER {
            if let Some((collapsed, consumed)) = try_collapse_at(&lines, i) {
                out.push(collapsed);
                i += consumed;
                continue;
            }
        }
        out.push(lines[i].clone());
        i += 1;
    }
    out
}

fn try_collapse_at(lines: &[String], i: usize) -> Option<(String, usize)> {
    // Shape: marker, one cell line, separator, one cell line, marker.
    if i + 4 >= lines.len() {
        return None;
    }
    if lines[i + 2] != SIDE_SEPARATOR || lines[i + 4] != REMOTE_MARKER {
        return None;
    }
    let local_line = &lines[i + 1];
    let remote_line = &lines[i + 3];
    let local_addr = projected_cell_address(local_line)?;
    let remote_addr = projected_cell_address(remote_line)?;
    if local_addr != remote_addr {
        return None;
    }

    let local_text = unescape_cell(projected_cell_text(local_line)?);
    let remote_text = unescape_cell(projected_cell_text(remote_line)?);
    let combined = format!(
        "{LOCAL_MARKER}\n{local_text}\n{SIDE_SEPARATOR}\n{remote_text}\n{REMOTE_MARKER}"
    );
    let collapsed = with_cell_text(local_line, &combined)?;
    Some((collapsed, 5))
}

/// Line spans of the final output still carrying conflict markers: whole
/// marker blocks, plus single lines with an inline (cell-scoped) marker.
fn conflict_spans(lines: &[String]) -> Vec<ConflictSpan> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if lines[i] == LOCAL_MARKER {
            let mut j = i + 1;
            while j < lines.len() && lines[j] != REMOTE_MARKER {
                j += 1;
            }
            let end = (j + 1).min(lines.len());
            spans.push(ConflictSpan {
                start_line: i,
                end_line: end,
            });
            i = end;
        } else if lines[i].contains(LOCAL_MARKER) {
            spans.push(ConflictSpan {
                start_line: i,
                end_line: i + 1,
            });
            i += 1;
        } else {
            i += 1;
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE_TABLE: &str = "\
# Inventory

| Item | Count |
| --- | --- |
| A | B |
| C | D |

Closing paragraph.
";

    fn replace(text: &str, from: &str, to: &str) -> String {
        text.replace(from, to)
    }

    #[test]
    fn test_merge_is_idempotent_on_identical_inputs() {
        let result = merge(Some(BASE_TABLE), BASE_TABLE, BASE_TABLE);
        assert_eq!(result.merged, BASE_TABLE);
        assert!(!result.has_conflict);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn test_noop_symmetry_returns_baseline_unchanged() {
        let result = merge(Some(BASE_TABLE), BASE_TABLE, BASE_TABLE);
        assert_eq!(result.merged, BASE_TABLE);
        assert!(!result.has_conflict);
    }

    #[test]
    fn test_one_sided_change_passes_through_verbatim() {
        let local = replace(BASE_TABLE, "Closing paragraph.", "Closing paragraph, edited.");
        let result = merge(Some(BASE_TABLE), &local, BASE_TABLE);
        assert_eq!(result.merged, local);
        assert!(!result.has_conflict);

        let result = merge(Some(BASE_TABLE), BASE_TABLE, &local);
        assert_eq!(result.merged, local);
        assert!(!result.has_conflict);
    }

    #[test]
    fn test_disjoint_prose_edits_auto_merge() {
        let local = replace(BASE_TABLE, "# Inventory", "# Inventory (local)");
        let remote = replace(BASE_TABLE, "Closing paragraph.", "Closing, remote.");
        let result = merge(Some(BASE_TABLE), &local, &remote);
        assert!(!result.has_conflict);
        assert!(result.merged.contains("# Inventory (local)"));
        assert!(result.merged.contains("Closing, remote."));
    }

    #[test]
    fn test_disjoint_cells_in_same_row_auto_merge() {
        let local = replace(BASE_TABLE, "| A | B |", "| A-local | B |");
        let remote = replace(BASE_TABLE, "| A | B |", "| A | B-remote |");
        let result = merge(Some(BASE_TABLE), &local, &remote);
        assert!(!result.has_conflict, "merged: {}", result.merged);
        assert!(result.merged.contains("A-local"));
        assert!(result.merged.contains("B-remote"));
        assert!(!result.merged.contains("@@cell"));
    }

    #[test]
    fn test_same_cell_conflict_scopes_to_one_cell() {
        let local = replace(BASE_TABLE, "| A | B |", "| A-local | B |");
        let remote = replace(BASE_TABLE, "| A | B |", "| A-remote | B |");
        let result = merge(Some(BASE_TABLE), &local, &remote);

        assert!(result.has_conflict);
        assert!(result.merged.contains(LOCAL_MARKER));
        assert!(result.merged.contains("A-local"));
        assert!(result.merged.contains("A-remote"));
        // The untouched neighbors survive as plain cells.
        assert!(result.merged.contains("| C | D |"));
        assert_eq!(result.conflicts.len(), 1);

        // Markers live on a single table row, not around the whole table.
        let conflict_rows: Vec<&str> = result
            .merged
            .lines()
            .filter(|l| l.contains(LOCAL_MARKER))
            .collect();
        assert_eq!(conflict_rows.len(), 1);
        assert!(conflict_rows[0].starts_with('|'));
    }

    #[test]
    fn test_multi_cell_conflict_renders_whole_rows() {
        let local = replace(BASE_TABLE, "| A | B |", "| A-l | B-l |");
        let remote = replace(BASE_TABLE, "| A | B |", "| A-r | B-r |");
        let result = merge(Some(BASE_TABLE), &local, &remote);

        assert!(result.has_conflict);
        // Projection syntax never reaches the caller.
        assert!(!result.merged.contains("@@"), "merged: {}", result.merged);
        assert!(result.merged.contains("| A-l | B-l |"));
        assert!(result.merged.contains("| A-r | B-r |"));
        // The untouched row still renders as a table row.
        assert!(result.merged.contains("| C | D |"));
        assert_eq!(result.conflicts.len(), 1);
    }

    #[test]
    fn test_conflicting_row_inserts_stay_table_shaped() {
        let local = BASE_TABLE.replace("| C | D |", "| C | D |\n| E | F |");
        let remote = BASE_TABLE.replace("| C | D |", "| C | D |\n| G | H |");
        let result = merge(Some(BASE_TABLE), &local, &remote);

        assert!(result.has_conflict);
        assert!(!result.merged.contains("@@"), "merged: {}", result.merged);
        assert!(result.merged.contains("| E | F |"));
        assert!(result.merged.contains("| G | H |"));
        assert!(result.merged.contains("| C | D |"));
    }

    #[test]
    fn test_prose_conflict_wraps_smallest_run() {
        let base = "alpha\nbeta\ngamma\n";
        let local = "alpha\nbeta-local\ngamma\n";
        let remote = "alpha\nbeta-remote\ngamma\n";
        let result = merge(Some(base), local, remote);

        assert!(result.has_conflict);
        let lines: Vec<&str> = result.merged.lines().collect();
        assert_eq!(lines[0], "alpha");
        assert_eq!(lines[1], LOCAL_MARKER);
        assert_eq!(lines[2], "beta-local");
        assert_eq!(lines[3], SIDE_SEPARATOR);
        assert_eq!(lines[4], "beta-remote");
        assert_eq!(lines[5], REMOTE_MARKER);
        assert_eq!(lines[6], "gamma");
        assert_eq!(
            result.conflicts,
            vec![ConflictSpan {
                start_line: 1,
                end_line: 6
            }]
        );
    }

    #[test]
    fn test_both_sides_same_change_is_clean() {
        let edited = replace(BASE_TABLE, "| A | B |", "| same | B |");
        let result = merge(Some(BASE_TABLE), &edited, &edited);
        assert_eq!(result.merged, edited);
        assert!(!result.has_conflict);
    }

    #[test]
    fn test_missing_baseline_identical_inputs() {
        let result = merge(None, BASE_TABLE, BASE_TABLE);
        assert_eq!(result.merged, BASE_TABLE);
        assert!(!result.has_conflict);
    }

    #[test]
    fn test_missing_baseline_divergence_conflicts_deterministically() {
        let local = "shared\nlocal only\n";
        let remote = "shared\nremote only\n";
        let first = merge(None, local, remote);
        let second = merge(None, local, remote);

        assert!(first.has_conflict);
        assert_eq!(first.merged, second.merged);
        assert!(first.merged.contains("local only"));
        assert!(first.merged.contains("remote only"));
    }

    #[test]
    fn test_row_insert_from_one_side_merges() {
        let local = BASE_TABLE.replace("| C | D |", "| C | D |\n| E | F |");
        let result = merge(Some(BASE_TABLE), &local, BASE_TABLE);
        assert!(!result.has_conflict);
        assert!(result.merged.contains("| E | F |"));
    }

    #[test]
    fn test_table_edit_and_prose_edit_are_independent() {
        let local = replace(BASE_TABLE, "| A | B |", "| A-local | B |");
        let remote = replace(BASE_TABLE, "Closing paragraph.", "Closing, remote.");
        let result = merge(Some(BASE_TABLE), &local, &remote);
        assert!(!result.has_conflict);
        assert!(result.merged.contains("A-local"));
        assert!(result.merged.contains("Closing, remote."));
    }

    #[test]
    fn test_conflict_span_indexing_matches_lines() {
        let base = "one\ntwo\n";
        let local = "one\ntwo-l\n";
        let remote = "one\ntwo-r\n";
        let result = merge(Some(base), local, remote);
        let lines: Vec<&str> = result.merged.lines().collect();
        let span = result.conflicts[0];
        assert_eq!(lines[span.start_line], LOCAL_MARKER);
        assert_eq!(lines[span.end_line - 1], REMOTE_MARKER);
    }
}
