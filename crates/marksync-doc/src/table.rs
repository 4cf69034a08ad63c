//! Table model and cell projection.
//!
//! A table is projected to a flat, line-addressed representation (one line
//! per cell, tagged with its `(row, col)` address) so a generic line-based
//! three-way merge can operate on tables without entangling adjacent cells
//! or rows. `unproject` is the exact inverse: column count, separator row,
//! and cell text (including embedded line breaks) survive the round trip.
//!
//! Embedded newlines inside a cell are escaped to a private-use sentinel so
//! every cell stays on one projected line. Decoding is deliberately lossy:
//! a literal sentinel character in source text also decodes to a newline.
//! That mirrors the long-standing behavior of the original tooling and is
//! kept as-is.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DocError, Result};
use crate::node::{Node, NodeKind};

/// Sentinel standing in for `\n` inside a projected cell line.
pub const NEWLINE_SENTINEL: char = '\u{e000}';

const TABLE_TAG: &str = "@@table ";
const HEADER_TAG: &str = "@@header ";
const CELL_TAG: &str = "@@cell ";
const TAG_CLOSE: &str = "@@";

/// Column alignment from the separator row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alignment {
    None,
    Left,
    Center,
    Right,
}

impl Alignment {
    fn code(self) -> char {
        match self {
            Alignment::None => '-',
            Alignment::Left => 'l',
            Alignment::Center => 'c',
            Alignment::Right => 'r',
        }
    }

    fn from_code(c: char) -> Option<Self> {
        match c {
            '-' => Some(Alignment::None),
            'l' => Some(Alignment::Left),
            'c' => Some(Alignment::Center),
            'r' => Some(Alignment::Right),
            _ => None,
        }
    }

    fn separator(self) -> &'static str {
        match self {
            Alignment::None => "---",
            Alignment::Left => ":--",
            Alignment::Center => ":-:",
            Alignment::Right => "--:",
        }
    }

    fn from_separator(cell: &str) -> Option<Self> {
        let cell = cell.trim();
        if cell.is_empty() || !cell.chars().all(|c| c == '-' || c == ':') {
            return None;
        }
        let left = cell.starts_with(':');
        let right = cell.ends_with(':');
        Some(match (left, right) {
            (true, true) => Alignment::Center,
            (true, false) => Alignment::Left,
            (false, true) => Alignment::Right,
            (false, false) => Alignment::None,
        })
    }
}

/// A `(row, col)` cell address in a projected table. Row 0 is the first
/// body row; the header row is addressed separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    pub row: usize,
    pub col: usize,
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

impl CellAddress {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    fn parse(s: &str) -> Option<Self> {
        let (row, col) = s.split_once(',')?;
        Some(Self {
            row: row.parse().ok()?,
            col: col.parse().ok()?,
        })
    }
}

/// A table block: one header row, a separator, and body rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub alignments: Vec<Alignment>,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn cols(&self) -> usize {
        self.header.len()
    }

    // ── markdown ────────────────────────────────────────────────────────

    /// Parse a run of pipe-table lines. Returns `None` when the lines are
    /// not a well-formed table (missing separator, no header).
    pub fn parse_markdown(lines: &[&str]) -> Option<Table> {
        if lines.len() < 2 {
            return None;
        }
        let header = split_row(lines[0])?;
        let separator = split_row(lines[1])?;
        if separator.len() != header.len() {
            return None;
        }
        let alignments: Vec<Alignment> = separator
            .iter()
            .map(|cell| Alignment::from_separator(cell))
            .collect::<Option<_>>()?;

        let cols = header.len();
        let rows = lines[2..]
            .iter()
            .filter_map(|line| split_row(line))
            .map(|mut row| {
                row.resize(cols, String::new());
                row
            })
            .collect();

        Some(Table {
            alignments,
            header,
            rows,
        })
    }

    /// Render back to pipe-table lines. Cell text containing newlines
    /// (possible after a cell-level merge) is rendered with `<br>` so the
    /// output stays a valid single-line-per-row table.
    pub fn to_markdown(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.rows.len() + 2);
        lines.push(render_row(&self.header));
        lines.push(format!(
            "| {} |",
            self.alignments
                .iter()
                .map(|a| a.separator())
                .collect::<Vec<_>>()
                .join(" | ")
        ));
        for row in &self.rows {
            lines.push(render_row(row));
        }
        lines
    }

    // ── document tree ───────────────────────────────────────────────────

    /// Read a table out of a `Table` node: first row is the header, the
    /// rest are body rows.
    pub fn from_node(node: &Node) -> Result<Table> {
        if !node.is_table() {
            return Err(DocError::malformed_table(format!(
                "expected table node, got {}",
                node.kind
            )));
        }
        let mut rows_iter = node.children.iter();
        let header_node = rows_iter
            .next()
            .ok_or_else(|| DocError::malformed_table("table node has no rows"))?;
        let header = row_texts(header_node)?;
        let cols = header.len();
        let rows = rows_iter
            .map(|row| {
                let mut cells = row_texts(row)?;
                cells.resize(cols, String::new());
                Ok(cells)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Table {
            alignments: vec![Alignment::None; cols],
            header,
            rows,
        })
    }

    /// Build the `Table` node subtree for this table.
    pub fn to_node(&self) -> Node {
        let mut children = Vec::with_capacity(self.rows.len() + 1);
        children.push(Node::table_row(self.header.iter().cloned()));
        for row in &self.rows {
            children.push(Node::table_row(row.iter().cloned()));
        }
        Node::new(NodeKind::Table).with_children(children)
    }

    // ── projection ──────────────────────────────────────────────────────

    /// Project to cell lines: a table tag line carrying column count and
    /// alignments, one line per header cell, one line per body cell.
    pub fn project(&self) -> Vec<String> {
        let align: String = self
            .alignments
            .iter()
            .map(|a| a.code())
            .collect::<Vec<char>>()
            .iter()
            .collect();
        let mut lines = Vec::with_capacity(self.cols() * (self.rows.len() + 1) + 1);
        lines.push(format!(
            "{TABLE_TAG}cols={} align={align}{TAG_CLOSE}",
            self.cols()
        ));
        for (col, text) in self.header.iter().enumerate() {
            lines.push(format!("{HEADER_TAG}{col}{TAG_CLOSE}{}", escape_cell(text)));
        }
        for (row, cells) in self.rows.iter().enumerate() {
            for (col, text) in cells.iter().enumerate() {
                let addr = CellAddress::new(row, col);
                lines.push(format!("{CELL_TAG}{addr}{TAG_CLOSE}{}", escape_cell(text)));
            }
        }
        lines
    }

    /// Rebuild a table from projected cell lines.
    pub fn unproject(lines: &[String]) -> Result<Table> {
        let first = lines
            .first()
            .ok_or_else(|| DocError::invalid_projection("empty projection"))?;
        let (cols, alignments) = parse_table_tag(first)?;

        let mut header = vec![String::new(); cols];
        let mut rows: Vec<Vec<String>> = Vec::new();
        for line in &lines[1..] {
            if let Some(rest) = line.strip_prefix(HEADER_TAG) {
                let (col, text) = split_tag(rest)
                    .ok_or_else(|| DocError::invalid_projection(line.clone()))?;
                let col: usize = col
                    .parse()
                    .map_err(|_| DocError::invalid_projection(line.clone()))?;
                if col >= cols {
                    return Err(DocError::invalid_projection(line.clone()));
                }
                header[col] = unescape_cell(text);
            } else if let Some(rest) = line.strip_prefix(CELL_TAG) {
                let (addr, text) = split_tag(rest)
                    .ok_or_else(|| DocError::invalid_projection(line.clone()))?;
                let addr = CellAddress::parse(addr)
                    .ok_or_else(|| DocError::invalid_projection(line.clone()))?;
                if addr.col >= cols {
                    return Err(DocError::invalid_projection(line.clone()));
                }
                while rows.len() <= addr.row {
                    rows.push(vec![String::new(); cols]);
                }
                rows[addr.row][addr.col] = unescape_cell(text);
            } else {
                return Err(DocError::invalid_projection(line.clone()));
            }
        }

        Ok(Table {
            alignments,
            header,
            rows,
        })
    }
}

/// Whether a projected line is a cell line, and its address if so.
pub fn projected_cell_address(line: &str) -> Option<CellAddress> {
    let rest = line.strip_prefix(CELL_TAG)?;
    let (addr, _) = split_tag(rest)?;
    CellAddress::parse(addr)
}

/// Whether a line belongs to a table projection.
pub fn is_projected_line(line: &str) -> bool {
    line.starts_with(TABLE_TAG) || line.starts_with(HEADER_TAG) || line.starts_with(CELL_TAG)
}

/// Whether a line starts a table projection.
pub fn is_projection_start(line: &str) -> bool {
    line.starts_with(TABLE_TAG)
}

/// The text payload of a projected cell or header line.
pub fn projected_cell_text(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix(CELL_TAG)
        .or_else(|| line.strip_prefix(HEADER_TAG))?;
    split_tag(rest).map(|(_, text)| text)
}

/// Rebuild the raw (unescaped) cell text for a projected cell line,
/// replacing its payload. Used by the merge to fold both sides of a
/// conflicted cell into one line.
pub fn with_cell_text(line: &str, text: &str) -> Option<String> {
    let rest = line.strip_prefix(CELL_TAG)?;
    let (addr, _) = split_tag(rest)?;
    Some(format!("{CELL_TAG}{addr}{TAG_CLOSE}{}", escape_cell(text)))
}

/// Escape embedded newlines to the projection sentinel.
pub fn escape_cell(text: &str) -> String {
    text.replace('\n', &NEWLINE_SENTINEL.to_string())
}

/// Restore sentinels to newlines. Lossy for literal sentinel characters,
/// by design.
pub fn unescape_cell(text: &str) -> String {
    text.replace(NEWLINE_SENTINEL, "\n")
}

fn parse_table_tag(line: &str) -> Result<(usize, Vec<Alignment>)> {
    let rest = line
        .strip_prefix(TABLE_TAG)
        .and_then(|r| r.strip_suffix(TAG_CLOSE))
        .ok_or_else(|| DocError::invalid_projection(line.to_string()))?;
    let mut cols = None;
    let mut alignments = Vec::new();
    for part in rest.split_whitespace() {
        if let Some(n) = part.strip_prefix("cols=") {
            cols = n.parse::<usize>().ok();
        } else if let Some(codes) = part.strip_prefix("align=") {
            alignments = codes
                .chars()
                .map(Alignment::from_code)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| DocError::invalid_projection(line.to_string()))?;
        }
    }
    let cols = cols.ok_or_else(|| DocError::invalid_projection(line.to_string()))?;
    if alignments.len() != cols {
        return Err(DocError::invalid_projection(line.to_string()));
    }
    Ok((cols, alignments))
}

fn split_tag(rest: &str) -> Option<(&str, &str)> {
    rest.split_once(TAG_CLOSE)
}

fn row_texts(row: &Node) -> Result<Vec<String>> {
    if row.kind != NodeKind::TableRow {
        return Err(DocError::malformed_table(format!(
            "expected table-row node, got {}",
            row.kind
        )));
    }
    Ok(row.children.iter().map(Node::content_text).collect())
}

fn split_row(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') {
        return None;
    }
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);

    // Split on unescaped pipes so `\|` stays inside a cell.
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in inner.chars() {
        match c {
            '\\' if !escaped => {
                escaped = true;
                current.push(c);
            }
            '|' if !escaped => {
                cells.push(current.trim().to_string());
                current = String::new();
            }
            _ => {
                escaped = false;
                current.push(c);
            }
        }
    }
    cells.push(current.trim().to_string());
    Some(cells)
}

fn render_row(cells: &[String]) -> String {
    let rendered: Vec<String> = cells.iter().map(|c| c.replace('\n', "<br>")).collect();
    format!("| {} |", rendered.join(" | "))
}
