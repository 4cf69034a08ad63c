//! Canonical in-memory document model.
//!
//! A page is an ordered sequence of block [`Node`]s, uniform across wire
//! formats. The modern storage format carries a stable id on every node; the
//! legacy format omits ids, and those documents are addressed by
//! [`PositionSignature`] instead.
//!
//! Vendor extension blocks are a first-class [`NodeKind::OpaqueExtension`]
//! variant rather than a namespace-string check. Their subtrees are never
//! inspected for diffing and never targeted by an edit operation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::Display;

use crate::ids::NodeId;

/// Kind of a content node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NodeKind {
    Paragraph,
    Heading { level: u8 },
    ListItem,
    Table,
    TableRow,
    TableCell,
    TextRun,
    /// A vendor extension block. The subtree below this node is opaque:
    /// diff and edit must leave it byte-identical.
    OpaqueExtension,
}

impl NodeKind {
    /// Short stable tag, used in position signatures.
    ///
    /// Heading level is deliberately not part of the tag so a level change
    /// still matches the same node on the legacy path.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Paragraph => "paragraph",
            NodeKind::Heading { .. } => "heading",
            NodeKind::ListItem => "list-item",
            NodeKind::Table => "table",
            NodeKind::TableRow => "table-row",
            NodeKind::TableCell => "table-cell",
            NodeKind::TextRun => "text-run",
            NodeKind::OpaqueExtension => "opaque-extension",
        }
    }
}

/// A single content node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identity, absent in the legacy wire format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Literal text owned by this node (leaf content).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: None,
            kind,
            text: String::new(),
            children: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    /// A paragraph with literal text.
    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::new(NodeKind::Paragraph).with_text(text)
    }

    /// A heading at `level` with literal text.
    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Self::new(NodeKind::Heading { level }).with_text(text)
    }

    /// An opaque vendor extension block carrying raw vendor payload.
    pub fn opaque(raw: impl Into<String>) -> Self {
        Self::new(NodeKind::OpaqueExtension).with_text(raw)
    }

    /// A table cell with literal text.
    pub fn table_cell(text: impl Into<String>) -> Self {
        Self::new(NodeKind::TableCell).with_text(text)
    }

    /// A table row from cell texts.
    pub fn table_row(cells: impl IntoIterator<Item = String>) -> Self {
        Self::new(NodeKind::TableRow)
            .with_children(cells.into_iter().map(Node::table_cell).collect())
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self.kind, NodeKind::OpaqueExtension)
    }

    pub fn is_table(&self) -> bool {
        matches!(self.kind, NodeKind::Table)
    }

    pub fn heading_level(&self) -> Option<u8> {
        match self.kind {
            NodeKind::Heading { level } => Some(level),
            _ => None,
        }
    }

    /// Own text plus descendant text, document order.
    ///
    /// Opaque subtrees contribute nothing: their content must never feed
    /// diff comparisons.
    pub fn content_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        if self.is_opaque() {
            return;
        }
        out.push_str(&self.text);
        for child in &self.children {
            child.collect_text(out);
        }
    }

    /// Whether any node in this subtree is an opaque extension.
    pub fn contains_opaque(&self) -> bool {
        self.is_opaque() || self.children.iter().any(Node::contains_opaque)
    }
}

/// A derived fingerprint locating a node when no stable id is available.
///
/// Kind tag + ordinal among same-kind top-level blocks + truncated content
/// hash. Fragile by construction: unrelated structural edits that shift
/// ordinals invalidate it. That is a documented limitation of the legacy
/// path, not something the engine compensates for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionSignature {
    pub kind: String,
    pub ordinal: usize,
    pub content_hash: String,
}

impl PositionSignature {
    pub fn of(node: &Node, ordinal: usize) -> Self {
        Self {
            kind: node.kind.tag().to_string(),
            ordinal,
            content_hash: short_hash(&node.content_text()),
        }
    }
}

impl std::fmt::Display for PositionSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}@{}", self.kind, self.ordinal, self.content_hash)
    }
}

/// First 16 hex chars of the SHA-256 of `text`.
fn short_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// An ordered page of top-level blocks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub blocks: Vec<Node>,
}

impl Document {
    pub fn new(blocks: Vec<Node>) -> Self {
        Self { blocks }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether every non-opaque top-level block carries a stable id.
    ///
    /// Decides which addressing path the diff engine uses for this
    /// document pair.
    pub fn has_stable_ids(&self) -> bool {
        self.blocks
            .iter()
            .filter(|b| !b.is_opaque())
            .all(|b| b.id.is_some())
    }

    /// Position signatures for every top-level block, index-aligned with
    /// `blocks`. Ordinals count previous same-kind blocks.
    pub fn signatures(&self) -> Vec<PositionSignature> {
        let mut seen: std::collections::HashMap<&'static str, usize> =
            std::collections::HashMap::new();
        self.blocks
            .iter()
            .map(|block| {
                let ordinal = seen.entry(block.kind.tag()).or_insert(0);
                let sig = PositionSignature::of(block, *ordinal);
                *ordinal += 1;
                sig
            })
            .collect()
    }
}
