//! Document tree abstraction for marksync.
//!
//! Models a remote structured page uniformly across wire formats: ordered
//! block nodes, optional stable node identity, and a first-class opaque
//! kind for vendor extension blocks whose subtrees must survive every edit
//! cycle untouched.
//!
//! This crate is pure data: the tree, the edit-operation vocabulary, the
//! table cell projection, and the snapshot/baseline records. The diff,
//! editor, and merge engines live in `marksync-engine`; persistence and
//! the remote boundary live in `marksync-sync`.

mod error;
mod ids;
mod node;
mod ops;
mod snapshot;
pub mod table;

pub use error::{DocError, Result};
pub use ids::{NodeId, PageId};
pub use node::{Document, Node, NodeKind, PositionSignature};
pub use ops::{sort_ops, EditOp, Locator};
pub use snapshot::{Baseline, PageSnapshot};
pub use table::{Alignment, CellAddress, Table, NEWLINE_SENTINEL};
