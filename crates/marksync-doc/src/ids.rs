//! Typed identifiers for pages and content nodes.
//!
//! Both IDs are assigned by the remote side and are opaque strings here.
//! `NodeId` is only present when the storage format supports stable node
//! identity; the legacy format omits it and falls back to position
//! signatures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A remote page identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

/// A stable content-node identifier.
///
/// Remains valid as long as the node exists, independent of the node's
/// position among its siblings.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

macro_rules! impl_string_id {
    ($T:ident) => {
        impl $T {
            /// Wrap a raw identifier string.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// The raw identifier text.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($T), "({})"), self.0)
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

impl_string_id!(PageId);
impl_string_id!(NodeId);
