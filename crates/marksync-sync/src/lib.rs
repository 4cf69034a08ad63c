//! Sync orchestration: baselines, transport, conversion, and the per-page
//! push/pull cycle.
//!
//! This crate wires the pure diff/merge/apply machinery from
//! `marksync-engine` to the outside world: a remote page store behind
//! [`PageTransport`], an external markdown converter behind [`Converter`],
//! and a file-backed [`BaselineStore`] recording the last synced state of
//! each page. [`SyncEngine`] runs the cycle.

pub mod baseline;
pub mod config;
pub mod convert;
pub mod cycle;
pub mod error;
pub mod transport;

pub use baseline::{BaselineStore, PageLock};
pub use config::SyncConfig;
pub use convert::{ConvertError, Converter};
pub use cycle::{SyncEngine, SyncOutcome};
pub use error::{Result, SyncError};
pub use transport::{write_with_retry, PageTransport, TransportError};
