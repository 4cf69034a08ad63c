//! Per-page baseline store.
//!
//! One JSON record per page under a root directory, written atomically
//! (temp file + persist) and only after a sync fully completes, so the
//! baseline always reflects a consistent last-known-good state.
//!
//! The read-merge-write cycle for a page runs under an advisory file lock
//! keyed by page id. Acquisition waits a bounded time, then fails with
//! [`SyncError::Contention`] rather than deadlocking; the guard releases on
//! drop, covering every exit path.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use marksync_doc::{Baseline, PageId};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, SyncError};

const LOCK_POLL: Duration = Duration::from_millis(25);

/// File-backed baseline records, one per page id.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    root: PathBuf,
}

impl BaselineStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the baseline for a page, `None` if the page has never synced.
    pub fn read(&self, page_id: &PageId) -> Result<Option<Baseline>> {
        let path = self.record_path(page_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let baseline = serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::baseline(format!("{}: {e}", path.display())))?;
        Ok(Some(baseline))
    }

    /// Write the baseline for a page. Atomic: the record is either the old
    /// state or the new one, never a torn write.
    pub fn write(&self, page_id: &PageId, markdown: &str, version: u64) -> Result<Baseline> {
        let baseline = Baseline::new(page_id.clone(), markdown, version);
        let path = self.record_path(page_id);

        let mut temp = NamedTempFile::new_in(&self.root)?;
        serde_json::to_writer(&mut temp, &baseline)
            .map_err(|e| SyncError::baseline(e.to_string()))?;
        temp.flush()?;
        // persist renames over any existing record in one step; at no
        // point is the page left without a baseline.
        temp.persist(&path).map_err(|e| e.error)?;

        debug!(%page_id, version, "baseline written");
        Ok(baseline)
    }

    /// Remove a page's baseline. Returns whether one existed.
    pub fn delete(&self, page_id: &PageId) -> Result<bool> {
        match fs::remove_file(self.record_path(page_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Acquire the advisory lock for a page, waiting at most `wait`.
    pub fn lock(&self, page_id: &PageId, wait: Duration) -> Result<PageLock> {
        let path = self.lock_path(page_id);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let deadline = Instant::now() + wait;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(PageLock { file }),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(SyncError::contention(page_id.clone()));
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn record_path(&self, page_id: &PageId) -> PathBuf {
        self.root.join(format!("{}.json", file_key(page_id)))
    }

    fn lock_path(&self, page_id: &PageId) -> PathBuf {
        self.root.join(format!("{}.lock", file_key(page_id)))
    }
}

/// Scoped advisory lock on one page. Released on drop, so success,
/// conflict, and error paths all unlock.
#[derive(Debug)]
pub struct PageLock {
    file: File,
}

impl Drop for PageLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Filesystem-safe key for a page id: sanitized text plus a short content
/// hash so distinct ids never collide after sanitization.
fn file_key(page_id: &PageId) -> String {
    let safe: String = page_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .take(64)
        .collect();
    let digest = Sha256::digest(page_id.as_str().as_bytes());
    let mut hash = String::with_capacity(8);
    for byte in &digest[..4] {
        hash.push_str(&format!("{byte:02x}"));
    }
    format!("{safe}-{hash}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, BaselineStore) {
        let dir = TempDir::new().unwrap();
        let store = BaselineStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_read_absent_is_none() {
        let (_dir, store) = store();
        assert!(store.read(&"never-synced".into()).unwrap().is_none());
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let (_dir, store) = store();
        let page: PageId = "page-1".into();

        store.write(&page, "# Title\n\nbody\n", 12).unwrap();
        let baseline = store.read(&page).unwrap().unwrap();
        assert_eq!(baseline.page_id, page);
        assert_eq!(baseline.markdown, "# Title\n\nbody\n");
        assert_eq!(baseline.version, 12);
    }

    #[test]
    fn test_write_overwrites_whole_record() {
        let (_dir, store) = store();
        let page: PageId = "page-1".into();

        store.write(&page, "old", 1).unwrap();
        store.write(&page, "new", 2).unwrap();
        let baseline = store.read(&page).unwrap().unwrap();
        assert_eq!(baseline.markdown, "new");
        assert_eq!(baseline.version, 2);

        // Replaced in place: one record file, no leftovers.
        assert_eq!(fs::read_dir(store.root()).unwrap().count(), 1);
    }

    #[test]
    fn test_delete() {
        let (_dir, store) = store();
        let page: PageId = "page-1".into();

        assert!(!store.delete(&page).unwrap());
        store.write(&page, "content", 1).unwrap();
        assert!(store.delete(&page).unwrap());
        assert!(store.read(&page).unwrap().is_none());
    }

    #[test]
    fn test_distinct_ids_never_collide() {
        let (_dir, store) = store();
        // Sanitizes to the same text, must still be distinct records.
        store.write(&"a/b".into(), "first", 1).unwrap();
        store.write(&"a.b".into(), "second", 1).unwrap();

        assert_eq!(store.read(&"a/b".into()).unwrap().unwrap().markdown, "first");
        assert_eq!(store.read(&"a.b".into()).unwrap().unwrap().markdown, "second");
    }

    #[test]
    fn test_lock_contention_is_bounded() {
        let (_dir, store) = store();
        let page: PageId = "page-1".into();

        let held = store.lock(&page, Duration::from_millis(100)).unwrap();
        let err = store.lock(&page, Duration::from_millis(60)).unwrap_err();
        assert!(matches!(err, SyncError::Contention { .. }));

        drop(held);
        // Released on drop: reacquisition succeeds.
        let _relock = store.lock(&page, Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn test_corrupt_record_is_a_typed_error() {
        let (_dir, store) = store();
        let page: PageId = "page-1".into();
        store.write(&page, "ok", 1).unwrap();

        // Overwrite the record with junk directly.
        let path = store.record_path(&page);
        fs::write(&path, b"not json").unwrap();

        assert!(matches!(store.read(&page), Err(SyncError::Baseline(_))));
    }
}
