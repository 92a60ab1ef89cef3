//! Blob-addressed storage backend for snapshots.
//!
//! Mirrors the storage-backend seam the persistence layer is built against:
//! a small trait of whole-blob operations (read, atomic write, rename,
//! remove, list, stat) that the snapshot protocol composes into its
//! latest-plus-backup discipline. A filesystem-backed implementation is
//! provided for production use and an in-memory one for tests.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Size and last-modified time of a blob, as needed to support mtime-ordered
/// snapshot listing and GC.
#[derive(Debug, Clone, Copy)]
pub struct BlobStat {
    /// Size in bytes.
    pub size: usize,
    /// Last-modified time. A rename preserves the modified time of the blob
    /// it moves, matching filesystem `rename(2)` semantics.
    pub modified: SystemTime,
}

/// A directory of named, whole-blob entries.
///
/// Every method treats its blob as opaque bytes; the persistence layer owns
/// interpreting them as JSON snapshots.
pub trait GraphStore: Send + Sync {
    /// Reads the full contents of `name`, or `Ok(None)` if it doesn't exist.
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Writes `data` to `name` atomically: the final state is either the old
    /// contents or the new ones, never a partial write, even under a crash.
    fn atomic_write(&self, name: &str, data: &[u8]) -> io::Result<()>;

    /// Renames `from` to `to`, overwriting `to` if it exists. A no-op
    /// success if `from` does not exist.
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Removes `name`. A no-op success if it does not exist.
    fn remove(&self, name: &str) -> io::Result<()>;

    /// Lists entry names matching `prefix`.
    fn list(&self, prefix: &str) -> io::Result<Vec<String>>;

    /// Size and last-modified time of `name`, or `Ok(None)` if it doesn't
    /// exist.
    fn stat(&self, name: &str) -> io::Result<Option<BlobStat>>;
}

/// Filesystem-backed [`GraphStore`] rooted at a directory.
///
/// Atomic writes go through a `.tmp` sibling file plus `fs::rename`, which is
/// atomic on the same filesystem on every platform this crate targets.
pub struct FileGraphStore {
    root: PathBuf,
}

impl FileGraphStore {
    /// Opens (creating if necessary) a [`FileGraphStore`] rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl GraphStore for FileGraphStore {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn atomic_write(&self, name: &str, data: &[u8]) -> io::Result<()> {
        let target = self.path_for(name);
        let tmp = self.path_for(&format!("{name}.tmp"));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &target)
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        match fs::rename(self.path_for(from), self.path_for(to)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn list(&self, prefix: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    fn stat(&self, name: &str) -> io::Result<Option<BlobStat>> {
        match fs::metadata(self.path_for(name)) {
            Ok(meta) => Ok(Some(BlobStat {
                size: meta.len() as usize,
                modified: meta.modified()?,
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

struct MemoryEntry {
    data: Vec<u8>,
    modified: SystemTime,
}

/// In-memory [`GraphStore`] for tests.
#[derive(Default)]
pub struct MemoryGraphStore {
    entries: std::sync::Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryGraphStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for MemoryGraphStore {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(name).map(|e| e.data.clone()))
    }

    fn atomic_write(&self, name: &str, data: &[u8]) -> io::Result<()> {
        self.entries.lock().unwrap().insert(
            name.to_string(),
            MemoryEntry {
                data: data.to_vec(),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.remove(from) {
            entries.insert(to.to_string(), entry);
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        self.entries.lock().unwrap().remove(name);
        Ok(())
    }

    fn list(&self, prefix: &str) -> io::Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn stat(&self, name: &str) -> io::Result<Option<BlobStat>> {
        Ok(self.entries.lock().unwrap().get(name).map(|e| BlobStat {
            size: e.data.len(),
            modified: e.modified,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryGraphStore::new();
        assert!(store.read("a").unwrap().is_none());
        store.atomic_write("a", b"hello").unwrap();
        assert_eq!(store.read("a").unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn memory_store_rename_moves_entry() {
        let store = MemoryGraphStore::new();
        store.atomic_write("a", b"x").unwrap();
        store.rename("a", "b").unwrap();
        assert!(store.read("a").unwrap().is_none());
        assert_eq!(store.read("b").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn remove_missing_is_not_an_error() {
        let store = MemoryGraphStore::new();
        assert!(store.remove("missing").is_ok());
    }

    #[test]
    fn memory_store_stat_reports_size_and_survives_rename() {
        let store = MemoryGraphStore::new();
        assert!(store.stat("a").unwrap().is_none());
        store.atomic_write("a", b"hello").unwrap();
        let before = store.stat("a").unwrap().unwrap();
        assert_eq!(before.size, 5);
        store.rename("a", "b").unwrap();
        let after = store.stat("b").unwrap().unwrap();
        assert_eq!(after.modified, before.modified);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileGraphStore::open(dir.path()).unwrap();
            store.atomic_write("snap", b"payload").unwrap();
        }
        let store = FileGraphStore::open(dir.path()).unwrap();
        assert_eq!(store.read("snap").unwrap(), Some(b"payload".to_vec()));
    }

    #[test]
    fn file_store_list_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileGraphStore::open(dir.path()).unwrap();
        store.atomic_write("snapshot.latest.json", b"a").unwrap();
        store.atomic_write("snapshot.backup.json", b"b").unwrap();
        store.atomic_write("other.txt", b"c").unwrap();
        let mut names = store.list("snapshot.").unwrap();
        names.sort();
        assert_eq!(names, vec!["snapshot.backup.json", "snapshot.latest.json"]);
    }

    #[test]
    fn file_store_stat_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileGraphStore::open(dir.path()).unwrap();
        assert!(store.stat("missing").unwrap().is_none());
        store.atomic_write("snap", b"payload").unwrap();
        let stat = store.stat("snap").unwrap().unwrap();
        assert_eq!(stat.size, 7);
    }
}
