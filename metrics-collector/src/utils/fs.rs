//! Fail-closed file persistence.

use chrono::Local;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tempfile::NamedTempFile;

/// Writes `contents` to `path` through a fresh sibling temporary file and a
/// rename.
///
/// Parent directories are created on demand. Each call gets its own temporary
/// file. On failure the previous file, if any, is left untouched.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn lock_table() -> &'static DashMap<PathBuf, Arc<Mutex<()>>> {
    static LOCKS: OnceLock<DashMap<PathBuf, Arc<Mutex<()>>>> = OnceLock::new();
    LOCKS.get_or_init(DashMap::new)
}

/// The in-process lock guarding read-merge-write cycles on `path`.
///
/// Every caller naming the same path gets the same mutex. Other processes are
/// not coordinated.
#[must_use]
pub fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    Arc::clone(
        lock_table()
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value(),
    )
}

/// Timestamped sibling path used to keep a copy of a corrupt file.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.bak", Local::now().format("%Y%m%dT%H%M%S%.3f")));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let entries = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_concurrent_writes_never_publish_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.json");
        let writers: Vec<_> = (0..8u8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let body = vec![b'a' + i; 4096];
                    for _ in 0..20 {
                        write_atomic(&path, &body).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let written = fs::read(&path).unwrap();
        assert_eq!(written.len(), 4096);
        assert!(written.iter().all(|b| *b == written[0]));
    }

    #[test]
    fn test_path_lock_is_shared_per_path() {
        let a = path_lock(Path::new("/tmp/x/a.json"));
        let again = path_lock(Path::new("/tmp/x/a.json"));
        let b = path_lock(Path::new("/tmp/x/b.json"));
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_backup_path_is_sibling() {
        let path = Path::new("/tmp/cache/GarminExtract.json");
        let backup = backup_path(path);
        assert_eq!(backup.parent(), path.parent());
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("GarminExtract.json."));
        assert!(name.ends_with(".bak"));
    }
}
