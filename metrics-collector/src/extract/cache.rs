//! Day-indexed JSON store backing one extract component.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{DailyMetrics, DayMetrics};
use crate::errors::CacheError;
use crate::utils::{backup_path, path_lock, write_atomic};

/// Durable cache file of one extract component.
#[derive(Debug, Clone)]
pub struct DurableCache {
    path: PathBuf,
}

impl DurableCache {
    /// Creates a cache stored at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole document.
    ///
    /// Returns `None` when the file is missing or unreadable. An unparsable
    /// file is copied to a timestamped backup next to it first.
    pub fn read_all(&self) -> Option<DailyMetrics> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cache file unreadable");
                return None;
            }
        };

        match serde_json::from_str(&text) {
            Ok(doc) => Some(doc),
            Err(e) => {
                let backup = backup_path(&self.path);
                match fs::copy(&self.path, &backup) {
                    Ok(_) => warn!(
                        path = %self.path.display(),
                        backup = %backup.display(),
                        error = %e,
                        "Cache file corrupt, backed up and treated as empty"
                    ),
                    Err(copy_err) => warn!(
                        path = %self.path.display(),
                        error = %e,
                        backup_error = %copy_err,
                        "Cache file corrupt and backup failed, treated as empty"
                    ),
                }
                None
            }
        }
    }

    /// The cached metrics of `day`, if that day was ever written.
    pub fn read_day(&self, day: &str) -> Option<DayMetrics> {
        self.read_all().and_then(|mut doc| doc.remove(day))
    }

    /// Merges `incoming` into the stored document and writes it back.
    ///
    /// Stored measurements are never overwritten: new days are added and
    /// existing days only gain metrics they do not have yet. An existing file
    /// that does not parse is deleted and replaced. Returns the document as
    /// written.
    ///
    /// Writers of the same file are serialized for the whole read, merge and
    /// write cycle.
    pub fn merge_write(&self, incoming: DailyMetrics) -> Result<DailyMetrics, CacheError> {
        let lock = path_lock(&self.path);
        let _guard = lock.lock();

        let mut existing = self.read_for_write()?;
        let fresh = pop_existing_entries(incoming, &existing);
        debug!(path = %self.path.display(), changed_days = fresh.len(), "Merging into cache");
        merge_documents(&mut existing, fresh);

        let bytes = serde_json::to_vec_pretty(&existing)?;
        write_atomic(&self.path, &bytes).map_err(|e| CacheError::io(&self.path, e))?;
        Ok(existing)
    }

    fn read_for_write(&self) -> Result<DailyMetrics, CacheError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DailyMetrics::new()),
            Err(e) => return Err(CacheError::io(&self.path, e)),
        };
        match serde_json::from_str(&text) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding corrupt cache before write");
                fs::remove_file(&self.path).map_err(|e| CacheError::io(&self.path, e))?;
                Ok(DailyMetrics::new())
            }
        }
    }
}

/// Removes from `incoming` every measurement already present in `existing`.
///
/// A day unknown to `existing` is kept even when empty; a known day is kept
/// only if it still carries a new metric.
#[must_use]
pub fn pop_existing_entries(mut incoming: DailyMetrics, existing: &DailyMetrics) -> DailyMetrics {
    incoming.retain(|day, metrics| match existing.get(day) {
        None => true,
        Some(stored) => {
            metrics.retain(|metric, _| !stored.contains_key(metric));
            !metrics.is_empty()
        }
    });
    incoming
}

/// Deep-merges `incoming` into `target`; incoming measurements win.
pub fn merge_documents(target: &mut DailyMetrics, incoming: DailyMetrics) {
    for (day, metrics) in incoming {
        target.entry(day).or_default().extend(metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Measurement;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn doc(entries: &[(&str, &str, f64)]) -> DailyMetrics {
        let mut doc = DailyMetrics::new();
        for (day, metric, value) in entries {
            doc.entry((*day).to_string())
                .or_default()
                .insert((*metric).to_string(), Measurement::scalar(*value, "meter"));
        }
        doc
    }

    #[test]
    fn test_merge_write_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = DurableCache::new(dir.path().join("c.json"));
        let incoming = doc(&[("2022-01-01", "running", 300.0)]);

        let once = cache.merge_write(incoming.clone()).unwrap();
        let twice = cache.merge_write(incoming).unwrap();
        assert_eq!(once, twice);
        assert_eq!(cache.read_all().unwrap(), once);
    }

    #[test]
    fn test_existing_day_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let cache = DurableCache::new(dir.path().join("c.json"));
        cache
            .merge_write(doc(&[("2022-01-01", "running", 300.0)]))
            .unwrap();

        let written = cache
            .merge_write(doc(&[
                ("2022-01-01", "running", 1.0),
                ("2022-01-02", "running", 2.0),
            ]))
            .unwrap();

        assert_eq!(
            written,
            doc(&[("2022-01-01", "running", 300.0), ("2022-01-02", "running", 2.0)])
        );
    }

    #[test]
    fn test_cached_day_is_enriched_with_new_metrics() {
        let dir = TempDir::new().unwrap();
        let cache = DurableCache::new(dir.path().join("c.json"));
        cache
            .merge_write(doc(&[("2022-01-01", "running", 300.0)]))
            .unwrap();

        let written = cache
            .merge_write(doc(&[
                ("2022-01-01", "running", 1.0),
                ("2022-01-01", "walking", 150.0),
            ]))
            .unwrap();

        assert_eq!(
            written,
            doc(&[("2022-01-01", "running", 300.0), ("2022-01-01", "walking", 150.0)])
        );
        assert_eq!(cache.read_all().unwrap(), written);
    }

    #[test]
    fn test_empty_new_day_is_still_cached() {
        let mut incoming = DailyMetrics::new();
        incoming.insert("2022-01-02".to_string(), DayMetrics::new());
        let existing = doc(&[("2022-01-01", "running", 300.0)]);

        let fresh = pop_existing_entries(incoming, &existing);
        assert!(fresh.contains_key("2022-01-02"));
    }

    #[test]
    fn test_concurrent_writers_keep_every_day() {
        let dir = TempDir::new().unwrap();
        let cache = DurableCache::new(dir.path().join("c.json"));

        let handles: Vec<_> = (1..=8)
            .map(|n| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let day = format!("2022-01-{n:02}");
                    cache
                        .merge_write(doc(&[(day.as_str(), "running", f64::from(n))]))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = cache.read_all().unwrap();
        assert_eq!(stored.len(), 8);
        assert_eq!(
            stored["2022-01-05"]["running"],
            Measurement::scalar(5.0, "meter")
        );
    }

    #[test]
    fn test_merge_documents_keeps_both_sides() {
        let mut target = doc(&[("2022-01-01", "running", 1.0)]);
        merge_documents(
            &mut target,
            doc(&[("2022-01-01", "walking", 2.0), ("2022-01-03", "running", 3.0)]),
        );
        assert_eq!(target.len(), 2);
        assert_eq!(target["2022-01-01"].len(), 2);
    }

    #[test]
    fn test_corrupt_file_is_replaced_on_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.json");
        fs::write(&path, "[1, 2").unwrap();
        let cache = DurableCache::new(&path);

        assert!(cache.read_all().is_none());
        cache
            .merge_write(doc(&[("2022-01-01", "running", 300.0)]))
            .unwrap();
        assert_eq!(cache.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_read_day_missing_file() {
        let dir = TempDir::new().unwrap();
        let cache = DurableCache::new(dir.path().join("absent.json"));
        assert!(cache.read_day("2022-01-01").is_none());
    }

    #[test]
    fn test_written_file_is_pretty_json() {
        let dir = TempDir::new().unwrap();
        let cache = DurableCache::new(dir.path().join("c.json"));
        cache
            .merge_write(doc(&[("2022-01-01", "running", 300.0)]))
            .unwrap();
        let text = fs::read_to_string(cache.path()).unwrap();
        assert!(text.contains('\n'));
        assert!(text.contains("\"unit\": \"meter\""));
    }
}
