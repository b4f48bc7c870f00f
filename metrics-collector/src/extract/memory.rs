//! Last-used extract parameters, remembered per pipeline.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::errors::CacheError;
use crate::registry::RawParams;
use crate::utils::{path_lock, write_atomic};

type Stored = BTreeMap<String, RawParams>;

/// File-backed map from pipeline identifier to its last parameters.
#[derive(Debug, Clone)]
pub struct ParamMemory {
    path: PathBuf,
}

impl ParamMemory {
    /// Creates a memory stored at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Stored, CacheError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Stored::new()),
            Err(e) => Err(CacheError::io(&self.path, e)),
        }
    }

    /// Merges `params` into the entry of every pipeline in `pipelines`.
    ///
    /// An unreadable file is started over.
    pub fn store(&self, pipelines: &[String], params: &RawParams) -> Result<(), CacheError> {
        if params.is_empty() {
            return Ok(());
        }
        let lock = path_lock(&self.path);
        let _guard = lock.lock();
        let mut stored = self.read().unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Parameter memory unreadable, starting over");
            Stored::new()
        });
        let mut changed = false;
        for pipeline in pipelines {
            let entry = stored.entry(pipeline.clone()).or_default();
            for (key, value) in params {
                if entry.get(key) != Some(value) {
                    entry.insert(key.clone(), value.clone());
                    changed = true;
                }
            }
        }
        if !changed {
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(&stored)?;
        write_atomic(&self.path, &bytes).map_err(|e| CacheError::io(&self.path, e))
    }

    /// Parameters remembered for `pipeline`; empty when none or unreadable.
    #[must_use]
    pub fn load(&self, pipeline: &str) -> RawParams {
        match self.read() {
            Ok(mut stored) => stored.remove(pipeline).unwrap_or_default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Parameter memory unreadable");
                RawParams::new()
            }
        }
    }
}
