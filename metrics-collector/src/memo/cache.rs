//! Day-scoped memoization store for derived artifacts.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{Local, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::staller::{signature, StallOutcome, Staller};
use crate::errors::{CacheError, MetricsError};
use crate::utils::{format_day, path_lock, write_atomic};

const COMPRESSION_LEVEL: i32 = 3;

type Store = BTreeMap<String, String>;

/// File-backed map from `(day, call signature)` to a compressed value.
///
/// Values are JSON, zstd compressed and base64 encoded. Entries are never
/// evicted; keying by day makes older entries unreachable.
#[derive(Debug)]
pub struct MemoCache {
    path: PathBuf,
    staller: Arc<Staller>,
}

impl MemoCache {
    /// Creates a store at `path` guarded by `staller`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, staller: Arc<Staller>) -> Self {
        Self {
            path: path.into(),
            staller,
        }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The deduplication guard.
    #[must_use]
    pub fn staller(&self) -> &Arc<Staller> {
        &self.staller
    }

    /// Store key of a call on `day`.
    #[must_use]
    pub fn key(day: NaiveDate, function: &str, args: &[String]) -> String {
        let digest = Sha256::digest(signature(function, args).as_bytes());
        let hash = hex::encode(digest);
        format!("{}:{}", format_day(day), &hash[..32])
    }

    fn read_store(&self) -> Store {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Store::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Memo store unreadable");
                return Store::new();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Memo store corrupt, treated as empty");
            Store::new()
        })
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_store().len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads and decodes the value under `key`.
    ///
    /// Undecodable entries are reported and treated as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let encoded = self.read_store().remove(key)?;
        match decode(&encoded) {
            Ok(value) => {
                debug!(key = %key, "Memo hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable memo entry");
                None
            }
        }
    }

    /// Encodes and stores `value` under `key`.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let encoded = encode(value)?;
        let lock = path_lock(&self.path);
        let _guard = lock.lock();
        let mut store = self.read_store();
        store.insert(key.to_string(), encoded);
        let bytes = serde_json::to_vec(&store)?;
        write_atomic(&self.path, &bytes).map_err(|e| CacheError::io(&self.path, e))
    }

    /// Returns today's memoized result of `function(args)`, producing it once.
    pub fn get_or_compute<T, F>(
        &self,
        function: &str,
        args: &[String],
        produce: F,
    ) -> Result<T, MetricsError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, MetricsError>,
    {
        self.get_or_compute_on(Local::now().date_naive(), function, args, produce)
    }

    /// Like [`get_or_compute`](Self::get_or_compute) for an explicit day.
    pub fn get_or_compute_on<T, F>(
        &self,
        day: NaiveDate,
        function: &str,
        args: &[String],
        produce: F,
    ) -> Result<T, MetricsError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, MetricsError>,
    {
        let key = Self::key(day, function, args);
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }

        let sig = signature(function, args);
        let _in_flight = match self.staller.try_begin(&sig) {
            Some(guard) => guard,
            None => {
                let outcome = self.staller.stall(&sig);
                if let Some(hit) = self.get(&key) {
                    return Ok(hit);
                }
                if matches!(outcome, StallOutcome::Expired { .. }) {
                    debug!(signature = %sig, "Computing after wait expired");
                }
                self.staller.begin(&sig)
            }
        };

        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }

        debug!(signature = %sig, key = %key, "Memo miss, computing");
        let value = produce()?;
        if let Err(e) = self.put(&key, &value) {
            warn!(key = %key, error = %e, "Failed to store memoized value");
        }
        Ok(value)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, CacheError> {
    let json = serde_json::to_vec(value)?;
    let compressed = zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
        .map_err(|e| CacheError::Compression(e.to_string()))?;
    Ok(BASE64.encode(compressed))
}

fn decode<T: DeserializeOwned>(encoded: &str) -> Result<T, CacheError> {
    let compressed = BASE64
        .decode(encoded)
        .map_err(|e| CacheError::Compression(e.to_string()))?;
    let json = zstd::decode_all(compressed.as_slice())
        .map_err(|e| CacheError::Compression(e.to_string()))?;
    Ok(serde_json::from_slice(&json)?)
}
