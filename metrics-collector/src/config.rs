//! Runtime configuration read from the environment.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "metrics_collector";

/// Load a `.env` file if present (silently ignored when missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join(APP_DIR)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reload_secs() -> u64 {
    10
}

/// Settings for the execution deduplication guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StallSettings {
    /// Upper bound a duplicate caller waits for the first one, in seconds.
    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,
    /// In-flight markers older than this are treated as abandoned, in hours.
    #[serde(default = "default_cleanup_hours")]
    pub cleanup_hours: u64,
    /// Length of one wait tick, in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_expiry_secs() -> u64 {
    180
}

fn default_cleanup_hours() -> u64 {
    6
}

fn default_tick_ms() -> u64 {
    1000
}

impl Default for StallSettings {
    fn default() -> Self {
        Self {
            expiry_secs: default_expiry_secs(),
            cleanup_hours: default_cleanup_hours(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl StallSettings {
    /// Wait bound as a duration.
    #[must_use]
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    /// Abandonment threshold as a duration.
    #[must_use]
    pub fn cleanup_after(&self) -> Duration {
        Duration::from_secs(self.cleanup_hours * 3600)
    }

    /// Tick length as a duration.
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Top-level settings: where state lives, how to log, how often to reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Root for the memoization store and the scheduler configuration.
    pub data_dir: PathBuf,
    /// Directory for per-extract cache files and the parameter memory.
    pub cache_dir: PathBuf,
    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON formatted logs.
    #[serde(default)]
    pub log_json: bool,
    /// Interval of the scheduler self-reload job, in seconds.
    #[serde(default = "default_reload_secs")]
    pub reload_interval_secs: u64,
    /// Deduplication guard settings.
    #[serde(default)]
    pub stall: StallSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            cache_dir: data_dir.clone(),
            data_dir,
            log_level: default_log_level(),
            log_json: false,
            reload_interval_secs: default_reload_secs(),
            stall: StallSettings::default(),
        }
    }
}

impl Settings {
    /// Build settings from environment variables (call [`load_dotenv`] first).
    ///
    /// `DATA_DIR`, `CACHE_DIR`, `METRICS_LOG_LEVEL`, `METRICS_LOG_JSON`,
    /// `METRICS_RELOAD_SECS`, `METRICS_STALL_EXPIRY_SECS` and
    /// `METRICS_STALL_CLEANUP_HOURS` are honoured.
    #[must_use]
    pub fn from_env() -> Self {
        let data_dir = env_opt("DATA_DIR").map_or_else(default_data_dir, PathBuf::from);
        let cache_dir = env_opt("CACHE_DIR").map_or_else(|| data_dir.clone(), PathBuf::from);
        Self {
            data_dir,
            cache_dir,
            log_level: env_opt("METRICS_LOG_LEVEL").unwrap_or_else(default_log_level),
            log_json: env_parse("METRICS_LOG_JSON", false),
            reload_interval_secs: env_parse("METRICS_RELOAD_SECS", default_reload_secs()),
            stall: StallSettings {
                expiry_secs: env_parse("METRICS_STALL_EXPIRY_SECS", default_expiry_secs()),
                cleanup_hours: env_parse("METRICS_STALL_CLEANUP_HOURS", default_cleanup_hours()),
                tick_ms: default_tick_ms(),
            },
        }
    }

    /// Points both the data and the cache directory at `dir`.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.cache_dir = dir.clone();
        self.data_dir = dir;
        self
    }

    /// Overrides the cache directory only.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Sets the self-reload interval.
    #[must_use]
    pub fn with_reload_interval_secs(mut self, secs: u64) -> Self {
        self.reload_interval_secs = secs;
        self
    }

    /// Replaces the deduplication guard settings.
    #[must_use]
    pub fn with_stall(mut self, stall: StallSettings) -> Self {
        self.stall = stall;
        self
    }

    /// The self-reload interval as a duration.
    #[must_use]
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs.max(1))
    }

    /// Durable cache file of an extract component.
    #[must_use]
    pub fn cache_file(&self, component: &str) -> PathBuf {
        self.cache_dir.join(format!("{component}.json"))
    }

    /// Parameter memory file.
    #[must_use]
    pub fn params_file(&self) -> PathBuf {
        self.cache_dir.join("params.json")
    }

    /// Memoization store for rendered graphs.
    #[must_use]
    pub fn graph_cache_file(&self) -> PathBuf {
        self.data_dir.join("graph_cache.json")
    }

    /// Persisted scheduler configuration.
    #[must_use]
    pub fn scheduler_config_file(&self) -> PathBuf {
        self.data_dir.join("scheduler.json")
    }
}
