//! Named tasks that schedules and initial jobs refer to by dotted reference.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::engine::JobFn;
use crate::errors::ScheduleError;

/// Reference of the built-in liveness task.
pub const PING_TASK: &str = "tasks.ping";

/// Lookup from dotted reference to job body.
#[derive(Clone)]
pub struct TaskCatalog {
    tasks: BTreeMap<String, JobFn>,
}

impl fmt::Debug for TaskCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCatalog")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for TaskCatalog {
    fn default() -> Self {
        Self::empty().with_task(PING_TASK, Arc::new(|| ping().boxed()))
    }
}

async fn ping() {
    debug!(time = %chrono::Local::now().to_rfc3339(), "Pong!");
}

impl TaskCatalog {
    /// A catalog without any task.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    /// Registers `func` under `name`.
    #[must_use]
    pub fn with_task(mut self, name: impl Into<String>, func: JobFn) -> Self {
        self.tasks.insert(name.into(), func);
        self
    }

    /// Resolves a dotted reference.
    pub fn resolve(&self, name: &str) -> Result<JobFn, ScheduleError> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| ScheduleError::UnknownTask(name.to_string()))
    }

    /// Registered references.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }
}

/// A job registered at startup and after every reload.
///
/// Deserializes from `["tasks.ping", "interval", {"seconds": 15, "id": "tick"}]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialTask {
    /// Dotted task reference.
    pub task: String,
    /// Trigger kind, `interval` or `cron`.
    pub kind: String,
    /// Trigger options, optionally with an `id`.
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl InitialTask {
    /// Creates an initial task.
    #[must_use]
    pub fn new(
        task: impl Into<String>,
        kind: impl Into<String>,
        options: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            task: task.into(),
            kind: kind.into(),
            options,
        }
    }
}

/// The ping every 15 seconds under id `tick`.
#[must_use]
pub fn default_initial_tasks() -> Vec<InitialTask> {
    let mut options = serde_json::Map::new();
    options.insert("seconds".to_string(), 15.into());
    options.insert("id".to_string(), "tick".into());
    vec![InitialTask::new(PING_TASK, "interval", options)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_default_catalog_has_ping() {
        let catalog = TaskCatalog::default();
        assert_eq!(catalog.names(), vec![PING_TASK]);
        assert!(catalog.resolve(PING_TASK).is_ok());
        assert!(matches!(
            catalog.resolve("tasks.nope"),
            Err(ScheduleError::UnknownTask(name)) if name == "tasks.nope"
        ));
    }

    #[test]
    fn test_initial_task_from_list_form() {
        let parsed: Vec<InitialTask> = serde_json::from_value(json!([
            ["tasks.ping", "interval", {"seconds": 15, "id": "tick"}]
        ]))
        .unwrap();
        assert_eq!(parsed, default_initial_tasks());
    }

    #[tokio::test]
    async fn test_ping_runs() {
        let ping = TaskCatalog::default().resolve(PING_TASK).unwrap();
        ping().await;
    }
}
