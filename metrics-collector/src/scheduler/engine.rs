//! Timer engine running jobs on interval or cron triggers.

use chrono::{DateTime, Local};
use cron::Schedule;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::config::CronFields;
use crate::errors::ScheduleError;

/// A job body. Each firing runs in its own task.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

const INTERVAL_UNITS: [(&str, u64); 5] = [
    ("weeks", 7 * 24 * 3600),
    ("days", 24 * 3600),
    ("hours", 3600),
    ("minutes", 60),
    ("seconds", 1),
];

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Every fixed duration, first firing one interval after start.
    Interval(Duration),
    /// On cron schedule fire times.
    Cron(Box<Schedule>),
}

impl Trigger {
    /// A cron trigger from schedule fields.
    pub fn cron(fields: &CronFields) -> Result<Self, ScheduleError> {
        Ok(Self::Cron(Box::new(fields.schedule()?)))
    }

    /// Builds a trigger from a kind (`interval` or `cron`) and its options.
    ///
    /// Interval options are `weeks`, `days`, `hours`, `minutes` and `seconds`;
    /// cron options are the [`CronFields`] names. An `id` option is returned
    /// separately.
    pub fn from_options(
        kind: &str,
        options: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(Self, Option<String>), ScheduleError> {
        let id = options.get("id").and_then(|v| v.as_str()).map(str::to_string);
        let invalid = |reason: String| ScheduleError::InvalidTrigger {
            kind: kind.to_string(),
            reason,
        };

        let trigger = match kind {
            "interval" => {
                let mut secs = 0f64;
                for (unit, factor) in INTERVAL_UNITS {
                    if let Some(value) = options.get(unit) {
                        let amount = value
                            .as_f64()
                            .ok_or_else(|| invalid(format!("'{unit}' must be a number")))?;
                        #[allow(clippy::cast_precision_loss)]
                        let unit_secs = factor as f64;
                        secs += amount * unit_secs;
                    }
                }
                if !secs.is_finite() || secs <= 0.0 {
                    return Err(invalid("interval must be positive".to_string()));
                }
                Self::Interval(Duration::from_secs_f64(secs))
            }
            "cron" => {
                let mut fields = options.clone();
                fields.remove("id");
                let fields: CronFields = serde_json::from_value(serde_json::Value::Object(fields))
                    .map_err(|e| invalid(e.to_string()))?;
                Self::cron(&fields)?
            }
            other => return Err(invalid(format!("unknown trigger kind '{other}'"))),
        };
        Ok((trigger, id))
    }

    /// Next fire time strictly after `now`.
    #[must_use]
    pub fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Self::Interval(every) => chrono::Duration::from_std(*every).ok().map(|d| now + d),
            Self::Cron(schedule) => schedule.after(&now).next(),
        }
    }
}

struct Job {
    trigger: Trigger,
    func: JobFn,
    timer: Option<JoinHandle<()>>,
}

/// Owns jobs and, once started, one timer task per job.
///
/// Stopping aborts the timers only; job bodies already running finish on
/// their own.
#[derive(Default)]
pub struct JobEngine {
    jobs: Mutex<BTreeMap<String, Job>>,
    runtime: Mutex<Option<Handle>>,
}

impl fmt::Debug for JobEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobEngine")
            .field("jobs", &self.job_ids())
            .field("running", &self.is_running())
            .finish()
    }
}

impl JobEngine {
    /// Creates a stopped engine without jobs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a job, replacing any job with the same id. Returns the id.
    pub fn add_job(&self, id: Option<String>, trigger: Trigger, func: JobFn) -> String {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut jobs = self.jobs.lock();
        let timer = self
            .runtime
            .lock()
            .as_ref()
            .map(|handle| spawn_timer(handle, id.clone(), trigger.clone(), Arc::clone(&func)));
        let previous = jobs.insert(
            id.clone(),
            Job {
                trigger,
                func,
                timer,
            },
        );
        if let Some(timer) = previous.and_then(|job| job.timer) {
            debug!(job = %id, "Replacing existing job");
            timer.abort();
        }
        id
    }

    /// Removes a job. Returns false if it did not exist.
    pub fn remove_job(&self, id: &str) -> bool {
        match self.jobs.lock().remove(id) {
            Some(job) => {
                if let Some(timer) = job.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Ids of all jobs, sorted.
    #[must_use]
    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.lock().keys().cloned().collect()
    }

    /// True between [`start`](Self::start) and [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Starts timers for every job on `handle`.
    pub fn start(&self, handle: Handle) {
        let mut jobs = self.jobs.lock();
        for (id, job) in jobs.iter_mut() {
            if job.timer.is_none() {
                job.timer = Some(spawn_timer(&handle, id.clone(), job.trigger.clone(), Arc::clone(&job.func)));
            }
        }
        info!(jobs = jobs.len(), "Job engine started");
        *self.runtime.lock() = Some(handle);
    }

    /// Aborts every timer. Jobs stay registered.
    pub fn shutdown(&self) {
        if self.runtime.lock().take().is_none() {
            return;
        }
        for job in self.jobs.lock().values_mut() {
            if let Some(timer) = job.timer.take() {
                timer.abort();
            }
        }
        info!("Job engine stopped");
    }
}

impl Drop for JobEngine {
    fn drop(&mut self) {
        for job in self.jobs.get_mut().values_mut() {
            if let Some(timer) = job.timer.take() {
                timer.abort();
            }
        }
    }
}

fn spawn_timer(handle: &Handle, id: String, trigger: Trigger, func: JobFn) -> JoinHandle<()> {
    handle.spawn(async move {
        loop {
            let now = Local::now();
            let Some(next) = trigger.next_after(now) else {
                debug!(job = %id, "Trigger has no further fire times");
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            debug!(job = %id, "Firing job");
            tokio::spawn(func());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().unwrap().clone()
    }

    fn noop() -> JobFn {
        Arc::new(|| async {}.boxed())
    }

    #[test]
    fn test_interval_options() {
        let (trigger, id) =
            Trigger::from_options("interval", &options(json!({"seconds": 15, "id": "tick"}))).unwrap();
        assert_eq!(id.as_deref(), Some("tick"));
        assert!(matches!(trigger, Trigger::Interval(d) if d == Duration::from_secs(15)));

        let (trigger, _) =
            Trigger::from_options("interval", &options(json!({"minutes": 1, "seconds": 30}))).unwrap();
        assert!(matches!(trigger, Trigger::Interval(d) if d == Duration::from_secs(90)));
    }

    #[test]
    fn test_invalid_options() {
        assert!(Trigger::from_options("interval", &options(json!({}))).is_err());
        assert!(Trigger::from_options("date", &options(json!({}))).is_err());
        assert!(matches!(
            Trigger::from_options("cron", &options(json!({"month": 13}))),
            Err(ScheduleError::InvalidCron { .. })
        ));
    }

    #[test]
    fn test_cron_next_after() {
        let (trigger, _) =
            Trigger::from_options("cron", &options(json!({"hour": 6, "minute": 0}))).unwrap();
        let now = Local::now();
        let next = trigger.next_after(now).unwrap();
        assert!(next > now);
        assert_eq!(next.format("%H:%M").to_string(), "06:00");
    }

    #[test]
    fn test_weekday_zero_fires_on_monday() {
        use chrono::Datelike;

        let (trigger, _) = Trigger::from_options(
            "cron",
            &options(json!({"day_of_week": 0, "hour": 6, "minute": 0})),
        )
        .unwrap();
        let next = trigger.next_after(Local::now()).unwrap();
        assert_eq!(next.weekday(), chrono::Weekday::Mon);
    }

    #[test]
    fn test_add_remove_jobs() {
        let engine = JobEngine::new();
        let id = engine.add_job(None, Trigger::Interval(Duration::from_secs(1)), noop());
        engine.add_job(Some("tick".into()), Trigger::Interval(Duration::from_secs(1)), noop());
        assert_eq!(engine.job_ids().len(), 2);
        assert!(engine.remove_job(&id));
        assert!(!engine.remove_job(&id));
        assert_eq!(engine.job_ids(), vec!["tick"]);
    }

    #[tokio::test]
    async fn test_started_engine_fires_jobs() {
        let engine = JobEngine::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        engine.add_job(
            Some("fast".into()),
            Trigger::Interval(Duration::from_millis(20)),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {}.boxed()
            }),
        );

        engine.start(Handle::current());
        assert!(engine.is_running());
        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.shutdown();
        let after_stop = fired.load(Ordering::SeqCst);
        assert!(after_stop >= 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), after_stop);
        assert!(!engine.is_running());
    }
}
