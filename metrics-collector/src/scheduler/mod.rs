//! Cron-style scheduler driven by a persisted configuration file.
//!
//! The [`Scheduler`] derives its job set from the [`ScheduleStore`] and a
//! self-reload job re-reads the file every few seconds. When the file content
//! changed, every job except the reload job is dropped and the set is rebuilt
//! from the file, so the active jobs never drift from what is persisted.
//!
//! Only one scheduler may be alive per process; [`SchedulerBuilder::build`]
//! refuses to create a second one.

mod actions;
mod config;
mod engine;
mod tasks;

pub use actions::{run_action, EmailMessage, LoggingMailer, Mailer};
pub use config::{
    parse_entries, ActionConfig, CacheAction, CronFields, CronValue, EmailAction, ScheduleConfig,
    ScheduleStore,
};
pub use engine::{JobEngine, JobFn, Trigger};
pub use tasks::{default_initial_tasks, InitialTask, TaskCatalog, PING_TASK};

#[cfg(test)]
pub use actions::MockMailer;

use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::errors::ScheduleError;
use crate::observability::SpanTimer;
use crate::orchestrator::Orchestrator;

/// Id of the self-reload job.
pub const RELOAD_JOB_ID: &str = "reload_on_config_update";

static INSTANCE_ALIVE: AtomicBool = AtomicBool::new(false);

/// How [`Scheduler::start`] runs the job timers.
#[derive(Debug, Clone)]
pub enum RunMode {
    /// On the caller's runtime; `start` returns immediately.
    Cooperative(Handle),
    /// On a dedicated runtime; `start` blocks until [`Scheduler::stop`].
    Blocking,
}

/// Builder for the process-wide [`Scheduler`].
pub struct SchedulerBuilder {
    orchestrator: Orchestrator,
    store: ScheduleStore,
    catalog: TaskCatalog,
    mailer: Arc<dyn Mailer>,
    initials: Vec<InitialTask>,
    reload_interval: Duration,
}

impl fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("store", &self.store)
            .field("catalog", &self.catalog)
            .field("initials", &self.initials)
            .field("reload_interval", &self.reload_interval)
            .finish_non_exhaustive()
    }
}

impl SchedulerBuilder {
    /// Replaces the initial tasks (default: the 15 second ping).
    #[must_use]
    pub fn with_initials(mut self, initials: Vec<InitialTask>) -> Self {
        self.initials = initials;
        self
    }

    /// Replaces the task catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: TaskCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replaces the mailer used by email actions.
    #[must_use]
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    /// Reads schedules from `store` instead of the configured file.
    #[must_use]
    pub fn with_store(mut self, store: ScheduleStore) -> Self {
        self.store = store;
        self
    }

    /// Overrides the self-reload interval.
    #[must_use]
    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.reload_interval = interval;
        self
    }

    /// Creates the scheduler.
    ///
    /// Fails with [`ScheduleError::AlreadyExists`] while another scheduler is
    /// alive, and when an initial task does not resolve.
    pub fn build(self) -> Result<Arc<Scheduler>, ScheduleError> {
        for initial in &self.initials {
            self.catalog.resolve(&initial.task)?;
            Trigger::from_options(&initial.kind, &initial.options)?;
        }
        if INSTANCE_ALIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScheduleError::AlreadyExists);
        }

        Ok(Arc::new_cyclic(|self_ref| Scheduler {
            orchestrator: self.orchestrator,
            store: self.store,
            catalog: self.catalog,
            mailer: self.mailer,
            initials: Mutex::new(self.initials),
            engine: JobEngine::new(),
            current: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            stopped: Notify::new(),
            reload_interval: self.reload_interval,
            self_ref: self_ref.clone(),
        }))
    }
}

/// The scheduler. Obtain it from [`Scheduler::builder`] and share the handle.
pub struct Scheduler {
    orchestrator: Orchestrator,
    store: ScheduleStore,
    catalog: TaskCatalog,
    mailer: Arc<dyn Mailer>,
    initials: Mutex<Vec<InitialTask>>,
    engine: JobEngine,
    current: Mutex<Vec<serde_json::Value>>,
    running: AtomicBool,
    stopped: Notify,
    reload_interval: Duration,
    self_ref: Weak<Scheduler>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("store", &self.store)
            .field("engine", &self.engine)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// A builder reading schedules from the file named by the orchestrator's
    /// settings.
    #[must_use]
    pub fn builder(orchestrator: Orchestrator) -> SchedulerBuilder {
        let settings = orchestrator.settings();
        SchedulerBuilder {
            store: ScheduleStore::new(settings.scheduler_config_file()),
            reload_interval: settings.reload_interval(),
            orchestrator,
            catalog: TaskCatalog::default(),
            mailer: Arc::new(LoggingMailer),
            initials: default_initial_tasks(),
        }
    }

    /// Checks that `fields` can be registered as a trigger.
    ///
    /// The check runs against a throwaway engine; nothing is persisted.
    pub fn verify(fields: &CronFields) -> Result<(), ScheduleError> {
        let trigger = firing_trigger(fields)?;
        let trial = JobEngine::new();
        let id = trial.add_job(None, trigger, Arc::new(|| async {}.boxed()));
        trial.remove_job(&id);
        Ok(())
    }

    /// Starts the reload job and every job derived from the persisted
    /// configuration.
    ///
    /// A malformed configuration file is returned as an error and nothing is
    /// started.
    pub fn start(&self, mode: RunMode) -> Result<(), ScheduleError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ScheduleError::AlreadyRunning);
        }
        let result = match mode {
            RunMode::Cooperative(handle) => self.activate(handle),
            RunMode::Blocking => self.run_blocking(),
        };
        if result.is_err() {
            self.running.store(false, Ordering::SeqCst);
        }
        result
    }

    fn activate(&self, handle: Handle) -> Result<(), ScheduleError> {
        let entries = self.store.load_raw()?;
        {
            let mut current = self.current.lock();
            self.rebuild(&entries);
            *current = entries;
        }
        self.engine.add_job(
            Some(RELOAD_JOB_ID.to_string()),
            Trigger::Interval(self.reload_interval),
            self.reload_job(),
        );
        self.engine.start(handle);
        info!(jobs = self.engine.job_ids().len(), "Scheduler started");
        Ok(())
    }

    fn run_blocking(&self) -> Result<(), ScheduleError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("metrics-scheduler")
            .build()
            .map_err(|e| ScheduleError::Runtime(e.to_string()))?;
        self.activate(runtime.handle().clone())?;
        runtime.block_on(self.stopped.notified());
        self.engine.shutdown();
        Ok(())
    }

    /// Stops the timers. Job bodies already running are not interrupted.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.engine.shutdown();
            self.stopped.notify_one();
            info!("Scheduler stopped");
        }
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Rebuilds the job set if the persisted configuration changed.
    ///
    /// Returns whether a rebuild happened.
    pub fn reload_on_config_change(&self) -> Result<bool, ScheduleError> {
        let entries = self.store.load_raw()?;
        let mut current = self.current.lock();
        if *current == entries {
            debug!("Scheduler configuration unchanged");
            return Ok(false);
        }
        info!(entries = entries.len(), "Scheduler configuration changed, rebuilding jobs");
        self.rebuild(&entries);
        *current = entries;
        Ok(true)
    }

    fn rebuild(&self, entries: &[serde_json::Value]) {
        for id in self.engine.job_ids() {
            if id != RELOAD_JOB_ID {
                self.engine.remove_job(&id);
            }
        }

        for initial in self.initials.lock().iter() {
            if let Err(e) = self.register(initial) {
                warn!(task = %initial.task, error = %e, "Skipping initial task");
            }
        }

        let pipelines = self.orchestrator.pipeline_ids();
        for (index, config) in parse_entries(entries) {
            if !pipelines.contains(&config.pipeline_id) {
                warn!(index, pipeline = %config.pipeline_id, "Skipping schedule for unknown pipeline");
                continue;
            }
            match firing_trigger(&config.cron) {
                Ok(trigger) => {
                    let id = self.engine.add_job(
                        Some(format!("schedule-{index}")),
                        trigger,
                        self.action_job(config),
                    );
                    debug!(job = %id, "Schedule registered");
                }
                Err(e) => warn!(index, error = %e, "Skipping schedule with invalid cron fields"),
            }
        }
    }

    fn reload_job(&self) -> JobFn {
        let scheduler = self.self_ref.clone();
        Arc::new(move || {
            let scheduler = scheduler.clone();
            async move {
                let Some(scheduler) = scheduler.upgrade() else {
                    return;
                };
                if let Err(e) = scheduler.reload_on_config_change() {
                    error!(error = %e, "Scheduler reload failed, keeping current jobs");
                }
            }
            .boxed()
        })
    }

    fn action_job(&self, config: ScheduleConfig) -> JobFn {
        let orchestrator = self.orchestrator.clone();
        let mailer = Arc::clone(&self.mailer);
        Arc::new(move || {
            let orchestrator = orchestrator.clone();
            let mailer = Arc::clone(&mailer);
            let config = config.clone();
            async move {
                let timer = SpanTimer::start("scheduled_action");
                match run_action(&config, &orchestrator, mailer).await {
                    Ok(()) => info!(
                        schedule = %config,
                        duration_ms = timer.finish(),
                        "Scheduled action finished"
                    ),
                    Err(e) => error!(schedule = %config, error = %e, "Scheduled action failed"),
                }
            }
            .boxed()
        })
    }

    fn register(&self, initial: &InitialTask) -> Result<String, ScheduleError> {
        let func = self.catalog.resolve(&initial.task)?;
        let (trigger, id) = Trigger::from_options(&initial.kind, &initial.options)?;
        Ok(self.engine.add_job(id, trigger, func))
    }

    /// Registers the catalog task `task` with a trigger of `kind` and returns
    /// the job id.
    ///
    /// The job lasts until the next configuration change; use
    /// [`add_initials`](Self::add_initials) for jobs that survive reloads.
    pub fn add_task(
        &self,
        task: &str,
        kind: &str,
        options: serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ScheduleError> {
        self.register(&InitialTask::new(task, kind, options))
    }

    /// Registers `tasks` now and after every reload.
    pub fn add_initials(&self, tasks: Vec<InitialTask>) -> Result<(), ScheduleError> {
        for task in &tasks {
            self.register(task)?;
        }
        self.initials.lock().extend(tasks);
        Ok(())
    }

    /// Validates the cron fields of `config` and persists it.
    ///
    /// A running scheduler picks the new schedule up at once.
    pub fn add_schedule(&self, config: &ScheduleConfig) -> Result<(), ScheduleError> {
        Self::verify(&config.cron)?;
        self.store.append(config)?;
        if self.is_running() {
            self.reload_on_config_change()?;
        }
        Ok(())
    }

    /// Removes the persisted schedule at `index`.
    pub fn remove_schedule(&self, index: usize) -> Result<serde_json::Value, ScheduleError> {
        let removed = self.store.remove(index)?;
        if self.is_running() {
            self.reload_on_config_change()?;
        }
        Ok(removed)
    }

    /// Persisted schedules that parse.
    pub fn list_schedules(&self) -> Result<Vec<ScheduleConfig>, ScheduleError> {
        self.store.list()
    }

    /// Ids of the registered jobs, sorted.
    #[must_use]
    pub fn active_job_ids(&self) -> Vec<String> {
        self.engine.job_ids()
    }

    /// The orchestrator jobs run against.
    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

/// Cron trigger for `fields` that fires at least once more.
fn firing_trigger(fields: &CronFields) -> Result<Trigger, ScheduleError> {
    let trigger = Trigger::cron(fields)?;
    if trigger.next_after(chrono::Local::now()).is_none() {
        return Err(ScheduleError::InvalidCron {
            fields: fields.to_string(),
            reason: "schedule never fires".to_string(),
        });
    }
    Ok(trigger)
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.engine.shutdown();
        INSTANCE_ALIVE.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::registry::Registry;
    use crate::testing::{sample_document, sample_schedule, StaticExtract, StaticGraphLoader};
    use crate::transform::{ColumnSchema, ConcatTransform};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    static SERIAL: Mutex<()> = parking_lot::const_mutex(());

    fn orchestrator(dir: &TempDir) -> Orchestrator {
        let registry = Registry::builder()
            .register(StaticExtract::registration("Garmin", ["health"], sample_document()))
            .register(ConcatTransform::registration("HealthTransform", ["health"], ColumnSchema::new()))
            .register(StaticGraphLoader::registration("HealthGraphs", ["health"], ["steps"]))
            .build()
            .unwrap();
        Orchestrator::new(Arc::new(registry), Settings::default().with_data_dir(dir.path()))
    }

    #[test]
    fn test_single_instance_per_process() {
        let _serial = SERIAL.lock();
        let dir = TempDir::new().unwrap();
        let first = Scheduler::builder(orchestrator(&dir)).build().unwrap();
        assert!(matches!(
            Scheduler::builder(orchestrator(&dir)).build(),
            Err(ScheduleError::AlreadyExists)
        ));
        drop(first);
        assert!(Scheduler::builder(orchestrator(&dir)).build().is_ok());
    }

    #[test]
    fn test_unknown_initial_task_fails_build() {
        let _serial = SERIAL.lock();
        let dir = TempDir::new().unwrap();
        let result = Scheduler::builder(orchestrator(&dir))
            .with_initials(vec![InitialTask::new("tasks.missing", "interval", Default::default())])
            .build();
        assert!(matches!(result, Err(ScheduleError::UnknownTask(_))));
        assert!(Scheduler::builder(orchestrator(&dir)).build().is_ok());
    }

    #[test]
    fn test_verify() {
        assert!(Scheduler::verify(&CronFields::new().with_hour(6).with_minute(0)).is_ok());
        let err = Scheduler::verify(&CronFields::new().with_month(13)).unwrap_err();
        assert!(!err.to_string().is_empty());
        assert!(Scheduler::verify(&CronFields::new().with_year(2001)).is_err());
    }

    #[test]
    fn test_invalid_schedule_is_never_persisted() {
        let _serial = SERIAL.lock();
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::builder(orchestrator(&dir)).build().unwrap();

        let mut config = sample_schedule("health");
        config.cron = CronFields::new().with_month(13);
        assert!(scheduler.add_schedule(&config).is_err());
        assert!(scheduler.list_schedules().unwrap().is_empty());

        scheduler.add_schedule(&sample_schedule("health")).unwrap();
        assert_eq!(scheduler.list_schedules().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_schedule_is_not_registered() {
        let _serial = SERIAL.lock();
        let dir = TempDir::new().unwrap();
        let store = ScheduleStore::new(dir.path().join("scheduler.json"));
        let mut expired = sample_schedule("health");
        expired.cron = expired.cron.with_year(2001);
        store.append(&expired).unwrap();
        store.append(&sample_schedule("health")).unwrap();

        let scheduler = Scheduler::builder(orchestrator(&dir)).with_store(store).build().unwrap();
        scheduler.start(RunMode::Cooperative(Handle::current())).unwrap();

        assert_eq!(
            scheduler.active_job_ids(),
            vec![RELOAD_JOB_ID, "schedule-1", "tick"]
        );
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_start_builds_jobs_from_file() {
        let _serial = SERIAL.lock();
        let dir = TempDir::new().unwrap();
        let store = ScheduleStore::new(dir.path().join("scheduler.json"));
        store.append(&sample_schedule("health")).unwrap();
        store.append(&sample_schedule("unknown")).unwrap();

        let scheduler = Scheduler::builder(orchestrator(&dir)).with_store(store).build().unwrap();
        scheduler.start(RunMode::Cooperative(Handle::current())).unwrap();

        assert_eq!(
            scheduler.active_job_ids(),
            vec![RELOAD_JOB_ID, "schedule-0", "tick"]
        );
        assert!(matches!(
            scheduler.start(RunMode::Cooperative(Handle::current())),
            Err(ScheduleError::AlreadyRunning)
        ));
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_reload_is_idempotent_and_follows_file() {
        let _serial = SERIAL.lock();
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::builder(orchestrator(&dir)).build().unwrap();
        scheduler.start(RunMode::Cooperative(Handle::current())).unwrap();

        assert!(!scheduler.reload_on_config_change().unwrap());
        let before = scheduler.active_job_ids();
        assert!(!scheduler.reload_on_config_change().unwrap());
        assert_eq!(scheduler.active_job_ids(), before);

        scheduler.add_schedule(&sample_schedule("health")).unwrap();
        assert!(scheduler.active_job_ids().contains(&"schedule-0".to_string()));

        scheduler.remove_schedule(0).unwrap();
        assert_eq!(scheduler.active_job_ids(), before);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_malformed_file_fails_start_and_is_kept() {
        let _serial = SERIAL.lock();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scheduler.json");
        std::fs::write(&path, "{oops").unwrap();

        let scheduler = Scheduler::builder(orchestrator(&dir)).build().unwrap();
        let err = scheduler.start(RunMode::Cooperative(Handle::current())).unwrap_err();
        assert!(matches!(err, ScheduleError::MalformedConfig { .. }));
        assert!(!scheduler.is_running());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{oops");
    }

    #[tokio::test]
    async fn test_initials_survive_reload() {
        let _serial = SERIAL.lock();
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::builder(orchestrator(&dir)).build().unwrap();
        scheduler.start(RunMode::Cooperative(Handle::current())).unwrap();

        let options = json!({"minutes": 5, "id": "heartbeat"});
        scheduler
            .add_initials(vec![InitialTask::new(
                PING_TASK,
                "interval",
                options.as_object().unwrap().clone(),
            )])
            .unwrap();
        let adhoc = scheduler
            .add_task(PING_TASK, "cron", json!({"minute": 0}).as_object().unwrap().clone())
            .unwrap();

        scheduler.add_schedule(&sample_schedule("health")).unwrap();
        let ids = scheduler.active_job_ids();
        assert!(ids.contains(&"heartbeat".to_string()));
        assert!(ids.contains(&"tick".to_string()));
        assert!(!ids.contains(&adhoc));
        scheduler.stop();
    }

    #[test]
    fn test_blocking_mode_returns_after_stop() {
        let _serial = SERIAL.lock();
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::builder(orchestrator(&dir)).build().unwrap();

        let runner = Arc::clone(&scheduler);
        let thread = std::thread::spawn(move || runner.start(RunMode::Blocking));
        while !scheduler.is_running() {
            std::thread::sleep(Duration::from_millis(5));
        }
        scheduler.stop();
        assert!(thread.join().unwrap().is_ok());
    }
}
