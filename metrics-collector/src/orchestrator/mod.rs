//! Orchestration façade.
//!
//! The [`Orchestrator`] resolves a pipeline's components from the
//! [`Registry`], drives the per-day extraction loop and produces graph
//! artifacts, memoizing single graphs per day.

mod progress;

pub use progress::{LoggingProgress, ProgressReporter};

#[cfg(test)]
pub use progress::MockProgressReporter;

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::{LoadError, MetricsError, RegistryError, Result};
use crate::extract::{ExtractHandle, ParamMemory};
use crate::load::{Artifact, GraphFormat, GraphLoader, Graphs};
use crate::memo::{MemoCache, Staller};
use crate::observability::SpanTimer;
use crate::registry::{Capability, ComponentKind, ParamSchema, RawParams, Registry};
use crate::transform::Transform;
use crate::utils::{days_between, format_day, normalize_period};

fn not_registered(pipeline: &str, kind: ComponentKind) -> MetricsError {
    RegistryError::NotRegistered {
        pipeline: pipeline.to_string(),
        kind,
    }
    .into()
}

/// Parameter schemas per extract component.
pub type ParamsDef = BTreeMap<String, ParamSchema>;

/// Entry point for running pipelines.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<Registry>,
    settings: Settings,
    memo: Arc<MemoCache>,
}

impl Orchestrator {
    /// Creates an orchestrator over `registry`, storing state under `settings`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, settings: Settings) -> Self {
        let staller = Arc::new(Staller::new(&settings.stall));
        let memo = Arc::new(MemoCache::new(settings.graph_cache_file(), staller));
        Self {
            registry,
            settings,
            memo,
        }
    }

    /// The registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The memoization store for graphs.
    #[must_use]
    pub fn memo(&self) -> &Arc<MemoCache> {
        &self.memo
    }

    /// Every registered pipeline identifier.
    #[must_use]
    pub fn pipeline_ids(&self) -> Vec<String> {
        self.registry.pipeline_ids().into_iter().collect()
    }

    /// Parameter schemas of every extract component, per pipeline.
    #[must_use]
    pub fn extract_parameters(&self) -> BTreeMap<String, ParamsDef> {
        self.registry
            .pipeline_ids()
            .into_iter()
            .map(|pipeline| {
                let def = self.extract_params_def(&pipeline);
                (pipeline, def)
            })
            .collect()
    }

    /// Parameter schemas of the extract components of `pipeline`.
    #[must_use]
    pub fn extract_params_def(&self, pipeline: &str) -> ParamsDef {
        self.registry
            .resolve(pipeline, ComponentKind::Extract)
            .iter()
            .filter_map(|r| r.schema().map(|s| (r.name().to_string(), s.clone())))
            .collect()
    }

    /// Names of the graphs the load component of `pipeline` draws.
    pub fn graph_names(&self, pipeline: &str) -> Result<Vec<String>> {
        let load = self.registry.resolve_first(pipeline, ComponentKind::Load)?;
        match load.capability() {
            Capability::Load { graph_names, .. } => Ok(graph_names.clone()),
            _ => Ok(Vec::new()),
        }
    }

    /// Parameters last used for `pipeline`; empty when none were stored.
    #[must_use]
    pub fn stored_params(&self, pipeline: &str) -> RawParams {
        ParamMemory::new(self.settings.params_file()).load(pipeline)
    }

    /// Builds every extract component of `pipeline` from `raw`.
    ///
    /// Each component keeps only the keys its schema declares. A missing
    /// required key fails the whole call.
    pub fn get_extract_objects(&self, pipeline: &str, raw: &RawParams) -> Result<Vec<ExtractHandle>> {
        let mut handles = Vec::new();
        for registration in self.registry.resolve(pipeline, ComponentKind::Extract) {
            let Capability::Extract { schema, factory } = registration.capability() else {
                continue;
            };
            let params = schema.build(registration.name(), raw)?;
            let source = factory(&params)?;
            handles.push(ExtractHandle::new(
                registration.name(),
                registration.pipelines().to_vec(),
                params,
                source,
                &self.settings,
            ));
        }
        debug!(pipeline = %pipeline, extracts = handles.len(), "Extract components built");
        Ok(handles)
    }

    /// Fetches every day of `[from, to]` for every extract, through the
    /// durable cache.
    ///
    /// Extracts are processed in order, each over ascending days. After each
    /// unit the completed fraction goes to `progress`; reporter failures are
    /// logged and ignored.
    pub fn process_dates(
        &self,
        extracts: &[ExtractHandle],
        from: &str,
        to: &str,
        progress: Option<&dyn ProgressReporter>,
    ) -> Result<()> {
        let (from, to) = normalize_period(from, to)?;
        let days: Vec<_> = days_between(from, to).collect();
        let total = extracts.len() * days.len();
        let timer = SpanTimer::start("process_dates");
        info!(
            from = %format_day(from),
            to = %format_day(to),
            extracts = extracts.len(),
            units = total,
            "Processing dates"
        );

        let mut done = 0usize;
        for extract in extracts {
            for day in &days {
                extract.get_data(*day)?;
                done += 1;
                if let Some(reporter) = progress {
                    #[allow(clippy::cast_precision_loss)]
                    let fraction = done as f64 / total as f64;
                    if let Err(e) = reporter.update(fraction) {
                        warn!(error = %e, "Progress reporter failed, continuing");
                    }
                }
            }
        }

        info!(units = done, duration_ms = timer.finish(), "Dates processed");
        Ok(())
    }

    /// Builds the transform component of `pipeline` from `extracts`.
    pub fn get_transform_object(
        &self,
        pipeline: &str,
        extracts: Vec<ExtractHandle>,
    ) -> Result<Box<dyn Transform>> {
        let registration = self.registry.resolve_first(pipeline, ComponentKind::Transform)?;
        let Capability::Transform { factory } = registration.capability() else {
            return Err(not_registered(pipeline, ComponentKind::Transform));
        };
        Ok(factory(extracts)?)
    }

    fn prepare_loader(
        &self,
        pipeline: &str,
        from: &str,
        to: &str,
        transform: &mut dyn Transform,
    ) -> Result<Box<dyn GraphLoader>> {
        let registration = self.registry.resolve_first(pipeline, ComponentKind::Load)?;
        let Capability::Load { factory, .. } = registration.capability() else {
            return Err(not_registered(pipeline, ComponentKind::Load));
        };
        let (from, to) = normalize_period(from, to)?;
        transform.validate()?;
        let table = transform.process_pipeline(from, to)?;
        debug!(pipeline = %pipeline, rows = table.len(), "Table ready for graphs");
        Ok(factory(table)?)
    }

    /// Lazily renders every graph of `pipeline` for the period.
    ///
    /// The transform is validated and processed before this returns; each
    /// artifact is rendered when the sequence is advanced.
    pub fn get_all_graphs(
        &self,
        from: &str,
        to: &str,
        pipeline: &str,
        transform: &mut dyn Transform,
        format: GraphFormat,
    ) -> Result<Graphs> {
        let loader = self.prepare_loader(pipeline, from, to, transform)?;
        Ok(Graphs::new(loader, format))
    }

    /// Renders the graph `name`, memoized per day.
    pub fn get_graph(
        &self,
        name: &str,
        from: &str,
        to: &str,
        pipeline: &str,
        transform: &mut dyn Transform,
        format: GraphFormat,
    ) -> Result<Artifact> {
        if !self.graph_names(pipeline)?.iter().any(|g| g == name) {
            return Err(LoadError::UnknownGraph {
                pipeline: pipeline.to_string(),
                graph: name.to_string(),
            }
            .into());
        }

        let (from_day, to_day) = normalize_period(from, to)?;
        let args = vec![
            pipeline.to_string(),
            name.to_string(),
            format_day(from_day),
            format_day(to_day),
            transform.describe(),
            format.to_string(),
        ];
        self.memo.get_or_compute("get_graph", &args, || {
            let loader = self.prepare_loader(pipeline, from, to, transform)?;
            loader.render(name, format).map_err(MetricsError::from)
        })
    }
}
