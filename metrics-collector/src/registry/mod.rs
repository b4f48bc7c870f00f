//! Capability registry binding extract, transform and load components to
//! pipeline identifiers.
//!
//! The registry is built once at startup from an explicit list of
//! [`Registration`]s. A component's kind comes from the [`Capability`] it is
//! registered with, never from its name.

mod params;

pub use params::{ExtractParams, ParamField, ParamKind, ParamSchema, ParamValue, RawParams};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::errors::{ExtractError, LoadError, RegistryError, TransformError};
use crate::extract::{Extract, ExtractHandle};
use crate::load::GraphLoader;
use crate::table::MetricsTable;
use crate::transform::Transform;

/// Builds an extract component from its validated parameters.
pub type ExtractFactory =
    Arc<dyn Fn(&ExtractParams) -> Result<Arc<dyn Extract>, ExtractError> + Send + Sync>;

/// Builds a transform component from the extract handles of a pipeline.
pub type TransformFactory =
    Arc<dyn Fn(Vec<ExtractHandle>) -> Result<Box<dyn Transform>, TransformError> + Send + Sync>;

/// Builds a graph loader from a processed table.
pub type LoadFactory =
    Arc<dyn Fn(MetricsTable) -> Result<Box<dyn GraphLoader>, LoadError> + Send + Sync>;

/// The three capability contracts a component can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Pulls daily metrics from an external service.
    Extract,
    /// Merges and reshapes extracted tables.
    Transform,
    /// Draws graphs from a transformed table.
    Load,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extract => write!(f, "extract"),
            Self::Transform => write!(f, "transform"),
            Self::Load => write!(f, "load"),
        }
    }
}

/// What a registered component can do, with the means to build it.
#[derive(Clone)]
pub enum Capability {
    /// An extract component.
    Extract {
        /// Declared constructor inputs.
        schema: ParamSchema,
        /// Constructor.
        factory: ExtractFactory,
    },
    /// A transform component.
    Transform {
        /// Constructor.
        factory: TransformFactory,
    },
    /// A load component.
    Load {
        /// Names of the graphs it draws, in drawing order.
        graph_names: Vec<String>,
        /// Constructor.
        factory: LoadFactory,
    },
}

impl Capability {
    /// The kind implied by this capability.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Extract { .. } => ComponentKind::Extract,
            Self::Transform { .. } => ComponentKind::Transform,
            Self::Load { .. } => ComponentKind::Load,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extract { schema, .. } => f
                .debug_struct("Extract")
                .field("schema", schema)
                .finish_non_exhaustive(),
            Self::Transform { .. } => f.debug_struct("Transform").finish_non_exhaustive(),
            Self::Load { graph_names, .. } => f
                .debug_struct("Load")
                .field("graph_names", graph_names)
                .finish_non_exhaustive(),
        }
    }
}

/// A component registered under one or more pipeline identifiers.
#[derive(Debug, Clone)]
pub struct Registration {
    name: String,
    pipelines: Vec<String>,
    capability: Capability,
}

impl Registration {
    /// Creates a registration.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        pipelines: impl IntoIterator<Item = impl Into<String>>,
        capability: Capability,
    ) -> Self {
        Self {
            name: name.into(),
            pipelines: pipelines.into_iter().map(Into::into).collect(),
            capability,
        }
    }

    /// Registers an extract component.
    #[must_use]
    pub fn extract(
        name: impl Into<String>,
        pipelines: impl IntoIterator<Item = impl Into<String>>,
        schema: ParamSchema,
        factory: ExtractFactory,
    ) -> Self {
        Self::new(name, pipelines, Capability::Extract { schema, factory })
    }

    /// Registers a transform component.
    #[must_use]
    pub fn transform(
        name: impl Into<String>,
        pipelines: impl IntoIterator<Item = impl Into<String>>,
        factory: TransformFactory,
    ) -> Self {
        Self::new(name, pipelines, Capability::Transform { factory })
    }

    /// Registers a load component.
    #[must_use]
    pub fn load(
        name: impl Into<String>,
        pipelines: impl IntoIterator<Item = impl Into<String>>,
        graph_names: impl IntoIterator<Item = impl Into<String>>,
        factory: LoadFactory,
    ) -> Self {
        Self::new(
            name,
            pipelines,
            Capability::Load {
                graph_names: graph_names.into_iter().map(Into::into).collect(),
                factory,
            },
        )
    }

    /// The component name, also used to name its cache file.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipeline identifiers this component is registered under.
    #[must_use]
    pub fn pipelines(&self) -> &[String] {
        &self.pipelines
    }

    /// The capability.
    #[must_use]
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// The component kind.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.capability.kind()
    }

    /// The parameter schema, for extract components.
    #[must_use]
    pub fn schema(&self) -> Option<&ParamSchema> {
        match &self.capability {
            Capability::Extract { schema, .. } => Some(schema),
            _ => None,
        }
    }

    fn serves(&self, pipeline: &str) -> bool {
        self.pipelines.iter().any(|p| p == pipeline)
    }
}

/// Builder collecting registrations before the registry is frozen.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Vec<Registration>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registration.
    #[must_use]
    pub fn register(mut self, registration: Registration) -> Self {
        self.entries.push(registration);
        self
    }

    /// Freezes the registry.
    ///
    /// Fails if any component declares no pipeline identifier.
    pub fn build(self) -> Result<Registry, RegistryError> {
        if let Some(bad) = self.entries.iter().find(|r| r.pipelines.is_empty()) {
            return Err(RegistryError::NoPipeline {
                name: bad.name.clone(),
            });
        }
        let mut single: HashMap<(&str, ComponentKind), &str> = HashMap::new();
        for entry in self
            .entries
            .iter()
            .filter(|r| r.kind() != ComponentKind::Extract)
        {
            for pipeline in &entry.pipelines {
                if let Some(first) = single.insert((pipeline.as_str(), entry.kind()), &entry.name) {
                    return Err(RegistryError::DuplicateComponent {
                        pipeline: pipeline.clone(),
                        kind: entry.kind(),
                        first: first.to_string(),
                        second: entry.name.clone(),
                    });
                }
            }
        }
        debug!(components = self.entries.len(), "Registry built");
        Ok(Registry {
            entries: self.entries.into_iter().map(Arc::new).collect(),
        })
    }
}

/// Immutable index of registered components.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Arc<Registration>>,
}

impl Registry {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// All components of `kind` registered under `pipeline`, in registration
    /// order. Unknown pipelines yield an empty list.
    #[must_use]
    pub fn resolve(&self, pipeline: &str, kind: ComponentKind) -> Vec<Arc<Registration>> {
        self.entries
            .iter()
            .filter(|r| r.kind() == kind && r.serves(pipeline))
            .cloned()
            .collect()
    }

    /// The first component of `kind` under `pipeline`; none is an error.
    pub fn resolve_first(
        &self,
        pipeline: &str,
        kind: ComponentKind,
    ) -> Result<Arc<Registration>, RegistryError> {
        self.entries
            .iter()
            .find(|r| r.kind() == kind && r.serves(pipeline))
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered {
                pipeline: pipeline.to_string(),
                kind,
            })
    }

    /// Every pipeline identifier any component declares, sorted.
    #[must_use]
    pub fn pipeline_ids(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .flat_map(|r| r.pipelines.iter().cloned())
            .collect()
    }

    /// Number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StaticExtract, StaticGraphLoader};
    use crate::transform::{ColumnSchema, ConcatTransform};
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        Registry::builder()
            .register(StaticExtract::registration("Garmin", ["health", "activity"], Default::default()))
            .register(StaticExtract::registration("Apple", ["health"], Default::default()))
            .register(ConcatTransform::registration("HealthTransform", ["health"], ColumnSchema::new()))
            .register(StaticGraphLoader::registration("HealthGraphs", ["health"], ["steps"]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_extracts_in_registration_order() {
        let names: Vec<_> = registry()
            .resolve("health", ComponentKind::Extract)
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["Garmin", "Apple"]);
    }

    #[test]
    fn test_second_transform_for_pipeline_is_rejected() {
        let err = Registry::builder()
            .register(ConcatTransform::registration("HealthTransform", ["health"], ColumnSchema::new()))
            .register(ConcatTransform::registration("OtherTransform", ["activity", "health"], ColumnSchema::new()))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateComponent {
                pipeline: "health".to_string(),
                kind: ComponentKind::Transform,
                first: "HealthTransform".to_string(),
                second: "OtherTransform".to_string(),
            }
        );

        let loaders = Registry::builder()
            .register(StaticGraphLoader::registration("HealthGraphs", ["health"], ["steps"]))
            .register(StaticGraphLoader::registration("MoreGraphs", ["health"], ["sleep"]))
            .build();
        assert!(matches!(loaders, Err(RegistryError::DuplicateComponent { .. })));
    }

    #[test]
    fn test_unknown_pipeline_yields_empty() {
        assert!(registry().resolve("nope", ComponentKind::Extract).is_empty());
    }

    #[test]
    fn test_resolve_first_requires_a_match() {
        let reg = registry();
        assert_eq!(
            reg.resolve_first("health", ComponentKind::Load).unwrap().name(),
            "HealthGraphs"
        );
        let err = reg.resolve_first("activity", ComponentKind::Transform).unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotRegistered {
                pipeline: "activity".to_string(),
                kind: ComponentKind::Transform,
            }
        );
    }

    #[test]
    fn test_pipeline_ids() {
        let ids: Vec<_> = registry().pipeline_ids().into_iter().collect();
        assert_eq!(ids, vec!["activity", "health"]);
    }

    #[test]
    fn test_component_without_pipeline_is_rejected() {
        let empty: [&str; 0] = [];
        let err = Registry::builder()
            .register(StaticExtract::registration("Orphan", empty, Default::default()))
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::NoPipeline { name: "Orphan".to_string() });
    }

    #[test]
    fn test_kind_comes_from_capability() {
        let reg = registry();
        let load = reg.resolve_first("health", ComponentKind::Load).unwrap();
        assert_eq!(load.kind(), ComponentKind::Load);
        assert!(load.schema().is_none());
    }
}
