//! Load components: draw graphs from a processed table.
//!
//! Rendering itself belongs to the [`GraphLoader`] implementation. This module
//! fixes the contract, the supported formats and the lazy artifact sequence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::LoadError;
use crate::table::MetricsTable;

/// Output format of a rendered graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormat {
    /// Standalone HTML document.
    Html,
    /// PNG image.
    Png,
}

impl GraphFormat {
    /// MIME type of artifacts in this format.
    #[must_use]
    pub fn mime(self) -> &'static str {
        match self {
            Self::Html => "text/html",
            Self::Png => "image/png",
        }
    }
}

impl fmt::Display for GraphFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Html => write!(f, "html"),
            Self::Png => write!(f, "png"),
        }
    }
}

impl FromStr for GraphFormat {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "png" => Ok(Self::Png),
            other => Err(LoadError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A rendered graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Graph name.
    pub graph: String,
    /// Format of `content`.
    pub format: GraphFormat,
    /// Rendered bytes.
    pub content: Vec<u8>,
}

impl Artifact {
    /// MIME type of the content.
    #[must_use]
    pub fn mime(&self) -> &'static str {
        self.format.mime()
    }

    /// Suggested file name, e.g. `steps.png`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.graph, self.format)
    }
}

/// A load component bound to a processed table.
pub trait GraphLoader: Send {
    /// Names of the graphs this loader draws, in drawing order.
    fn graph_names(&self) -> Vec<String>;

    /// The table graphs are drawn from.
    fn table(&self) -> &MetricsTable;

    /// Renders `graph` as HTML.
    fn to_html(&self, graph: &str) -> Result<Vec<u8>, LoadError>;

    /// Renders `graph` as PNG.
    fn to_png(&self, graph: &str) -> Result<Vec<u8>, LoadError>;

    /// Renders `graph` in `format`.
    fn render(&self, graph: &str, format: GraphFormat) -> Result<Artifact, LoadError> {
        let content = match format {
            GraphFormat::Html => self.to_html(graph)?,
            GraphFormat::Png => self.to_png(graph)?,
        };
        Ok(Artifact {
            graph: graph.to_string(),
            format,
            content,
        })
    }
}

/// Lazy, finite sequence of artifacts, one per graph of a loader.
///
/// Each artifact is rendered when requested. The sequence cannot be
/// restarted; ask the orchestrator again for a new one.
pub struct Graphs {
    loader: Box<dyn GraphLoader>,
    names: std::vec::IntoIter<String>,
    format: GraphFormat,
}

impl Graphs {
    /// Wraps a loader.
    #[must_use]
    pub fn new(loader: Box<dyn GraphLoader>, format: GraphFormat) -> Self {
        let names = loader.graph_names().into_iter();
        Self {
            loader,
            names,
            format,
        }
    }

    /// Graphs not rendered yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.names.len()
    }
}

impl fmt::Debug for Graphs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graphs")
            .field("format", &self.format)
            .field("remaining", &self.names.len())
            .finish_non_exhaustive()
    }
}

impl Iterator for Graphs {
    type Item = Result<Artifact, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let name = self.names.next()?;
        Some(self.loader.render(&name, self.format))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.names.size_hint()
    }
}
