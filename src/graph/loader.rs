//! Load-time construction of a zone's graph.

use std::path::Path;
use std::sync::Arc;

use crate::error::{GraphError, GraphResult};

use super::ZoneId;
use super::store::Graph;

/// Owns the zone's [`Graph`] for the lifetime of the process.
///
/// The graph is built once and never swapped; consumers clone the `Arc`.
#[derive(Debug, Clone)]
pub struct GraphLoader {
    graph: Arc<Graph>,
}

impl GraphLoader {
    /// Wrap an already-built graph.
    pub fn new(graph: Graph) -> Self {
        Self {
            graph: Arc::new(graph),
        }
    }

    /// Load a JSON graph document from `path`.
    ///
    /// With `zone` set, only that zone's slice of the document is kept.
    pub fn from_path(path: &Path, zone: Option<ZoneId>) -> GraphResult<Self> {
        let file = std::fs::File::open(path).map_err(|e| GraphError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let graph = Graph::deserialize(std::io::BufReader::new(file), zone)?;
        tracing::info!(
            path = %path.display(),
            vertices = graph.vertex_count(),
            edges = graph.edge_count(),
            "graph loaded"
        );
        Ok(Self::new(graph))
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }
}
