//! The local partition of the distributed graph.
//!
//! Vertices live in a `DashMap` for lock-free lookups by id. Edges and both
//! adjacency indexes sit together behind one `RwLock`, so replacing an edge
//! (a permission change) is atomic for every reader.

use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Write};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};

use super::{Edge, EdgeId, Permissions, Vertex, VertexId, ZoneId};

#[derive(Debug, Default)]
struct EdgeTables {
    by_id: HashMap<EdgeId, Edge>,
    by_src: HashMap<VertexId, BTreeSet<Edge>>,
    by_dst: HashMap<VertexId, BTreeSet<Edge>>,
}

impl EdgeTables {
    fn insert(&mut self, edge: Edge) {
        if let Some(old) = self.by_id.insert(edge.id(), edge.clone()) {
            self.unlink(&old);
        }
        self.by_src
            .entry(edge.src().clone())
            .or_default()
            .insert(edge.clone());
        self.by_dst.entry(edge.dst().clone()).or_default().insert(edge);
    }

    fn remove(&mut self, id: &EdgeId) -> Option<Edge> {
        let edge = self.by_id.remove(id)?;
        self.unlink(&edge);
        Some(edge)
    }

    fn unlink(&mut self, edge: &Edge) {
        if let Some(set) = self.by_src.get_mut(edge.src()) {
            set.remove(edge);
            if set.is_empty() {
                self.by_src.remove(edge.src());
            }
        }
        if let Some(set) = self.by_dst.get_mut(edge.dst()) {
            set.remove(edge);
            if set.is_empty() {
                self.by_dst.remove(edge.dst());
            }
        }
    }
}

/// One zone's slice of the graph. Thread-safe.
///
/// Holds the vertices the zone owns and every edge with at least one local
/// endpoint. When constructed with a zone id, only vertices of that zone are
/// accepted.
pub struct Graph {
    zone: Option<ZoneId>,
    vertices: DashMap<VertexId, Arc<Vertex>>,
    edges: RwLock<EdgeTables>,
}

impl Graph {
    /// A graph that accepts vertices of any zone.
    pub fn new() -> Self {
        Self {
            zone: None,
            vertices: DashMap::new(),
            edges: RwLock::new(EdgeTables::default()),
        }
    }

    /// A graph that only accepts vertices owned by `zone`.
    pub fn for_zone(zone: ZoneId) -> Self {
        Self {
            zone: Some(zone),
            ..Self::new()
        }
    }

    /// The zone this graph is pinned to, if any.
    pub fn zone(&self) -> Option<&ZoneId> {
        self.zone.as_ref()
    }

    fn zone_label(&self) -> String {
        self.zone
            .as_ref()
            .map(|z| z.to_string())
            .unwrap_or_else(|| "<any>".to_string())
    }

    /// Insert a vertex. Inserting an id that already exists is a no-op.
    pub fn add_vertex(&self, vertex: Vertex) -> GraphResult<()> {
        if let Some(zone) = &self.zone {
            if vertex.id().owner() != zone {
                return Err(GraphError::WrongZone {
                    vertex: vertex.id().to_string(),
                    zone: zone.to_string(),
                });
            }
        }
        self.vertices
            .entry(vertex.id().clone())
            .or_insert_with(|| Arc::new(vertex));
        Ok(())
    }

    pub fn has_vertex(&self, id: &VertexId) -> bool {
        self.vertices.contains_key(id)
    }

    pub fn get_vertex(&self, id: &VertexId) -> GraphResult<Arc<Vertex>> {
        self.vertices
            .get(id)
            .map(|v| Arc::clone(v.value()))
            .ok_or_else(|| GraphError::VertexNotFound {
                vertex: id.to_string(),
                zone: self.zone_label(),
            })
    }

    /// Insert an edge, replacing any edge with the same id.
    ///
    /// Fails without touching the graph unless at least one endpoint is a
    /// local vertex.
    pub fn add_edge(&self, edge: Edge) -> GraphResult<()> {
        if !self.has_vertex(edge.src()) && !self.has_vertex(edge.dst()) {
            return Err(GraphError::DanglingEdge {
                edge: edge.to_string(),
            });
        }
        self.edges
            .write()
            .expect("edge lock poisoned")
            .insert(edge);
        Ok(())
    }

    /// Remove an edge, returning it.
    pub fn remove_edge(&self, id: &EdgeId) -> GraphResult<Edge> {
        self.edges
            .write()
            .expect("edge lock poisoned")
            .remove(id)
            .ok_or_else(|| GraphError::EdgeNotFound {
                edge: id.to_string(),
            })
    }

    /// Replace the edge `id` with one carrying `permissions`.
    ///
    /// Remove and re-insert happen under one write lock. Returns the new edge.
    pub fn set_permissions(&self, id: &EdgeId, permissions: Permissions) -> GraphResult<Edge> {
        let mut tables = self.edges.write().expect("edge lock poisoned");
        let old = tables.remove(id).ok_or_else(|| GraphError::EdgeNotFound {
            edge: id.to_string(),
        })?;
        let new = old.with_permissions(permissions);
        tables.insert(new.clone());
        Ok(new)
    }

    pub fn has_edge(&self, id: &EdgeId) -> bool {
        self.edges
            .read()
            .expect("edge lock poisoned")
            .by_id
            .contains_key(id)
    }

    pub fn get_edge(&self, id: &EdgeId) -> Option<Edge> {
        self.edges
            .read()
            .expect("edge lock poisoned")
            .by_id
            .get(id)
            .cloned()
    }

    /// Edges leaving `source` (towards its parents), ordered by [`EdgeId`].
    pub fn edges_by_source(&self, source: &VertexId) -> BTreeSet<Edge> {
        self.edges
            .read()
            .expect("edge lock poisoned")
            .by_src
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Edges entering `destination` (from its children), ordered by [`EdgeId`].
    pub fn edges_by_destination(&self, destination: &VertexId) -> BTreeSet<Edge> {
        self.edges
            .read()
            .expect("edge lock poisoned")
            .by_dst
            .get(destination)
            .cloned()
            .unwrap_or_default()
    }

    /// All local vertices, ordered by id.
    pub fn all_vertices(&self) -> Vec<Arc<Vertex>> {
        let mut all: Vec<_> = self.vertices.iter().map(|v| Arc::clone(v.value())).collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// All edges with a local endpoint, ordered by id.
    pub fn all_edges(&self) -> Vec<Edge> {
        let tables = self.edges.read().expect("edge lock poisoned");
        let mut all: Vec<_> = tables.by_id.values().cloned().collect();
        all.sort();
        all
    }

    /// Every zone touched by a local vertex or an edge endpoint.
    pub fn all_zones(&self) -> BTreeSet<ZoneId> {
        let mut zones: BTreeSet<ZoneId> = self
            .vertices
            .iter()
            .map(|v| v.key().owner().clone())
            .collect();
        let tables = self.edges.read().expect("edge lock poisoned");
        for edge in tables.by_id.values() {
            zones.insert(edge.src().owner().clone());
            zones.insert(edge.dst().owner().clone());
        }
        zones
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.read().expect("edge lock poisoned").by_id.len()
    }

    /// Build a graph from a parsed document.
    ///
    /// With `zone` set, only vertices of that zone and the edges touching them
    /// are kept, which is how one global document is split across zones.
    pub fn from_document(document: GraphDocument, zone: Option<ZoneId>) -> GraphResult<Self> {
        let graph = match zone {
            Some(zone) => Graph::for_zone(zone),
            None => Graph::new(),
        };
        for vertex in document.vertices {
            if graph.zone.as_ref().is_some_and(|z| vertex.id().owner() != z) {
                continue;
            }
            graph.add_vertex(vertex)?;
        }
        for edge in document.edges {
            if graph.zone.is_some() && !graph.has_vertex(edge.src()) && !graph.has_vertex(edge.dst())
            {
                continue;
            }
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }

    /// Read a JSON graph document. See [`Graph::from_document`] for `zone`.
    pub fn deserialize(reader: impl Read, zone: Option<ZoneId>) -> GraphResult<Self> {
        let document: GraphDocument =
            serde_json::from_reader(reader).map_err(|e| GraphError::Format {
                message: e.to_string(),
            })?;
        Self::from_document(document, zone)
    }

    /// Write this partition as a JSON graph document.
    pub fn serialize(&self, writer: impl Write) -> GraphResult<()> {
        let vertices = self.all_vertices();
        let document = GraphDocumentRef {
            vertices: vertices.iter().map(|v| v.as_ref()).collect(),
            edges: self.all_edges(),
        };
        serde_json::to_writer_pretty(writer, &document).map_err(|e| GraphError::Format {
            message: e.to_string(),
        })
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("zone", &self.zone)
            .field("vertices", &self.vertex_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

/// Persisted graph format: `{ "vertices": [...], "edges": [...] }`.
#[derive(Debug, Default, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub vertices: Vec<Vertex>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Serialize)]
struct GraphDocumentRef<'a> {
    vertices: Vec<&'a Vertex>,
    edges: Vec<Edge>,
}
