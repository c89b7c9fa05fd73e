//! Several zones running in one process.
//!
//! A `Cluster` splits one global graph into per-zone partitions, gives every
//! zone the same [`LocalInbox`], and routes events back to the owning zone
//! through a [`Dispatcher`]. This is how the whole protocol is exercised end
//! to end without a network between zones.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::error::{GraphError, GraphResult, ZoneIndexResult};
use crate::graph::loader::GraphLoader;
use crate::graph::store::Graph;
use crate::graph::{Edge, EdgeId, Permissions, Vertex, VertexId, VertexType, ZoneId};
use crate::inbox::{DispatchReport, Dispatcher, LocalInbox};
use crate::index::EffectiveVertex;
use crate::index::event::new_trace;
use crate::instrumentation::{
    EventStats, FanoutInstrumentation, Instrumentation, LogInstrumentation, StatsInstrumentation,
};
use crate::load::OperationIssuer;
use crate::zone::Zone;

/// In-process zones sharing one inbox.
pub struct Cluster {
    zones: BTreeMap<ZoneId, Zone>,
    inbox: Arc<LocalInbox>,
    dispatcher: Dispatcher,
    stats: Arc<StatsInstrumentation>,
    instrumentation: Arc<dyn Instrumentation>,
    workers: usize,
}

impl Cluster {
    /// An empty cluster with the given zones.
    pub fn new(zones: impl IntoIterator<Item = ZoneId>, workers: usize) -> Self {
        let mut cluster = Self::empty(workers);
        for id in zones {
            cluster.insert_zone(id.clone(), Graph::for_zone(id));
        }
        cluster
    }

    /// Split `global` into one partition per zone that owns a vertex.
    ///
    /// Each partition gets its own vertices and every edge touching them, so
    /// a cross-zone edge is stored twice. The index starts empty; call
    /// [`bootstrap`](Self::bootstrap) to build it.
    pub fn from_graph(global: &Graph, workers: usize) -> GraphResult<Self> {
        let mut partitions: BTreeMap<ZoneId, Graph> = BTreeMap::new();
        for vertex in global.all_vertices() {
            let zone = vertex.id().owner().clone();
            partitions
                .entry(zone.clone())
                .or_insert_with(|| Graph::for_zone(zone))
                .add_vertex(Vertex::new(vertex.id().clone(), vertex.kind()))?;
        }
        for edge in global.all_edges() {
            for owner in [edge.src().owner(), edge.dst().owner()] {
                if let Some(graph) = partitions.get(owner) {
                    graph.add_edge(edge.clone())?;
                }
            }
        }

        let mut cluster = Self::empty(workers);
        for (id, graph) in partitions {
            cluster.insert_zone(id, graph);
        }
        tracing::info!(
            zones = cluster.zones.len(),
            vertices = global.vertex_count(),
            edges = global.edge_count(),
            "cluster built"
        );
        Ok(cluster)
    }

    /// Load a global graph document and split it by zone.
    pub fn load(path: &Path, workers: usize) -> GraphResult<Self> {
        let loader = GraphLoader::from_path(path, None)?;
        Self::from_graph(loader.graph(), workers)
    }

    /// Every zone reports to the shared counters and to the trace-level
    /// notification log.
    fn empty(workers: usize) -> Self {
        let stats = Arc::new(StatsInstrumentation::new());
        let sinks: Vec<Arc<dyn Instrumentation>> =
            vec![stats.clone(), Arc::new(LogInstrumentation)];
        let instrumentation = Arc::new(FanoutInstrumentation::new(sinks));
        Self {
            zones: BTreeMap::new(),
            inbox: Arc::new(LocalInbox::new()),
            dispatcher: Dispatcher::new(),
            stats,
            instrumentation,
            workers: workers.max(1),
        }
    }

    fn insert_zone(&mut self, id: ZoneId, graph: Graph) {
        let zone = Zone::new(
            id.clone(),
            graph,
            self.inbox.clone(),
            Arc::clone(&self.instrumentation),
        );
        self.dispatcher
            .register(id.clone(), Arc::clone(zone.processor()));
        self.zones.insert(id, zone);
    }

    pub fn zone(&self, id: &ZoneId) -> Option<&Zone> {
        self.zones.get(id)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn inbox(&self) -> &Arc<LocalInbox> {
        &self.inbox
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn stats(&self) -> EventStats {
        self.stats.stats()
    }

    /// Every vertex in every zone, ordered by id.
    pub fn vertex_ids(&self) -> Vec<VertexId> {
        // Zones iterate in order and each returns its vertices sorted.
        self.zones
            .values()
            .flat_map(|z| z.graph().all_vertices())
            .map(|v| v.id().clone())
            .collect()
    }

    /// Every edge in the cluster, once.
    pub fn edge_ids(&self) -> Vec<EdgeId> {
        let mut ids: Vec<EdgeId> = self
            .zones
            .values()
            .flat_map(|z| z.graph().all_edges())
            .map(|e| e.id())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn add_vertex(&self, id: VertexId, kind: VertexType) -> GraphResult<()> {
        self.owning_zone(&id)?.add_vertex(id, kind)
    }

    /// Add `edge` to every zone that owns one of its endpoints.
    ///
    /// Every zone stores the edge before any of them announces it, so a
    /// worker never recomputes against a copy that is still missing.
    pub fn add_edge(&self, edge: Edge) -> GraphResult<()> {
        let zones = self.zones_with_endpoint(&edge.id());
        if zones.is_empty() {
            return Err(GraphError::DanglingEdge {
                edge: edge.id().to_string(),
            });
        }
        for zone in &zones {
            zone.insert_edge(edge.clone())?;
        }
        let trace = new_trace();
        for zone in &zones {
            zone.announce_added(&edge, &trace);
        }
        Ok(())
    }

    /// Remove the edge `id` from every zone storing it.
    pub fn remove_edge(&self, id: &EdgeId) -> GraphResult<Edge> {
        let zones = self.zones_with_edge(id);
        let mut removed = None;
        for zone in &zones {
            removed = Some(zone.delete_edge(id)?);
        }
        let edge = removed.ok_or_else(|| GraphError::EdgeNotFound {
            edge: id.to_string(),
        })?;
        let trace = new_trace();
        for zone in &zones {
            zone.announce_removed(&edge, &trace);
        }
        Ok(edge)
    }

    /// Replace the permissions of edge `id` in every zone storing it.
    pub fn set_permissions(&self, id: &EdgeId, permissions: Permissions) -> GraphResult<Edge> {
        let zones = self.zones_with_edge(id);
        let mut updated = None;
        for zone in &zones {
            updated = Some(zone.replace_permissions(id, permissions)?);
        }
        let edge = updated.ok_or_else(|| GraphError::EdgeNotFound {
            edge: id.to_string(),
        })?;
        let trace = new_trace();
        for zone in &zones {
            zone.announce_permissions(&edge, &trace);
        }
        Ok(edge)
    }

    /// Announce every edge in every zone. Returns the number of edges
    /// announced, counting cross-zone edges once per side.
    pub fn bootstrap(&self) -> usize {
        self.zones.values().map(Zone::bootstrap).sum()
    }

    /// Process events until nothing is queued or running.
    pub fn run_until_quiet(&self) -> DispatchReport {
        self.dispatcher.run_until_quiet(&self.inbox, self.workers)
    }

    /// Process events as they arrive until `stop` is set.
    pub fn run(&self, stop: &AtomicBool) -> DispatchReport {
        self.dispatcher.run(&self.inbox, self.workers, stop)
    }

    /// Bootstrap and process to quiescence.
    pub fn build_index(&self) -> DispatchReport {
        let announced = self.bootstrap();
        let report = self.run_until_quiet();
        tracing::info!(
            announced,
            processed = report.processed,
            failed = report.failed,
            "index built"
        );
        report
    }

    pub fn effective_parents(&self, id: &VertexId) -> GraphResult<Vec<EffectiveVertex>> {
        self.owning_zone(id)?.effective_parents(id)
    }

    pub fn effective_children(&self, id: &VertexId) -> GraphResult<Vec<EffectiveVertex>> {
        self.owning_zone(id)?.effective_children(id)
    }

    fn owning_zone(&self, id: &VertexId) -> GraphResult<&Zone> {
        self.zones
            .get(id.owner())
            .ok_or_else(|| GraphError::VertexNotFound {
                vertex: id.to_string(),
                zone: id.owner().to_string(),
            })
    }

    fn zones_with_endpoint(&self, id: &EdgeId) -> Vec<&Zone> {
        self.endpoint_zones(id)
            .into_iter()
            .filter(|z| z.graph().has_vertex(id.from()) || z.graph().has_vertex(id.to()))
            .collect()
    }

    fn zones_with_edge(&self, id: &EdgeId) -> Vec<&Zone> {
        self.endpoint_zones(id)
            .into_iter()
            .filter(|z| z.graph().has_edge(id))
            .collect()
    }

    /// The zones owning either endpoint, each once.
    fn endpoint_zones(&self, id: &EdgeId) -> Vec<&Zone> {
        let (from, to) = (id.from().owner(), id.to().owner());
        let source = self.zones.get(from);
        let destination = if to != from { self.zones.get(to) } else { None };
        source.into_iter().chain(destination).collect()
    }
}

impl OperationIssuer for Cluster {
    fn add_edge(&self, edge: Edge) -> ZoneIndexResult<()> {
        Ok(Cluster::add_edge(self, edge)?)
    }

    fn remove_edge(&self, id: &EdgeId) -> ZoneIndexResult<()> {
        Cluster::remove_edge(self, id)?;
        Ok(())
    }

    fn set_permissions(&self, id: &EdgeId, permissions: Permissions) -> ZoneIndexResult<()> {
        Cluster::set_permissions(self, id, permissions)?;
        Ok(())
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("zones", &self.zones.keys().collect::<Vec<_>>())
            .field("workers", &self.workers)
            .finish()
    }
}
