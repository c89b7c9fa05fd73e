//! Zone facade: the public API of one partition.
//!
//! A `Zone` owns its graph and event processor. Graph mutations made here
//! also seed the propagation protocol: for every edge `src -> dst`, the zone
//! owning `src` tells `dst` about `src`'s effective children, and the zone
//! owning `dst` tells `src` about `dst`'s effective parents.
//!
//! Each mutation is split into a graph-only step and an announce step so a
//! caller holding several zones can update every copy of an edge before any
//! event is posted.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::GraphResult;
use crate::graph::loader::GraphLoader;
use crate::graph::store::Graph;
use crate::graph::{Edge, EdgeId, Permissions, Vertex, VertexId, VertexType, ZoneId};
use crate::inbox::Inbox;
use crate::index::EffectiveVertex;
use crate::index::event::{Event, EventKind, new_trace};
use crate::index::processor::EventProcessor;
use crate::instrumentation::Instrumentation;

/// One zone's graph, index and processor.
pub struct Zone {
    id: ZoneId,
    loader: GraphLoader,
    processor: Arc<EventProcessor>,
    inbox: Arc<dyn Inbox>,
}

impl Zone {
    /// Build a zone around `graph`, which must be pinned to `id` or unpinned.
    pub fn new(
        id: ZoneId,
        graph: Graph,
        inbox: Arc<dyn Inbox>,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> Self {
        let loader = GraphLoader::new(graph);
        let processor = Arc::new(EventProcessor::new(
            &loader,
            Arc::clone(&inbox),
            instrumentation,
        ));
        tracing::debug!(
            zone = %id,
            vertices = loader.graph().vertex_count(),
            edges = loader.graph().edge_count(),
            "zone initialized"
        );
        Self {
            id,
            loader,
            processor,
            inbox,
        }
    }

    pub fn id(&self) -> &ZoneId {
        &self.id
    }

    pub fn graph(&self) -> &Arc<Graph> {
        self.loader.graph()
    }

    pub fn processor(&self) -> &Arc<EventProcessor> {
        &self.processor
    }

    pub fn add_vertex(&self, id: VertexId, kind: VertexType) -> GraphResult<()> {
        self.graph().add_vertex(Vertex::new(id, kind))
    }

    /// Insert `edge` and announce it to its endpoints.
    pub fn add_edge(&self, edge: Edge) -> GraphResult<()> {
        self.insert_edge(edge.clone())?;
        self.announce_added(&edge, &new_trace());
        Ok(())
    }

    /// Remove the edge `id` and announce the removal to its endpoints.
    pub fn remove_edge(&self, id: &EdgeId) -> GraphResult<Edge> {
        let edge = self.delete_edge(id)?;
        self.announce_removed(&edge, &new_trace());
        Ok(edge)
    }

    /// Replace the permissions of edge `id` and make the destination
    /// recompute them.
    pub fn set_permissions(&self, id: &EdgeId, permissions: Permissions) -> GraphResult<Edge> {
        let edge = self.replace_permissions(id, permissions)?;
        self.announce_permissions(&edge, &new_trace());
        Ok(edge)
    }

    /// Insert `edge` into the local graph without posting any event.
    pub fn insert_edge(&self, edge: Edge) -> GraphResult<()> {
        self.graph().add_edge(edge)
    }

    /// Remove edge `id` from the local graph without posting any event.
    pub fn delete_edge(&self, id: &EdgeId) -> GraphResult<Edge> {
        self.graph().remove_edge(id)
    }

    /// Update the permissions of edge `id` in the local graph without
    /// posting any event.
    pub fn replace_permissions(&self, id: &EdgeId, permissions: Permissions) -> GraphResult<Edge> {
        self.graph().set_permissions(id, permissions)
    }

    /// Seed propagation for an edge already inserted here.
    pub fn announce_added(&self, edge: &Edge, trace: &str) {
        self.announce(edge, EventKind::ChildChange, EventKind::ParentChange, trace);
        self.refresh_destination(edge, trace);
    }

    /// Seed propagation for an edge already removed here.
    pub fn announce_removed(&self, edge: &Edge, trace: &str) {
        self.announce(edge, EventKind::ChildRemove, EventKind::ParentRemove, trace);
    }

    /// Seed recomputation for an edge whose permissions changed here.
    ///
    /// Only the destination's effective children carry permissions, so the
    /// parent side is left alone.
    pub fn announce_permissions(&self, edge: &Edge, trace: &str) {
        if self.is_local(edge.src()) {
            self.post_child_event(edge, EventKind::ChildChange, trace);
        }
        self.refresh_destination(edge, trace);
    }

    /// Announce every local edge as newly added, building the index from
    /// scratch once the events are processed.
    pub fn bootstrap(&self) -> usize {
        let trace = new_trace();
        let edges = self.graph().all_edges();
        for edge in &edges {
            self.announce(edge, EventKind::ChildChange, EventKind::ParentChange, &trace);
        }
        tracing::info!(zone = %self.id, edges = edges.len(), trace = %trace, "bootstrap announced");
        edges.len()
    }

    /// Effective parents of a local vertex, ordered by subject.
    pub fn effective_parents(&self, id: &VertexId) -> GraphResult<Vec<EffectiveVertex>> {
        let vertex = self.graph().get_vertex(id)?;
        let parents = vertex.index().parents();
        Ok(parents.iter().cloned().collect())
    }

    /// Effective children of a local vertex, ordered by subject.
    pub fn effective_children(&self, id: &VertexId) -> GraphResult<Vec<EffectiveVertex>> {
        let vertex = self.graph().get_vertex(id)?;
        let children = vertex.index().children();
        Ok(children.iter().cloned().collect())
    }

    fn is_local(&self, id: &VertexId) -> bool {
        self.graph().has_vertex(id)
    }

    fn announce(&self, edge: &Edge, child_kind: EventKind, parent_kind: EventKind, trace: &str) {
        if self.is_local(edge.src()) {
            self.post_child_event(edge, child_kind, trace);
        }
        if self.is_local(edge.dst()) {
            let effective = self.effective_ids(edge.dst(), |v| v.index().effective_parent_ids());
            let event = Event::new(parent_kind, trace, edge.dst().clone())
                .with_effective_vertices(effective);
            self.inbox.post(edge.src(), event);
        }
    }

    /// When only the destination is local, the source's zone may already
    /// have announced the edge before this zone stored it. Replay the
    /// source's announcement for the subjects reached through it so they
    /// are recomputed against the edge as stored here.
    fn refresh_destination(&self, edge: &Edge, trace: &str) {
        if self.is_local(edge.src()) || !self.is_local(edge.dst()) {
            return;
        }
        let effective = self.effective_ids(edge.dst(), |v| {
            v.index()
                .children()
                .iter()
                .filter(|entry| entry.intermediate_vertices().contains(edge.src()))
                .map(|entry| entry.subject().clone())
                .collect()
        });
        let event = Event::new(EventKind::ChildChange, trace, edge.src().clone())
            .with_effective_vertices(effective);
        self.inbox.post(edge.dst(), event);
    }

    fn post_child_event(&self, edge: &Edge, kind: EventKind, trace: &str) {
        let effective = self.effective_ids(edge.src(), |v| v.index().effective_child_ids());
        let event = Event::new(kind, trace, edge.src().clone()).with_effective_vertices(effective);
        self.inbox.post(edge.dst(), event);
    }

    fn effective_ids(
        &self,
        id: &VertexId,
        ids: impl FnOnce(&Vertex) -> BTreeSet<VertexId>,
    ) -> BTreeSet<VertexId> {
        self.graph()
            .get_vertex(id)
            .map(|v| ids(v.as_ref()))
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("id", &self.id)
            .field("graph", self.graph())
            .finish()
    }
}
