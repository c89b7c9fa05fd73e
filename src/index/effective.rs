//! One row of the reachability index.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::graph::{Edge, Permissions, VertexId};

/// Outcome of [`EffectiveVertex::recalculate_permissions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalculationResult {
    /// The mediating paths disagree, or one of them cannot be resolved from
    /// local edges yet. Another propagation round is needed.
    Dirty,
    /// A previously dirty entry resolved to one consistent value.
    Cleaned,
    /// Consistent before and after.
    Unchanged,
}

/// "Subject S is effectively reachable through these direct neighbors."
///
/// The entry lives in a [`VertexIndex`](super::VertexIndex) map keyed by its
/// subject and is removed from that map as soon as its intermediate set is
/// empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveVertex {
    subject: VertexId,
    intermediate_vertices: BTreeSet<VertexId>,
    permissions: Permissions,
    dirty: bool,
}

impl EffectiveVertex {
    /// An entry with no intermediate vertices yet.
    pub fn new(subject: VertexId) -> Self {
        Self {
            subject,
            intermediate_vertices: BTreeSet::new(),
            permissions: Permissions::NONE,
            dirty: false,
        }
    }

    pub fn subject(&self) -> &VertexId {
        &self.subject
    }

    pub fn intermediate_vertices(&self) -> &BTreeSet<VertexId> {
        &self.intermediate_vertices
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_empty(&self) -> bool {
        self.intermediate_vertices.is_empty()
    }

    /// Record `neighbor` as a mediator. Returns `true` iff it was not one
    /// already, i.e. the visible state changed.
    pub fn add_intermediate_vertex(&mut self, neighbor: VertexId) -> bool {
        self.intermediate_vertices.insert(neighbor)
    }

    /// Drop `neighbor` as a mediator. Returns `true` iff it was one.
    pub fn remove_intermediate_vertex(&mut self, neighbor: &VertexId) -> bool {
        self.intermediate_vertices.remove(neighbor)
    }

    /// Recompute the aggregated permissions from the edges entering the
    /// owning vertex.
    ///
    /// Only edges whose source is a current mediator count. The value is the
    /// combination of their permissions. The entry is dirty when a mediator
    /// has no such edge or when the counted edges carry different values.
    pub fn recalculate_permissions<'a>(
        &mut self,
        candidate_edges: impl IntoIterator<Item = &'a Edge>,
    ) -> RecalculationResult {
        let by_mediator: HashMap<&VertexId, Permissions> = candidate_edges
            .into_iter()
            .filter(|e| self.intermediate_vertices.contains(e.src()))
            .map(|e| (e.src(), e.permissions()))
            .collect();

        let unresolved = by_mediator.len() < self.intermediate_vertices.len();
        let distinct: BTreeSet<Permissions> = by_mediator.values().copied().collect();
        let inconsistent = unresolved || distinct.len() > 1;

        self.permissions = distinct
            .iter()
            .fold(Permissions::NONE, |acc, p| acc.combine(*p));
        let was_dirty = std::mem::replace(&mut self.dirty, inconsistent);

        match (was_dirty, inconsistent) {
            (_, true) => RecalculationResult::Dirty,
            (true, false) => RecalculationResult::Cleaned,
            (false, false) => RecalculationResult::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vid(s: &str) -> VertexId {
        s.parse().unwrap()
    }

    fn perms(s: &str) -> Permissions {
        s.parse().unwrap()
    }

    fn edge(src: &str, dst: &str, p: &str) -> Edge {
        Edge::new(vid(src), vid(dst), perms(p))
    }

    #[test]
    fn add_is_idempotent() {
        let mut ev = EffectiveVertex::new(vid("z:s"));
        assert!(ev.add_intermediate_vertex(vid("z:u")));
        assert!(!ev.add_intermediate_vertex(vid("z:u")));
        assert_eq!(ev.intermediate_vertices().len(), 1);
    }

    #[test]
    fn removing_non_member_reports_no_change() {
        let mut ev = EffectiveVertex::new(vid("z:s"));
        assert!(!ev.remove_intermediate_vertex(&vid("z:u")));
        ev.add_intermediate_vertex(vid("z:u"));
        assert!(ev.remove_intermediate_vertex(&vid("z:u")));
        assert!(!ev.remove_intermediate_vertex(&vid("z:u")));
        assert!(ev.is_empty());
    }

    #[test]
    fn single_path_takes_edge_permissions() {
        let mut ev = EffectiveVertex::new(vid("z:u"));
        ev.add_intermediate_vertex(vid("z:u"));
        let edges = [edge("z:u", "z:v", "10100"), edge("z:w", "z:v", "00011")];
        assert_eq!(
            ev.recalculate_permissions(&edges),
            RecalculationResult::Unchanged
        );
        assert_eq!(ev.permissions(), perms("10100"));
        assert!(!ev.is_dirty());
    }

    #[test]
    fn conflicting_paths_are_dirty_then_cleaned() {
        let mut ev = EffectiveVertex::new(vid("z:s"));
        ev.add_intermediate_vertex(vid("z:u1"));
        ev.add_intermediate_vertex(vid("z:u2"));
        let edges = [edge("z:u1", "z:v", "10000"), edge("z:u2", "z:v", "00001")];

        assert_eq!(ev.recalculate_permissions(&edges), RecalculationResult::Dirty);
        assert_eq!(ev.permissions(), perms("10001"));
        assert!(ev.is_dirty());

        ev.remove_intermediate_vertex(&vid("z:u2"));
        assert_eq!(
            ev.recalculate_permissions(&edges),
            RecalculationResult::Cleaned
        );
        assert_eq!(ev.permissions(), perms("10000"));
        assert!(!ev.is_dirty());

        assert_eq!(
            ev.recalculate_permissions(&edges),
            RecalculationResult::Unchanged
        );
    }

    #[test]
    fn agreeing_paths_stay_clean() {
        let mut ev = EffectiveVertex::new(vid("z:s"));
        ev.add_intermediate_vertex(vid("z:u1"));
        ev.add_intermediate_vertex(vid("z:u2"));
        let edges = [edge("z:u1", "z:v", "01000"), edge("z:u2", "z:v", "01000")];
        assert_eq!(
            ev.recalculate_permissions(&edges),
            RecalculationResult::Unchanged
        );
        assert_eq!(ev.permissions(), perms("01000"));
    }

    #[test]
    fn mediator_without_edge_is_dirty() {
        let mut ev = EffectiveVertex::new(vid("z:s"));
        ev.add_intermediate_vertex(vid("z:gone"));
        let edges: [Edge; 0] = [];
        assert_eq!(ev.recalculate_permissions(&edges), RecalculationResult::Dirty);
        assert_eq!(ev.permissions(), Permissions::NONE);
    }

    #[test]
    fn recalculation_is_pure() {
        let edges = [edge("z:u1", "z:v", "10000"), edge("z:u2", "z:v", "00110")];
        let mut base = EffectiveVertex::new(vid("z:s"));
        base.add_intermediate_vertex(vid("z:u1"));
        base.add_intermediate_vertex(vid("z:u2"));

        let mut first = base.clone();
        let mut second = base.clone();
        let r1 = first.recalculate_permissions(&edges);
        let r2 = second.recalculate_permissions(&edges);
        assert_eq!(r1, r2);
        assert_eq!(first, second);
    }
}
