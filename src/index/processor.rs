//! The propagation engine.
//!
//! [`EventProcessor::process`] applies one [`Event`] to one local vertex and,
//! if the vertex's visible effective set changed, forwards the event to its
//! neighbors. `Child*` events travel upwards (to the `dst` of the target's
//! outgoing edges), `Parent*` events travel downwards (to the `src` of its
//! incoming edges).
//!
//! Every forwarded event carries the complete current key set of the
//! relevant map rather than a delta, so one pass posts at most one event per
//! neighbor no matter how many subjects changed.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{GraphResult, ProcessError, ProcessResult};
use crate::graph::loader::GraphLoader;
use crate::graph::store::Graph;
use crate::graph::{Edge, VertexId};
use crate::inbox::Inbox;
use crate::instrumentation::{Instrumentation, Notification};

use super::event::{Event, EventKind};
use super::{EffectiveMap, RecalculationResult};

/// Applies events to the local zone's vertex indexes.
///
/// Safe to call concurrently for different targets. Calls for the same
/// target must be serialized by the caller to keep add/remove order.
pub struct EventProcessor {
    graph: Arc<Graph>,
    inbox: Arc<dyn Inbox>,
    instrumentation: Arc<dyn Instrumentation>,
}

impl EventProcessor {
    pub fn new(
        loader: &GraphLoader,
        inbox: Arc<dyn Inbox>,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> Self {
        Self {
            graph: Arc::clone(loader.graph()),
            inbox,
            instrumentation,
        }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Apply `event` to the index of local vertex `id`.
    ///
    /// Bracketed by start and end/fail notifications. Errors are returned
    /// to the caller, which owns retry policy.
    pub fn process(&self, id: &VertexId, event: &Event) -> ProcessResult<()> {
        self.instrumentation
            .notify(Notification::start_processing(id, event));

        let result = match event.kind {
            EventKind::ChildChange | EventKind::ChildRemove => self.process_child(id, event),
            EventKind::ParentChange | EventKind::ParentRemove => self.process_parent(id, event),
        };

        match result {
            Ok(()) => {
                self.instrumentation
                    .notify(Notification::end_processing(id, event));
                Ok(())
            }
            Err(source) => {
                self.instrumentation
                    .notify(Notification::fail_processing(id, event));
                Err(ProcessError::Failed {
                    vertex: id.to_string(),
                    kind: event.kind.to_string(),
                    source,
                })
            }
        }
    }

    fn process_parent(&self, id: &VertexId, event: &Event) -> GraphResult<()> {
        let vertex = self.graph.get_vertex(id)?;
        let mut parents = vertex.index().parents_mut();

        let propagate = if event.kind.is_removal() {
            parents.remove_intermediate(&event.original_sender, &event.sender)
        } else {
            let mut changed = false;
            for subject in event.all_subjects() {
                let (entry, created) = parents.get_or_add(&subject);
                changed |= created;
                changed |= entry.add_intermediate_vertex(event.sender.clone());
            }
            changed
        };

        if propagate {
            let effective_parents = parents.keys();
            drop(parents);
            let recipients = self
                .graph
                .edges_by_destination(id)
                .into_iter()
                .map(|e| e.src().clone())
                .collect();
            self.propagate_event(id, recipients, event, effective_parents);
        }
        Ok(())
    }

    fn process_child(&self, id: &VertexId, event: &Event) -> GraphResult<()> {
        let vertex = self.graph.get_vertex(id)?;
        let edges_to_calculate = self.graph.edges_by_destination(id);
        let mut children = vertex.index().children_mut();

        let propagate = if event.kind.is_removal() {
            let subject = &event.original_sender;
            let changed = children.remove_intermediate(subject, &event.sender);
            if changed {
                self.recalculate(&mut children, id, subject, event, &edges_to_calculate);
            }
            changed
        } else {
            let mut changed = false;
            for subject in event.all_subjects() {
                let (entry, created) = children.get_or_add(&subject);
                changed |= created;
                changed |= entry.add_intermediate_vertex(event.sender.clone());
                self.recalculate(&mut children, id, &subject, event, &edges_to_calculate);
            }
            changed
        };

        if propagate {
            let effective_children = children.keys();
            drop(children);
            let recipients = self
                .graph
                .edges_by_source(id)
                .into_iter()
                .map(|e| e.dst().clone())
                .collect();
            self.propagate_event(id, recipients, event, effective_children);
        }
        Ok(())
    }

    /// Recompute the permissions of one effective child and report
    /// dirty/clean transitions. A missing entry is skipped.
    fn recalculate(
        &self,
        children: &mut EffectiveMap,
        id: &VertexId,
        subject: &VertexId,
        event: &Event,
        edges: &BTreeSet<Edge>,
    ) {
        let Some(entry) = children.get_mut(subject) else {
            return;
        };
        match entry.recalculate_permissions(edges) {
            RecalculationResult::Dirty => {
                self.instrumentation
                    .notify(Notification::marked_dirty(id, event));
                tracing::warn!(vertex = %id, subject = %subject, "marking effective child as dirty");
            }
            RecalculationResult::Cleaned => {
                self.instrumentation
                    .notify(Notification::marked_clean(id, event));
                tracing::info!(vertex = %id, subject = %subject, "marking effective child as not dirty");
            }
            RecalculationResult::Unchanged => {}
        }
    }

    fn propagate_event(
        &self,
        sender: &VertexId,
        recipients: BTreeSet<VertexId>,
        event: &Event,
        effective_vertices: BTreeSet<VertexId>,
    ) {
        if recipients.is_empty() {
            return;
        }
        self.instrumentation
            .notify(Notification::fork_event(sender, event, recipients.len()));
        tracing::debug!(
            vertex = %sender,
            event = %event.kind,
            recipients = recipients.len(),
            effective = effective_vertices.len(),
            "propagating"
        );
        for recipient in &recipients {
            let forwarded = event.forwarded(sender.clone(), effective_vertices.clone());
            self.inbox.post(recipient, forwarded);
        }
    }
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("graph", &self.graph)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Permissions, Vertex, VertexType, ZoneId};
    use crate::inbox::LocalInbox;
    use crate::instrumentation::{NotificationKind, RecordingInstrumentation};

    fn vid(s: &str) -> VertexId {
        s.parse().unwrap()
    }

    fn perms(s: &str) -> Permissions {
        s.parse().unwrap()
    }

    struct Fixture {
        graph: Arc<Graph>,
        inbox: Arc<LocalInbox>,
        recorder: Arc<RecordingInstrumentation>,
        processor: EventProcessor,
    }

    /// Zone `z` owning `vertices`, with `edges` as (src, dst, perms).
    fn fixture(vertices: &[&str], edges: &[(&str, &str, &str)]) -> Fixture {
        let graph = Graph::for_zone(ZoneId::new("z"));
        for v in vertices {
            graph
                .add_vertex(Vertex::new(vid(v), VertexType::Group))
                .unwrap();
        }
        for (s, d, p) in edges {
            graph.add_edge(Edge::new(vid(s), vid(d), perms(p))).unwrap();
        }
        let loader = GraphLoader::new(graph);
        let inbox = Arc::new(LocalInbox::new());
        let recorder = Arc::new(RecordingInstrumentation::new());
        let processor = EventProcessor::new(&loader, inbox.clone(), recorder.clone());
        Fixture {
            graph: Arc::clone(loader.graph()),
            inbox,
            recorder,
            processor,
        }
    }

    fn child_change(sender: &str) -> Event {
        Event::new(EventKind::ChildChange, "t", vid(sender))
    }

    #[test]
    fn child_change_creates_entry_and_propagates() {
        // u -> v -> p1, v -> p2
        let f = fixture(
            &["z:u", "z:v", "z:p1", "z:p2"],
            &[
                ("z:u", "z:v", "10100"),
                ("z:v", "z:p1", "00001"),
                ("z:v", "z:p2", "00001"),
            ],
        );

        f.processor
            .process(&vid("z:v"), &child_change("z:u"))
            .unwrap();

        let v = f.graph.get_vertex(&vid("z:v")).unwrap();
        let entry = v.index().effective_child(&vid("z:u")).unwrap();
        assert_eq!(entry.intermediate_vertices(), &BTreeSet::from([vid("z:u")]));
        assert_eq!(entry.permissions(), perms("10100"));
        assert!(!entry.is_dirty());

        let posted = f.inbox.drain_pending();
        let targets: Vec<_> = posted.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(targets, vec![vid("z:p1"), vid("z:p2")]);
        for (_, e) in &posted {
            assert_eq!(e.kind, EventKind::ChildChange);
            assert_eq!(e.sender, vid("z:v"));
            assert_eq!(e.original_sender, vid("z:u"));
            assert_eq!(e.trace, "t");
            assert_eq!(e.effective_vertices, BTreeSet::from([vid("z:u")]));
        }

        assert_eq!(
            f.recorder.kinds(),
            vec![
                NotificationKind::StartProcessing,
                NotificationKind::ForkEvent { size: 2 },
                NotificationKind::EndProcessing,
            ]
        );
    }

    #[test]
    fn repeated_change_does_not_propagate() {
        let f = fixture(
            &["z:u", "z:v", "z:p"],
            &[("z:u", "z:v", "10000"), ("z:v", "z:p", "10000")],
        );
        f.processor
            .process(&vid("z:v"), &child_change("z:u"))
            .unwrap();
        assert_eq!(f.inbox.drain_pending().len(), 1);

        f.processor
            .process(&vid("z:v"), &child_change("z:u"))
            .unwrap();
        assert!(f.inbox.drain_pending().is_empty());
    }

    #[test]
    fn child_remove_deletes_entry_and_propagates_empty_set() {
        let f = fixture(
            &["z:u", "z:v", "z:p"],
            &[("z:u", "z:v", "10000"), ("z:v", "z:p", "10000")],
        );
        f.processor
            .process(&vid("z:v"), &child_change("z:u"))
            .unwrap();
        f.inbox.drain_pending();

        let remove = Event::new(EventKind::ChildRemove, "t2", vid("z:u"));
        f.processor.process(&vid("z:v"), &remove).unwrap();

        let v = f.graph.get_vertex(&vid("z:v")).unwrap();
        assert!(v.index().effective_child(&vid("z:u")).is_none());

        let posted = f.inbox.drain_pending();
        assert_eq!(posted.len(), 1);
        let (target, e) = &posted[0];
        assert_eq!(target, &vid("z:p"));
        assert_eq!(e.kind, EventKind::ChildRemove);
        assert!(e.effective_vertices.is_empty());
        assert_eq!(e.original_sender, vid("z:u"));
    }

    #[test]
    fn remove_of_unknown_subject_is_silent() {
        let f = fixture(&["z:v", "z:p"], &[("z:v", "z:p", "10000")]);
        let remove = Event::new(EventKind::ChildRemove, "t", vid("z:u"));
        f.processor.process(&vid("z:v"), &remove).unwrap();
        assert!(f.inbox.is_empty());
    }

    #[test]
    fn fan_out_is_one_event_per_neighbor() {
        // Three subjects change in one pass, two parents: two events.
        let f = fixture(
            &["z:u", "z:v", "z:p1", "z:p2"],
            &[
                ("z:u", "z:v", "10000"),
                ("z:v", "z:p1", "10000"),
                ("z:v", "z:p2", "10000"),
            ],
        );
        let event = child_change("z:u")
            .with_effective_vertices(BTreeSet::from([vid("z:a"), vid("z:b")]));
        f.processor.process(&vid("z:v"), &event).unwrap();

        let posted = f.inbox.drain_pending();
        assert_eq!(posted.len(), 2);
        let expected = BTreeSet::from([vid("z:a"), vid("z:b"), vid("z:u")]);
        for (_, e) in &posted {
            assert_eq!(e.effective_vertices, expected);
        }
    }

    #[test]
    fn parent_change_travels_to_children() {
        // c1 -> v, c2 -> v, v -> g
        let f = fixture(
            &["z:c1", "z:c2", "z:v", "z:g"],
            &[
                ("z:c1", "z:v", "10000"),
                ("z:c2", "z:v", "10000"),
                ("z:v", "z:g", "10000"),
            ],
        );
        let event = Event::new(EventKind::ParentChange, "t", vid("z:g"));
        f.processor.process(&vid("z:v"), &event).unwrap();

        let v = f.graph.get_vertex(&vid("z:v")).unwrap();
        let entry = v.index().effective_parent(&vid("z:g")).unwrap();
        assert_eq!(entry.intermediate_vertices(), &BTreeSet::from([vid("z:g")]));
        assert_eq!(entry.permissions(), Permissions::NONE);

        let targets: Vec<_> = f
            .inbox
            .drain_pending()
            .into_iter()
            .map(|(t, e)| {
                assert_eq!(e.effective_vertices, BTreeSet::from([vid("z:g")]));
                t
            })
            .collect();
        assert_eq!(targets, vec![vid("z:c1"), vid("z:c2")]);
    }

    #[test]
    fn parent_remove_keeps_entry_with_other_mediators() {
        let f = fixture(&["z:v"], &[]);
        let v = f.graph.get_vertex(&vid("z:v")).unwrap();
        for sender in ["z:g1", "z:g2"] {
            let e = Event::new(EventKind::ParentChange, "t", vid(sender))
                .with_effective_vertices(BTreeSet::from([vid("z:top")]));
            f.processor.process(&vid("z:v"), &e).unwrap();
        }
        assert_eq!(
            v.index().effective_parent(&vid("z:top")).unwrap().intermediate_vertices().len(),
            2
        );

        let mut remove = Event::new(EventKind::ParentRemove, "t", vid("z:g1"));
        remove.original_sender = vid("z:top");
        f.processor.process(&vid("z:v"), &remove).unwrap();
        assert_eq!(
            v.index().effective_parent(&vid("z:top")).unwrap().intermediate_vertices(),
            &BTreeSet::from([vid("z:g2")])
        );
    }

    #[test]
    fn conflicting_paths_mark_dirty_then_clean() {
        // u1 -> v (10000), u2 -> v (00001); subject s reaches v through both.
        let f = fixture(
            &["z:u1", "z:u2", "z:v"],
            &[("z:u1", "z:v", "10000"), ("z:u2", "z:v", "00001")],
        );
        let s = BTreeSet::from([vid("z:s")]);
        f.processor
            .process(&vid("z:v"), &child_change("z:u1").with_effective_vertices(s.clone()))
            .unwrap();
        f.processor
            .process(&vid("z:v"), &child_change("z:u2").with_effective_vertices(s))
            .unwrap();

        let v = f.graph.get_vertex(&vid("z:v")).unwrap();
        let entry = v.index().effective_child(&vid("z:s")).unwrap();
        assert!(entry.is_dirty());
        assert_eq!(entry.permissions(), perms("10001"));
        assert!(f.recorder.kinds().contains(&NotificationKind::MarkedDirty));

        let mut remove = Event::new(EventKind::ChildRemove, "t", vid("z:u2"));
        remove.original_sender = vid("z:s");
        f.processor.process(&vid("z:v"), &remove).unwrap();

        let entry = v.index().effective_child(&vid("z:s")).unwrap();
        assert!(!entry.is_dirty());
        assert_eq!(entry.permissions(), perms("10000"));
        assert_eq!(
            f.recorder.kinds().last(),
            Some(&NotificationKind::EndProcessing)
        );
        assert!(f.recorder.kinds().contains(&NotificationKind::MarkedClean));
    }

    #[test]
    fn missing_vertex_reports_fail() {
        let f = fixture(&["z:v"], &[]);
        let err = f
            .processor
            .process(&vid("z:ghost"), &child_change("z:u"))
            .unwrap_err();
        assert!(matches!(err, ProcessError::Failed { .. }));
        assert_eq!(
            f.recorder.kinds(),
            vec![
                NotificationKind::StartProcessing,
                NotificationKind::FailProcessing
            ]
        );
    }
}
