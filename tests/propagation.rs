//! End-to-end propagation tests across zones.
//!
//! Each test builds a small multi-zone graph, runs the dispatcher until the
//! shared inbox is quiet, and checks the resulting effective relations.

use zone_index::cluster::Cluster;
use zone_index::graph::store::Graph;
use zone_index::graph::{Edge, EdgeId, Permissions, Vertex, VertexId, VertexType};
use zone_index::index::EffectiveVertex;

fn vid(s: &str) -> VertexId {
    s.parse().unwrap()
}

fn perms(s: &str) -> Permissions {
    s.parse().unwrap()
}

fn subjects(entries: &[EffectiveVertex]) -> Vec<String> {
    entries.iter().map(|e| e.subject().to_string()).collect()
}

fn entry<'a>(entries: &'a [EffectiveVertex], subject: &str) -> &'a EffectiveVertex {
    entries
        .iter()
        .find(|e| e.subject() == &vid(subject))
        .unwrap_or_else(|| panic!("no entry for {subject}"))
}

fn global(vertices: &[(&str, VertexType)], edges: &[(&str, &str, &str)]) -> Graph {
    let graph = Graph::new();
    for (id, kind) in vertices {
        graph.add_vertex(Vertex::new(vid(id), *kind)).unwrap();
    }
    for (src, dst, p) in edges {
        graph.add_edge(Edge::new(vid(src), vid(dst), perms(p))).unwrap();
    }
    graph
}

/// zone0:u -> zone0:g -> zone1:s
fn chain() -> Graph {
    global(
        &[
            ("zone0:u", VertexType::User),
            ("zone0:g", VertexType::Group),
            ("zone1:s", VertexType::Space),
        ],
        &[
            ("zone0:u", "zone0:g", "10000"),
            ("zone0:g", "zone1:s", "01100"),
        ],
    )
}

/// zone0:u reaches zone1:s through zone0:a and zone1:b.
fn diamond(a_perms: &str, b_perms: &str) -> Graph {
    global(
        &[
            ("zone0:u", VertexType::User),
            ("zone0:a", VertexType::Group),
            ("zone1:b", VertexType::Group),
            ("zone1:s", VertexType::Space),
        ],
        &[
            ("zone0:u", "zone0:a", "10000"),
            ("zone0:u", "zone1:b", "10000"),
            ("zone0:a", "zone1:s", a_perms),
            ("zone1:b", "zone1:s", b_perms),
        ],
    )
}

#[test]
fn chain_converges_across_zones() {
    let cluster = Cluster::from_graph(&chain(), 2).unwrap();
    let report = cluster.build_index();
    assert_eq!(report.failed, 0);

    let s_children = cluster.effective_children(&vid("zone1:s")).unwrap();
    assert_eq!(subjects(&s_children), vec!["zone0:g", "zone0:u"]);
    let u = entry(&s_children, "zone0:u");
    assert_eq!(u.permissions(), perms("01100"));
    assert!(!u.is_dirty());
    assert_eq!(
        u.intermediate_vertices().iter().cloned().collect::<Vec<_>>(),
        vec![vid("zone0:g")]
    );

    let u_parents = cluster.effective_parents(&vid("zone0:u")).unwrap();
    assert_eq!(subjects(&u_parents), vec!["zone0:g", "zone1:s"]);
    assert!(cluster.effective_children(&vid("zone0:u")).unwrap().is_empty());
    assert!(cluster.effective_parents(&vid("zone1:s")).unwrap().is_empty());
}

#[test]
fn diamond_has_two_mediators() {
    let cluster = Cluster::from_graph(&diamond("00010", "00010"), 1).unwrap();
    cluster.build_index();

    let s_children = cluster.effective_children(&vid("zone1:s")).unwrap();
    assert_eq!(
        subjects(&s_children),
        vec!["zone0:a", "zone0:u", "zone1:b"]
    );
    let u = entry(&s_children, "zone0:u");
    assert_eq!(u.intermediate_vertices().len(), 2);
    assert_eq!(u.permissions(), perms("00010"));
    assert!(!u.is_dirty());
}

#[test]
fn disagreeing_paths_are_dirty_until_aligned() {
    let cluster = Cluster::from_graph(&diamond("10000", "00001"), 1).unwrap();
    cluster.build_index();

    let s_children = cluster.effective_children(&vid("zone1:s")).unwrap();
    let u = entry(&s_children, "zone0:u");
    assert!(u.is_dirty());
    assert_eq!(u.permissions(), perms("10001"));
    assert!(cluster.stats().dirty >= 1);

    cluster
        .set_permissions(&EdgeId::new(vid("zone1:b"), vid("zone1:s")), perms("10000"))
        .unwrap();
    cluster.run_until_quiet();

    let s_children = cluster.effective_children(&vid("zone1:s")).unwrap();
    let u = entry(&s_children, "zone0:u");
    assert!(!u.is_dirty());
    assert_eq!(u.permissions(), perms("10000"));
    assert!(cluster.stats().cleaned >= 1);
}

#[test]
fn removing_an_edge_withdraws_the_member() {
    let cluster = Cluster::from_graph(&chain(), 1).unwrap();
    cluster.build_index();

    cluster
        .remove_edge(&EdgeId::new(vid("zone0:u"), vid("zone0:g")))
        .unwrap();
    let report = cluster.run_until_quiet();
    assert_eq!(report.failed, 0);

    assert!(cluster.effective_children(&vid("zone0:g")).unwrap().is_empty());
    let s_children = cluster.effective_children(&vid("zone1:s")).unwrap();
    assert_eq!(subjects(&s_children), vec!["zone0:g"]);

    // Removal only withdraws the entry keyed by the edge's own endpoint;
    // ancestors reached through it stay until rebuilt.
    let u_parents = subjects(&cluster.effective_parents(&vid("zone0:u")).unwrap());
    assert_eq!(u_parents, vec!["zone1:s"]);
}

#[test]
fn adding_an_edge_after_build_propagates_incrementally() {
    let cluster = Cluster::from_graph(&chain(), 1).unwrap();
    cluster.build_index();
    let before = cluster.stats();

    cluster
        .add_vertex(vid("zone1:p"), VertexType::Provider)
        .unwrap();
    cluster
        .add_edge(Edge::new(vid("zone1:s"), vid("zone1:p"), perms("11111")))
        .unwrap();
    cluster.run_until_quiet();

    let p_children = cluster.effective_children(&vid("zone1:p")).unwrap();
    assert_eq!(
        subjects(&p_children),
        vec!["zone0:g", "zone0:u", "zone1:s"]
    );
    let u_parents = cluster.effective_parents(&vid("zone0:u")).unwrap();
    assert_eq!(
        subjects(&u_parents),
        vec!["zone0:g", "zone1:p", "zone1:s"]
    );
    assert!(cluster.stats().finished > before.finished);
}

#[test]
fn repeating_an_edge_add_is_quiet() {
    let cluster = Cluster::from_graph(&chain(), 1).unwrap();
    cluster.build_index();
    let before = cluster.stats();

    cluster
        .add_edge(Edge::new(vid("zone0:u"), vid("zone0:g"), perms("10000")))
        .unwrap();
    let report = cluster.run_until_quiet();

    // Both endpoints hear about it once; neither state changes, so nothing
    // is forwarded further.
    assert_eq!(report.processed, 2);
    assert_eq!(cluster.stats().forked, before.forked);
}

#[test]
fn event_for_missing_vertex_fails_without_stalling() {
    let cluster = Cluster::from_graph(&chain(), 1).unwrap();
    cluster.build_index();

    // zone1 exists but has no vertex "ghost": the event is routed, then fails.
    cluster
        .add_edge(Edge::new(vid("zone0:u"), vid("zone1:ghost"), perms("00100")))
        .unwrap();
    let report = cluster.run_until_quiet();
    assert_eq!(report.failed, 1);
    assert_eq!(cluster.stats().failed, 1);
    assert!(cluster.inbox().is_quiet());
}

#[test]
fn event_for_unknown_zone_is_undeliverable() {
    let cluster = Cluster::from_graph(&chain(), 1).unwrap();
    cluster.build_index();

    cluster
        .add_edge(Edge::new(vid("zone0:u"), vid("zone9:far"), perms("00100")))
        .unwrap();
    let report = cluster.run_until_quiet();
    assert_eq!(report.undeliverable, 1);
}

/// Snapshot of every vertex's effective relations.
fn snapshot(cluster: &Cluster) -> Vec<(VertexId, Vec<EffectiveVertex>, Vec<EffectiveVertex>)> {
    cluster
        .vertex_ids()
        .into_iter()
        .map(|id| {
            let parents = cluster.effective_parents(&id).unwrap();
            let children = cluster.effective_children(&id).unwrap();
            (id, parents, children)
        })
        .collect()
}

/// Three levels of groups over three zones, with shared members so some
/// subjects have several mediators.
fn layered() -> Graph {
    let graph = Graph::new();
    let zone = |i: usize| format!("zone{}", i % 3);
    let mut layers: Vec<Vec<VertexId>> = Vec::new();
    for (depth, width) in [(0, 2), (1, 4), (2, 6), (3, 8)] {
        let layer: Vec<VertexId> = (0..width)
            .map(|i| vid(&format!("{}:l{depth}v{i}", zone(i + depth))))
            .collect();
        for id in &layer {
            let kind = if depth == 3 {
                VertexType::User
            } else {
                VertexType::Group
            };
            graph.add_vertex(Vertex::new(id.clone(), kind)).unwrap();
        }
        layers.push(layer);
    }
    for depth in 1..layers.len() {
        let (upper, lower) = (&layers[depth - 1], &layers[depth]);
        for (i, child) in lower.iter().enumerate() {
            for offset in 0..2 {
                let parent = &upper[(i + offset) % upper.len()];
                let p = Permissions::from_bits(1 << ((i + depth) % Permissions::WIDTH));
                graph
                    .add_edge(Edge::new(child.clone(), parent.clone(), p))
                    .unwrap();
            }
        }
    }
    graph
}

#[test]
fn parallel_workers_converge_to_sequential_result() {
    let graph = layered();

    let sequential = Cluster::from_graph(&graph, 1).unwrap();
    sequential.build_index();
    let parallel = Cluster::from_graph(&graph, 8).unwrap();
    let report = parallel.build_index();
    assert_eq!(report.failed, 0);

    assert_eq!(snapshot(&sequential), snapshot(&parallel));

    // Every user reaches both roots.
    for id in parallel.vertex_ids() {
        if id.name().starts_with("l3") {
            let parents = subjects(&parallel.effective_parents(&id).unwrap());
            assert!(parents.iter().any(|p| p.ends_with("l0v0")), "{id}: {parents:?}");
            assert!(parents.iter().any(|p| p.ends_with("l0v1")), "{id}: {parents:?}");
        }
    }
}
