// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # zone-index
//!
//! Incremental effective-reachability index over a zone-partitioned graph.
//!
//! Vertices are principals (users, groups, spaces, providers) owned by one
//! zone each; an edge `src -> dst` makes `src` a member of `dst` with some
//! [`Permissions`](graph::Permissions). Every vertex keeps the set of all
//! vertices transitively above it (effective parents) and below it
//! (effective children). Graph changes are turned into events that travel
//! between vertices, local or in other zones, until every index agrees.
//!
//! ## Architecture
//!
//! - **Graph** (`graph`): zone-local vertices and edges, JSON load/save
//! - **Index** (`index`): per-vertex effective maps and the [`EventProcessor`](index::processor::EventProcessor)
//! - **Delivery** (`inbox`): per-target ordered mailbox and worker dispatcher
//! - **Zones** (`zone`, `cluster`): graph mutations that seed propagation
//! - **Load** (`load`): constant-rate random operations
//!
//! ## Library usage
//!
//! ```no_run
//! use zone_index::cluster::Cluster;
//! use zone_index::graph::{Edge, VertexType, ZoneId};
//!
//! let cluster = Cluster::new([ZoneId::from("zone0"), ZoneId::from("zone1")], 4);
//! cluster.add_vertex("zone0:alice".parse().unwrap(), VertexType::User).unwrap();
//! cluster.add_vertex("zone1:admins".parse().unwrap(), VertexType::Group).unwrap();
//! cluster
//!     .add_edge(Edge::new(
//!         "zone0:alice".parse().unwrap(),
//!         "zone1:admins".parse().unwrap(),
//!         "11000".parse().unwrap(),
//!     ))
//!     .unwrap();
//! cluster.run_until_quiet();
//! let parents = cluster.effective_parents(&"zone0:alice".parse().unwrap()).unwrap();
//! assert_eq!(parents.len(), 1);
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod graph;
pub mod inbox;
pub mod index;
pub mod instrumentation;
pub mod load;
pub mod zone;
