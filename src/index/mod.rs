//! Effective reachability index.
//!
//! Every local vertex owns a [`VertexIndex`]: its effective parents (all
//! transitive ancestors) and effective children (all transitive descendants),
//! each kept as an [`EffectiveVertex`] keyed by subject. The index is
//! maintained incrementally by the [`processor::EventProcessor`], which
//! consumes [`event::Event`]s and forwards derived events to neighbors.

pub mod effective;
pub mod event;
pub mod processor;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::graph::VertexId;

pub use effective::{EffectiveVertex, RecalculationResult};

/// One side (parents or children) of a vertex index, keyed by subject.
///
/// Between mutation passes every entry has a non-empty intermediate set.
#[derive(Debug, Default)]
pub struct EffectiveMap {
    entries: BTreeMap<VertexId, EffectiveVertex>,
}

impl EffectiveMap {
    /// Return the entry for `subject`, creating an empty one if needed.
    ///
    /// The flag is `true` when the entry was created. Callers must give a new
    /// entry an intermediate vertex before releasing the map.
    pub fn get_or_add(&mut self, subject: &VertexId) -> (&mut EffectiveVertex, bool) {
        let mut created = false;
        let entry = self.entries.entry(subject.clone()).or_insert_with(|| {
            created = true;
            EffectiveVertex::new(subject.clone())
        });
        (entry, created)
    }

    pub fn get(&self, subject: &VertexId) -> Option<&EffectiveVertex> {
        self.entries.get(subject)
    }

    pub fn get_mut(&mut self, subject: &VertexId) -> Option<&mut EffectiveVertex> {
        self.entries.get_mut(subject)
    }

    /// Delete the entry for `subject`.
    pub fn remove(&mut self, subject: &VertexId) -> Option<EffectiveVertex> {
        self.entries.remove(subject)
    }

    /// Drop `neighbor` from the entry for `subject`, deleting the entry if
    /// that empties it. Returns `true` iff the neighbor was a mediator.
    pub fn remove_intermediate(&mut self, subject: &VertexId, neighbor: &VertexId) -> bool {
        let Some(entry) = self.entries.get_mut(subject) else {
            return false;
        };
        let changed = entry.remove_intermediate_vertex(neighbor);
        if entry.is_empty() {
            self.entries.remove(subject);
        }
        changed
    }

    /// Current subject set, in order.
    pub fn keys(&self) -> BTreeSet<VertexId> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectiveVertex> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-vertex container of effective parents and effective children.
///
/// Each side has its own lock. A processing pass holds the write guard for
/// the whole get-or-create / mutate / remove sequence, so it never races
/// with a concurrent removal of the same entry.
#[derive(Debug, Default)]
pub struct VertexIndex {
    parents: RwLock<EffectiveMap>,
    children: RwLock<EffectiveMap>,
}

impl VertexIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parents(&self) -> RwLockReadGuard<'_, EffectiveMap> {
        self.parents.read().expect("parent index lock poisoned")
    }

    pub fn parents_mut(&self) -> RwLockWriteGuard<'_, EffectiveMap> {
        self.parents.write().expect("parent index lock poisoned")
    }

    pub fn children(&self) -> RwLockReadGuard<'_, EffectiveMap> {
        self.children.read().expect("child index lock poisoned")
    }

    pub fn children_mut(&self) -> RwLockWriteGuard<'_, EffectiveMap> {
        self.children.write().expect("child index lock poisoned")
    }

    /// Snapshot of the effective-parent entry for `subject`.
    pub fn effective_parent(&self, subject: &VertexId) -> Option<EffectiveVertex> {
        self.parents().get(subject).cloned()
    }

    /// Snapshot of the effective-child entry for `subject`.
    pub fn effective_child(&self, subject: &VertexId) -> Option<EffectiveVertex> {
        self.children().get(subject).cloned()
    }

    pub fn effective_parent_ids(&self) -> BTreeSet<VertexId> {
        self.parents().keys()
    }

    pub fn effective_child_ids(&self) -> BTreeSet<VertexId> {
        self.children().keys()
    }
}
