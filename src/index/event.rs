//! Change notifications exchanged between vertices.
//!
//! The JSON shape is what a transport carries between zones:
//!
//! ```json
//! {
//!   "type": "CHILD_CHANGE",
//!   "trace": "5f0c6a3e9b1d2c47",
//!   "sender": "zone0:alice",
//!   "originalSender": "zone0:alice",
//!   "effectiveVertices": ["zone0:bob"]
//! }
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::VertexId;

/// What changed, and in which direction it travels.
///
/// `Child*` events carry descendants upwards (to parents); `Parent*` events
/// carry ancestors downwards (to children).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ChildChange,
    ParentChange,
    ChildRemove,
    ParentRemove,
}

impl EventKind {
    pub fn is_removal(self) -> bool {
        matches!(self, EventKind::ChildRemove | EventKind::ParentRemove)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::ChildChange => write!(f, "CHILD_CHANGE"),
            EventKind::ParentChange => write!(f, "PARENT_CHANGE"),
            EventKind::ChildRemove => write!(f, "CHILD_REMOVE"),
            EventKind::ParentRemove => write!(f, "PARENT_REMOVE"),
        }
    }
}

/// A change notification in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Correlates every event derived from one graph operation.
    pub trace: String,
    /// The immediate upstream hop.
    pub sender: VertexId,
    /// The vertex whose relation is being added or removed.
    pub original_sender: VertexId,
    /// The sender's complete effective set (children or parents) at send time.
    #[serde(default)]
    pub effective_vertices: BTreeSet<VertexId>,
}

impl Event {
    /// A first-hop event: `sender` is also the original sender.
    pub fn new(kind: EventKind, trace: impl Into<String>, sender: VertexId) -> Self {
        Self {
            kind,
            trace: trace.into(),
            original_sender: sender.clone(),
            sender,
            effective_vertices: BTreeSet::new(),
        }
    }

    pub fn with_effective_vertices(mut self, effective_vertices: BTreeSet<VertexId>) -> Self {
        self.effective_vertices = effective_vertices;
        self
    }

    /// Every subject this event asserts: the effective set plus the sender.
    pub fn all_subjects(&self) -> BTreeSet<VertexId> {
        let mut all = self.effective_vertices.clone();
        all.insert(self.sender.clone());
        all
    }

    /// The event re-emitted by `sender` with its current effective set.
    ///
    /// Trace, kind and original sender are carried over unchanged.
    pub fn forwarded(&self, sender: VertexId, effective_vertices: BTreeSet<VertexId>) -> Self {
        Self {
            kind: self.kind,
            trace: self.trace.clone(),
            sender,
            original_sender: self.original_sender.clone(),
            effective_vertices,
        }
    }
}

/// A fresh random trace id.
pub fn new_trace() -> String {
    format!("{:016x}", rand::random::<u64>())
}
