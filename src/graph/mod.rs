//! Zone-partitioned property graph: identifiers, edges, vertices.
//!
//! Each zone stores only its own slice of the global graph:
//!
//! - **Vertices** are owned by exactly one zone, named by [`VertexId`]
//! - **Edges** run from a member (`src`, the child) to a group (`dst`, the
//!   parent) and carry [`Permissions`]
//! - **Cross-zone edges** are stored by every zone owning one of their
//!   endpoints; the remote endpoint is only referenced by id
//!
//! The partition store itself is [`store::Graph`].

pub mod loader;
pub mod permissions;
pub mod store;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::index::VertexIndex;

pub use permissions::Permissions;

/// Identifier of a zone (an administrative/physical partition).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(String);

impl ZoneId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Zone-qualified vertex identity.
///
/// Written as `zone:name` on the wire. Ordering is by zone first, then by
/// name, so sets of vertex ids iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VertexId {
    owner: ZoneId,
    name: String,
}

impl VertexId {
    pub fn new(owner: ZoneId, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
        }
    }

    /// The zone owning this vertex.
    pub fn owner(&self) -> &ZoneId {
        &self.owner
    }

    /// The zone-local name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.name)
    }
}

impl FromStr for VertexId {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((zone, name)) if !zone.is_empty() && !name.is_empty() => {
                Ok(VertexId::new(ZoneId::new(zone), name))
            }
            _ => Err(GraphError::InvalidVertexId { raw: s.to_string() }),
        }
    }
}

impl TryFrom<String> for VertexId {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VertexId> for String {
    fn from(id: VertexId) -> Self {
        id.to_string()
    }
}

/// Ordered identity of a directed edge: by `from`, then by `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId {
    from: VertexId,
    to: VertexId,
}

impl EdgeId {
    pub fn new(from: VertexId, to: VertexId) -> Self {
        Self { from, to }
    }

    pub fn from(&self) -> &VertexId {
        &self.from
    }

    pub fn to(&self) -> &VertexId {
        &self.to
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// A directed membership edge `src -> dst` with its permissions.
///
/// Edges are immutable values: changing permissions replaces the edge. The
/// derived ordering sorts by source, then destination, which is the
/// [`EdgeId`] order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    src: VertexId,
    dst: VertexId,
    #[serde(rename = "perms")]
    permissions: Permissions,
}

impl Edge {
    pub fn new(src: VertexId, dst: VertexId, permissions: Permissions) -> Self {
        Self {
            src,
            dst,
            permissions,
        }
    }

    pub fn id(&self) -> EdgeId {
        EdgeId::new(self.src.clone(), self.dst.clone())
    }

    pub fn src(&self) -> &VertexId {
        &self.src
    }

    pub fn dst(&self) -> &VertexId {
        &self.dst
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// A copy of this edge carrying different permissions.
    pub fn with_permissions(&self, permissions: Permissions) -> Self {
        Self {
            permissions,
            ..self.clone()
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} [{}]", self.src, self.dst, self.permissions)
    }
}

/// Kind of principal a vertex stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VertexType {
    User,
    Group,
    Space,
    Provider,
}

impl fmt::Display for VertexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VertexType::User => write!(f, "USER"),
            VertexType::Group => write!(f, "GROUP"),
            VertexType::Space => write!(f, "SPACE"),
            VertexType::Provider => write!(f, "PROVIDER"),
        }
    }
}

/// A vertex owned by the local zone, together with its reachability index.
///
/// Only the id and type are serialized; the index is rebuilt by the
/// propagation protocol.
#[derive(Debug, Serialize, Deserialize)]
pub struct Vertex {
    id: VertexId,
    #[serde(rename = "type")]
    kind: VertexType,
    #[serde(skip)]
    index: VertexIndex,
}

impl Vertex {
    pub fn new(id: VertexId, kind: VertexType) -> Self {
        Self {
            id,
            kind,
            index: VertexIndex::new(),
        }
    }

    pub fn id(&self) -> &VertexId {
        &self.id
    }

    pub fn kind(&self) -> VertexType {
        self.kind
    }

    /// The effective parents/children of this vertex.
    pub fn index(&self) -> &VertexIndex {
        &self.index
    }
}
