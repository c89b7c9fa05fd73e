//! Rich diagnostic error types for zone-index.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for zone-index.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum ZoneIndexError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Load(#[from] LoadError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("vertex {vertex} does not belong to zone {zone}")]
    #[diagnostic(
        code(zidx::graph::wrong_zone),
        help(
            "A zone only stores the vertices it owns. Route the vertex to the \
             zone named in its id, or run without a configured zone id."
        )
    )]
    WrongZone { vertex: String, zone: String },

    #[error("edge {edge} has no local endpoint")]
    #[diagnostic(
        code(zidx::graph::dangling_edge),
        help("Add the source or destination vertex to this zone before adding the edge.")
    )]
    DanglingEdge { edge: String },

    #[error("vertex {vertex} not found in zone {zone}")]
    #[diagnostic(
        code(zidx::graph::vertex_not_found),
        help("The vertex is not owned by this zone, or it was never added.")
    )]
    VertexNotFound { vertex: String, zone: String },

    #[error("edge {edge} does not exist")]
    #[diagnostic(
        code(zidx::graph::edge_not_found),
        help("Add the edge first; permissions can only be replaced on existing edges.")
    )]
    EdgeNotFound { edge: String },

    #[error("invalid vertex id: {raw:?}")]
    #[diagnostic(
        code(zidx::graph::invalid_vertex_id),
        help("Vertex ids are written as `zone:name`, both parts non-empty.")
    )]
    InvalidVertexId { raw: String },

    #[error("invalid permissions: {raw:?}")]
    #[diagnostic(
        code(zidx::graph::invalid_permissions),
        help("Permissions are written as a string of five '0'/'1' characters, e.g. \"10110\".")
    )]
    InvalidPermissions { raw: String },

    #[error("I/O error on graph file {path}")]
    #[diagnostic(
        code(zidx::graph::io),
        help("Check that the graph file exists and is readable/writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed graph document: {message}")]
    #[diagnostic(
        code(zidx::graph::format),
        help(
            "The graph file must be JSON of the form \
             {{\"vertices\": [...], \"edges\": [...]}}."
        )
    )]
    Format { message: String },
}

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

// ---------------------------------------------------------------------------
// Processing errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ProcessError {
    #[error("failed to process {kind} event at {vertex}")]
    #[diagnostic(
        code(zidx::process::failed),
        help(
            "The event was not applied. The dispatcher owns retry and drop \
             policy; the index of {vertex} is unchanged by this event."
        )
    )]
    Failed {
        vertex: String,
        kind: String,
        #[source]
        source: GraphError,
    },
}

/// Result type for event processing.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(zidx::config::read),
        help("Ensure the config file exists and is valid TOML.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}: {message}")]
    #[diagnostic(
        code(zidx::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(zidx::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(zidx::config::invalid), help("{message}"))]
    Invalid { message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Load generation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("load run aborted after {failed} failed operation(s)")]
    #[diagnostic(
        code(zidx::load::aborted),
        help("The run was started with exit-on-fail. Check the log for the failing operation.")
    )]
    Aborted { failed: u64 },

    #[error("graph has no {what} to operate on")]
    #[diagnostic(
        code(zidx::load::empty_graph),
        help("Load generation needs at least two vertices. Check the --graph file.")
    )]
    EmptyGraph { what: String },

    #[error("failed to install signal handler: {message}")]
    #[diagnostic(code(zidx::load::signal))]
    Signal { message: String },
}

/// Convenience alias for functions returning zone-index results.
pub type ZoneIndexResult<T> = std::result::Result<T, ZoneIndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_converts_to_top_level() {
        let err = GraphError::DanglingEdge {
            edge: "z:a -> z:b".into(),
        };
        let top: ZoneIndexError = err.into();
        assert!(matches!(
            top,
            ZoneIndexError::Graph(GraphError::DanglingEdge { .. })
        ));
    }

    #[test]
    fn process_error_keeps_graph_source() {
        let err = ProcessError::Failed {
            vertex: "z:a".into(),
            kind: "CHILD_CHANGE".into(),
            source: GraphError::VertexNotFound {
                vertex: "z:a".into(),
                zone: "z".into(),
            },
        };
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("not found"));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = GraphError::WrongZone {
            vertex: "zone1:bob".into(),
            zone: "zone0".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("zone1:bob"));
        assert!(msg.contains("zone0"));
    }
}
