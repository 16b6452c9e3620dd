//! Error types for the workflow crate.
//!
//! Errors are layered with rootcause:
//! - `GraphError`: in-memory graph mutations
//! - `StoreError`: canvas persistence
//! - `CanvasError`: client-side canvas operations, wrapping the other two

use crate::node::GraphId;
use opsflow_core::WorkflowId;
use std::fmt;

/// Errors from graph operations.
///
/// These carry only graph-level information. Callers add the workflow ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// No node with this graph ID exists.
    NodeNotFound { graph_id: GraphId },
    /// A node or connection with this graph ID already exists.
    DuplicateGraphId { graph_id: GraphId },
    /// No connection with this graph ID exists.
    ConnectionNotFound { graph_id: GraphId },
    /// The node's configuration does not fit its type.
    InvalidConfiguration { graph_id: GraphId, reason: String },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { graph_id } => write!(f, "node not found: {graph_id}"),
            Self::DuplicateGraphId { graph_id } => {
                write!(f, "graph id already in use: {graph_id}")
            }
            Self::ConnectionNotFound { graph_id } => {
                write!(f, "connection not found: {graph_id}")
            }
            Self::InvalidConfiguration { graph_id, reason } => {
                write!(f, "invalid configuration for node {graph_id}: {reason}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors from a canvas store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing database rejected or failed the operation.
    Database { details: String },
    /// A persisted record could not be decoded.
    CorruptRecord { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database { details } => write!(f, "canvas database error: {details}"),
            Self::CorruptRecord { details } => write!(f, "corrupt canvas record: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from client-side canvas operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanvasError {
    /// A full sync against the store failed.
    SyncFailed {
        workflow_id: WorkflowId,
        details: String,
    },
    /// Loading the authoritative snapshot failed.
    LoadFailed {
        workflow_id: WorkflowId,
        details: String,
    },
    /// The node is not in the local graph.
    NodeNotInGraph { graph_id: GraphId },
    /// A single-node upsert failed.
    PersistNodeFailed { graph_id: GraphId, details: String },
    /// A local graph mutation was rejected.
    Graph(GraphError),
}

impl fmt::Display for CanvasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SyncFailed {
                workflow_id,
                details,
            } => write!(f, "failed to sync workflow {workflow_id}: {details}"),
            Self::LoadFailed {
                workflow_id,
                details,
            } => write!(f, "failed to load workflow {workflow_id}: {details}"),
            Self::NodeNotInGraph { graph_id } => {
                write!(f, "node {graph_id} is not in the graph")
            }
            Self::PersistNodeFailed { graph_id, details } => {
                write!(f, "failed to persist node {graph_id}: {details}")
            }
            Self::Graph(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CanvasError {}

impl From<GraphError> for CanvasError {
    fn from(err: GraphError) -> Self {
        Self::Graph(err)
    }
}
