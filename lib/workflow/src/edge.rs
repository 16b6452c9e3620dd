//! Connection types for workflow graphs.
//!
//! A connection links two nodes by their graph IDs. The storage ID of either
//! endpoint never appears on a connection.

use crate::config::ConfigMap;
use crate::node::GraphId;
use opsflow_core::ConnectionStorageId;
use serde::{Deserialize, Serialize};

/// Default execution order for a new connection.
pub const DEFAULT_EXECUTION_ORDER: i32 = 1;

/// Named attachment points on the source and target nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHandles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl ConnectionHandles {
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_handle: Some(source.into()),
            target_handle: Some(target.into()),
        }
    }

    /// Handles with only the source side set, e.g. a loop's `item` branch.
    #[must_use]
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source_handle: Some(source.into()),
            target_handle: None,
        }
    }
}

/// A directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<ConnectionStorageId>,
    pub graph_id: GraphId,
    pub source_graph_id: GraphId,
    pub target_graph_id: GraphId,
    #[serde(flatten)]
    pub handles: ConnectionHandles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub conditions: ConfigMap,
    /// Presentation hints for the editing surface.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub style: ConfigMap,
    #[serde(default)]
    pub animated: bool,
    #[serde(default = "default_execution_order")]
    pub execution_order: i32,
}

fn default_execution_order() -> i32 {
    DEFAULT_EXECUTION_ORDER
}

impl WorkflowConnection {
    /// Creates an unsaved connection with a freshly minted graph ID.
    #[must_use]
    pub fn new(source: GraphId, target: GraphId) -> Self {
        Self::with_graph_id(GraphId::generate("edge"), source, target)
    }

    /// Creates an unsaved connection with a caller-supplied graph ID.
    #[must_use]
    pub fn with_graph_id(graph_id: GraphId, source: GraphId, target: GraphId) -> Self {
        Self {
            storage_id: None,
            graph_id,
            source_graph_id: source,
            target_graph_id: target,
            handles: ConnectionHandles::default(),
            label: None,
            conditions: ConfigMap::new(),
            style: ConfigMap::new(),
            animated: false,
            execution_order: DEFAULT_EXECUTION_ORDER,
        }
    }

    #[must_use]
    pub fn with_handles(mut self, handles: ConnectionHandles) -> Self {
        self.handles = handles;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether this connection touches the given node.
    #[must_use]
    pub fn touches(&self, node: &GraphId) -> bool {
        &self.source_graph_id == node || &self.target_graph_id == node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_connection_has_defaults() {
        let conn = WorkflowConnection::new(GraphId::new("a"), GraphId::new("b"));
        assert!(conn.graph_id.as_str().starts_with("edge_"));
        assert_eq!(conn.execution_order, DEFAULT_EXECUTION_ORDER);
        assert!(!conn.animated);
        assert!(conn.storage_id.is_none());
    }

    #[test]
    fn handles_flatten_into_wire_form() {
        let conn = WorkflowConnection::with_graph_id(
            GraphId::new("e1"),
            GraphId::new("loop"),
            GraphId::new("send"),
        )
        .with_handles(ConnectionHandles::from_source("item"));

        let value = serde_json::to_value(&conn).expect("serialize");
        assert_eq!(value["sourceHandle"], json!("item"));
        assert!(value.get("targetHandle").is_none());
        assert_eq!(value["sourceGraphId"], json!("loop"));
    }

    #[test]
    fn touches_either_endpoint() {
        let conn = WorkflowConnection::new(GraphId::new("a"), GraphId::new("b"));
        assert!(conn.touches(&GraphId::new("a")));
        assert!(conn.touches(&GraphId::new("b")));
        assert!(!conn.touches(&GraphId::new("c")));
    }
}
