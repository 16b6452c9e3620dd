//! Wire types for canvas synchronization.
//!
//! A client sends its full graph as a [`SyncRequest`] keyed by graph ID. The
//! store answers with a [`CanvasSnapshot`], the authoritative record set
//! including storage IDs.

use crate::config::ConfigMap;
use crate::edge::{ConnectionHandles, WorkflowConnection};
use crate::graph::{GraphParts, WorkflowGraph};
use crate::node::{GraphId, NodeType, Position, WorkflowNode, DEFAULT_RETRY_LIMIT};
use chrono::{DateTime, Utc};
use opsflow_core::{ConnectionStorageId, NodeStorageId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// A node as sent by a client, without any storage identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePayload {
    pub graph_id: GraphId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub configuration: ConfigMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_order: Option<i32>,
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub conditions: ConfigMap,
}

fn default_retry_limit() -> u32 {
    DEFAULT_RETRY_LIMIT
}

impl NodePayload {
    /// Rebuilds a graph node carrying the given storage ID.
    #[must_use]
    pub fn into_node(self, storage_id: Option<NodeStorageId>) -> WorkflowNode {
        WorkflowNode {
            storage_id,
            graph_id: self.graph_id,
            node_type: self.node_type,
            name: self.name,
            description: self.description,
            position: self.position,
            configuration: self.configuration,
            template: self.template,
            execution_order: self.execution_order,
            is_optional: self.is_optional,
            retry_limit: self.retry_limit,
            timeout_ms: self.timeout_ms,
            conditions: self.conditions,
        }
    }
}

impl From<&WorkflowNode> for NodePayload {
    fn from(node: &WorkflowNode) -> Self {
        Self {
            graph_id: node.graph_id.clone(),
            node_type: node.node_type,
            name: node.name.clone(),
            description: node.description.clone(),
            position: node.position,
            configuration: node.configuration.clone(),
            template: node.template.clone(),
            execution_order: node.execution_order,
            is_optional: node.is_optional,
            retry_limit: node.retry_limit,
            timeout_ms: node.timeout_ms,
            conditions: node.conditions.clone(),
        }
    }
}

/// A connection as sent by a client. Endpoints are graph IDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPayload {
    pub graph_id: GraphId,
    pub source_graph_id: GraphId,
    pub target_graph_id: GraphId,
    #[serde(flatten)]
    pub handles: ConnectionHandles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub conditions: ConfigMap,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub style: ConfigMap,
    #[serde(default)]
    pub animated: bool,
    #[serde(default = "default_execution_order")]
    pub execution_order: i32,
}

fn default_execution_order() -> i32 {
    crate::edge::DEFAULT_EXECUTION_ORDER
}

impl ConnectionPayload {
    #[must_use]
    pub fn into_connection(self, storage_id: Option<ConnectionStorageId>) -> WorkflowConnection {
        WorkflowConnection {
            storage_id,
            graph_id: self.graph_id,
            source_graph_id: self.source_graph_id,
            target_graph_id: self.target_graph_id,
            handles: self.handles,
            label: self.label,
            conditions: self.conditions,
            style: self.style,
            animated: self.animated,
            execution_order: self.execution_order,
        }
    }
}

impl From<&WorkflowConnection> for ConnectionPayload {
    fn from(conn: &WorkflowConnection) -> Self {
        Self {
            graph_id: conn.graph_id.clone(),
            source_graph_id: conn.source_graph_id.clone(),
            target_graph_id: conn.target_graph_id.clone(),
            handles: conn.handles.clone(),
            label: conn.label.clone(),
            conditions: conn.conditions.clone(),
            style: conn.style.clone(),
            animated: conn.animated,
            execution_order: conn.execution_order,
        }
    }
}

/// A full-graph sync request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub nodes: Vec<NodePayload>,
    #[serde(default)]
    pub connections: Vec<ConnectionPayload>,
}

impl SyncRequest {
    /// Serializes a graph keyed by graph ID.
    #[must_use]
    pub fn from_graph(graph: &WorkflowGraph) -> Self {
        Self {
            nodes: graph.nodes().map(NodePayload::from).collect(),
            connections: graph.connections().map(ConnectionPayload::from).collect(),
        }
    }
}

/// A persisted node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub storage_id: NodeStorageId,
    pub workflow_id: WorkflowId,
    #[serde(flatten)]
    pub payload: NodePayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub storage_id: ConnectionStorageId,
    pub workflow_id: WorkflowId,
    #[serde(flatten)]
    pub payload: ConnectionPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The authoritative state of one workflow's canvas.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    pub nodes: Vec<NodeRecord>,
    pub connections: Vec<ConnectionRecord>,
}

impl CanvasSnapshot {
    /// Hydrates a clean graph from the snapshot, storage IDs included.
    #[must_use]
    pub fn into_graph(self) -> WorkflowGraph {
        WorkflowGraph::from_parts(GraphParts {
            nodes: self
                .nodes
                .into_iter()
                .map(|record| record.payload.into_node(Some(record.storage_id)))
                .collect(),
            connections: self
                .connections
                .into_iter()
                .map(|record| record.payload.into_connection(Some(record.storage_id)))
                .collect(),
        })
    }
}

/// Drops connections whose endpoints are not among `nodes`.
///
/// Each dropped connection is logged at `warn`.
#[must_use]
pub fn reconcile_connections(
    workflow_id: WorkflowId,
    nodes: &[NodePayload],
    connections: Vec<ConnectionPayload>,
) -> Vec<ConnectionPayload> {
    let known: HashSet<&GraphId> = nodes.iter().map(|node| &node.graph_id).collect();

    connections
        .into_iter()
        .filter(|conn| {
            let resolved =
                known.contains(&conn.source_graph_id) && known.contains(&conn.target_graph_id);
            if !resolved {
                warn!(
                    workflow_id = %workflow_id,
                    graph_id = %conn.graph_id,
                    source = %conn.source_graph_id,
                    target = %conn.target_graph_id,
                    "dropping connection with unresolved endpoint"
                );
            }
            resolved
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(id: &str) -> NodePayload {
        serde_json::from_value(json!({
            "graphId": id,
            "type": "action",
            "name": id,
        }))
        .expect("payload")
    }

    fn edge(id: &str, source: &str, target: &str) -> ConnectionPayload {
        serde_json::from_value(json!({
            "graphId": id,
            "sourceGraphId": source,
            "targetGraphId": target,
        }))
        .expect("payload")
    }

    #[test]
    fn reconcile_drops_unresolved_connections() {
        let nodes = vec![payload("a"), payload("b")];
        let connections = vec![edge("e1", "a", "b"), edge("e2", "a", "zzz")];

        let kept = reconcile_connections(WorkflowId::new(), &nodes, connections);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].graph_id, GraphId::new("e1"));
    }

    #[test]
    fn record_flattens_payload() {
        let now = Utc::now();
        let record = NodeRecord {
            storage_id: NodeStorageId::new(),
            workflow_id: WorkflowId::new(),
            payload: payload("a"),
            created_at: now,
            updated_at: now,
        };

        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["graphId"], json!("a"));
        assert_eq!(value["type"], json!("action"));
        assert!(value["storageId"].as_str().is_some_and(|s| s.starts_with("nrec_")));
    }

    #[test]
    fn snapshot_hydrates_graph_with_storage_ids() {
        let now = Utc::now();
        let workflow_id = WorkflowId::new();
        let a = NodeStorageId::new();
        let snapshot = CanvasSnapshot {
            nodes: vec![
                NodeRecord {
                    storage_id: a,
                    workflow_id,
                    payload: payload("a"),
                    created_at: now,
                    updated_at: now,
                },
                NodeRecord {
                    storage_id: NodeStorageId::new(),
                    workflow_id,
                    payload: payload("b"),
                    created_at: now,
                    updated_at: now,
                },
            ],
            connections: vec![ConnectionRecord {
                storage_id: ConnectionStorageId::new(),
                workflow_id,
                payload: edge("e1", "a", "b"),
                created_at: now,
                updated_at: now,
            }],
        };

        let graph = snapshot.into_graph();

        assert_eq!(graph.node(&GraphId::new("a")).and_then(|n| n.storage_id), Some(a));
        assert_eq!(graph.connection_count(), 1);
        assert!(!graph.is_dirty());
    }

    #[test]
    fn request_from_graph_uses_graph_ids() {
        let snapshot_graph = WorkflowGraph::from_parts(GraphParts {
            nodes: vec![payload("a").into_node(None), payload("b").into_node(None)],
            connections: vec![edge("e1", "a", "b").into_connection(None)],
        });

        let request = SyncRequest::from_graph(&snapshot_graph);

        assert_eq!(request.nodes.len(), 2);
        assert_eq!(request.connections[0].source_graph_id, GraphId::new("a"));
    }
}
