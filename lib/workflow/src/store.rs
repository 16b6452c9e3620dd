//! Canvas persistence.
//!
//! Records are keyed by `(workflow_id, graph_id)`. A sync replaces a
//! workflow's whole node and connection collections while keeping the
//! storage ID of every record that survives.

use crate::error::StoreError;
use crate::node::GraphId;
use crate::sync::{
    CanvasSnapshot, ConnectionRecord, NodePayload, NodeRecord, SyncRequest,
    reconcile_connections,
};
use async_trait::async_trait;
use chrono::Utc;
use opsflow_core::{ConnectionStorageId, NodeStorageId, Result, WorkflowId};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Storage backend for workflow canvases.
#[async_trait]
pub trait CanvasStore: Send + Sync {
    /// Loads the authoritative snapshot. Unknown workflows load as empty.
    async fn load(&self, workflow_id: WorkflowId) -> Result<CanvasSnapshot, StoreError>;

    /// Replaces the workflow's canvas with the request and returns the result.
    ///
    /// Nodes are upserted by graph ID and nodes absent from the request are
    /// deleted. Connections with an endpoint outside the request's nodes are
    /// dropped before the same upsert/delete pass runs on connections.
    /// Syncing the same request twice yields the same storage IDs.
    async fn sync(
        &self,
        workflow_id: WorkflowId,
        request: SyncRequest,
    ) -> Result<CanvasSnapshot, StoreError>;

    /// Upserts one node without touching any other record.
    async fn upsert_node(
        &self,
        workflow_id: WorkflowId,
        node: NodePayload,
    ) -> Result<NodeRecord, StoreError>;
}

/// A process-local canvas store.
#[derive(Debug, Default)]
pub struct InMemoryCanvasStore {
    canvases: Mutex<HashMap<WorkflowId, CanvasSnapshot>>,
}

impl InMemoryCanvasStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CanvasStore for InMemoryCanvasStore {
    async fn load(&self, workflow_id: WorkflowId) -> Result<CanvasSnapshot, StoreError> {
        let canvases = self.canvases.lock().await;
        Ok(canvases.get(&workflow_id).cloned().unwrap_or_default())
    }

    async fn sync(
        &self,
        workflow_id: WorkflowId,
        request: SyncRequest,
    ) -> Result<CanvasSnapshot, StoreError> {
        let now = Utc::now();
        let mut canvases = self.canvases.lock().await;
        let previous = canvases.remove(&workflow_id).unwrap_or_default();

        let mut old_nodes: HashMap<GraphId, NodeRecord> = previous
            .nodes
            .into_iter()
            .map(|record| (record.payload.graph_id.clone(), record))
            .collect();
        let mut old_connections: HashMap<GraphId, ConnectionRecord> = previous
            .connections
            .into_iter()
            .map(|record| (record.payload.graph_id.clone(), record))
            .collect();

        let connections = reconcile_connections(workflow_id, &request.nodes, request.connections);

        let mut nodes: Vec<NodeRecord> = Vec::with_capacity(request.nodes.len());
        let mut node_slots: HashMap<GraphId, usize> = HashMap::new();
        for payload in request.nodes {
            let (storage_id, created_at) = match old_nodes.remove(&payload.graph_id) {
                Some(old) => (old.storage_id, old.created_at),
                None => match node_slots.get(&payload.graph_id) {
                    Some(&slot) => (nodes[slot].storage_id, nodes[slot].created_at),
                    None => (NodeStorageId::new(), now),
                },
            };
            let record = NodeRecord {
                storage_id,
                workflow_id,
                payload,
                created_at,
                updated_at: now,
            };
            match node_slots.get(&record.payload.graph_id) {
                Some(&slot) => nodes[slot] = record,
                None => {
                    node_slots.insert(record.payload.graph_id.clone(), nodes.len());
                    nodes.push(record);
                }
            }
        }

        let mut kept_connections: Vec<ConnectionRecord> = Vec::with_capacity(connections.len());
        let mut connection_slots: HashMap<GraphId, usize> = HashMap::new();
        for payload in connections {
            let (storage_id, created_at) = match old_connections.remove(&payload.graph_id) {
                Some(old) => (old.storage_id, old.created_at),
                None => match connection_slots.get(&payload.graph_id) {
                    Some(&slot) => (
                        kept_connections[slot].storage_id,
                        kept_connections[slot].created_at,
                    ),
                    None => (ConnectionStorageId::new(), now),
                },
            };
            let record = ConnectionRecord {
                storage_id,
                workflow_id,
                payload,
                created_at,
                updated_at: now,
            };
            match connection_slots.get(&record.payload.graph_id) {
                Some(&slot) => kept_connections[slot] = record,
                None => {
                    connection_slots.insert(record.payload.graph_id.clone(), kept_connections.len());
                    kept_connections.push(record);
                }
            }
        }

        debug!(
            workflow_id = %workflow_id,
            nodes = nodes.len(),
            connections = kept_connections.len(),
            deleted_nodes = old_nodes.len(),
            deleted_connections = old_connections.len(),
            "canvas synced"
        );

        let snapshot = CanvasSnapshot {
            nodes,
            connections: kept_connections,
        };
        canvases.insert(workflow_id, snapshot.clone());
        Ok(snapshot)
    }

    async fn upsert_node(
        &self,
        workflow_id: WorkflowId,
        node: NodePayload,
    ) -> Result<NodeRecord, StoreError> {
        let now = Utc::now();
        let mut canvases = self.canvases.lock().await;
        let canvas = canvases.entry(workflow_id).or_default();

        if let Some(existing) = canvas
            .nodes
            .iter_mut()
            .find(|record| record.payload.graph_id == node.graph_id)
        {
            existing.payload = node;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let record = NodeRecord {
            storage_id: NodeStorageId::new(),
            workflow_id,
            payload: node,
            created_at: now,
            updated_at: now,
        };
        canvas.nodes.push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ConnectionPayload;
    use serde_json::json;

    fn node(id: &str) -> NodePayload {
        serde_json::from_value(json!({"graphId": id, "type": "action", "name": id}))
            .expect("node payload")
    }

    fn edge(id: &str, source: &str, target: &str) -> ConnectionPayload {
        serde_json::from_value(json!({
            "graphId": id,
            "sourceGraphId": source,
            "targetGraphId": target,
        }))
        .expect("connection payload")
    }

    fn request(nodes: &[&str], edges: &[(&str, &str, &str)]) -> SyncRequest {
        SyncRequest {
            nodes: nodes.iter().map(|id| node(id)).collect(),
            connections: edges.iter().map(|(id, s, t)| edge(id, s, t)).collect(),
        }
    }

    #[tokio::test]
    async fn sync_is_idempotent() {
        let store = InMemoryCanvasStore::new();
        let workflow_id = WorkflowId::new();
        let req = request(&["a", "b"], &[("e1", "a", "b")]);

        let first = store.sync(workflow_id, req.clone()).await.expect("sync");
        let second = store.sync(workflow_id, req).await.expect("sync");

        assert_eq!(first.nodes.len(), 2);
        assert_eq!(first.connections.len(), 1);
        let ids = |s: &CanvasSnapshot| s.nodes.iter().map(|n| n.storage_id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(
            first.connections[0].storage_id,
            second.connections[0].storage_id
        );
    }

    #[tokio::test]
    async fn sync_deletes_absent_records_and_drops_dangling_edges() {
        let store = InMemoryCanvasStore::new();
        let workflow_id = WorkflowId::new();
        store
            .sync(workflow_id, request(&["a", "b", "c"], &[("e1", "a", "b"), ("e2", "b", "c")]))
            .await
            .expect("sync");

        let snapshot = store
            .sync(workflow_id, request(&["a", "b"], &[("e1", "a", "b"), ("e2", "b", "c")]))
            .await
            .expect("sync");

        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.connections.len(), 1);
        assert_eq!(snapshot.connections[0].payload.graph_id, GraphId::new("e1"));
    }

    #[tokio::test]
    async fn upsert_node_keeps_other_records() {
        let store = InMemoryCanvasStore::new();
        let workflow_id = WorkflowId::new();
        let synced = store
            .sync(workflow_id, request(&["a"], &[]))
            .await
            .expect("sync");

        let mut renamed = node("a");
        renamed.name = "renamed".to_string();
        let updated = store.upsert_node(workflow_id, renamed).await.expect("upsert");
        let added = store.upsert_node(workflow_id, node("b")).await.expect("upsert");

        assert_eq!(updated.storage_id, synced.nodes[0].storage_id);
        assert_ne!(added.storage_id, updated.storage_id);

        let loaded = store.load(workflow_id).await.expect("load");
        assert_eq!(loaded.nodes.len(), 2);
        assert_eq!(loaded.nodes[0].payload.name, "renamed");
    }

    #[tokio::test]
    async fn workflows_are_isolated() {
        let store = InMemoryCanvasStore::new();
        let first = WorkflowId::new();
        store
            .sync(first, request(&["a"], &[]))
            .await
            .expect("sync");

        let other = store.load(WorkflowId::new()).await.expect("load");
        assert!(other.nodes.is_empty());
    }
}
