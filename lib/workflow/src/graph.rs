//! Workflow graph implementation using petgraph.
//!
//! Nodes and connections are addressed by their [`GraphId`]. petgraph
//! indices stay internal. A `StableDiGraph` keeps indices valid across
//! removals so the lookup maps never need rebuilding after a delete.
//!
//! Every mutation sets the dirty flag. Hydration through
//! [`WorkflowGraph::from_parts`] yields a clean graph.

use crate::config::NodeConfig;
use crate::edge::{ConnectionHandles, WorkflowConnection};
use crate::error::GraphError;
use crate::node::{GraphId, NodeDraft, NodePatch, Position, WorkflowNode};
use opsflow_core::NodeStorageId;
use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Flat form of a graph, used for serialization and hydration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphParts {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub connections: Vec<WorkflowConnection>,
}

/// A workflow graph keyed by graph ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "GraphParts", into = "GraphParts")]
pub struct WorkflowGraph {
    graph: StableDiGraph<WorkflowNode, WorkflowConnection>,
    node_index_map: HashMap<GraphId, NodeIndex>,
    edge_index_map: HashMap<GraphId, EdgeIndex>,
    dirty: bool,
}

impl WorkflowGraph {
    /// Creates a new empty, clean graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            node_index_map: HashMap::new(),
            edge_index_map: HashMap::new(),
            dirty: false,
        }
    }

    /// Builds a clean graph from stored nodes and connections.
    ///
    /// Graph IDs are kept as given. Nodes with a duplicate graph ID and
    /// connections whose endpoints do not resolve are dropped.
    #[must_use]
    pub fn from_parts(parts: GraphParts) -> Self {
        let mut graph = Self::new();

        for node in parts.nodes {
            if let Err(err) = graph.insert_node(node) {
                warn!(error = %err, "dropping node during hydration");
            }
        }

        for connection in parts.connections {
            let graph_id = connection.graph_id.clone();
            if let Err(err) = graph.insert_connection(connection) {
                warn!(graph_id = %graph_id, error = %err, "dropping connection during hydration");
            }
        }

        graph.dirty = false;
        graph
    }

    /// Returns the flat form of the graph.
    #[must_use]
    pub fn to_parts(&self) -> GraphParts {
        GraphParts {
            nodes: self.nodes().cloned().collect(),
            connections: self.connections().cloned().collect(),
        }
    }

    /// Adds a node built from a draft under a freshly generated graph ID.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the draft's configuration does not
    /// fit its type.
    pub fn add_node(
        &mut self,
        draft: NodeDraft,
        position: Position,
    ) -> Result<&WorkflowNode, GraphError> {
        let graph_id = GraphId::generate("node");
        let node = WorkflowNode::from_draft(graph_id.clone(), draft, position);
        check_config(&node)?;

        let index = self.graph.add_node(node);
        self.node_index_map.insert(graph_id, index);
        self.dirty = true;

        Ok(&self.graph[index])
    }

    /// Inserts a node under its existing graph ID.
    ///
    /// The configuration is not checked, so stored graphs load losslessly.
    /// Use [`validate`](Self::validate) to check them.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateGraphId` if a node with the same graph ID exists.
    pub fn insert_node(&mut self, node: WorkflowNode) -> Result<(), GraphError> {
        if self.node_index_map.contains_key(&node.graph_id) {
            return Err(GraphError::DuplicateGraphId {
                graph_id: node.graph_id,
            });
        }

        let graph_id = node.graph_id.clone();
        let index = self.graph.add_node(node);
        self.node_index_map.insert(graph_id, index);
        self.dirty = true;
        Ok(())
    }

    /// Applies a partial update to a node.
    ///
    /// The patched node is checked before it replaces the original, so a
    /// rejected patch leaves the graph unchanged.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` or `InvalidConfiguration`.
    pub fn update_node(
        &mut self,
        graph_id: &GraphId,
        patch: NodePatch,
    ) -> Result<&WorkflowNode, GraphError> {
        let index = self.node_index(graph_id)?;

        let mut updated = self.graph[index].clone();
        patch.apply_to(&mut updated);
        check_config(&updated)?;

        self.graph[index] = updated;
        self.dirty = true;
        Ok(&self.graph[index])
    }

    /// Removes a node and every connection touching it.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if no such node exists.
    pub fn delete_node(&mut self, graph_id: &GraphId) -> Result<WorkflowNode, GraphError> {
        let index = self.node_index(graph_id)?;

        let touching: Vec<GraphId> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .chain(self.graph.edges_directed(index, Direction::Incoming))
            .map(|edge| edge.weight().graph_id.clone())
            .collect();
        for edge_id in &touching {
            self.edge_index_map.remove(edge_id);
        }

        self.node_index_map.remove(graph_id);
        let node = self
            .graph
            .remove_node(index)
            .ok_or_else(|| GraphError::NodeNotFound {
                graph_id: graph_id.clone(),
            })?;
        self.dirty = true;
        Ok(node)
    }

    /// Connects two existing nodes with a new connection.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if either endpoint is missing.
    pub fn connect(
        &mut self,
        source: &GraphId,
        target: &GraphId,
        handles: ConnectionHandles,
    ) -> Result<&WorkflowConnection, GraphError> {
        let connection =
            WorkflowConnection::new(source.clone(), target.clone()).with_handles(handles);
        let graph_id = connection.graph_id.clone();
        self.insert_connection(connection)?;
        self.connection(&graph_id)
            .ok_or(GraphError::ConnectionNotFound { graph_id })
    }

    /// Inserts a connection under its existing graph ID.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if either endpoint is missing, or
    /// `DuplicateGraphId` if the connection's graph ID is taken.
    pub fn insert_connection(&mut self, connection: WorkflowConnection) -> Result<(), GraphError> {
        if self.edge_index_map.contains_key(&connection.graph_id) {
            return Err(GraphError::DuplicateGraphId {
                graph_id: connection.graph_id,
            });
        }
        let source = self.node_index(&connection.source_graph_id)?;
        let target = self.node_index(&connection.target_graph_id)?;

        let graph_id = connection.graph_id.clone();
        let index = self.graph.add_edge(source, target, connection);
        self.edge_index_map.insert(graph_id, index);
        self.dirty = true;
        Ok(())
    }

    /// Removes a connection.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionNotFound` if no such connection exists.
    pub fn disconnect(&mut self, graph_id: &GraphId) -> Result<WorkflowConnection, GraphError> {
        let not_found = || GraphError::ConnectionNotFound {
            graph_id: graph_id.clone(),
        };
        let index = self.edge_index_map.remove(graph_id).ok_or_else(not_found)?;
        let connection = self.graph.remove_edge(index).ok_or_else(not_found)?;
        self.dirty = true;
        Ok(connection)
    }

    /// Records the storage ID assigned to a node. Does not mark the graph dirty.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if no such node exists.
    pub fn set_node_storage_id(
        &mut self,
        graph_id: &GraphId,
        storage_id: NodeStorageId,
    ) -> Result<(), GraphError> {
        let index = self.node_index(graph_id)?;
        self.graph[index].storage_id = Some(storage_id);
        Ok(())
    }

    /// Returns a node by graph ID.
    #[must_use]
    pub fn node(&self, graph_id: &GraphId) -> Option<&WorkflowNode> {
        let index = self.node_index_map.get(graph_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns a connection by graph ID.
    #[must_use]
    pub fn connection(&self, graph_id: &GraphId) -> Option<&WorkflowConnection> {
        let index = self.edge_index_map.get(graph_id)?;
        self.graph.edge_weight(*index)
    }

    /// Returns all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.graph.node_weights()
    }

    /// Returns all connections.
    pub fn connections(&self) -> impl Iterator<Item = &WorkflowConnection> {
        self.graph.edge_weights()
    }

    /// Returns connections leaving the given node.
    pub fn outgoing(&self, graph_id: &GraphId) -> Vec<&WorkflowConnection> {
        let Some(&index) = self.node_index_map.get(graph_id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| edge.weight())
            .collect()
    }

    /// Returns nodes with no incoming connections.
    pub fn entry_nodes(&self) -> Vec<&WorkflowNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Re-checks every node's configuration against its type.
    ///
    /// # Errors
    ///
    /// Returns the first `InvalidConfiguration` found.
    pub fn validate(&self) -> Result<(), GraphError> {
        self.nodes().try_for_each(check_config)
    }

    /// Whether the graph has changed since it was loaded or last synced.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn node_index(&self, graph_id: &GraphId) -> Result<NodeIndex, GraphError> {
        self.node_index_map
            .get(graph_id)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound {
                graph_id: graph_id.clone(),
            })
    }
}

fn check_config(node: &WorkflowNode) -> Result<(), GraphError> {
    NodeConfig::parse(node.node_type, &node.configuration)
        .map(|_| ())
        .map_err(|reason| GraphError::InvalidConfiguration {
            graph_id: node.graph_id.clone(),
            reason,
        })
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl From<GraphParts> for WorkflowGraph {
    fn from(parts: GraphParts) -> Self {
        Self::from_parts(parts)
    }
}

impl From<WorkflowGraph> for GraphParts {
    fn from(graph: WorkflowGraph) -> Self {
        graph.to_parts()
    }
}
