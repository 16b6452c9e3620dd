//! Client-side canvas.
//!
//! A [`Canvas`] owns one workflow's graph while it is being edited. Edits
//! stay local until [`Canvas::sync`] sends the whole graph to the store and
//! swaps in the authoritative snapshot it returns.

use crate::edge::ConnectionHandles;
use crate::error::CanvasError;
use crate::graph::WorkflowGraph;
use crate::node::{GraphId, NodeDraft, NodePatch, Position};
use crate::store::CanvasStore;
use crate::sync::{NodePayload, SyncRequest};
use opsflow_core::{NodeStorageId, Result, WorkflowId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Who asked for a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// The author pressed save. Success and failure are both surfaced.
    Manual,
    /// Background autosave. Only failures are logged, nothing is surfaced.
    Auto,
}

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
}

/// A message for the author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

/// Surfaces sync outcomes to the author.
pub trait SyncNotifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// A notifier that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl SyncNotifier for SilentNotifier {
    fn notify(&self, _notification: Notification) {}
}

/// An editing session over one workflow's graph.
pub struct Canvas {
    workflow_id: WorkflowId,
    graph: WorkflowGraph,
    store: Arc<dyn CanvasStore>,
    notifier: Arc<dyn SyncNotifier>,
}

impl Canvas {
    /// Creates a canvas over an empty graph.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        store: Arc<dyn CanvasStore>,
        notifier: Arc<dyn SyncNotifier>,
    ) -> Self {
        Self {
            workflow_id,
            graph: WorkflowGraph::new(),
            store,
            notifier,
        }
    }

    /// Creates a canvas hydrated from the store.
    ///
    /// # Errors
    ///
    /// Returns `LoadFailed` if the store cannot be read.
    pub async fn open(
        workflow_id: WorkflowId,
        store: Arc<dyn CanvasStore>,
        notifier: Arc<dyn SyncNotifier>,
    ) -> Result<Self, CanvasError> {
        let mut canvas = Self::new(workflow_id, store, notifier);
        canvas.refresh().await?;
        Ok(canvas)
    }

    #[must_use]
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    #[must_use]
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Whether there are edits the store has not seen.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.graph.is_dirty()
    }

    /// Adds a node and returns its new graph ID.
    ///
    /// # Errors
    ///
    /// Returns `Graph` if the configuration is invalid.
    pub fn add_node(
        &mut self,
        draft: NodeDraft,
        position: Position,
    ) -> Result<GraphId, CanvasError> {
        let node = self.graph.add_node(draft, position).map_err(CanvasError::from)?;
        Ok(node.graph_id.clone())
    }

    /// Applies a partial update to a node.
    ///
    /// # Errors
    ///
    /// Returns `Graph` if the node is missing or the result is invalid.
    pub fn update_node(&mut self, graph_id: &GraphId, patch: NodePatch) -> Result<(), CanvasError> {
        self.graph
            .update_node(graph_id, patch)
            .map_err(CanvasError::from)?;
        Ok(())
    }

    /// Deletes a node and its connections.
    ///
    /// # Errors
    ///
    /// Returns `Graph` if the node is missing.
    pub fn delete_node(&mut self, graph_id: &GraphId) -> Result<(), CanvasError> {
        self.graph.delete_node(graph_id).map_err(CanvasError::from)?;
        Ok(())
    }

    /// Connects two nodes and returns the new connection's graph ID.
    ///
    /// # Errors
    ///
    /// Returns `Graph` if either endpoint is missing.
    pub fn connect(
        &mut self,
        source: &GraphId,
        target: &GraphId,
        handles: ConnectionHandles,
    ) -> Result<GraphId, CanvasError> {
        let connection = self
            .graph
            .connect(source, target, handles)
            .map_err(CanvasError::from)?;
        Ok(connection.graph_id.clone())
    }

    /// Removes a connection.
    ///
    /// # Errors
    ///
    /// Returns `Graph` if the connection is missing.
    pub fn disconnect(&mut self, graph_id: &GraphId) -> Result<(), CanvasError> {
        self.graph.disconnect(graph_id).map_err(CanvasError::from)?;
        Ok(())
    }

    /// Sends the full graph to the store and adopts the returned snapshot.
    ///
    /// On failure the local graph is kept as is and stays dirty.
    ///
    /// # Errors
    ///
    /// Returns `SyncFailed` if the store rejects the sync.
    pub async fn sync(&mut self, mode: SyncMode) -> Result<(), CanvasError> {
        let request = SyncRequest::from_graph(&self.graph);
        let node_count = request.nodes.len();

        match self.store.sync(self.workflow_id, request).await {
            Ok(snapshot) => {
                self.graph = snapshot.into_graph();
                info!(
                    workflow_id = %self.workflow_id,
                    nodes = node_count,
                    mode = ?mode,
                    "canvas synced"
                );
                if mode == SyncMode::Manual {
                    self.notifier.notify(Notification {
                        kind: NotificationKind::Success,
                        title: "Workflow saved".to_string(),
                        message: "All changes have been saved.".to_string(),
                    });
                }
                Ok(())
            }
            Err(err) => {
                error!(
                    workflow_id = %self.workflow_id,
                    mode = ?mode,
                    error = %err,
                    "canvas sync failed"
                );
                if mode == SyncMode::Manual {
                    self.notifier.notify(Notification {
                        kind: NotificationKind::Error,
                        title: "Save failed".to_string(),
                        message: "Your changes could not be saved. Please try again."
                            .to_string(),
                    });
                }
                Err(CanvasError::SyncFailed {
                    workflow_id: self.workflow_id,
                    details: err.to_string(),
                }
                .into())
            }
        }
    }

    /// Persists one node so it has a storage ID, and records that ID locally.
    ///
    /// Used before operations that address a single stored record. The dirty
    /// flag is left alone.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotInGraph` if the node is not on the canvas, or
    /// `PersistNodeFailed` if the store rejects the upsert.
    pub async fn ensure_node_exists(
        &mut self,
        graph_id: &GraphId,
    ) -> Result<NodeStorageId, CanvasError> {
        let node = self
            .graph
            .node(graph_id)
            .ok_or_else(|| CanvasError::NodeNotInGraph {
                graph_id: graph_id.clone(),
            })?;
        let payload = NodePayload::from(node);

        let record = self
            .store
            .upsert_node(self.workflow_id, payload)
            .await
            .map_err(|err| {
                error!(
                    workflow_id = %self.workflow_id,
                    graph_id = %graph_id,
                    error = %err,
                    "failed to persist node"
                );
                CanvasError::PersistNodeFailed {
                    graph_id: graph_id.clone(),
                    details: err.to_string(),
                }
            })?;

        self.graph
            .set_node_storage_id(graph_id, record.storage_id)
            .map_err(CanvasError::from)?;
        debug!(graph_id = %graph_id, storage_id = %record.storage_id, "node persisted");
        Ok(record.storage_id)
    }

    /// Replaces the local graph with the store's snapshot, discarding edits.
    ///
    /// # Errors
    ///
    /// Returns `LoadFailed` if the store cannot be read.
    pub async fn refresh(&mut self) -> Result<(), CanvasError> {
        let snapshot = self.store.load(self.workflow_id).await.map_err(|err| {
            error!(workflow_id = %self.workflow_id, error = %err, "canvas load failed");
            CanvasError::LoadFailed {
                workflow_id: self.workflow_id,
                details: err.to_string(),
            }
        })?;
        self.graph = snapshot.into_graph();
        Ok(())
    }
}

/// Spawns a task that syncs the canvas every `period` while it is dirty.
///
/// The task exits when `cancel` fires. Failed autosaves are logged by
/// [`Canvas::sync`] and retried on the next tick.
pub fn spawn_autosave(
    canvas: Arc<Mutex<Canvas>>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let mut canvas = canvas.lock().await;
                    if canvas.is_dirty() {
                        if let Err(err) = canvas.sync(SyncMode::Auto).await {
                            debug!(error = %err, "autosave failed, retrying next tick");
                        }
                    }
                }
            }
        }
        debug!("autosave stopped");
    })
}
