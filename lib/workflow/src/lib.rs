//! Workflow graph model and canvas synchronization for opsflow.
//!
//! - **Graph Model**: nodes and connections addressed by author-assigned
//!   graph IDs, held in a petgraph graph
//! - **Node Configuration**: typed per-node-type configuration with opaque
//!   passthrough of unknown keys
//! - **Canvas Sync**: full-graph sync against a [`CanvasStore`], plus
//!   single-node upserts when a storage ID is needed

pub mod canvas;
pub mod config;
pub mod edge;
pub mod error;
pub mod graph;
pub mod node;
pub mod store;
pub mod sync;

pub use canvas::{Canvas, Notification, NotificationKind, SyncMode, SyncNotifier, spawn_autosave};
pub use config::{ConfigMap, Frequency, NodeConfig, ScheduleConfig};
pub use edge::{ConnectionHandles, WorkflowConnection};
pub use error::{CanvasError, GraphError, StoreError};
pub use graph::{GraphParts, WorkflowGraph};
pub use node::{GraphId, NodeCategory, NodeDraft, NodePatch, NodeType, Position, WorkflowNode};
pub use store::{CanvasStore, InMemoryCanvasStore};
pub use sync::{
    CanvasSnapshot, ConnectionPayload, ConnectionRecord, NodePayload, NodeRecord, SyncRequest,
};
