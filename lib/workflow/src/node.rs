//! Workflow node types.
//!
//! A node carries two identities:
//! - a [`GraphId`], minted by the editing session the first time the node is
//!   created and used by every connection that references it;
//! - an optional [`NodeStorageId`], assigned by the store on first write.
//!
//! The graph ID is the business key. The storage ID is only resolved for
//! single-record operations.

use crate::config::{ConfigMap, NodeConfig};
use opsflow_core::NodeStorageId;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Author-assigned identifier of a node or connection within one graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(String);

impl GraphId {
    /// Wraps an identifier supplied by the editing surface.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh identifier with the given prefix (e.g. `node`, `edge`).
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}_{}", Ulid::new().to_string().to_lowercase()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GraphId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for GraphId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The closed set of node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Trigger,
    Action,
    Delay,
    Loop,
    Query,
    Filter,
    Schedule,
}

impl NodeType {
    /// Returns the visual category used by the editing surface.
    #[must_use]
    pub fn category(self) -> NodeCategory {
        match self {
            Self::Trigger | Self::Schedule => NodeCategory::Trigger,
            Self::Action => NodeCategory::Action,
            Self::Delay | Self::Loop | Self::Filter => NodeCategory::ControlFlow,
            Self::Query => NodeCategory::Data,
        }
    }

    /// Returns the wire name of this type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::Delay => "delay",
            Self::Loop => "loop",
            Self::Query => "query",
            Self::Filter => "filter",
            Self::Schedule => "schedule",
        }
    }

    /// Parses a wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trigger" => Some(Self::Trigger),
            "action" => Some(Self::Action),
            "delay" => Some(Self::Delay),
            "loop" => Some(Self::Loop),
            "query" => Some(Self::Query),
            "filter" => Some(Self::Filter),
            "schedule" => Some(Self::Schedule),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visual grouping of node types on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Entry points (Trigger, Schedule).
    Trigger,
    /// Side-effecting steps.
    Action,
    /// Delay, Loop and Filter.
    ControlFlow,
    /// Reads from business data.
    Data,
}

/// Canvas coordinate. Presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Default retry limit for a node.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// One step in an automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    /// Storage-assigned identity, absent until the node has been persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<NodeStorageId>,
    /// Author-assigned identity, unique within the graph.
    pub graph_id: GraphId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub position: Position,
    /// Type-discriminated configuration; see [`NodeConfig`].
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
    /// Execution timeout in milliseconds.
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub conditions: ConfigMap,
}

fn default_retry_limit() -> u32 {
    DEFAULT_RETRY_LIMIT
}

impl WorkflowNode {
    /// Builds an unsaved node from a draft under the given graph ID.
    #[must_use]
    pub fn from_draft(graph_id: GraphId, draft: NodeDraft, position: Position) -> Self {
        Self {
            storage_id: None,
            graph_id,
            node_type: draft.node_type,
            name: draft.name,
            description: draft.description,
            position,
            configuration: draft.configuration,
            template: draft.template,
            execution_order: draft.execution_order,
            is_optional: draft.is_optional,
            retry_limit: draft.retry_limit,
            timeout_ms: draft.timeout_ms,
            conditions: draft.conditions,
        }
    }

    /// Returns the visual category derived from the node's type.
    #[must_use]
    pub fn category(&self) -> NodeCategory {
        self.node_type.category()
    }

    /// Interprets the configuration for the node's type.
    ///
    /// # Errors
    ///
    /// Returns the reason the configuration is not valid for this type.
    pub fn typed_config(&self) -> Result<NodeConfig, String> {
        NodeConfig::parse(self.node_type, &self.configuration)
    }

    /// Whether the node has been written to storage at least once.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.storage_id.is_some()
    }
}

/// Everything needed to add a node except its identity and position.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDraft {
    pub node_type: NodeType,
    pub name: String,
    pub description: Option<String>,
    pub configuration: ConfigMap,
    pub template: Option<String>,
    pub execution_order: Option<i32>,
    pub is_optional: bool,
    pub retry_limit: u32,
    pub timeout_ms: Option<u64>,
    pub conditions: ConfigMap,
}

impl NodeDraft {
    /// Creates a draft with default settings and an empty configuration.
    #[must_use]
    pub fn new(node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            node_type,
            name: name.into(),
            description: None,
            configuration: ConfigMap::new(),
            template: None,
            execution_order: None,
            is_optional: false,
            retry_limit: DEFAULT_RETRY_LIMIT,
            timeout_ms: None,
            conditions: ConfigMap::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_configuration(mut self, configuration: ConfigMap) -> Self {
        self.configuration = configuration;
        self
    }

    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    #[must_use]
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }
}

/// A partial update to a node. Unset fields are left untouched.
///
/// `configuration` merges key by key; a JSON `null` removes the key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePatch {
    pub node_type: Option<NodeType>,
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub position: Option<Position>,
    pub configuration: Option<ConfigMap>,
    pub template: Option<Option<String>>,
    pub execution_order: Option<Option<i32>>,
    pub is_optional: Option<bool>,
    pub retry_limit: Option<u32>,
    pub timeout_ms: Option<Option<u64>>,
    pub conditions: Option<ConfigMap>,
}

impl NodePatch {
    /// Applies the patch to a node in place.
    pub fn apply_to(self, node: &mut WorkflowNode) {
        if let Some(node_type) = self.node_type {
            node.node_type = node_type;
        }
        if let Some(name) = self.name {
            node.name = name;
        }
        if let Some(description) = self.description {
            node.description = description;
        }
        if let Some(position) = self.position {
            node.position = position;
        }
        if let Some(configuration) = self.configuration {
            for (key, value) in configuration {
                if value.is_null() {
                    node.configuration.remove(&key);
                } else {
                    node.configuration.insert(key, value);
                }
            }
        }
        if let Some(template) = self.template {
            node.template = template;
        }
        if let Some(execution_order) = self.execution_order {
            node.execution_order = execution_order;
        }
        if let Some(is_optional) = self.is_optional {
            node.is_optional = is_optional;
        }
        if let Some(retry_limit) = self.retry_limit {
            node.retry_limit = retry_limit;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            node.timeout_ms = timeout_ms;
        }
        if let Some(conditions) = self.conditions {
            node.conditions = conditions;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_graph_ids_are_prefixed_and_unique() {
        let a = GraphId::generate("node");
        let b = GraphId::generate("node");
        assert!(a.as_str().starts_with("node_"));
        assert_ne!(a, b);
    }

    #[test]
    fn category_follows_type() {
        assert_eq!(NodeType::Schedule.category(), NodeCategory::Trigger);
        assert_eq!(NodeType::Loop.category(), NodeCategory::ControlFlow);
        assert_eq!(NodeType::Query.category(), NodeCategory::Data);
        assert_eq!(NodeType::Action.category(), NodeCategory::Action);
    }

    #[test]
    fn node_type_wire_names_round_trip() {
        for node_type in [
            NodeType::Trigger,
            NodeType::Action,
            NodeType::Delay,
            NodeType::Loop,
            NodeType::Query,
            NodeType::Filter,
            NodeType::Schedule,
        ] {
            assert_eq!(NodeType::parse(node_type.as_str()), Some(node_type));
        }
        assert_eq!(NodeType::parse("webhook"), None);
    }

    #[test]
    fn deserializes_with_defaults() {
        let node: WorkflowNode = serde_json::from_value(json!({
            "graphId": "node_a",
            "type": "delay",
            "name": "Wait"
        }))
        .expect("deserialize");

        assert_eq!(node.retry_limit, DEFAULT_RETRY_LIMIT);
        assert!(!node.is_optional);
        assert!(node.storage_id.is_none());
        assert!(node.conditions.is_empty());
    }

    #[test]
    fn patch_merges_configuration() {
        let mut node = WorkflowNode::from_draft(
            GraphId::new("node_a"),
            NodeDraft::new(NodeType::Delay, "Wait").with_configuration(
                json!({"delayMs": 100, "resultKey": "wait"})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            ),
            Position::default(),
        );

        let patch = NodePatch {
            name: Some("Wait longer".to_string()),
            configuration: json!({"delayMs": 500, "resultKey": null})
                .as_object()
                .cloned(),
            ..Default::default()
        };
        patch.apply_to(&mut node);

        assert_eq!(node.name, "Wait longer");
        assert_eq!(node.configuration.get("delayMs"), Some(&json!(500)));
        assert!(!node.configuration.contains_key("resultKey"));
    }
}
