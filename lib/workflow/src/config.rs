//! Per-type node configuration.
//!
//! On the wire a node's configuration is a plain JSON object whose legal
//! keys depend on the node type. The typed structs here describe the keys
//! each type understands; every struct also captures unrecognised keys in
//! `extra` so graphs authored by newer editors survive a round trip through
//! older code untouched.

use crate::node::NodeType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Raw configuration object as exchanged with the editing surface.
pub type ConfigMap = serde_json::Map<String, JsonValue>;

/// Configuration shared by Trigger and Action nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    /// Keys this version does not interpret.
    #[serde(flatten)]
    pub extra: ConfigMap,
}

/// Configuration for Delay nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayConfig {
    /// How long to wait before continuing, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    #[serde(flatten)]
    pub extra: ConfigMap,
}

/// Configuration for Loop nodes.
///
/// A loop has two output handles: the item path, taken once per element,
/// and the empty path (named by `empty_path_handle`) taken when the source
/// yields nothing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_path_handle: Option<String>,
    #[serde(flatten)]
    pub extra: ConfigMap,
}

impl LoopConfig {
    /// Handle used for the per-item path.
    pub const ITEM_HANDLE: &'static str = "item";
    /// Handle used for the empty path when none is configured.
    pub const DEFAULT_EMPTY_HANDLE: &'static str = "empty";

    /// Returns the handle taken when the loop source is empty.
    #[must_use]
    pub fn empty_handle(&self) -> &str {
        self.empty_path_handle
            .as_deref()
            .unwrap_or(Self::DEFAULT_EMPTY_HANDLE)
    }
}

/// A single field comparison used by Query and Filter nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldCondition {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: JsonValue,
}

/// Sort direction for Query ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One ordering clause of a Query node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Configuration for Query nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfig {
    /// Business model to query (e.g. "invoice", "task").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FieldCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_key: Option<String>,
    #[serde(flatten)]
    pub extra: ConfigMap,
}

/// How Filter conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// Configuration for Filter nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<FieldCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_key: Option<String>,
    #[serde(flatten)]
    pub extra: ConfigMap,
}

/// Author-facing repetition hint on a Schedule node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Custom,
}

/// Configuration for Schedule nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    /// Five-field cron expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    /// IANA timezone name; UTC when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: ConfigMap,
    #[serde(flatten)]
    pub extra: ConfigMap,
}

impl ScheduleConfig {
    /// Whether the node asks for a live schedule (active unless switched off).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active.unwrap_or(true)
    }
}

/// Configuration for a node, discriminated by the node's type.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    Trigger(GenericConfig),
    Action(GenericConfig),
    Delay(DelayConfig),
    Loop(LoopConfig),
    Query(QueryConfig),
    Filter(FilterConfig),
    Schedule(ScheduleConfig),
}

impl NodeConfig {
    /// Interprets a raw configuration object for the given node type.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when a known key has the wrong shape
    /// or a type-specific rule is violated. Unknown keys never fail.
    pub fn parse(node_type: NodeType, map: &ConfigMap) -> Result<Self, String> {
        let value = JsonValue::Object(map.clone());
        let config = match node_type {
            NodeType::Trigger => Self::Trigger(from_value(value)?),
            NodeType::Action => Self::Action(from_value(value)?),
            NodeType::Delay => Self::Delay(from_value(value)?),
            NodeType::Loop => Self::Loop(from_value(value)?),
            NodeType::Query => Self::Query(from_value(value)?),
            NodeType::Filter => Self::Filter(from_value(value)?),
            NodeType::Schedule => Self::Schedule(from_value(value)?),
        };
        config.check_rules()?;
        Ok(config)
    }

    /// Returns the node type this configuration belongs to.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Trigger(_) => NodeType::Trigger,
            Self::Action(_) => NodeType::Action,
            Self::Delay(_) => NodeType::Delay,
            Self::Loop(_) => NodeType::Loop,
            Self::Query(_) => NodeType::Query,
            Self::Filter(_) => NodeType::Filter,
            Self::Schedule(_) => NodeType::Schedule,
        }
    }

    /// Returns the key under which the node publishes its result, if any.
    #[must_use]
    pub fn result_key(&self) -> Option<&str> {
        match self {
            Self::Trigger(c) | Self::Action(c) => c.result_key.as_deref(),
            Self::Delay(c) => c.result_key.as_deref(),
            Self::Loop(c) => c.result_key.as_deref(),
            Self::Query(c) => c.result_key.as_deref(),
            Self::Filter(c) => c.result_key.as_deref(),
            Self::Schedule(c) => c.result_key.as_deref(),
        }
    }

    /// Serializes the configuration back to a raw object, unknown keys included.
    #[must_use]
    pub fn to_map(&self) -> ConfigMap {
        let value = match self {
            Self::Trigger(c) | Self::Action(c) => serde_json::to_value(c),
            Self::Delay(c) => serde_json::to_value(c),
            Self::Loop(c) => serde_json::to_value(c),
            Self::Query(c) => serde_json::to_value(c),
            Self::Filter(c) => serde_json::to_value(c),
            Self::Schedule(c) => serde_json::to_value(c),
        };
        match value {
            Ok(JsonValue::Object(map)) => map,
            _ => ConfigMap::new(),
        }
    }

    fn check_rules(&self) -> Result<(), String> {
        match self {
            Self::Loop(c) if c.max_iterations == Some(0) => {
                Err("maxIterations must be at least 1".to_string())
            }
            Self::Query(c) if c.model.as_deref().is_some_and(str::is_empty) => {
                Err("model must not be empty".to_string())
            }
            Self::Schedule(c) => match (c.start_at, c.end_at) {
                (Some(start), Some(end)) if end < start => {
                    Err("endAt must not be before startAt".to_string())
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: JsonValue) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: JsonValue) -> ConfigMap {
        match value {
            JsonValue::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn delay_config_parses_known_keys() {
        let config = NodeConfig::parse(
            NodeType::Delay,
            &map(json!({"delayMs": 1500, "resultKey": "waited"})),
        )
        .expect("valid delay");

        match config {
            NodeConfig::Delay(delay) => {
                assert_eq!(delay.delay_ms, Some(1500));
                assert_eq!(delay.result_key.as_deref(), Some("waited"));
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn unknown_keys_pass_through() {
        let raw = map(json!({"resultKey": "out", "futureFlag": {"nested": true}}));
        let config = NodeConfig::parse(NodeType::Action, &raw).expect("valid action");

        let back = config.to_map();
        assert_eq!(back.get("futureFlag"), Some(&json!({"nested": true})));
        assert_eq!(back.get("resultKey"), Some(&json!("out")));
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let err = NodeConfig::parse(NodeType::Delay, &map(json!({"delayMs": "soon"})))
            .expect_err("string delay is invalid");
        assert!(err.contains("invalid type"));
    }

    #[test]
    fn loop_requires_positive_iterations() {
        let err = NodeConfig::parse(NodeType::Loop, &map(json!({"maxIterations": 0})))
            .expect_err("zero iterations");
        assert!(err.contains("maxIterations"));
    }

    #[test]
    fn loop_empty_handle_defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.empty_handle(), "empty");

        let custom = LoopConfig {
            empty_path_handle: Some("none_left".to_string()),
            ..Default::default()
        };
        assert_eq!(custom.empty_handle(), "none_left");
    }

    #[test]
    fn query_config_parses_filters_and_ordering() {
        let raw = map(json!({
            "model": "invoice",
            "filters": [{"field": "status", "operator": "eq", "value": "overdue"}],
            "orderBy": [{"field": "dueDate", "direction": "desc"}],
            "limit": 50
        }));
        let NodeConfig::Query(query) = NodeConfig::parse(NodeType::Query, &raw).expect("valid")
        else {
            panic!("expected query config");
        };
        assert_eq!(query.model.as_deref(), Some("invoice"));
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.order_by[0].direction, SortDirection::Desc);
        assert_eq!(query.limit, Some(50));
    }

    #[test]
    fn schedule_window_must_be_ordered() {
        let raw = map(json!({
            "cron": "0 9 * * *",
            "startAt": "2026-02-01T00:00:00Z",
            "endAt": "2026-01-01T00:00:00Z"
        }));
        let err = NodeConfig::parse(NodeType::Schedule, &raw).expect_err("inverted window");
        assert!(err.contains("endAt"));
    }

    #[test]
    fn schedule_is_active_by_default() {
        let NodeConfig::Schedule(config) =
            NodeConfig::parse(NodeType::Schedule, &map(json!({"cron": "0 9 * * 1"})))
                .expect("valid")
        else {
            panic!("expected schedule config");
        };
        assert!(config.is_active());
    }

    #[test]
    fn filter_logical_operator_is_lowercase() {
        let NodeConfig::Filter(filter) = NodeConfig::parse(
            NodeType::Filter,
            &map(json!({"logicalOperator": "or", "conditions": []})),
        )
        .expect("valid") else {
            panic!("expected filter config");
        };
        assert_eq!(filter.logical_operator, Some(LogicalOperator::Or));
    }
}
