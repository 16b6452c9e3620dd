//! Canvas persistence in `workflow_nodes` and `workflow_connections`.
//!
//! Both tables are unique on `(workflow_id, graph_id)`. A sync upserts
//! against that key, so a surviving record keeps its storage ID, and then
//! deletes every record the request no longer names. The whole sync runs
//! in one transaction.

use super::parse_column;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opsflow_core::{ConnectionStorageId, NodeStorageId, Result, WorkflowId};
use opsflow_workflow::sync::reconcile_connections;
use opsflow_workflow::{
    CanvasSnapshot, CanvasStore, ConfigMap, ConnectionHandles, ConnectionPayload,
    ConnectionRecord, GraphId, NodePayload, NodeRecord, NodeType, Position, StoreError,
    SyncRequest,
};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::debug;

const NODE_COLUMNS: &str = "id, workflow_id, graph_id, node_type, name, description, \
     position_x, position_y, configuration, template, execution_order, is_optional, \
     retry_limit, timeout_ms, conditions, created_at, updated_at";

const CONNECTION_COLUMNS: &str = "id, workflow_id, graph_id, source_graph_id, target_graph_id, \
     source_handle, target_handle, label, conditions, style, animated, execution_order, \
     created_at, updated_at";

/// Row type for node queries.
#[derive(Debug, FromRow)]
struct NodeRow {
    id: String,
    workflow_id: String,
    graph_id: String,
    node_type: String,
    name: String,
    description: Option<String>,
    position_x: f64,
    position_y: f64,
    configuration: JsonValue,
    template: Option<String>,
    execution_order: Option<i32>,
    is_optional: bool,
    retry_limit: i32,
    timeout_ms: Option<i64>,
    conditions: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl NodeRow {
    fn try_into_record(self) -> Result<NodeRecord, StoreError> {
        let corrupt = |details: String| StoreError::CorruptRecord { details };

        let storage_id: NodeStorageId = parse_column("node id", &self.id).map_err(corrupt)?;
        let workflow_id: WorkflowId =
            parse_column("workflow id", &self.workflow_id).map_err(corrupt)?;
        let node_type = NodeType::parse(&self.node_type).ok_or_else(|| {
            corrupt(format!(
                "node {} has unknown type '{}'",
                self.graph_id, self.node_type
            ))
        })?;
        let retry_limit = u32::try_from(self.retry_limit).map_err(|_| {
            corrupt(format!(
                "node {} has negative retry limit {}",
                self.graph_id, self.retry_limit
            ))
        })?;
        let timeout_ms = self
            .timeout_ms
            .map(u64::try_from)
            .transpose()
            .map_err(|_| corrupt(format!("node {} has a negative timeout", self.graph_id)))?;

        Ok(NodeRecord {
            storage_id,
            workflow_id,
            payload: NodePayload {
                configuration: json_object(self.configuration, "configuration", &self.graph_id)?,
                conditions: json_object(self.conditions, "conditions", &self.graph_id)?,
                graph_id: GraphId::from(self.graph_id),
                node_type,
                name: self.name,
                description: self.description,
                position: Position::new(self.position_x, self.position_y),
                template: self.template,
                execution_order: self.execution_order,
                is_optional: self.is_optional,
                retry_limit,
                timeout_ms,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row type for connection queries.
#[derive(Debug, FromRow)]
struct ConnectionRow {
    id: String,
    workflow_id: String,
    graph_id: String,
    source_graph_id: String,
    target_graph_id: String,
    source_handle: Option<String>,
    target_handle: Option<String>,
    label: Option<String>,
    conditions: JsonValue,
    style: JsonValue,
    animated: bool,
    execution_order: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConnectionRow {
    fn try_into_record(self) -> Result<ConnectionRecord, StoreError> {
        let corrupt = |details: String| StoreError::CorruptRecord { details };

        let storage_id: ConnectionStorageId =
            parse_column("connection id", &self.id).map_err(corrupt)?;
        let workflow_id: WorkflowId =
            parse_column("workflow id", &self.workflow_id).map_err(corrupt)?;

        Ok(ConnectionRecord {
            storage_id,
            workflow_id,
            payload: ConnectionPayload {
                conditions: json_object(self.conditions, "conditions", &self.graph_id)?,
                style: json_object(self.style, "style", &self.graph_id)?,
                graph_id: GraphId::from(self.graph_id),
                source_graph_id: GraphId::from(self.source_graph_id),
                target_graph_id: GraphId::from(self.target_graph_id),
                handles: ConnectionHandles {
                    source_handle: self.source_handle,
                    target_handle: self.target_handle,
                },
                label: self.label,
                animated: self.animated,
                execution_order: self.execution_order,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Accepts a JSON object column. `NULL` reads as an empty object.
fn json_object(value: JsonValue, column: &str, graph_id: &str) -> Result<ConfigMap, StoreError> {
    match value {
        JsonValue::Object(map) => Ok(map),
        JsonValue::Null => Ok(ConfigMap::new()),
        other => Err(StoreError::CorruptRecord {
            details: format!("{column} of {graph_id} is not an object: {other}"),
        }
        .into()),
    }
}

fn database_error(err: sqlx::Error) -> StoreError {
    StoreError::Database {
        details: err.to_string(),
    }
}

/// Canvas store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgCanvasStore {
    pool: PgPool,
}

impl PgCanvasStore {
    /// Creates a new store.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_with(
        conn: &mut PgConnection,
        workflow_id: WorkflowId,
    ) -> Result<CanvasSnapshot, StoreError> {
        let node_rows: Vec<NodeRow> = sqlx::query_as(&format!(
            "SELECT {NODE_COLUMNS} FROM workflow_nodes WHERE workflow_id = $1 ORDER BY created_at, graph_id"
        ))
        .bind(workflow_id.to_string())
        .fetch_all(&mut *conn)
        .await
        .map_err(database_error)?;

        let connection_rows: Vec<ConnectionRow> = sqlx::query_as(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM workflow_connections WHERE workflow_id = $1 ORDER BY created_at, graph_id"
        ))
        .bind(workflow_id.to_string())
        .fetch_all(&mut *conn)
        .await
        .map_err(database_error)?;

        Ok(CanvasSnapshot {
            nodes: node_rows
                .into_iter()
                .map(NodeRow::try_into_record)
                .collect::<Result<_, _>>()?,
            connections: connection_rows
                .into_iter()
                .map(ConnectionRow::try_into_record)
                .collect::<Result<_, _>>()?,
        })
    }

    async fn upsert_node_with(
        conn: &mut PgConnection,
        workflow_id: WorkflowId,
        node: &NodePayload,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord, StoreError> {
        let row: NodeRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO workflow_nodes ({NODE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $16)
            ON CONFLICT (workflow_id, graph_id)
            DO UPDATE SET node_type = $4, name = $5, description = $6, position_x = $7,
                position_y = $8, configuration = $9, template = $10, execution_order = $11,
                is_optional = $12, retry_limit = $13, timeout_ms = $14, conditions = $15,
                updated_at = $16
            RETURNING {NODE_COLUMNS}
            "#
        ))
        .bind(NodeStorageId::new().to_string())
        .bind(workflow_id.to_string())
        .bind(node.graph_id.as_str())
        .bind(node.node_type.as_str())
        .bind(&node.name)
        .bind(&node.description)
        .bind(node.position.x)
        .bind(node.position.y)
        .bind(JsonValue::Object(node.configuration.clone()))
        .bind(&node.template)
        .bind(node.execution_order)
        .bind(node.is_optional)
        .bind(i32::try_from(node.retry_limit).unwrap_or(i32::MAX))
        .bind(node.timeout_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)))
        .bind(JsonValue::Object(node.conditions.clone()))
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(database_error)?;

        row.try_into_record()
    }

    async fn upsert_connection_with(
        conn: &mut PgConnection,
        workflow_id: WorkflowId,
        connection: &ConnectionPayload,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO workflow_connections ({CONNECTION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            ON CONFLICT (workflow_id, graph_id)
            DO UPDATE SET source_graph_id = $4, target_graph_id = $5, source_handle = $6,
                target_handle = $7, label = $8, conditions = $9, style = $10, animated = $11,
                execution_order = $12, updated_at = $13
            "#
        ))
        .bind(ConnectionStorageId::new().to_string())
        .bind(workflow_id.to_string())
        .bind(connection.graph_id.as_str())
        .bind(connection.source_graph_id.as_str())
        .bind(connection.target_graph_id.as_str())
        .bind(&connection.handles.source_handle)
        .bind(&connection.handles.target_handle)
        .bind(&connection.label)
        .bind(JsonValue::Object(connection.conditions.clone()))
        .bind(JsonValue::Object(connection.style.clone()))
        .bind(connection.animated)
        .bind(connection.execution_order)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(database_error)?;

        Ok(())
    }
}

#[async_trait]
impl CanvasStore for PgCanvasStore {
    async fn load(&self, workflow_id: WorkflowId) -> Result<CanvasSnapshot, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(database_error)?;
        Self::load_with(&mut conn, workflow_id).await
    }

    async fn sync(
        &self,
        workflow_id: WorkflowId,
        request: SyncRequest,
    ) -> Result<CanvasSnapshot, StoreError> {
        let now = Utc::now();
        let connections = reconcile_connections(workflow_id, &request.nodes, request.connections);
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        for node in &request.nodes {
            Self::upsert_node_with(&mut tx, workflow_id, node, now).await?;
        }
        let keep_nodes: Vec<String> = request
            .nodes
            .iter()
            .map(|node| node.graph_id.to_string())
            .collect();
        let deleted_nodes = sqlx::query(
            r#"
            DELETE FROM workflow_nodes
            WHERE workflow_id = $1 AND NOT (graph_id = ANY($2))
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(&keep_nodes)
        .execute(&mut *tx)
        .await
        .map_err(database_error)?
        .rows_affected();

        for connection in &connections {
            Self::upsert_connection_with(&mut tx, workflow_id, connection, now).await?;
        }
        let keep_connections: Vec<String> = connections
            .iter()
            .map(|connection| connection.graph_id.to_string())
            .collect();
        let deleted_connections = sqlx::query(
            r#"
            DELETE FROM workflow_connections
            WHERE workflow_id = $1 AND NOT (graph_id = ANY($2))
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(&keep_connections)
        .execute(&mut *tx)
        .await
        .map_err(database_error)?
        .rows_affected();

        let snapshot = Self::load_with(&mut tx, workflow_id).await?;
        tx.commit().await.map_err(database_error)?;

        debug!(
            workflow_id = %workflow_id,
            nodes = snapshot.nodes.len(),
            connections = snapshot.connections.len(),
            deleted_nodes,
            deleted_connections,
            "canvas synced"
        );
        Ok(snapshot)
    }

    async fn upsert_node(
        &self,
        workflow_id: WorkflowId,
        node: NodePayload,
    ) -> Result<NodeRecord, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(database_error)?;
        Self::upsert_node_with(&mut conn, workflow_id, &node, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_row() -> NodeRow {
        NodeRow {
            id: NodeStorageId::new().to_string(),
            workflow_id: WorkflowId::new().to_string(),
            graph_id: "node_a".to_string(),
            node_type: "delay".to_string(),
            name: "Wait".to_string(),
            description: None,
            position_x: 10.0,
            position_y: 20.0,
            configuration: json!({"delayMs": 500, "custom": true}),
            template: None,
            execution_order: Some(2),
            is_optional: false,
            retry_limit: 3,
            timeout_ms: Some(1_000),
            conditions: JsonValue::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn node_row_decodes_into_record() {
        let record = node_row().try_into_record().expect("decode");

        assert_eq!(record.payload.graph_id.as_str(), "node_a");
        assert_eq!(record.payload.node_type, NodeType::Delay);
        assert_eq!(record.payload.position, Position::new(10.0, 20.0));
        assert_eq!(record.payload.configuration.get("custom"), Some(&json!(true)));
        assert!(record.payload.conditions.is_empty());
        assert_eq!(record.payload.timeout_ms, Some(1_000));
    }

    #[test]
    fn unknown_node_type_is_corrupt() {
        let mut row = node_row();
        row.node_type = "webhook".to_string();

        let err = row.try_into_record().expect_err("unknown type");
        assert!(matches!(
            err.current_context(),
            StoreError::CorruptRecord { .. }
        ));
    }

    #[test]
    fn non_object_style_is_corrupt() {
        let row = ConnectionRow {
            id: ConnectionStorageId::new().to_string(),
            workflow_id: WorkflowId::new().to_string(),
            graph_id: "edge_a".to_string(),
            source_graph_id: "node_a".to_string(),
            target_graph_id: "node_b".to_string(),
            source_handle: Some("out".to_string()),
            target_handle: None,
            label: None,
            conditions: json!({}),
            style: json!("dashed"),
            animated: true,
            execution_order: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(row.try_into_record().is_err());
    }
}
