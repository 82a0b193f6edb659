use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::OracleSettings;

use super::{
    DatabaseAdapter, DatabaseBackend, DatabaseError, QueryOutput, Row, SelectOptions,
    non_empty_changes, validate_identifier,
};

const SOURCE: &str = "bharatmart::adapters::database::oracle";
const BACKEND: &str = "oci-autonomous";

/// Oracle Autonomous Database. Statements are rendered with `:n` binds but no driver is
/// linked, so every call ends in [`DatabaseError::NotImplemented`].
pub struct OracleDatabase {
    settings: OracleSettings,
}

/// A rendered statement and its positional bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleStatement {
    pub sql: String,
    pub binds: Vec<Value>,
}

impl OracleDatabase {
    pub fn new(settings: OracleSettings) -> Self {
        info!(
            target = SOURCE,
            connection = settings.connection_string.as_deref().unwrap_or("<unset>"),
            wallet = ?settings.wallet_path,
            user = settings.user.as_deref().unwrap_or("admin"),
            "oracle adapter configured"
        );
        warn!(
            target = SOURCE,
            "no oracle driver is linked, database calls will return NotImplemented"
        );
        Self { settings }
    }

    fn unavailable<T>(&self, statement: OracleStatement) -> Result<T, DatabaseError> {
        debug!(
            target = SOURCE,
            sql = %statement.sql,
            binds = statement.binds.len(),
            configured = self.settings.connection_string.is_some(),
            "oracle statement not executed"
        );
        Err(DatabaseError::NotImplemented { backend: BACKEND })
    }
}

pub fn render_select(table: &str, options: &SelectOptions) -> Result<OracleStatement, DatabaseError> {
    let columns = match options.columns.as_ref() {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|column| validate_identifier(column))
            .collect::<Result<Vec<_>, _>>()?
            .join(", "),
        _ => "*".to_string(),
    };
    let mut sql = format!("SELECT {columns} FROM {}", validate_identifier(table)?);
    let mut binds = Vec::new();

    for (index, (column, value)) in options.filters.iter().enumerate() {
        sql.push_str(if index == 0 { " WHERE " } else { " AND " });
        sql.push_str(validate_identifier(column)?);
        if value.is_null() {
            sql.push_str(" IS NULL");
        } else {
            binds.push(value.clone());
            sql.push_str(&format!(" = :{}", binds.len()));
        }
    }
    if let Some(order) = options.order_by.as_ref() {
        let direction = if order.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(
            " ORDER BY {} {direction}",
            validate_identifier(&order.column)?
        ));
    }
    // Oracle requires OFFSET before FETCH.
    if let Some(offset) = options.offset {
        sql.push_str(&format!(" OFFSET {offset} ROWS"));
    }
    if let Some(limit) = options.limit {
        sql.push_str(&format!(" FETCH FIRST {limit} ROWS ONLY"));
    }
    Ok(OracleStatement { sql, binds })
}

pub fn render_insert(table: &str, row: &Row) -> Result<OracleStatement, DatabaseError> {
    non_empty_changes(row)?;
    let columns = row
        .keys()
        .map(|column| validate_identifier(column))
        .collect::<Result<Vec<_>, _>>()?;
    let placeholders = (1..=columns.len())
        .map(|n| format!(":{n}"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(OracleStatement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            validate_identifier(table)?,
            columns.join(", ")
        ),
        binds: row.values().cloned().collect(),
    })
}

pub fn render_update(table: &str, id: &str, changes: &Row) -> Result<OracleStatement, DatabaseError> {
    non_empty_changes(changes)?;
    let assignments = changes
        .keys()
        .enumerate()
        .map(|(index, column)| validate_identifier(column).map(|c| format!("{c} = :{}", index + 1)))
        .collect::<Result<Vec<_>, _>>()?;
    let mut binds: Vec<Value> = changes.values().cloned().collect();
    binds.push(Value::String(id.to_string()));
    Ok(OracleStatement {
        sql: format!(
            "UPDATE {} SET {} WHERE id = :{}",
            validate_identifier(table)?,
            assignments.join(", "),
            binds.len()
        ),
        binds,
    })
}

pub fn render_delete(table: &str, id: &str) -> Result<OracleStatement, DatabaseError> {
    Ok(OracleStatement {
        sql: format!("DELETE FROM {} WHERE id = :1", validate_identifier(table)?),
        binds: vec![Value::String(id.to_string())],
    })
}

#[async_trait]
impl DatabaseAdapter for OracleDatabase {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Oracle
    }

    async fn select(&self, table: &str, options: &SelectOptions) -> Result<QueryOutput, DatabaseError> {
        self.unavailable(render_select(table, options)?)
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<QueryOutput, DatabaseError> {
        self.unavailable(render_insert(table, row)?)
    }

    async fn update(&self, table: &str, id: &str, changes: &Row) -> Result<QueryOutput, DatabaseError> {
        self.unavailable(render_update(table, id, changes)?)
    }

    async fn delete(&self, table: &str, id: &str) -> Result<u64, DatabaseError> {
        self.unavailable(render_delete(table, id)?)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput, DatabaseError> {
        self.unavailable(OracleStatement {
            sql: sql.to_string(),
            binds: params.to_vec(),
        })
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Err(DatabaseError::NotImplemented { backend: BACKEND })
    }

    async fn close(&self) {
        info!(target = SOURCE, "oracle adapter closed");
    }
}
