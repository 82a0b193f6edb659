use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    Postgres, QueryBuilder,
    postgres::{PgPool, PgPoolOptions},
    types::Json,
};
use tracing::{debug, info};

use crate::{config::PostgresSettings, infra::redact::mask_connection_url};

use super::{
    DatabaseAdapter, DatabaseBackend, DatabaseError, QueryOutput, Row, SelectOptions,
    non_empty_changes, validate_identifier,
};

const SOURCE: &str = "bharatmart::adapters::database::postgres";

/// Postgres over a lazily connected sqlx pool. Results are aggregated to JSON server side so
/// rows keep their column names without a static schema.
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    /// Build the pool without connecting. Fails only when the URL cannot be parsed.
    pub fn connect_lazy(settings: &PostgresSettings, timeout: Duration) -> Result<Self, DatabaseError> {
        let url = settings.connection_url();
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.get())
            .acquire_timeout(timeout)
            .connect_lazy(&url)
            .map_err(|err| DatabaseError::Connectivity(err.to_string()))?;

        info!(
            target = SOURCE,
            connection = %mask_connection_url(&url),
            max_connections = settings.max_connections.get(),
            "postgres adapter configured"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_rows(&self, mut qb: QueryBuilder<'_, Postgres>) -> Result<Vec<Value>, DatabaseError> {
        debug!(target = SOURCE, sql = qb.sql(), "postgres query");
        let Json(rows) = qb
            .build_query_scalar::<Json<Vec<Value>>>()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows)
    }
}

fn quoted(name: &str) -> Result<String, DatabaseError> {
    Ok(format!("\"{}\"", validate_identifier(name)?))
}

fn quoted_list<'a>(names: impl Iterator<Item = &'a String>) -> Result<Vec<String>, DatabaseError> {
    names.map(|name| quoted(name)).collect()
}

/// Comparisons happen on the text form so one filter shape serves uuid, enum and numeric
/// columns alike.
fn filter_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

const AGGREGATE_OPEN: &str = "SELECT COALESCE(json_agg(r), '[]'::json) FROM (";

pub(super) fn build_select<'q>(
    table: &str,
    options: &SelectOptions,
) -> Result<QueryBuilder<'q, Postgres>, DatabaseError> {
    let columns = match options.columns.as_ref() {
        Some(columns) if !columns.is_empty() => quoted_list(columns.iter())?.join(", "),
        _ => "*".to_string(),
    };

    let mut qb = QueryBuilder::new(AGGREGATE_OPEN);
    qb.push(format!("SELECT {columns} FROM {}", quoted(table)?));

    for (index, (column, value)) in options.filters.iter().enumerate() {
        qb.push(if index == 0 { " WHERE " } else { " AND " });
        qb.push(quoted(column)?);
        if value.is_null() {
            qb.push(" IS NULL");
        } else {
            qb.push("::text = ");
            qb.push_bind(filter_text(value));
        }
    }

    if let Some(order) = options.order_by.as_ref() {
        qb.push(format!(
            " ORDER BY {} {}",
            quoted(&order.column)?,
            if order.ascending { "ASC" } else { "DESC" }
        ));
    }
    if let Some(limit) = options.limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if let Some(offset) = options.offset {
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(offset).unwrap_or(i64::MAX));
    }
    qb.push(") r");
    Ok(qb)
}

pub(super) fn build_insert<'q>(table: &str, row: &Row) -> Result<QueryBuilder<'q, Postgres>, DatabaseError> {
    non_empty_changes(row)?;
    let table = quoted(table)?;
    let columns = quoted_list(row.keys())?.join(", ");

    let mut qb = QueryBuilder::new(format!(
        "WITH r AS (INSERT INTO {table} ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{table}, "
    ));
    qb.push_bind(Json(Value::Object(row.clone())));
    qb.push(") RETURNING *) SELECT COALESCE(json_agg(r), '[]'::json) FROM r");
    Ok(qb)
}

pub(super) fn build_update<'q>(
    table: &str,
    id: &str,
    changes: &Row,
) -> Result<QueryBuilder<'q, Postgres>, DatabaseError> {
    non_empty_changes(changes)?;
    let table = quoted(table)?;
    let assignments = changes
        .keys()
        .map(|column| quoted(column).map(|column| format!("{column} = src.{column}")))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");

    let mut qb = QueryBuilder::new(format!(
        "WITH r AS (UPDATE {table} SET {assignments} FROM jsonb_populate_record(NULL::{table}, "
    ));
    qb.push_bind(Json(Value::Object(changes.clone())));
    qb.push(format!(") AS src WHERE {table}.\"id\"::text = "));
    qb.push_bind(id.to_string());
    qb.push(format!(" RETURNING {table}.*) SELECT COALESCE(json_agg(r), '[]'::json) FROM r"));
    Ok(qb)
}

pub(super) fn build_delete<'q>(table: &str, id: &str) -> Result<QueryBuilder<'q, Postgres>, DatabaseError> {
    let mut qb = QueryBuilder::new(format!("DELETE FROM {} WHERE \"id\"::text = ", quoted(table)?));
    qb.push_bind(id.to_string());
    Ok(qb)
}

/// Wrap a caller statement so its rows come back as one JSON array. The statement may use
/// `$n` placeholders for `params`.
pub(super) fn wrap_statement(sql: &str) -> String {
    let statement = sql.trim().trim_end_matches(';');
    format!("WITH r AS ({statement}) SELECT COALESCE(json_agg(r), '[]'::json) FROM r")
}

#[async_trait]
impl DatabaseAdapter for PostgresDatabase {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    async fn select(&self, table: &str, options: &SelectOptions) -> Result<QueryOutput, DatabaseError> {
        let rows = self.fetch_rows(build_select(table, options)?).await?;
        Ok(QueryOutput::from_rows(rows))
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<QueryOutput, DatabaseError> {
        let rows = self.fetch_rows(build_insert(table, row)?).await?;
        Ok(QueryOutput::from_rows(rows))
    }

    async fn update(&self, table: &str, id: &str, changes: &Row) -> Result<QueryOutput, DatabaseError> {
        let rows = self.fetch_rows(build_update(table, id, changes)?).await?;
        Ok(QueryOutput::from_rows(rows))
    }

    async fn delete(&self, table: &str, id: &str) -> Result<u64, DatabaseError> {
        let mut qb = build_delete(table, id)?;
        let result = qb.build().execute(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput, DatabaseError> {
        let wrapped = wrap_statement(sql);
        debug!(target = SOURCE, sql = %wrapped, params = params.len(), "postgres raw query");

        let mut query = sqlx::query_scalar::<_, Json<Vec<Value>>>(&wrapped);
        for param in params {
            query = match param {
                Value::Null => query.bind(None::<String>),
                Value::Bool(flag) => query.bind(*flag),
                Value::Number(number) => match number.as_i64() {
                    Some(int) => query.bind(int),
                    None => query.bind(number.as_f64().unwrap_or_default()),
                },
                Value::String(text) => query.bind(text.clone()),
                other => query.bind(Json(other.clone())),
            };
        }
        let Json(rows) = query.fetch_one(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(QueryOutput::from_rows(rows))
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }

    async fn close(&self) {
        self.pool.close().await;
        info!(target = SOURCE, "postgres pool closed");
    }
}

fn map_sqlx_error(err: sqlx::Error) -> DatabaseError {
    match err {
        sqlx::Error::RowNotFound => DatabaseError::NotFound,
        sqlx::Error::Database(db) if db.message().contains("duplicate key") => {
            DatabaseError::Duplicate {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            }
        }
        sqlx::Error::Database(db)
            if db.message().contains("violates")
                || db.message().contains("invalid input syntax") =>
        {
            DatabaseError::InvalidInput(db.message().to_string())
        }
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Tls(_) => DatabaseError::Connectivity(err.to_string()),
        other => DatabaseError::Query(other.to_string()),
    }
}
