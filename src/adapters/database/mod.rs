//! Database capability: one CRUD surface over PostgREST, Postgres and Oracle.
//!
//! Rows travel as JSON objects. Every backend binds values through placeholders and validates
//! table and column names before they reach SQL text.

mod instrumented;
mod oracle;
mod postgres;
mod supabase;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use instrumented::InstrumentedDatabase;
pub use oracle::OracleDatabase;
pub use postgres::PostgresDatabase;
pub use supabase::SupabaseDatabase;

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Supabase,
    Postgres,
    Oracle,
}

impl DatabaseBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseBackend::Supabase => "supabase",
            DatabaseBackend::Postgres => "postgresql",
            DatabaseBackend::Oracle => "oci-autonomous",
        }
    }
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("{backend} database is not configured: {missing}")]
    NotConfigured {
        backend: &'static str,
        missing: &'static str,
    },
    #[error("{backend} database adapter is not implemented")]
    NotImplemented { backend: &'static str },
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("database unreachable: {0}")]
    Connectivity(String),
    #[error("record not found")]
    NotFound,
    #[error("duplicate value violates `{constraint}`")]
    Duplicate { constraint: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("query failed: {0}")]
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// Shape of a `select`. Filters are equality matches joined with `AND`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectOptions {
    pub columns: Option<Vec<String>>,
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by = Some(OrderBy {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Value>,
    /// Total matches when the backend reports it, otherwise the number of rows returned.
    pub count: u64,
}

impl QueryOutput {
    pub fn from_rows(rows: Vec<Value>) -> Self {
        let count = rows.len() as u64;
        Self { rows, count }
    }

    pub fn first(&self) -> Option<&Value> {
        self.rows.first()
    }

    pub fn into_first(self) -> Option<Value> {
        self.rows.into_iter().next()
    }
}

#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    fn backend(&self) -> DatabaseBackend;

    async fn select(&self, table: &str, options: &SelectOptions)
    -> Result<QueryOutput, DatabaseError>;

    async fn insert(&self, table: &str, row: &Row) -> Result<QueryOutput, DatabaseError>;

    async fn update(&self, table: &str, id: &str, changes: &Row)
    -> Result<QueryOutput, DatabaseError>;

    async fn delete(&self, table: &str, id: &str) -> Result<u64, DatabaseError>;

    /// Run a row-returning statement with positional parameters.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;

    async fn close(&self) {}
}

/// Accept plain lower/upper-case identifiers only: a letter or `_` followed by letters, digits
/// or `_`, at most 63 bytes.
pub(crate) fn validate_identifier(name: &str) -> Result<&str, DatabaseError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    let valid_rest = chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid_start && valid_rest && name.len() <= 63 {
        Ok(name)
    } else {
        Err(DatabaseError::InvalidIdentifier(name.to_string()))
    }
}

fn non_empty_changes(row: &Row) -> Result<(), DatabaseError> {
    if row.is_empty() {
        Err(DatabaseError::InvalidInput("no columns supplied".into()))
    } else {
        Ok(())
    }
}
