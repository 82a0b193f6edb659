use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use url::Url;

use crate::config::SupabaseSettings;

use super::{
    DatabaseAdapter, DatabaseBackend, DatabaseError, QueryOutput, Row, SelectOptions,
    non_empty_changes, validate_identifier,
};

const SOURCE: &str = "bharatmart::adapters::database::supabase";
const BACKEND: &str = "supabase";

/// Supabase through its PostgREST endpoint, authenticated with the service role key.
pub struct SupabaseDatabase {
    http: reqwest::Client,
    rest: Option<Url>,
    service_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Option<String>,
}

impl SupabaseDatabase {
    /// A missing or malformed `SUPABASE_URL` yields an adapter whose calls report
    /// `NotConfigured` instead of failing startup.
    pub fn from_settings(settings: &SupabaseSettings, timeout: Duration) -> Self {
        let rest = match settings.url.as_deref().map(rest_endpoint) {
            Some(Ok(url)) => Some(url),
            Some(Err(err)) => {
                warn!(target = SOURCE, error = %err, failure_kind = "configuration_fallback", "SUPABASE_URL is not a valid url");
                None
            }
            None => {
                warn!(target = SOURCE, "SUPABASE_URL not set, database calls will fail");
                None
            }
        };
        if settings.service_role_key.is_none() {
            warn!(target = SOURCE, "SUPABASE_SERVICE_ROLE_KEY not set");
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        if let Some(url) = rest.as_ref() {
            info!(target = SOURCE, endpoint = %url, "supabase adapter configured");
        }
        Self {
            http,
            rest,
            service_key: settings.service_role_key.clone(),
        }
    }

    fn rest(&self) -> Result<&Url, DatabaseError> {
        self.rest.as_ref().ok_or(DatabaseError::NotConfigured {
            backend: BACKEND,
            missing: "SUPABASE_URL",
        })
    }

    fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, DatabaseError> {
        let key = self
            .service_key
            .as_deref()
            .ok_or(DatabaseError::NotConfigured {
                backend: BACKEND,
                missing: "SUPABASE_SERVICE_ROLE_KEY",
            })?;
        Ok(self
            .http
            .request(method, url)
            .header("apikey", key)
            .bearer_auth(key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, DatabaseError> {
        let response = request
            .send()
            .await
            .map_err(|err| DatabaseError::Connectivity(err.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body: PostgrestError = response.json().await.unwrap_or_default();
        let message = match body.details {
            Some(details) if !details.is_empty() => format!("{} ({details})", body.message),
            _ => body.message,
        };
        Err(match status {
            StatusCode::CONFLICT => DatabaseError::Duplicate { constraint: message },
            StatusCode::BAD_REQUEST => DatabaseError::InvalidInput(message),
            status if status.is_server_error() => {
                DatabaseError::Connectivity(format!("{status}: {message}"))
            }
            status => DatabaseError::Query(format!("{status}: {message}")),
        })
    }

    async fn rows(&self, request: RequestBuilder) -> Result<Vec<Value>, DatabaseError> {
        let response = self.send(request).await?;
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|err| DatabaseError::Query(err.to_string()))
    }
}

fn rest_endpoint(base: &str) -> Result<Url, url::ParseError> {
    let trimmed = base.trim_end_matches('/');
    Url::parse(&format!("{trimmed}/rest/v1/"))
}

fn filter_value(value: &Value) -> String {
    match value {
        Value::Null => "is.null".to_string(),
        Value::String(text) => format!("eq.{text}"),
        other => format!("eq.{other}"),
    }
}

pub(super) fn table_url(rest: &Url, table: &str) -> Result<Url, DatabaseError> {
    rest.join(validate_identifier(table)?)
        .map_err(|err| DatabaseError::InvalidInput(err.to_string()))
}

pub(super) fn select_url(rest: &Url, table: &str, options: &SelectOptions) -> Result<Url, DatabaseError> {
    let mut url = table_url(rest, table)?;
    let columns = match options.columns.as_ref() {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|column| validate_identifier(column))
            .collect::<Result<Vec<_>, _>>()?
            .join(","),
        _ => "*".to_string(),
    };

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("select", &columns);
        for (column, value) in &options.filters {
            query.append_pair(validate_identifier(column)?, &filter_value(value));
        }
        if let Some(order) = options.order_by.as_ref() {
            let direction = if order.ascending { "asc" } else { "desc" };
            query.append_pair(
                "order",
                &format!("{}.{direction}", validate_identifier(&order.column)?),
            );
        }
        if let Some(limit) = options.limit {
            query.append_pair("limit", &limit.to_string());
        }
        if let Some(offset) = options.offset {
            query.append_pair("offset", &offset.to_string());
        }
    }
    Ok(url)
}

fn by_id_url(rest: &Url, table: &str, id: &str) -> Result<Url, DatabaseError> {
    let mut url = table_url(rest, table)?;
    url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
    Ok(url)
}

/// Total from a `Content-Range: 0-9/42` header; `*` totals are ignored.
pub(super) fn content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.parse().ok()
}

#[async_trait]
impl DatabaseAdapter for SupabaseDatabase {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Supabase
    }

    async fn select(&self, table: &str, options: &SelectOptions) -> Result<QueryOutput, DatabaseError> {
        let url = select_url(self.rest()?, table, options)?;
        let request = self
            .request(Method::GET, url)?
            .header("Prefer", "count=exact");
        let response = self.send(request).await?;
        let total = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(content_range_total);
        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|err| DatabaseError::Query(err.to_string()))?;

        let mut output = QueryOutput::from_rows(rows);
        if let Some(total) = total {
            output.count = total;
        }
        Ok(output)
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<QueryOutput, DatabaseError> {
        non_empty_changes(row)?;
        let url = table_url(self.rest()?, table)?;
        let request = self
            .request(Method::POST, url)?
            .header("Prefer", "return=representation")
            .json(row);
        Ok(QueryOutput::from_rows(self.rows(request).await?))
    }

    async fn update(&self, table: &str, id: &str, changes: &Row) -> Result<QueryOutput, DatabaseError> {
        non_empty_changes(changes)?;
        let url = by_id_url(self.rest()?, table, id)?;
        let request = self
            .request(Method::PATCH, url)?
            .header("Prefer", "return=representation")
            .json(changes);
        Ok(QueryOutput::from_rows(self.rows(request).await?))
    }

    async fn delete(&self, table: &str, id: &str) -> Result<u64, DatabaseError> {
        let url = by_id_url(self.rest()?, table, id)?;
        let request = self
            .request(Method::DELETE, url)?
            .header("Prefer", "return=representation");
        Ok(self.rows(request).await?.len() as u64)
    }

    /// Runs through the `execute_sql` database function, which must exist in the project.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput, DatabaseError> {
        let url = self
            .rest()?
            .join("rpc/execute_sql")
            .map_err(|err| DatabaseError::InvalidInput(err.to_string()))?;
        let request = self
            .request(Method::POST, url)?
            .json(&json!({ "query": sql, "params": params }));
        let response = self.send(request).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|err| DatabaseError::Query(err.to_string()))?;

        let rows = match value {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            single => vec![single],
        };
        Ok(QueryOutput::from_rows(rows))
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        let url = self.rest()?.clone();
        self.send(self.request(Method::GET, url)?).await.map(|_| ())
    }
}
