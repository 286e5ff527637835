//! Access to the hosted document store.
//!
//! The knowledge base lives in a Postgres database behind a PostgREST API:
//! tables are read with `GET {url}/rest/v1/{table}` and stored procedures are
//! called with `POST {url}/rest/v1/rpc/{function}`. Tools only see the
//! [`DocumentStore`] trait.

use agent_core::config::StoreConfig;
use agent_core::error::AgentError;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Row filters and ordering for a table read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// `(column, value)` equality filters. Columns may use JSON paths such as
    /// `metadata->>document_id`.
    pub filters: Vec<(String, String)>,
    pub order: Option<String>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.filters.push((column.to_string(), value.to_string()));
        self
    }

    pub fn order(mut self, column: &str) -> Self {
        self.order = Some(column.to_string());
        self
    }

    /// Query-string parameters in PostgREST syntax.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        for (column, value) in &self.filters {
            params.push((column.clone(), format!("eq.{}", value)));
        }
        if let Some(order) = &self.order {
            params.push(("order".to_string(), order.clone()));
        }
        params
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Rows of `table` matching `query`.
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, AgentError>;

    /// Call a stored procedure and return its JSON result.
    async fn rpc(&self, function: &str, params: Value) -> Result<Value, AgentError>;
}

/// [`DocumentStore`] over a PostgREST endpoint.
pub struct PostgrestStore {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl PostgrestStore {
    pub fn new(client: reqwest::Client, config: &StoreConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<String, AgentError> {
        if self.base_url.is_empty() || self.service_key.is_empty() {
            return Err(AgentError::Config(
                "document store is not configured (set SUPABASE_URL and SUPABASE_SERVICE_KEY)".into(),
            ));
        }
        Ok(format!("{}/rest/v1/{}", self.base_url, path))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, AgentError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AgentError::Backend(backend_message(status.as_u16(), &body)));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// The `message` field of a PostgREST error body, or the raw body.
fn backend_message(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    format!("{} (HTTP {})", detail, status)
}

#[async_trait]
impl DocumentStore for PostgrestStore {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, AgentError> {
        let url = self.endpoint(table)?;
        debug!(table, filters = query.filters.len(), "store select");
        let request = self.client.get(url).query(&query.to_params());
        match self.send(request).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(AgentError::Backend(format!(
                "expected rows from {}, got {}",
                table, other
            ))),
        }
    }

    async fn rpc(&self, function: &str, params: Value) -> Result<Value, AgentError> {
        let url = self.endpoint(&format!("rpc/{}", function))?;
        debug!(function, "store rpc");
        self.send(self.client.post(url).json(&params)).await
    }
}

/// Read `column` from a row as text, following `a->>b` JSON paths the way
/// PostgREST does. Nested objects may be stored as JSON-encoded strings.
pub fn column_text(row: &Value, column: &str) -> Option<String> {
    let mut parts = column.split("->>");
    let mut current = row.get(parts.next()?)?.clone();
    for key in parts {
        let object = match current {
            Value::String(s) => serde_json::from_str::<Value>(&s).ok()?,
            other => other,
        };
        current = object.get(key)?.clone();
    }
    match current {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
