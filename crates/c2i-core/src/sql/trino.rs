//! Trino HTTP client.
//!
//! Submits statements with `POST /v1/statement` and follows `nextUri`
//! until the query finishes, collecting returned rows.

use crate::config::SqlConfig;
use crate::error::WriteError;
use crate::sql::engine::{QueryOutput, SqlEngine};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One page of the Trino statement protocol.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResults {
    id: String,
    next_uri: Option<String>,
    columns: Option<Vec<Column>>,
    data: Option<Vec<Vec<serde_json::Value>>>,
    error: Option<QueryError>,
}

#[derive(Debug, Deserialize)]
struct Column {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryError {
    message: String,
    error_name: Option<String>,
}

/// Trino client implementing [`SqlEngine`].
pub struct TrinoClient {
    client: Client,
    base_uri: String,
    user: String,
    catalog: String,
    schema: String,
}

impl TrinoClient {
    /// Create a new client from SQL configuration.
    pub fn new(config: &SqlConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_seconds);

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let base_uri = config.base_uri();
        info!(uri = %base_uri, user = %config.user, "Trino client initialized");

        Ok(Self {
            client,
            base_uri,
            user: config.user.clone(),
            catalog: config.catalog.clone(),
            schema: config.schema.clone(),
        })
    }

    fn with_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request.header("X-Trino-User", &self.user);
        if !self.catalog.is_empty() {
            request = request.header("X-Trino-Catalog", &self.catalog);
        }
        if !self.schema.is_empty() {
            request = request.header("X-Trino-Schema", &self.schema);
        }
        request
    }

    async fn fetch(&self, request: reqwest::RequestBuilder) -> Result<QueryResults> {
        let response = self
            .with_headers(request)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("Trino request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Connection(format!(
                "Trino returned HTTP {}: {}",
                status, body
            )));
        }

        response
            .json::<QueryResults>()
            .await
            .map_err(|e| Error::Serialization(format!("Invalid Trino response: {}", e)))
    }
}

#[async_trait]
impl SqlEngine for TrinoClient {
    async fn execute(&self, sql: &str) -> Result<QueryOutput> {
        let start = Instant::now();
        let url = format!("{}/v1/statement", self.base_uri);

        let mut page = self
            .fetch(self.client.post(&url).body(sql.to_string()))
            .await?;
        let query_id = page.id.clone();
        let mut output = QueryOutput::default();

        loop {
            if let Some(error) = page.error.take() {
                let name = error.error_name.unwrap_or_default();
                return Err(Error::Write(WriteError::Statement(format!(
                    "{} {}",
                    name, error.message
                )
                .trim()
                .to_string())));
            }

            if output.columns.is_empty() {
                if let Some(columns) = page.columns.take() {
                    output.columns = columns.into_iter().map(|c| c.name).collect();
                }
            }
            if let Some(data) = page.data.take() {
                output.rows.extend(data);
            }

            match page.next_uri.take() {
                Some(next) => page = self.fetch(self.client.get(&next)).await?,
                None => break,
            }
        }

        debug!(
            query_id = %query_id,
            rows = output.rows.len(),
            size_bytes = sql.len(),
            duration_ms = start.elapsed().as_millis(),
            "Trino statement finished"
        );

        Ok(output)
    }

    fn name(&self) -> &str {
        "trino"
    }
}
