//! Cypher sessions.
//!
//! The graph is only ever touched through parametrized Cypher statements.
//! [`Neo4jHttpSession`] sends them to the Neo4j HTTP transactional endpoint,
//! each batch committed as one transaction.

use crate::error::GraphError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use tracing::{debug, instrument};

/// A parametrized Cypher statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    /// Cypher text.
    pub statement: String,
    /// Named parameters.
    pub parameters: Map<String, JsonValue>,
}

impl Statement {
    /// Creates a statement without parameters.
    #[must_use]
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            parameters: Map::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn param(mut self, name: &str, value: impl Into<JsonValue>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }
}

/// Rows returned by one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column names.
    pub columns: Vec<String>,
    /// Rows, one value per column.
    pub rows: Vec<Vec<JsonValue>>,
}

impl QueryResult {
    /// Returns the value of `column` in `row`.
    #[must_use]
    pub fn get<'a>(&self, row: &'a [JsonValue], column: &str) -> Option<&'a JsonValue> {
        let index = self.columns.iter().position(|c| c == column)?;
        row.get(index)
    }
}

/// A session able to run Cypher statement batches.
#[async_trait]
pub trait CypherSession: Send + Sync {
    /// Runs the statements in one transaction and returns one result per
    /// statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or rejects any
    /// statement.
    async fn run(&self, statements: &[Statement]) -> Result<Vec<QueryResult>, Report<GraphError>>;
}

/// Connection settings for Neo4j.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neo4jConfig {
    /// HTTP base URL, e.g. `http://localhost:7474`.
    pub url: String,
    /// Database name.
    #[serde(default = "default_database")]
    pub database: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

fn default_database() -> String {
    "neo4j".to_string()
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    statements: &'a [Statement],
}

#[derive(Debug, Default, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<ServerError>,
}

#[derive(Debug, Default, Deserialize)]
struct StatementResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<DataRow>,
}

#[derive(Debug, Default, Deserialize)]
struct DataRow {
    #[serde(default)]
    row: Vec<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl CommitResponse {
    fn into_results(self) -> Result<Vec<QueryResult>, GraphError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(GraphError::QueryFailed {
                code: error.code,
                message: error.message,
            });
        }
        Ok(self
            .results
            .into_iter()
            .map(|r| QueryResult {
                columns: r.columns,
                rows: r.data.into_iter().map(|d| d.row).collect(),
            })
            .collect())
    }
}

/// A session over the Neo4j HTTP API.
#[derive(Debug, Clone)]
pub struct Neo4jHttpSession {
    config: Neo4jConfig,
    http: reqwest::Client,
}

impl Neo4jHttpSession {
    /// Creates a session.
    pub fn new(config: Neo4jConfig, timeout: Duration) -> Result<Self, Report<GraphError>> {
        if config.url.trim().is_empty() {
            return Err(GraphError::InvalidConfig {
                reason: "Neo4j URL is empty".to_string(),
            }
            .into());
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GraphError::InvalidConfig {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, http })
    }

    fn commit_url(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.config.url.trim_end_matches('/'),
            self.config.database
        )
    }
}

#[async_trait]
impl CypherSession for Neo4jHttpSession {
    #[instrument(skip_all, fields(database = %self.config.database, statements = statements.len()))]
    async fn run(&self, statements: &[Statement]) -> Result<Vec<QueryResult>, Report<GraphError>> {
        let response = self
            .http
            .post(self.commit_url())
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&CommitRequest { statements })
            .send()
            .await
            .map_err(|e| GraphError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| GraphError::ConnectionFailed {
            reason: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(GraphError::InvalidResponse {
                reason: format!("HTTP {}: {body}", status.as_u16()),
            }
            .into());
        }

        let parsed: CommitResponse =
            serde_json::from_str(&body).map_err(|e| GraphError::InvalidResponse {
                reason: e.to_string(),
            })?;
        let results = parsed.into_results()?;
        debug!(results = results.len(), "statements committed");
        Ok(results)
    }
}
