use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::cypher::{self, Statement};
use super::{
    GraphSink, NodeLabel, NodePolicy, NodeRef, Properties, RelType, Relationship, RelationshipMode,
    WriteOutcome,
};
use crate::config::GraphConfig;
use crate::error::{GraphRecError, Result};

/// Request body of the transactional HTTP endpoint
#[derive(Serialize)]
struct TxRequest<'a> {
    statements: [&'a Statement; 1],
}

/// Response body of the transactional HTTP endpoint
#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<Neo4jError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    #[serde(default)]
    stats: Stats,
}

/// Update counters returned when `includeStats` is set
#[derive(Debug, Default, Deserialize)]
struct Stats {
    #[serde(default)]
    nodes_created: u64,
    #[serde(default)]
    relationships_created: u64,
    #[serde(default)]
    relationships_deleted: u64,
}

#[derive(Debug, Deserialize)]
struct Neo4jError {
    code: String,
    message: String,
}

/// Graph sink backed by the Neo4j HTTP API (`/db/{database}/tx/commit`).
///
/// One statement per request, each committed on its own. The underlying
/// `reqwest::Client` is created once and reused for every call; call
/// [`connect`](Self::connect) before the first write.
pub struct Neo4jHttpSink {
    client: Client,
    endpoint: Url,
    username: String,
    password: String,
    max_retries: usize,
    retry_delay: Duration,
}

impl Neo4jHttpSink {
    /// Build the sink from configuration. No network traffic happens here.
    pub fn new(config: &GraphConfig, password: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GraphRecError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: commit_endpoint(&config.uri, &config.database)?,
            username: config.username.clone(),
            password,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(500),
        })
    }

    /// Override the initial backoff delay (doubled after every retry).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Build the sink and check the store answers before handing it out.
    pub async fn connect(config: &GraphConfig, password: String) -> Result<Self> {
        let sink = Self::new(config, password)?;
        sink.verify_connectivity().await?;
        log::info!("Connected to graph at {}", sink.endpoint);
        Ok(sink)
    }

    /// Run one statement, retrying transient failures with exponential backoff.
    ///
    /// A non-idempotent statement is only sent again when the server reported
    /// that nothing was committed.
    async fn run(&self, statement: &Statement) -> Result<StatementResult> {
        let mut attempt = 0;
        let mut delay = self.retry_delay;

        loop {
            match self.run_once(statement).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < self.max_retries && may_retry(statement, &e) => {
                    log::warn!("Retry {}/{} after error: {}", attempt + 1, self.max_retries, e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() && !statement.idempotent {
                        log::error!("Not retrying a create that may already be committed: {}", e);
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn run_once(&self, statement: &Statement) -> Result<StatementResult> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .json(&TxRequest { statements: [statement] })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GraphRecError::Connection(format!("Request timed out: {}", e))
                } else {
                    GraphRecError::Connection(format!("Network error: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status, &body));
        }

        let body: TxResponse = response
            .json()
            .await
            .map_err(|e| GraphRecError::GraphQuery(format!("Failed to parse response: {}", e)))?;
        into_result(body)
    }
}

fn may_retry(statement: &Statement, err: &GraphRecError) -> bool {
    err.is_transient() && (statement.idempotent || err.is_uncommitted())
}

fn commit_endpoint(uri: &str, database: &str) -> Result<Url> {
    let mut base = uri.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let base = Url::parse(&base)
        .map_err(|e| GraphRecError::Config(format!("Invalid graph uri {}: {}", uri, e)))?;
    base.join(&format!("db/{}/tx/commit", database))
        .map_err(|e| GraphRecError::Config(format!("Invalid database name {}: {}", database, e)))
}

fn status_error(status: StatusCode, body: &str) -> GraphRecError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        GraphRecError::Rejected(format!("Neo4j HTTP {}: {}", status, body))
    } else if status.is_server_error() {
        // a proxy may answer 5xx after the server committed
        GraphRecError::Connection(format!("Neo4j HTTP {}: {}", status, body))
    } else {
        GraphRecError::GraphQuery(format!("Neo4j HTTP {}: {}", status, body))
    }
}

fn into_result(body: TxResponse) -> Result<StatementResult> {
    if let Some(err) = body.errors.into_iter().next() {
        let message = format!("{}: {}", err.code, err.message);
        return Err(if err.code.starts_with("Neo.TransientError") {
            GraphRecError::Rejected(message)
        } else {
            GraphRecError::GraphQuery(message)
        });
    }
    body.results
        .into_iter()
        .next()
        .ok_or_else(|| GraphRecError::GraphQuery("Empty result set from Neo4j".to_string()))
}

#[async_trait]
impl GraphSink for Neo4jHttpSink {
    async fn verify_connectivity(&self) -> Result<()> {
        self.run(&cypher::ping()).await.map(|_| ())
    }

    async fn ensure_key_constraint(&self, label: NodeLabel) -> Result<()> {
        self.run(&cypher::ensure_key_constraint(label)).await.map(|_| ())
    }

    async fn upsert_node(
        &self,
        node: NodeRef,
        properties: &Properties,
        policy: NodePolicy,
    ) -> Result<WriteOutcome> {
        let result = self.run(&cypher::upsert_node(node, properties, policy)).await?;
        Ok(if result.stats.nodes_created > 0 {
            WriteOutcome::Created
        } else {
            WriteOutcome::AlreadyPresent
        })
    }

    async fn write_relationship(
        &self,
        relationship: &Relationship,
        mode: RelationshipMode,
    ) -> Result<WriteOutcome> {
        let result = self.run(&cypher::write_relationship(relationship, mode)).await?;
        if result.data.is_empty() {
            return Err(GraphRecError::MissingEndpoint {
                rel_type: relationship.rel_type.to_string(),
                from_label: relationship.from.label.to_string(),
                from_key: relationship.from.key,
                to_label: relationship.to.label.to_string(),
                to_key: relationship.to.key,
            });
        }
        Ok(if result.stats.relationships_created > 0 {
            WriteOutcome::Created
        } else {
            WriteOutcome::AlreadyPresent
        })
    }

    async fn delete_relationships(&self, rel_type: RelType) -> Result<u64> {
        let result = self.run(&cypher::delete_relationships(rel_type)).await?;
        Ok(result.stats.relationships_deleted)
    }
}
