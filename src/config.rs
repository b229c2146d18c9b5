use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::graph::{DanglingEdgePolicy, RelationshipMode};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub source: SourceConfig,
    pub graph: GraphConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub recommendations: RecommendationConfig,
}

/// Relational source (SQLite file holding customers/products/orders/order_items)
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub db_path: PathBuf,
}

/// Graph sink connection (Neo4j HTTP API)
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    /// Base URI of the Neo4j HTTP connector, e.g. `http://localhost:7474`
    pub uri: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_username")]
    pub username: String,
    /// Name of the environment variable holding the password
    #[serde(default = "default_password_env")]
    pub password_env: String,
    /// Deadline for a single HTTP call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries for transient failures (timeouts, connection errors, 429/5xx)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

/// Structural migration policies
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    #[serde(default)]
    pub relationship_mode: RelationshipMode,
    #[serde(default)]
    pub dangling_edges: DanglingEdgePolicy,
    /// Maximum in-flight writes within one stage (1 = sequential)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            relationship_mode: RelationshipMode::default(),
            dangling_edges: DanglingEdgePolicy::default(),
            concurrency: default_concurrency(),
        }
    }
}

/// Implicit-feedback matrix factorization hyperparameters
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Where the trained model is stored; when absent the model is trained in memory every run
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Train even if `model_path` already holds a model
    #[serde(default)]
    pub retrain: bool,
    #[serde(default = "default_rank")]
    pub rank: usize,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_regularization")]
    pub regularization: f32,
    /// Weight of unobserved (negative) pairs
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    /// Target value of unobserved pairs
    #[serde(default = "default_negative_label")]
    pub negative_label: f32,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            retrain: false,
            rank: default_rank(),
            iterations: default_iterations(),
            learning_rate: default_learning_rate(),
            regularization: default_regularization(),
            alpha: default_alpha(),
            negative_label: default_negative_label(),
            seed: default_seed(),
        }
    }
}

/// Recommendation stage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationConfig {
    /// Delete existing RECOMMENDED_NEXT edges before writing new ones
    #[serde(default = "default_replace_existing")]
    pub replace_existing: bool,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            replace_existing: default_replace_existing(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database() -> String {
    "neo4j".to_string()
}

fn default_username() -> String {
    "neo4j".to_string()
}

fn default_password_env() -> String {
    "NEO4J_PASSWORD".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

fn default_concurrency() -> usize {
    1
}

fn default_rank() -> usize {
    8
}

fn default_iterations() -> usize {
    60
}

fn default_learning_rate() -> f32 {
    0.05
}

fn default_regularization() -> f32 {
    0.01
}

fn default_alpha() -> f32 {
    0.01
}

fn default_negative_label() -> f32 {
    0.00001
}

fn default_seed() -> u64 {
    42
}

fn default_replace_existing() -> bool {
    true
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in GRAPHREC_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        let config = Self::read()?;
        config.validate()?;
        Ok(config)
    }

    /// Locate and parse the config file like [`load`](Self::load), skipping
    /// validation. Used by tools that never talk to the graph.
    pub fn read() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("GRAPHREC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::parse(&config_str)
    }

    /// Parse configuration from TOML text without validating it
    pub fn parse(config_str: &str) -> Result<Self> {
        toml::from_str(config_str).context("Failed to parse config.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.source.db_path.is_file() {
            anyhow::bail!(
                "source.db_path does not exist or is not a file: {}",
                self.source.db_path.display()
            );
        }

        let uri = url::Url::parse(&self.graph.uri)
            .with_context(|| format!("graph.uri is not a valid URL: {}", self.graph.uri))?;
        if uri.scheme() != "http" && uri.scheme() != "https" {
            anyhow::bail!("graph.uri must use http or https, got {}", uri.scheme());
        }

        std::env::var(&self.graph.password_env).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable with the Neo4j password.",
                self.graph.password_env
            )
        })?;

        if self.graph.request_timeout_secs == 0 {
            anyhow::bail!("graph.request_timeout_secs must be greater than 0");
        }

        if self.migration.concurrency == 0 {
            anyhow::bail!("migration.concurrency must be greater than 0");
        }

        if self.model.rank == 0 {
            anyhow::bail!("model.rank must be greater than 0");
        }

        if self.model.iterations == 0 {
            anyhow::bail!("model.iterations must be greater than 0");
        }

        if self.model.learning_rate <= 0.0 {
            anyhow::bail!("model.learning_rate must be greater than 0");
        }

        if self.model.regularization < 0.0 || self.model.alpha < 0.0 {
            anyhow::bail!("model.regularization and model.alpha must not be negative");
        }

        Ok(())
    }

    /// Get relational source path
    pub fn db_path(&self) -> &Path {
        &self.source.db_path
    }

    /// Read the graph password from the configured environment variable
    pub fn graph_password(&self) -> Result<String> {
        std::env::var(&self.graph.password_env)
            .with_context(|| format!("Environment variable {} not set", self.graph.password_env))
    }
}
