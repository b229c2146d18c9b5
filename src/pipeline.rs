//! End-to-end run: relational source -> graph migration -> recommendations.

use anyhow::Context;
use tokio::task;

use crate::config::{Config, ModelConfig};
use crate::db::Db;
use crate::entities::{Dataset, TrainingSet};
use crate::error::{GraphRecError, Result};
use crate::graph::{GraphSink, Neo4jHttpSink, RelType};
use crate::migrate::{MigrationEngine, MigrationOptions, MigrationResult};
use crate::recommend::{recommend, Recommendations};
use crate::scoring::{ImplicitMfModel, ScoringOracle};
use crate::source;

/// Options for [`run_with`] beyond the migration policies
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub migration: MigrationOptions,
    /// Delete existing `RECOMMENDED_NEXT` edges before writing new ones
    pub replace_existing: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            migration: MigrationOptions::default(),
            replace_existing: true,
        }
    }
}

impl From<&Config> for RunOptions {
    fn from(config: &Config) -> Self {
        Self {
            migration: MigrationOptions::from(&config.migration),
            replace_existing: config.recommendations.replace_existing,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub migration: MigrationResult,
    /// Previous recommendation edges removed before this run
    pub cleared: u64,
    pub recommendations: Recommendations,
}

/// Migrate `dataset` into `sink`, then write one recommendation per customer.
pub async fn run_with<S, O>(
    sink: &S,
    dataset: &Dataset,
    oracle: &O,
    options: RunOptions,
) -> Result<RunSummary>
where
    S: GraphSink + ?Sized,
    O: ScoringOracle + ?Sized,
{
    let migration = MigrationEngine::new(sink, options.migration)
        .migrate_dataset(dataset)
        .await?;

    let cleared = if options.replace_existing {
        let n = sink.delete_relationships(RelType::RecommendedNext).await?;
        if n > 0 {
            log::info!("Removed {} previous recommendation edges", n);
        }
        n
    } else {
        0
    };

    let recommendations = recommend(sink, &dataset.customers, &dataset.products, oracle).await?;

    Ok(RunSummary {
        migration,
        cleared,
        recommendations,
    })
}

/// Load the persisted model, or train one from `training`.
///
/// Training happens when no `model_path` is set, the file does not exist yet, or
/// `retrain` is on. A freshly trained model is saved when `model_path` is set.
/// CPU-bound; async callers run it through `spawn_blocking`.
pub fn obtain_model(params: &ModelConfig, training: &TrainingSet) -> Result<ImplicitMfModel> {
    if let Some(path) = &params.model_path {
        if path.is_file() && !params.retrain {
            return ImplicitMfModel::load(path);
        }
    }

    let model = ImplicitMfModel::train(
        &training.customer_ids,
        &training.product_ids,
        &training.purchases,
        params,
    )?;

    if let Some(path) = &params.model_path {
        model.save(path)?;
    }
    Ok(model)
}

/// [`obtain_model`] on the blocking thread pool, so runtime workers stay free
/// while the factors are fitted.
pub async fn obtain_model_blocking(
    params: ModelConfig,
    training: TrainingSet,
) -> Result<ImplicitMfModel> {
    task::spawn_blocking(move || obtain_model(&params, &training))
        .await
        .map_err(|e| GraphRecError::Model(format!("training task failed: {}", e)))?
}

/// Run the whole pipeline against the configured SQLite file and Neo4j server.
pub async fn run(config: &Config) -> anyhow::Result<RunSummary> {
    let db = Db::read_only(config.db_path());
    let dataset = source::load_dataset(&db)
        .await
        .with_context(|| format!("Failed to read relational source {}", config.db_path().display()))?;

    let model = obtain_model_blocking(config.model.clone(), dataset.training_set())
        .await
        .context("Failed to obtain scoring model")?;

    let sink = Neo4jHttpSink::connect(&config.graph, config.graph_password()?)
        .await
        .with_context(|| format!("Failed to connect to graph at {}", config.graph.uri))?;

    let summary = run_with(&sink, &dataset, &model, RunOptions::from(config)).await?;

    log::info!(
        "Run complete: {} nodes created, {} edges created, {} edges skipped, {} recommendations, {} customers without recommendation",
        summary.migration.nodes_created(),
        summary.migration.edges_created(),
        summary.migration.edges_skipped(),
        summary.recommendations.picks.len(),
        summary.recommendations.skipped.len()
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Customer, Order, OrderItem, Product};
    use crate::graph::MemoryGraph;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn dataset() -> Dataset {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(10, 0, 0).unwrap();
        Dataset {
            customers: vec![
                Customer { id: 1, first_name: "Ada".into(), last_name: "L".into() },
                Customer { id: 2, first_name: "Alan".into(), last_name: "T".into() },
            ],
            products: vec![
                Product { id: 10, name: "Tea".into(), category: "Food".into(), price: 3.5 },
                Product { id: 20, name: "Mug".into(), category: "Home".into(), price: 8.0 },
            ],
            orders: vec![
                Order { id: 100, customer_id: 1, date },
                Order { id: 101, customer_id: 2, date },
            ],
            order_items: vec![
                OrderItem { id: 1000, order_id: 100, product_id: 10, quantity: 2, unit_price: 3.5 },
                OrderItem { id: 1001, order_id: 101, product_id: 20, quantity: 1, unit_price: 8.0 },
            ],
        }
    }

    fn model_params() -> ModelConfig {
        ModelConfig {
            rank: 4,
            iterations: 20,
            ..ModelConfig::default()
        }
    }

    #[tokio::test]
    async fn test_rerun_replaces_recommendations() {
        let graph = MemoryGraph::new();
        let data = dataset();
        let oracle = |_c: i64, p: i64| -> Result<f32> { Ok(p as f32) };

        let first = run_with(&graph, &data, &oracle, RunOptions::default()).await.unwrap();
        assert_eq!(first.cleared, 0);
        assert_eq!(first.migration.nodes_created(), 8);

        let second = run_with(&graph, &data, &oracle, RunOptions::default()).await.unwrap();
        assert_eq!(second.cleared, 2);
        assert_eq!(second.migration.nodes_created(), 0);
        assert_eq!(second.migration.edges_created(), 0);
        assert_eq!(graph.relationship_count(RelType::RecommendedNext), 2);
    }

    #[tokio::test]
    async fn test_keep_existing_recommendations() {
        let graph = MemoryGraph::new();
        let data = dataset();
        let oracle = |_c: i64, p: i64| -> Result<f32> { Ok(p as f32) };
        let options = RunOptions {
            replace_existing: false,
            ..RunOptions::default()
        };

        run_with(&graph, &data, &oracle, options).await.unwrap();
        let second = run_with(&graph, &data, &oracle, options).await.unwrap();
        assert_eq!(second.cleared, 0);
        assert_eq!(graph.relationship_count(RelType::RecommendedNext), 4);
    }

    #[tokio::test]
    async fn test_connection_failure_stops_the_run() {
        let graph = MemoryGraph::failing_after(3);
        let oracle = |_c: i64, _p: i64| -> Result<f32> { Ok(1.0) };
        let err = run_with(&graph, &dataset(), &oracle, RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphRecError::Connection(_)));
        assert_eq!(graph.relationship_count(RelType::RecommendedNext), 0);
    }

    #[test]
    fn test_obtain_model_trains_then_loads() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.json");
        let params = ModelConfig {
            model_path: Some(path.clone()),
            ..model_params()
        };
        let data = dataset();

        let trained = obtain_model(&params, &data.training_set()).unwrap();
        assert!(path.is_file());

        let loaded = obtain_model(&params, &data.training_set()).unwrap();
        assert_eq!(loaded.score(1, 10).unwrap(), trained.score(1, 10).unwrap());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_blocking_pool_training_matches_inline_training() {
        let data = dataset();
        let inline = obtain_model(&model_params(), &data.training_set()).unwrap();
        let pooled = obtain_model_blocking(model_params(), data.training_set()).await.unwrap();

        assert_eq!(pooled.score(1, 10).unwrap(), inline.score(1, 10).unwrap());
        assert_eq!(pooled.score(2, 20).unwrap(), inline.score(2, 20).unwrap());
    }

    #[test]
    fn test_obtain_model_without_path_trains_in_memory() {
        let model = obtain_model(&model_params(), &dataset().training_set()).unwrap();
        assert!(model.score(2, 20).unwrap().is_finite());
    }
}
