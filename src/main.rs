use anyhow::Result;
use graphrec::{pipeline, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Logs go to stderr; RUST_LOG overrides the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", &config.log_level)
    ).init();

    log::info!("Starting GraphRec v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Relational source: {}", config.db_path().display());
    log::info!("Graph: {} (database {})", config.graph.uri, config.graph.database);

    let summary = pipeline::run(&config).await?;

    println!("Migration and recommendation completed.");
    println!(
        "  nodes created: {}, edges created: {}, edges skipped: {}",
        summary.migration.nodes_created(),
        summary.migration.edges_created(),
        summary.migration.edges_skipped()
    );
    println!(
        "  recommendations: {} written, {} customers skipped, {} previous removed (run {})",
        summary.recommendations.picks.len(),
        summary.recommendations.skipped.len(),
        summary.cleared,
        summary.recommendations.run_id
    );

    Ok(())
}
