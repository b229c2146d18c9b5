use anyhow::{Context, Result};
use clap::Parser;
use graphrec::db::Db;
use graphrec::{pipeline, source, Config};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(about = "Train the purchase scoring model from the relational source and save it")]
struct Args {
    /// Where to write the model (defaults to model.model_path from config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override model.rank
    #[arg(long)]
    rank: Option<usize>,

    /// Override model.iterations
    #[arg(long)]
    iterations: Option<usize>,

    /// Override model.seed
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::read()?;

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", &config.log_level)
    ).init();

    let mut params = config.model.clone();
    if let Some(rank) = args.rank {
        params.rank = rank;
    }
    if let Some(iterations) = args.iterations {
        params.iterations = iterations;
    }
    if let Some(seed) = args.seed {
        params.seed = seed;
    }

    let output = args
        .output
        .or_else(|| params.model_path.clone())
        .context("No output path: pass --output or set model.model_path in config.toml")?;

    let db = Db::read_only(config.db_path());
    let dataset = source::load_dataset(&db)
        .await
        .with_context(|| format!("Failed to read relational source {}", config.db_path().display()))?;
    let training = dataset.training_set();

    log::info!(
        "Training on {} customers, {} products, {} distinct purchases",
        training.customer_ids.len(),
        training.product_ids.len(),
        training.purchases.len()
    );

    // Always fit a fresh model and write it to `output`
    params.model_path = Some(output.clone());
    params.retrain = true;

    let start = Instant::now();
    let model = pipeline::obtain_model_blocking(params.clone(), training).await?;

    println!(
        "Model trained in {:.1}s (rank {}, {} iterations) and saved to {}",
        start.elapsed().as_secs_f64(),
        model.rank(),
        params.iterations,
        output.display()
    );

    Ok(())
}
