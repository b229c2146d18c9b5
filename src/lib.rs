pub mod config;
pub mod error;
pub mod db;
pub mod entities;
pub mod source;
pub mod graph;
pub mod scoring;
pub mod migrate;
pub mod recommend;
pub mod pipeline;

pub use config::Config;
pub use error::{GraphRecError, Result};
pub use graph::{GraphSink, MemoryGraph, Neo4jHttpSink};
pub use migrate::{MigrationEngine, MigrationOptions, MigrationResult};
pub use recommend::{recommend, Recommendations};
pub use scoring::{ImplicitMfModel, ScoringOracle};
