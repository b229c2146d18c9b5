//! Next-purchase selection: one `RECOMMENDED_NEXT` edge per customer.
//!
//! For each customer every product is scored and the highest score wins; on a
//! tie the product that comes first in the given ordering wins. The edge is
//! always created, never merged, so callers that re-run the selector clear old
//! recommendations first (see [`crate::pipeline`]).

use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::entities::{Customer, Product};
use crate::error::{GraphRecError, Result};
use crate::graph::{GraphSink, NodeLabel, NodeRef, Properties, RelType, Relationship, RelationshipMode};
use crate::scoring::ScoringOracle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recommendation {
    pub customer_id: i64,
    pub product_id: i64,
    pub score: f32,
}

/// A customer whose evaluation stopped on a scoring failure.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedCustomer {
    pub customer_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Recommendations {
    /// Tags every edge written by this call
    pub run_id: Uuid,
    /// In customer order
    pub picks: Vec<Recommendation>,
    pub skipped: Vec<SkippedCustomer>,
}

impl Recommendations {
    /// Customer id -> recommended product id.
    pub fn mapping(&self) -> BTreeMap<i64, i64> {
        self.picks.iter().map(|r| (r.customer_id, r.product_id)).collect()
    }
}

/// Arg-max over `products` for one customer.
///
/// `Ok(None)` for an empty catalog. The first scoring error (or a NaN score)
/// stops the loop and is returned.
pub fn select_best<O: ScoringOracle + ?Sized>(
    customer_id: i64,
    products: &[Product],
    oracle: &O,
) -> Result<Option<Recommendation>> {
    let mut best: Option<Recommendation> = None;
    for product in products {
        let score = oracle.score(customer_id, product.id)?;
        if score.is_nan() {
            return Err(GraphRecError::Scoring(format!(
                "NaN score for customer {} / product {}",
                customer_id, product.id
            )));
        }
        // strict comparison keeps the first maximum
        if best.map_or(true, |b| score > b.score) {
            best = Some(Recommendation {
                customer_id,
                product_id: product.id,
                score,
            });
        }
    }
    Ok(best)
}

fn edge_properties(pick: &Recommendation, run_id: Uuid, generated_at: &str) -> Properties {
    let mut p = Properties::new();
    p.insert("score".into(), json!(pick.score));
    p.insert("runId".into(), json!(run_id.to_string()));
    p.insert("generatedAt".into(), json!(generated_at));
    p
}

/// Score every (customer, product) pair and write the winning edge per customer.
///
/// A scoring failure skips only that customer. A sink failure aborts the batch.
pub async fn recommend<S, O>(
    sink: &S,
    customers: &[Customer],
    products: &[Product],
    oracle: &O,
) -> Result<Recommendations>
where
    S: GraphSink + ?Sized,
    O: ScoringOracle + ?Sized,
{
    let run_id = Uuid::new_v4();
    let generated_at = Utc::now().to_rfc3339();
    let mut picks = Vec::new();
    let mut skipped = Vec::new();

    if products.is_empty() {
        log::warn!("Product catalog is empty; no recommendations written");
    }

    for customer in customers {
        let pick = match select_best(customer.id, products, oracle) {
            Ok(Some(pick)) => pick,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("Skipping recommendation for customer {}: {}", customer.id, e);
                skipped.push(SkippedCustomer {
                    customer_id: customer.id,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let edge = Relationship::new(
            RelType::RecommendedNext,
            NodeRef::new(NodeLabel::Customer, pick.customer_id),
            NodeRef::new(NodeLabel::Product, pick.product_id),
        )
        .with_properties(edge_properties(&pick, run_id, &generated_at));
        sink.write_relationship(&edge, RelationshipMode::Create).await?;

        log::debug!(
            "Customer {} -> product {} (score {:.4})",
            pick.customer_id,
            pick.product_id,
            pick.score
        );
        picks.push(pick);
    }

    log::info!(
        "Recommendations: {} written, {} customers skipped (run {})",
        picks.len(),
        skipped.len(),
        run_id
    );

    Ok(Recommendations {
        run_id,
        picks,
        skipped,
    })
}
