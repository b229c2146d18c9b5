//! One-class matrix factorization over implicit purchase feedback.
//!
//! Every observed (customer, product) pair is a positive with target 1 and
//! weight 1. Every unobserved pair is a negative with a small target
//! (`negative_label`) and weight `alpha`. Factors are fitted with SGD over the
//! full customer x product grid; the score is the dot product of the two factors.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::ScoringOracle;
use crate::config::ModelConfig;
use crate::entities::Purchase;
use crate::error::{GraphRecError, Result};

/// Trained factor model. Build once, then score any number of pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplicitMfModel {
    rank: usize,
    customer_ids: Vec<i64>,
    product_ids: Vec<i64>,
    customer_factors: Vec<Vec<f32>>,
    product_factors: Vec<Vec<f32>>,
    #[serde(skip)]
    customer_index: HashMap<i64, usize>,
    #[serde(skip)]
    product_index: HashMap<i64, usize>,
}

fn index_of(ids: &[i64]) -> HashMap<i64, usize> {
    ids.iter().enumerate().map(|(i, &id)| (id, i)).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl ImplicitMfModel {
    /// Fit factors for every given customer and product id.
    ///
    /// Purchases naming an id outside those lists are ignored. Customers without
    /// purchases still get a factor (fitted toward the negative label).
    pub fn train(
        customer_ids: &[i64],
        product_ids: &[i64],
        purchases: &[Purchase],
        params: &ModelConfig,
    ) -> Result<Self> {
        if params.rank == 0 {
            return Err(GraphRecError::Model("rank must be greater than 0".to_string()));
        }

        let mut customers: Vec<i64> = Vec::with_capacity(customer_ids.len());
        let mut seen = HashSet::new();
        for &id in customer_ids {
            if seen.insert(id) {
                customers.push(id);
            }
        }
        let mut products: Vec<i64> = Vec::with_capacity(product_ids.len());
        seen.clear();
        for &id in product_ids {
            if seen.insert(id) {
                products.push(id);
            }
        }

        let customer_index = index_of(&customers);
        let product_index = index_of(&products);

        let mut positives: HashSet<(usize, usize)> = HashSet::new();
        let mut ignored = 0usize;
        for p in purchases {
            match (customer_index.get(&p.customer_id), product_index.get(&p.product_id)) {
                (Some(&u), Some(&i)) => {
                    positives.insert((u, i));
                }
                _ => ignored += 1,
            }
        }
        if ignored > 0 {
            log::warn!("Ignored {} purchases referencing unknown customers or products", ignored);
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut init = |n: usize| -> Vec<Vec<f32>> {
            (0..n)
                .map(|_| (0..params.rank).map(|_| rng.gen::<f32>() * 0.1).collect())
                .collect()
        };
        let mut p_factors = init(customers.len());
        let mut q_factors = init(products.len());

        let lr = params.learning_rate;
        let reg = params.regularization;
        let mut loss = 0.0f64;

        for _epoch in 0..params.iterations {
            loss = 0.0;
            for u in 0..customers.len() {
                for i in 0..products.len() {
                    let (target, weight) = if positives.contains(&(u, i)) {
                        (1.0f32, 1.0f32)
                    } else {
                        (params.negative_label, params.alpha)
                    };
                    let err = target - dot(&p_factors[u], &q_factors[i]);
                    loss += f64::from(weight * err * err);

                    let pu = &mut p_factors[u];
                    let qi = &mut q_factors[i];
                    for k in 0..params.rank {
                        let (pk, qk) = (pu[k], qi[k]);
                        pu[k] += lr * (weight * err * qk - reg * pk);
                        qi[k] += lr * (weight * err * pk - reg * qk);
                    }
                }
            }
        }

        let finite = p_factors.iter().chain(q_factors.iter()).flatten().all(|x| x.is_finite());
        if !finite {
            return Err(GraphRecError::Model(
                "training diverged; lower model.learning_rate".to_string(),
            ));
        }

        log::info!(
            "Trained model: {} customers x {} products, {} positives, rank {}, {} iterations, weighted loss {:.4}",
            customers.len(),
            products.len(),
            positives.len(),
            params.rank,
            params.iterations,
            loss
        );

        Ok(Self {
            rank: params.rank,
            customer_ids: customers,
            product_ids: products,
            customer_factors: p_factors,
            product_factors: q_factors,
            customer_index,
            product_index,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        log::info!("Model saved to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut model: Self = serde_json::from_reader(reader)?;
        model.validate_shape()?;
        model.customer_index = index_of(&model.customer_ids);
        model.product_index = index_of(&model.product_ids);
        log::info!(
            "Model loaded from {} ({} customers, {} products)",
            path.display(),
            model.customer_ids.len(),
            model.product_ids.len()
        );
        Ok(model)
    }

    fn validate_shape(&self) -> Result<()> {
        let rows_ok = self.customer_factors.len() == self.customer_ids.len()
            && self.product_factors.len() == self.product_ids.len();
        let rank_ok = self
            .customer_factors
            .iter()
            .chain(self.product_factors.iter())
            .all(|f| f.len() == self.rank);
        if rows_ok && rank_ok {
            Ok(())
        } else {
            Err(GraphRecError::Model("model file has inconsistent factor shapes".to_string()))
        }
    }
}

impl ScoringOracle for ImplicitMfModel {
    fn score(&self, customer_id: i64, product_id: i64) -> Result<f32> {
        let u = self
            .customer_index
            .get(&customer_id)
            .ok_or_else(|| GraphRecError::Scoring(format!("unknown customer {}", customer_id)))?;
        let i = self
            .product_index
            .get(&product_id)
            .ok_or_else(|| GraphRecError::Scoring(format!("unknown product {}", product_id)))?;
        Ok(dot(&self.customer_factors[*u], &self.product_factors[*i]))
    }
}
