//! Scoring oracle: purchase likelihood for a (customer, product) pair.

mod mf;

pub use mf::ImplicitMfModel;

use crate::error::Result;

/// Higher score means the customer is more likely to buy the product next.
pub trait ScoringOracle: Send + Sync {
    fn score(&self, customer_id: i64, product_id: i64) -> Result<f32>;
}

impl<F> ScoringOracle for F
where
    F: Fn(i64, i64) -> Result<f32> + Send + Sync,
{
    fn score(&self, customer_id: i64, product_id: i64) -> Result<f32> {
        self(customer_id, product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_an_oracle() {
        let oracle = |c: i64, p: i64| -> Result<f32> { Ok((c * 10 + p) as f32) };
        assert_eq!(oracle.score(1, 2).unwrap(), 12.0);
    }
}
