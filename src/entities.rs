//! Relational entities read from the source and the in-memory dataset the
//! migration and recommendation stages share.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub date: NaiveDateTime,
}

/// A line item: joins an order to a product with quantity and unit price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price: f64,
}

/// A (customer, product) pair observed in purchase history; the training input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Purchase {
    pub customer_id: i64,
    pub product_id: i64,
}

/// All four collections, in source order, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub customers: Vec<Customer>,
    pub products: Vec<Product>,
    pub orders: Vec<Order>,
    pub order_items: Vec<OrderItem>,
}

impl Dataset {
    /// Distinct purchases derived from order items joined to their orders.
    ///
    /// Items whose order is not in the dataset are ignored. Output is sorted.
    pub fn purchases(&self) -> Vec<Purchase> {
        let owners: std::collections::HashMap<i64, i64> = self
            .orders
            .iter()
            .map(|o| (o.id, o.customer_id))
            .collect();

        let mut out: Vec<Purchase> = self
            .order_items
            .iter()
            .filter_map(|item| {
                owners.get(&item.order_id).map(|&customer_id| Purchase {
                    customer_id,
                    product_id: item.product_id,
                })
            })
            .collect();
        out.sort_by_key(|p| (p.customer_id, p.product_id));
        out.dedup();
        out
    }

    /// Everything the scoring model is fitted on. The pipeline and the `train`
    /// binary both build their model from this.
    pub fn training_set(&self) -> TrainingSet {
        TrainingSet {
            customer_ids: self.customers.iter().map(|c| c.id).collect(),
            product_ids: self.products.iter().map(|p| p.id).collect(),
            purchases: self.purchases(),
        }
    }
}

/// Model training input: ids that get a factor, plus observed purchases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingSet {
    pub customer_ids: Vec<i64>,
    pub product_ids: Vec<i64>,
    pub purchases: Vec<Purchase>,
}
