//! Relational-to-graph migration.
//!
//! Stages run strictly in order: customers, products, orders (+ `PLACED`),
//! order items (+ `CONTAINS`). A stage finishes completely before the next one
//! starts, so every relationship is written after both of its endpoints. Within a
//! stage, writes may overlap up to `concurrency`.

use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::json;
use std::future::Future;

use crate::config::MigrationConfig;
use crate::entities::{Customer, Dataset, Order, OrderItem, Product};
use crate::error::{GraphRecError, Result};
use crate::graph::{
    DanglingEdgePolicy, GraphSink, NodeLabel, NodePolicy, NodeRef, Properties, RelType,
    Relationship, RelationshipMode, WriteOutcome,
};

/// Property carrying the source row id on a `CONTAINS` edge.
pub const ORDER_ITEM_ID_PROPERTY: &str = "orderItemId";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    pub relationship_mode: RelationshipMode,
    pub dangling_edges: DanglingEdgePolicy,
    pub concurrency: usize,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            relationship_mode: RelationshipMode::Merge,
            dangling_edges: DanglingEdgePolicy::Skip,
            concurrency: 1,
        }
    }
}

impl From<&MigrationConfig> for MigrationOptions {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            relationship_mode: config.relationship_mode,
            dangling_edges: config.dangling_edges,
            concurrency: config.concurrency.max(1),
        }
    }
}

/// Node writes for one label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounts {
    pub created: usize,
    pub existing: usize,
}

impl NodeCounts {
    fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.created += 1,
            WriteOutcome::AlreadyPresent => self.existing += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.existing
    }
}

/// Relationship writes for one type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeCounts {
    pub created: usize,
    pub existing: usize,
    /// Not written because an endpoint was missing
    pub skipped: usize,
}

impl EdgeCounts {
    fn record(&mut self, outcome: EdgeOutcome) {
        match outcome {
            EdgeOutcome::Written(WriteOutcome::Created) => self.created += 1,
            EdgeOutcome::Written(WriteOutcome::AlreadyPresent) => self.existing += 1,
            EdgeOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Per-label and per-type counts of one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationResult {
    pub customers: NodeCounts,
    pub products: NodeCounts,
    pub orders: NodeCounts,
    pub order_items: NodeCounts,
    pub placed: EdgeCounts,
    pub contains: EdgeCounts,
}

impl MigrationResult {
    pub fn nodes_created(&self) -> usize {
        self.customers.created + self.products.created + self.orders.created + self.order_items.created
    }

    pub fn edges_created(&self) -> usize {
        self.placed.created + self.contains.created
    }

    pub fn edges_skipped(&self) -> usize {
        self.placed.skipped + self.contains.skipped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeOutcome {
    Written(WriteOutcome),
    Skipped,
}

pub fn customer_properties(c: &Customer) -> Properties {
    let mut p = Properties::new();
    p.insert("firstName".into(), json!(c.first_name));
    p.insert("lastName".into(), json!(c.last_name));
    p
}

pub fn product_properties(p: &Product) -> Properties {
    let mut props = Properties::new();
    props.insert("name".into(), json!(p.name));
    props.insert("category".into(), json!(p.category));
    props.insert("price".into(), json!(p.price));
    props
}

pub fn order_properties(o: &Order) -> Properties {
    let mut p = Properties::new();
    p.insert("date".into(), json!(o.date.format("%Y-%m-%dT%H:%M:%S").to_string()));
    p
}

pub fn order_item_properties(i: &OrderItem) -> Properties {
    let mut p = Properties::new();
    p.insert("quantity".into(), json!(i.quantity));
    p.insert("unitPrice".into(), json!(i.unit_price));
    p
}

pub fn placed_relationship(o: &Order) -> Relationship {
    Relationship::new(
        RelType::Placed,
        NodeRef::new(NodeLabel::Customer, o.customer_id),
        NodeRef::new(NodeLabel::Order, o.id),
    )
}

/// `Order -CONTAINS-> Product` carrying the item's quantity and unit price.
///
/// The OrderItem node itself is not attached to this edge.
pub fn contains_relationship(i: &OrderItem) -> Relationship {
    Relationship::new(
        RelType::Contains,
        NodeRef::new(NodeLabel::Order, i.order_id),
        NodeRef::new(NodeLabel::Product, i.product_id),
    )
    .with_identity(ORDER_ITEM_ID_PROPERTY, i.id)
    .with_properties(order_item_properties(i))
}

/// Writes the structural graph for a dataset into a [`GraphSink`].
pub struct MigrationEngine<'a, S: GraphSink + ?Sized> {
    sink: &'a S,
    options: MigrationOptions,
}

impl<'a, S: GraphSink + ?Sized> MigrationEngine<'a, S> {
    pub fn new(sink: &'a S, options: MigrationOptions) -> Self {
        Self { sink, options }
    }

    pub async fn migrate_dataset(&self, dataset: &Dataset) -> Result<MigrationResult> {
        self.migrate(
            &dataset.customers,
            &dataset.products,
            &dataset.orders,
            &dataset.order_items,
        )
        .await
    }

    /// Ensure the key constraints, then run all four stages. The first failing
    /// write aborts the run; there is no checkpoint, so callers re-run from scratch.
    pub async fn migrate(
        &self,
        customers: &[Customer],
        products: &[Product],
        orders: &[Order],
        order_items: &[OrderItem],
    ) -> Result<MigrationResult> {
        for label in NodeLabel::ALL {
            self.sink.ensure_key_constraint(label).await?;
        }
        log::info!("Key constraints in place for {} labels", NodeLabel::ALL.len());

        let mut result = MigrationResult::default();

        for outcome in self
            .stage("customers", customers, |c| {
                self.upsert(NodeRef::new(NodeLabel::Customer, c.id), customer_properties(c))
            })
            .await?
        {
            result.customers.record(outcome);
        }
        log::info!(
            "Customers: {} created, {} already present",
            result.customers.created,
            result.customers.existing
        );

        for outcome in self
            .stage("products", products, |p| {
                self.upsert(NodeRef::new(NodeLabel::Product, p.id), product_properties(p))
            })
            .await?
        {
            result.products.record(outcome);
        }
        log::info!(
            "Products: {} created, {} already present",
            result.products.created,
            result.products.existing
        );

        for (node, edge) in self
            .stage("orders", orders, |o| async move {
                let node = self
                    .upsert(NodeRef::new(NodeLabel::Order, o.id), order_properties(o))
                    .await?;
                let edge = self.relate(placed_relationship(o)).await?;
                Ok::<_, GraphRecError>((node, edge))
            })
            .await?
        {
            result.orders.record(node);
            result.placed.record(edge);
        }
        log::info!(
            "Orders: {} created, {} already present; PLACED: {} created, {} already present, {} skipped",
            result.orders.created,
            result.orders.existing,
            result.placed.created,
            result.placed.existing,
            result.placed.skipped
        );

        for (node, edge) in self
            .stage("order items", order_items, |i| async move {
                let node = self
                    .upsert(NodeRef::new(NodeLabel::OrderItem, i.id), order_item_properties(i))
                    .await?;
                let edge = self.relate(contains_relationship(i)).await?;
                Ok::<_, GraphRecError>((node, edge))
            })
            .await?
        {
            result.order_items.record(node);
            result.contains.record(edge);
        }
        log::info!(
            "Order items: {} created, {} already present; CONTAINS: {} created, {} already present, {} skipped",
            result.order_items.created,
            result.order_items.existing,
            result.contains.created,
            result.contains.existing,
            result.contains.skipped
        );

        Ok(result)
    }

    /// Apply `op` to every item with at most `concurrency` calls in flight.
    /// Returns once all of them finished, or at the first error.
    async fn stage<'i, T, F, Fut, O>(&self, name: &str, items: &'i [T], op: F) -> Result<Vec<O>>
    where
        F: Fn(&'i T) -> Fut,
        Fut: Future<Output = Result<O>>,
    {
        log::debug!("Stage {}: {} rows", name, items.len());
        let outcomes: Vec<O> = stream::iter(items.iter().map(op))
            .buffer_unordered(self.options.concurrency.max(1))
            .try_collect()
            .await
            .map_err(|e| {
                log::error!("Stage {} aborted: {}", name, e);
                e
            })?;
        Ok(outcomes)
    }

    async fn upsert(&self, node: NodeRef, properties: Properties) -> Result<WriteOutcome> {
        self.sink
            .upsert_node(node, &properties, NodePolicy::MergeOnCreate)
            .await
    }

    async fn relate(&self, relationship: Relationship) -> Result<EdgeOutcome> {
        match self
            .sink
            .write_relationship(&relationship, self.options.relationship_mode)
            .await
        {
            Ok(outcome) => Ok(EdgeOutcome::Written(outcome)),
            Err(e @ GraphRecError::MissingEndpoint { .. })
                if self.options.dangling_edges == DanglingEdgePolicy::Skip =>
            {
                log::warn!("Skipping relationship: {}", e);
                Ok(EdgeOutcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }
}
