//! Graph sink: the write-only API the migration and recommendation stages use.
//!
//! Nodes are keyed by `(label, id)`. Relationships are written between two
//! existing nodes; a missing endpoint is reported as
//! [`GraphRecError::MissingEndpoint`](crate::error::GraphRecError::MissingEndpoint)
//! and nothing is written.

mod cypher;
mod memory;
mod neo4j;

pub use memory::{MemoryGraph, StoredRelationship};
pub use neo4j::Neo4jHttpSink;

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

use crate::error::Result;

/// Property map attached to a node or relationship.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Property every node is keyed on.
pub const KEY_PROPERTY: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeLabel {
    Customer,
    Product,
    Order,
    OrderItem,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 4] = [
        NodeLabel::Customer,
        NodeLabel::Product,
        NodeLabel::Order,
        NodeLabel::OrderItem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Customer => "Customer",
            NodeLabel::Product => "Product",
            NodeLabel::Order => "Order",
            NodeLabel::OrderItem => "OrderItem",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelType {
    /// Customer -> Order
    Placed,
    /// Order -> Product, one per order item
    Contains,
    /// Customer -> Product, derived from the scoring model
    RecommendedNext,
}

impl RelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::Placed => "PLACED",
            RelType::Contains => "CONTAINS",
            RelType::RecommendedNext => "RECOMMENDED_NEXT",
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node match: label plus relational primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub label: NodeLabel,
    pub key: i64,
}

impl NodeRef {
    pub fn new(label: NodeLabel, key: i64) -> Self {
        Self { label, key }
    }
}

/// A relationship to write between two existing nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub rel_type: RelType,
    pub from: NodeRef,
    pub to: NodeRef,
    /// Properties that, together with the endpoints, identify the relationship
    /// under [`RelationshipMode::Merge`]. Empty means "one per endpoint pair".
    pub identity: Properties,
    /// Properties set when the relationship is created.
    pub properties: Properties,
}

impl Relationship {
    pub fn new(rel_type: RelType, from: NodeRef, to: NodeRef) -> Self {
        Self {
            rel_type,
            from,
            to,
            identity: Properties::new(),
            properties: Properties::new(),
        }
    }

    pub fn with_identity(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.identity.insert(name.to_string(), value.into());
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

/// What happens to attributes of a node that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePolicy {
    /// Set attributes only when the node is created; existing nodes are left untouched.
    MergeOnCreate,
    /// Overwrite attributes on every run.
    MergeOnUpdate,
}

/// How relationships are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipMode {
    /// Match-or-create; re-runs do not duplicate edges.
    #[default]
    Merge,
    /// Always create a new edge; re-runs duplicate edges.
    Create,
}

/// What the migration does with a relationship whose endpoint is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DanglingEdgePolicy {
    /// Log and count the edge, continue the run.
    #[default]
    Skip,
    /// Fail the run.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    AlreadyPresent,
}

/// Transactional write API of a property-graph store.
///
/// Each call is atomic on its own; callers get no multi-call transaction.
#[async_trait]
pub trait GraphSink: Send + Sync {
    /// Cheap round trip proving the store is reachable and credentials work.
    async fn verify_connectivity(&self) -> Result<()>;

    /// Make `id` unique (and indexed) for nodes of `label`. Safe to repeat.
    async fn ensure_key_constraint(&self, label: NodeLabel) -> Result<()>;

    /// Upsert a node keyed by `node.key`; `properties` must not contain the key.
    async fn upsert_node(
        &self,
        node: NodeRef,
        properties: &Properties,
        policy: NodePolicy,
    ) -> Result<WriteOutcome>;

    /// Write a relationship between two existing nodes.
    async fn write_relationship(
        &self,
        relationship: &Relationship,
        mode: RelationshipMode,
    ) -> Result<WriteOutcome>;

    /// Delete every relationship of the given type; returns how many were removed.
    async fn delete_relationships(&self, rel_type: RelType) -> Result<u64>;
}
