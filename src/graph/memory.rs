//! In-process graph sink with the same write semantics as the Cypher statements.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use super::{
    GraphSink, NodeLabel, NodePolicy, NodeRef, Properties, RelType, Relationship, RelationshipMode,
    WriteOutcome,
};
use crate::error::{GraphRecError, Result};

/// A relationship as stored by [`MemoryGraph`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRelationship {
    pub rel_type: RelType,
    pub from: NodeRef,
    pub to: NodeRef,
    /// Identity and creation properties merged
    pub properties: Properties,
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<NodeRef, Properties>,
    relationships: Vec<StoredRelationship>,
    key_constraints: BTreeSet<NodeLabel>,
    writes: usize,
}

/// Graph held in memory; used by tests.
#[derive(Default)]
pub struct MemoryGraph {
    state: Mutex<State>,
    /// Number of successful writes after which every call fails as if the store went away
    fail_after_writes: Option<usize>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// A graph that loses its "connection" after `writes` successful writes.
    pub fn failing_after(writes: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            fail_after_writes: Some(writes),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self, state: &State) -> Result<()> {
        match self.fail_after_writes {
            Some(limit) if state.writes >= limit => Err(GraphRecError::Connection(
                "memory graph write budget exhausted".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn node_count(&self, label: NodeLabel) -> usize {
        self.lock().nodes.keys().filter(|n| n.label == label).count()
    }

    pub fn node(&self, node: NodeRef) -> Option<Properties> {
        self.lock().nodes.get(&node).cloned()
    }

    pub fn relationships(&self, rel_type: RelType) -> Vec<StoredRelationship> {
        self.lock()
            .relationships
            .iter()
            .filter(|r| r.rel_type == rel_type)
            .cloned()
            .collect()
    }

    pub fn relationship_count(&self, rel_type: RelType) -> usize {
        self.lock()
            .relationships
            .iter()
            .filter(|r| r.rel_type == rel_type)
            .count()
    }

    pub fn has_key_constraint(&self, label: NodeLabel) -> bool {
        self.lock().key_constraints.contains(&label)
    }

    /// Total successful write calls so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }
}

#[async_trait]
impl GraphSink for MemoryGraph {
    async fn verify_connectivity(&self) -> Result<()> {
        let state = self.lock();
        self.check_available(&state)
    }

    async fn ensure_key_constraint(&self, label: NodeLabel) -> Result<()> {
        // Node map keys are unique already; only remember the call
        let mut state = self.lock();
        self.check_available(&state)?;
        state.key_constraints.insert(label);
        Ok(())
    }

    async fn upsert_node(
        &self,
        node: NodeRef,
        properties: &Properties,
        policy: NodePolicy,
    ) -> Result<WriteOutcome> {
        let mut state = self.lock();
        self.check_available(&state)?;
        state.writes += 1;

        if let Some(existing) = state.nodes.get_mut(&node) {
            if policy == NodePolicy::MergeOnUpdate {
                for (k, v) in properties {
                    existing.insert(k.clone(), v.clone());
                }
            }
            return Ok(WriteOutcome::AlreadyPresent);
        }

        let mut props = properties.clone();
        props.insert(super::KEY_PROPERTY.to_string(), node.key.into());
        state.nodes.insert(node, props);
        Ok(WriteOutcome::Created)
    }

    async fn write_relationship(
        &self,
        relationship: &Relationship,
        mode: RelationshipMode,
    ) -> Result<WriteOutcome> {
        let mut state = self.lock();
        self.check_available(&state)?;

        if !state.nodes.contains_key(&relationship.from) || !state.nodes.contains_key(&relationship.to) {
            return Err(GraphRecError::MissingEndpoint {
                rel_type: relationship.rel_type.to_string(),
                from_label: relationship.from.label.to_string(),
                from_key: relationship.from.key,
                to_label: relationship.to.label.to_string(),
                to_key: relationship.to.key,
            });
        }
        state.writes += 1;

        if mode == RelationshipMode::Merge {
            let exists = state.relationships.iter().any(|r| {
                r.rel_type == relationship.rel_type
                    && r.from == relationship.from
                    && r.to == relationship.to
                    && relationship
                        .identity
                        .iter()
                        .all(|(k, v)| r.properties.get(k) == Some(v))
            });
            if exists {
                return Ok(WriteOutcome::AlreadyPresent);
            }
        }

        let mut properties = relationship.identity.clone();
        for (k, v) in &relationship.properties {
            properties.insert(k.clone(), v.clone());
        }
        state.relationships.push(StoredRelationship {
            rel_type: relationship.rel_type,
            from: relationship.from,
            to: relationship.to,
            properties,
        });
        Ok(WriteOutcome::Created)
    }

    async fn delete_relationships(&self, rel_type: RelType) -> Result<u64> {
        let mut state = self.lock();
        self.check_available(&state)?;
        state.writes += 1;
        let before = state.relationships.len();
        state.relationships.retain(|r| r.rel_type != rel_type);
        Ok((before - state.relationships.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(name: &str) -> Properties {
        let mut p = Properties::new();
        p.insert("firstName".into(), json!(name));
        p
    }

    #[tokio::test]
    async fn test_merge_on_create_keeps_existing_attributes() {
        let graph = MemoryGraph::new();
        let node = NodeRef::new(NodeLabel::Customer, 1);

        let first = graph.upsert_node(node, &props("X"), NodePolicy::MergeOnCreate).await.unwrap();
        let second = graph.upsert_node(node, &props("Y"), NodePolicy::MergeOnCreate).await.unwrap();

        assert_eq!(first, WriteOutcome::Created);
        assert_eq!(second, WriteOutcome::AlreadyPresent);
        assert_eq!(graph.node(node).unwrap()["firstName"], json!("X"));
        assert_eq!(graph.node(node).unwrap()["id"], json!(1));
        assert_eq!(graph.node_count(NodeLabel::Customer), 1);
    }

    #[tokio::test]
    async fn test_merge_on_update_overwrites() {
        let graph = MemoryGraph::new();
        let node = NodeRef::new(NodeLabel::Customer, 1);
        graph.upsert_node(node, &props("X"), NodePolicy::MergeOnCreate).await.unwrap();
        graph.upsert_node(node, &props("Y"), NodePolicy::MergeOnUpdate).await.unwrap();
        assert_eq!(graph.node(node).unwrap()["firstName"], json!("Y"));
    }

    #[tokio::test]
    async fn test_relationship_requires_endpoints() {
        let graph = MemoryGraph::new();
        let customer = NodeRef::new(NodeLabel::Customer, 1);
        graph.upsert_node(customer, &Properties::new(), NodePolicy::MergeOnCreate).await.unwrap();

        let rel = Relationship::new(RelType::Placed, customer, NodeRef::new(NodeLabel::Order, 9));
        let err = graph.write_relationship(&rel, RelationshipMode::Merge).await.unwrap_err();
        assert!(matches!(err, GraphRecError::MissingEndpoint { to_key: 9, .. }));
        assert_eq!(graph.relationship_count(RelType::Placed), 0);
    }

    #[tokio::test]
    async fn test_merge_vs_create_relationships() {
        let graph = MemoryGraph::new();
        let order = NodeRef::new(NodeLabel::Order, 1);
        let product = NodeRef::new(NodeLabel::Product, 2);
        graph.upsert_node(order, &Properties::new(), NodePolicy::MergeOnCreate).await.unwrap();
        graph.upsert_node(product, &Properties::new(), NodePolicy::MergeOnCreate).await.unwrap();

        let item_a = Relationship::new(RelType::Contains, order, product).with_identity("orderItemId", 10);
        let item_b = Relationship::new(RelType::Contains, order, product).with_identity("orderItemId", 11);

        assert_eq!(graph.write_relationship(&item_a, RelationshipMode::Merge).await.unwrap(), WriteOutcome::Created);
        assert_eq!(graph.write_relationship(&item_a, RelationshipMode::Merge).await.unwrap(), WriteOutcome::AlreadyPresent);
        assert_eq!(graph.write_relationship(&item_b, RelationshipMode::Merge).await.unwrap(), WriteOutcome::Created);
        assert_eq!(graph.relationship_count(RelType::Contains), 2);

        graph.write_relationship(&item_a, RelationshipMode::Create).await.unwrap();
        assert_eq!(graph.relationship_count(RelType::Contains), 3);
    }

    #[tokio::test]
    async fn test_delete_relationships_by_type() {
        let graph = MemoryGraph::new();
        let c = NodeRef::new(NodeLabel::Customer, 1);
        let p = NodeRef::new(NodeLabel::Product, 1);
        let o = NodeRef::new(NodeLabel::Order, 1);
        for n in [c, p, o] {
            graph.upsert_node(n, &Properties::new(), NodePolicy::MergeOnCreate).await.unwrap();
        }
        let rec = Relationship::new(RelType::RecommendedNext, c, p);
        graph.write_relationship(&rec, RelationshipMode::Create).await.unwrap();
        graph.write_relationship(&rec, RelationshipMode::Create).await.unwrap();
        graph.write_relationship(&Relationship::new(RelType::Placed, c, o), RelationshipMode::Merge).await.unwrap();

        assert_eq!(graph.delete_relationships(RelType::RecommendedNext).await.unwrap(), 2);
        assert_eq!(graph.relationship_count(RelType::RecommendedNext), 0);
        assert_eq!(graph.relationship_count(RelType::Placed), 1);
    }

    #[tokio::test]
    async fn test_failing_after_budget() {
        let graph = MemoryGraph::failing_after(1);
        let node = NodeRef::new(NodeLabel::Customer, 1);
        graph.upsert_node(node, &Properties::new(), NodePolicy::MergeOnCreate).await.unwrap();
        let err = graph
            .upsert_node(NodeRef::new(NodeLabel::Customer, 2), &Properties::new(), NodePolicy::MergeOnCreate)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(graph.verify_connectivity().await.is_err());
    }
}
