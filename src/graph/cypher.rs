//! Cypher statement builders for the Neo4j sink.
//!
//! Labels, relationship types and identity property names come from the crate's
//! own enums and constants, never from data, so they are interpolated directly.
//! Every value travels as a parameter.

use serde::Serialize;
use serde_json::{json, Value};

use super::{NodeLabel, NodePolicy, NodeRef, Properties, Relationship, RelType, RelationshipMode, KEY_PROPERTY};

/// One statement of a Neo4j HTTP transaction request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Statement {
    pub statement: String,
    pub parameters: Value,
    #[serde(rename = "includeStats")]
    pub include_stats: bool,
    /// Running the statement twice leaves the graph as running it once
    #[serde(skip)]
    pub idempotent: bool,
}

impl Statement {
    fn new(statement: String, parameters: Value) -> Self {
        Self {
            statement,
            parameters,
            include_stats: true,
            idempotent: true,
        }
    }
}

pub fn ping() -> Statement {
    Statement::new("RETURN 1 AS ok".to_string(), json!({}))
}

/// Uniqueness on the key property; also backs the `MERGE` lookups with an index.
pub fn ensure_key_constraint(label: NodeLabel) -> Statement {
    Statement::new(
        format!(
            "CREATE CONSTRAINT IF NOT EXISTS FOR (n:{label}) REQUIRE n.{key} IS UNIQUE",
            label = label.as_str(),
            key = KEY_PROPERTY,
        ),
        json!({}),
    )
}

pub fn upsert_node(node: NodeRef, properties: &Properties, policy: NodePolicy) -> Statement {
    let set_clause = match policy {
        NodePolicy::MergeOnCreate => "ON CREATE SET n += $props",
        NodePolicy::MergeOnUpdate => "SET n += $props",
    };
    let text = format!(
        "MERGE (n:{label} {{{key}: $key}}) {set_clause}",
        label = node.label.as_str(),
        key = KEY_PROPERTY,
        set_clause = set_clause,
    );
    Statement::new(text, json!({ "key": node.key, "props": properties }))
}

/// Relationship write; returns one row when both endpoints matched, none otherwise.
pub fn write_relationship(rel: &Relationship, mode: RelationshipMode) -> Statement {
    let matches = format!(
        "MATCH (a:{from} {{{key}: $from}}) MATCH (b:{to} {{{key}: $to}})",
        from = rel.from.label.as_str(),
        to = rel.to.label.as_str(),
        key = KEY_PROPERTY,
    );

    let text = match mode {
        RelationshipMode::Merge => {
            let identity = if rel.identity.is_empty() {
                String::new()
            } else {
                let pairs: Vec<String> = rel
                    .identity
                    .keys()
                    .map(|k| format!("{k}: $identity.{k}", k = k))
                    .collect();
                format!(" {{{}}}", pairs.join(", "))
            };
            format!(
                "{matches} MERGE (a)-[r:{rel}{identity}]->(b) ON CREATE SET r += $props RETURN 1 AS matched",
                matches = matches,
                rel = rel.rel_type.as_str(),
                identity = identity,
            )
        }
        RelationshipMode::Create => format!(
            "{matches} CREATE (a)-[r:{rel}]->(b) SET r += $identity, r += $props RETURN 1 AS matched",
            matches = matches,
            rel = rel.rel_type.as_str(),
        ),
    };

    let mut statement = Statement::new(
        text,
        json!({
            "from": rel.from.key,
            "to": rel.to.key,
            "identity": rel.identity,
            "props": rel.properties,
        }),
    );
    statement.idempotent = mode == RelationshipMode::Merge;
    statement
}

pub fn delete_relationships(rel_type: RelType) -> Statement {
    Statement::new(
        format!("MATCH ()-[r:{}]->() DELETE r", rel_type.as_str()),
        json!({}),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_node_merge_on_create() {
        let mut props = Properties::new();
        props.insert("firstName".into(), json!("Ada"));
        let stmt = upsert_node(
            NodeRef::new(NodeLabel::Customer, 7),
            &props,
            NodePolicy::MergeOnCreate,
        );
        assert_eq!(
            stmt.statement,
            "MERGE (n:Customer {id: $key}) ON CREATE SET n += $props"
        );
        assert_eq!(stmt.parameters["key"], json!(7));
        assert_eq!(stmt.parameters["props"]["firstName"], json!("Ada"));
        assert!(stmt.include_stats);
    }

    #[test]
    fn test_upsert_node_merge_on_update() {
        let stmt = upsert_node(
            NodeRef::new(NodeLabel::Product, 1),
            &Properties::new(),
            NodePolicy::MergeOnUpdate,
        );
        assert_eq!(stmt.statement, "MERGE (n:Product {id: $key}) SET n += $props");
    }

    #[test]
    fn test_merge_relationship_with_identity() {
        let rel = Relationship::new(
            RelType::Contains,
            NodeRef::new(NodeLabel::Order, 10),
            NodeRef::new(NodeLabel::Product, 3),
        )
        .with_identity("orderItemId", 100);
        let stmt = write_relationship(&rel, RelationshipMode::Merge);
        assert_eq!(
            stmt.statement,
            "MATCH (a:Order {id: $from}) MATCH (b:Product {id: $to}) \
             MERGE (a)-[r:CONTAINS {orderItemId: $identity.orderItemId}]->(b) \
             ON CREATE SET r += $props RETURN 1 AS matched"
        );
        assert_eq!(stmt.parameters["from"], json!(10));
        assert_eq!(stmt.parameters["to"], json!(3));
        assert_eq!(stmt.parameters["identity"]["orderItemId"], json!(100));
    }

    #[test]
    fn test_merge_relationship_without_identity() {
        let rel = Relationship::new(
            RelType::Placed,
            NodeRef::new(NodeLabel::Customer, 1),
            NodeRef::new(NodeLabel::Order, 10),
        );
        let stmt = write_relationship(&rel, RelationshipMode::Merge);
        assert!(stmt.statement.contains("MERGE (a)-[r:PLACED]->(b)"));
    }

    #[test]
    fn test_create_relationship() {
        let rel = Relationship::new(
            RelType::RecommendedNext,
            NodeRef::new(NodeLabel::Customer, 1),
            NodeRef::new(NodeLabel::Product, 2),
        );
        let stmt = write_relationship(&rel, RelationshipMode::Create);
        assert!(stmt.statement.contains("CREATE (a)-[r:RECOMMENDED_NEXT]->(b)"));
        assert!(!stmt.statement.contains("MERGE"));
        assert!(!stmt.idempotent);
        assert!(write_relationship(&rel, RelationshipMode::Merge).idempotent);
    }

    #[test]
    fn test_key_constraint_per_label() {
        let stmt = ensure_key_constraint(NodeLabel::OrderItem);
        assert_eq!(
            stmt.statement,
            "CREATE CONSTRAINT IF NOT EXISTS FOR (n:OrderItem) REQUIRE n.id IS UNIQUE"
        );
        assert!(stmt.idempotent);
    }

    #[test]
    fn test_statement_serializes_include_stats() {
        let value = serde_json::to_value(delete_relationships(RelType::RecommendedNext)).unwrap();
        assert_eq!(value["statement"], json!("MATCH ()-[r:RECOMMENDED_NEXT]->() DELETE r"));
        assert_eq!(value["includeStats"], json!(true));
        assert!(value.get("idempotent").is_none());
    }
}
