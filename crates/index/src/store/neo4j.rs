use async_trait::async_trait;
use neo4rs::{Graph as Neo4jGraph, Query, Row, query};
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

use extract::normalizer::normalize_name;

use super::{GraphStore, Reached, Subgraph};
use crate::error::{Result, StoreError};
use crate::graph::{Graph, GraphDelta, GraphStats};
use crate::model::{Entity, Relation};

const ENTITY_FIELDS: &str = "e.id AS id, e.name AS name, e.normalized_name AS normalized_name, \
     e.type AS type, e.aliases AS aliases, e.mention_count AS mention_count, \
     e.canonical_confidence AS canonical_confidence, e.canonical_chunk_index AS canonical_chunk_index";

const RELATION_FIELDS: &str = "r.id AS id, s.id AS subject, r.predicate AS predicate, o.id AS object, \
     r.support_count AS support_count, r.source_chunk_ids AS source_chunk_ids, r.confidence AS confidence";

fn unavailable(context: &'static str) -> impl FnOnce(neo4rs::Error) -> StoreError {
    move |e| StoreError::Unavailable(format!("{context}: {e}"))
}

fn field<T: DeserializeOwned>(row: &Row, key: &str) -> Result<T> {
    row.get::<T>(key)
        .map_err(|e| StoreError::InvalidRecord(format!("field {key}: {e}")))
}

fn entity_from_row(row: &Row) -> Result<Entity> {
    Ok(Entity {
        entity_id: field(row, "id")?,
        canonical_name: field(row, "name")?,
        normalized_name: field(row, "normalized_name")?,
        entity_type: field(row, "type")?,
        aliases: field::<Option<Vec<String>>>(row, "aliases")?
            .unwrap_or_default()
            .into_iter()
            .collect(),
        mention_count: field::<i64>(row, "mention_count")?.max(0) as u64,
        canonical_confidence: field::<f64>(row, "canonical_confidence")? as f32,
        canonical_chunk_index: field::<i64>(row, "canonical_chunk_index")?.max(0) as usize,
    })
}

fn relation_from_row(row: &Row) -> Result<Relation> {
    Ok(Relation {
        relation_id: field(row, "id")?,
        subject_entity_id: field(row, "subject")?,
        predicate_label: field(row, "predicate")?,
        object_entity_id: field(row, "object")?,
        support_count: field::<i64>(row, "support_count")?.max(0) as u64,
        source_chunk_ids: field::<Option<Vec<String>>>(row, "source_chunk_ids")?
            .unwrap_or_default()
            .into_iter()
            .collect(),
        confidence: field::<f64>(row, "confidence")? as f32,
    })
}

/// Normalized forms under which `find_entities_by_name` finds an entity
fn lookup_names(entity: &Entity) -> Vec<String> {
    let mut names: BTreeSet<String> = entity.names().map(normalize_name).collect();
    names.insert(entity.normalized_name.clone());
    names.retain(|n| !n.is_empty());
    names.into_iter().collect()
}

fn upsert_entity_query(entity: &Entity) -> Query {
    query(
        r#"
        MERGE (e:Entity {id: $id})
        SET e.name = $name,
            e.normalized_name = $normalized_name,
            e.type = $type,
            e.aliases = $aliases,
            e.names = $names,
            e.mention_count = $mention_count,
            e.canonical_confidence = $canonical_confidence,
            e.canonical_chunk_index = $canonical_chunk_index
        "#,
    )
    .param("id", entity.entity_id.clone())
    .param("name", entity.canonical_name.clone())
    .param("normalized_name", entity.normalized_name.clone())
    .param("type", entity.entity_type.clone())
    .param("aliases", entity.aliases.iter().cloned().collect::<Vec<_>>())
    .param("names", lookup_names(entity))
    .param("mention_count", entity.mention_count as i64)
    .param("canonical_confidence", entity.canonical_confidence as f64)
    .param("canonical_chunk_index", entity.canonical_chunk_index as i64)
}

fn upsert_relation_query(relation: &Relation) -> Query {
    query(
        r#"
        MATCH (s:Entity {id: $subject_id})
        MATCH (o:Entity {id: $object_id})
        MERGE (s)-[r:RELATION {id: $id}]->(o)
        SET r.predicate = $predicate,
            r.support_count = $support_count,
            r.source_chunk_ids = $source_chunk_ids,
            r.confidence = $confidence
        "#,
    )
    .param("id", relation.relation_id.clone())
    .param("subject_id", relation.subject_entity_id.clone())
    .param("object_id", relation.object_entity_id.clone())
    .param("predicate", relation.predicate_label.clone())
    .param("support_count", relation.support_count as i64)
    .param("source_chunk_ids", relation.source_chunk_ids.iter().cloned().collect::<Vec<_>>())
    .param("confidence", relation.confidence as f64)
}

/// Cypher cannot parameterize path lengths, so the bound is formatted in
fn neighbor_entities_cypher(max_hops: usize) -> String {
    format!(
        "MATCH p = (start:Entity {{id: $id}})-[:RELATION*1..{max_hops}]-(e:Entity) \
         WHERE e.id <> $id \
         WITH e, min(length(p)) AS hops \
         RETURN {ENTITY_FIELDS}, hops ORDER BY hops, id"
    )
}

fn neighbor_relations_cypher(max_hops: usize) -> String {
    format!(
        "MATCH p = (start:Entity {{id: $id}})-[:RELATION*1..{max_hops}]-(:Entity) \
         UNWIND relationships(p) AS r \
         WITH DISTINCT r \
         WITH r, startNode(r) AS s, endNode(r) AS o \
         RETURN {RELATION_FIELDS} ORDER BY id"
    )
}

/// Durable store backed by Neo4j
pub struct Neo4jGraphStore {
    graph: Neo4jGraph,
}

impl Neo4jGraphStore {
    pub fn new(graph: Neo4jGraph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Neo4jGraph::new(uri, user, password)
            .await
            .map_err(unavailable("Failed to connect to Neo4j"))?;
        Ok(Self::new(graph))
    }

    /// Initialize schema: create indexes
    pub async fn init_schema(&self) -> Result<()> {
        info!("Creating Neo4j indexes");

        let statements = [
            "CREATE CONSTRAINT entity_id_unique IF NOT EXISTS FOR (e:Entity) REQUIRE e.id IS UNIQUE",
            "CREATE INDEX entity_normalized_name_index IF NOT EXISTS FOR (e:Entity) ON (e.normalized_name)",
            "CREATE INDEX relation_id_index IF NOT EXISTS FOR ()-[r:RELATION]-() ON (r.id)",
        ];
        for statement in statements {
            self.graph
                .run(query(statement))
                .await
                .map_err(unavailable("Failed to create Neo4j schema"))?;
        }

        info!("Neo4j indexes created successfully");
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        self.graph
            .run(query("RETURN 1"))
            .await
            .map_err(unavailable("Neo4j health check failed"))
    }

    async fn fetch<T>(&self, q: Query, convert: fn(&Row) -> Result<T>) -> Result<Vec<T>> {
        let mut result = self.graph.execute(q).await.map_err(unavailable("Neo4j query failed"))?;
        let mut records = Vec::new();
        while let Some(row) = result.next().await.map_err(unavailable("Neo4j stream failed"))? {
            records.push(convert(&row)?);
        }
        Ok(records)
    }

    async fn count(&self, cypher: &str) -> Result<usize> {
        let counts = self
            .fetch(query(cypher), |row| field::<i64>(row, "count"))
            .await?;
        Ok(counts.first().copied().unwrap_or(0).max(0) as usize)
    }

    /// Ids among `ids` that have no stored entity
    async fn missing_entities(&self, ids: &HashSet<&str>) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let wanted: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let found = self
            .fetch(
                query("MATCH (e:Entity) WHERE e.id IN $ids RETURN e.id AS id").param("ids", wanted.clone()),
                |row| field::<String>(row, "id"),
            )
            .await?;
        let found: HashSet<String> = found.into_iter().collect();
        Ok(wanted.into_iter().filter(|id| !found.contains(id)).collect())
    }

    async fn check_endpoints(&self, relations: &[Relation], pending: &HashSet<&str>) -> Result<()> {
        let endpoints: HashSet<&str> = relations
            .iter()
            .flat_map(|r| [r.subject_entity_id.as_str(), r.object_entity_id.as_str()])
            .filter(|id| !pending.contains(id))
            .collect();
        let missing = self.missing_entities(&endpoints).await?;

        match relations.iter().find_map(|r| {
            [&r.subject_entity_id, &r.object_entity_id]
                .into_iter()
                .find(|id| missing.contains(id.as_str()))
                .map(|id| (r, id))
        }) {
            Some((relation, entity_id)) => Err(StoreError::DanglingRelation {
                relation_id: relation.relation_id.clone(),
                entity_id: entity_id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Run all queries in one transaction, rolling back on failure
    async fn run_in_transaction(&self, queries: Vec<Query>) -> Result<()> {
        if queries.is_empty() {
            return Ok(());
        }
        let mut txn = self
            .graph
            .start_txn()
            .await
            .map_err(unavailable("Failed to open Neo4j transaction"))?;

        if let Err(e) = txn.run_queries(queries).await {
            let _ = txn.rollback().await;
            return Err(unavailable("Neo4j write failed")(e));
        }
        txn.commit().await.map_err(unavailable("Neo4j commit failed"))
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn put_entities(&self, entities: &[Entity]) -> Result<()> {
        self.run_in_transaction(entities.iter().map(upsert_entity_query).collect())
            .await
    }

    async fn put_relations(&self, relations: &[Relation]) -> Result<()> {
        self.check_endpoints(relations, &HashSet::new()).await?;
        self.run_in_transaction(relations.iter().map(upsert_relation_query).collect())
            .await
    }

    async fn commit(&self, delta: &GraphDelta) -> Result<()> {
        let pending: HashSet<&str> = delta.entities.iter().map(|e| e.entity_id.as_str()).collect();
        self.check_endpoints(&delta.relations, &pending).await?;

        let queries: Vec<Query> = delta
            .entities
            .iter()
            .map(upsert_entity_query)
            .chain(delta.relations.iter().map(upsert_relation_query))
            .collect();
        debug!(queries = queries.len(), "Committing delta to Neo4j");
        self.run_in_transaction(queries).await
    }

    async fn get_entity_by_id(&self, entity_id: &str) -> Result<Option<Entity>> {
        let q = query(&format!("MATCH (e:Entity {{id: $id}}) RETURN {ENTITY_FIELDS}"))
            .param("id", entity_id.to_string());
        Ok(self.fetch(q, entity_from_row).await?.into_iter().next())
    }

    async fn get_relation_by_id(&self, relation_id: &str) -> Result<Option<Relation>> {
        let q = query(&format!(
            "MATCH (s:Entity)-[r:RELATION {{id: $id}}]->(o:Entity) RETURN {RELATION_FIELDS}"
        ))
        .param("id", relation_id.to_string());
        Ok(self.fetch(q, relation_from_row).await?.into_iter().next())
    }

    async fn find_entities_by_name(&self, normalized_name: &str) -> Result<Vec<Entity>> {
        let q = query(&format!(
            "MATCH (e:Entity) WHERE e.normalized_name = $name OR $name IN e.names \
             RETURN {ENTITY_FIELDS} ORDER BY id"
        ))
        .param("name", normalized_name.to_string());
        self.fetch(q, entity_from_row).await
    }

    async fn neighbors(&self, entity_id: &str, max_hops: usize) -> Result<Subgraph> {
        let Some(origin) = self.get_entity_by_id(entity_id).await? else {
            return Ok(Subgraph::default());
        };
        let mut subgraph = Subgraph {
            entities: vec![Reached { entity: origin, hops: 0 }],
            relations: Vec::new(),
        };
        if max_hops == 0 {
            return Ok(subgraph);
        }

        let reached = self
            .fetch(
                query(&neighbor_entities_cypher(max_hops)).param("id", entity_id.to_string()),
                |row| {
                    Ok(Reached {
                        entity: entity_from_row(row)?,
                        hops: field::<i64>(row, "hops")?.max(0) as usize,
                    })
                },
            )
            .await?;
        subgraph.entities.extend(reached);

        subgraph.relations = self
            .fetch(
                query(&neighbor_relations_cypher(max_hops)).param("id", entity_id.to_string()),
                relation_from_row,
            )
            .await?;

        Ok(subgraph)
    }

    async fn snapshot(&self) -> Result<Graph> {
        let entities = self
            .fetch(
                query(&format!("MATCH (e:Entity) RETURN {ENTITY_FIELDS} ORDER BY id")),
                entity_from_row,
            )
            .await?;
        let relations = self
            .fetch(
                query(&format!(
                    "MATCH (s:Entity)-[r:RELATION]->(o:Entity) RETURN {RELATION_FIELDS} ORDER BY id"
                )),
                relation_from_row,
            )
            .await?;

        Ok(Graph {
            entities: entities.into_iter().map(|e| (e.entity_id.clone(), e)).collect(),
            relations: relations.into_iter().map(|r| (r.relation_id.clone(), r)).collect(),
        })
    }

    async fn stats(&self) -> Result<GraphStats> {
        Ok(GraphStats {
            entity_count: self.count("MATCH (e:Entity) RETURN count(e) AS count").await?,
            relation_count: self
                .count("MATCH ()-[r:RELATION]->() RETURN count(r) AS count")
                .await?,
        })
    }
}
