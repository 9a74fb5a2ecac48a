//! Graph persistence behind a single capability trait.

pub mod memory;
pub mod neo4j;

pub use memory::MemoryGraphStore;
pub use neo4j::Neo4jGraphStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::{Graph, GraphDelta, GraphStats};
use crate::model::{Entity, Relation};

/// An entity reached during traversal, with its distance from the start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reached {
    pub entity: Entity,
    pub hops: usize,
}

/// Result of a bounded traversal. `entities` is ordered by hop distance then
/// id and starts with the origin at hop 0; `relations` is ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub entities: Vec<Reached>,
    pub relations: Vec<Relation>,
}

/// Storage-engine-agnostic graph persistence.
///
/// Writes are upserts: a stored record is replaced by the incoming one with
/// the same id. Accumulation happens before records reach the store (see
/// `GraphAssembler::propose`). Readers never observe half of a `commit`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn put_entities(&self, entities: &[Entity]) -> Result<()>;

    /// Fails with `DanglingRelation` if an endpoint is not stored
    async fn put_relations(&self, relations: &[Relation]) -> Result<()>;

    /// Apply entities and relations together, or nothing at all
    async fn commit(&self, delta: &GraphDelta) -> Result<()>;

    async fn get_entity_by_id(&self, entity_id: &str) -> Result<Option<Entity>>;

    async fn get_relation_by_id(&self, relation_id: &str) -> Result<Option<Relation>>;

    /// Entities whose normalized name, or the normalized form of one of their
    /// recorded names, equals `normalized_name`
    async fn find_entities_by_name(&self, normalized_name: &str) -> Result<Vec<Entity>>;

    /// Breadth-first neighbourhood of `entity_id`, following relations in
    /// both directions. Unknown ids yield an empty subgraph.
    async fn neighbors(&self, entity_id: &str, max_hops: usize) -> Result<Subgraph>;

    /// Export the whole graph
    async fn snapshot(&self) -> Result<Graph>;

    async fn stats(&self) -> Result<GraphStats>;
}
