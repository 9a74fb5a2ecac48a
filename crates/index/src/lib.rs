//! Knowledge-graph model, incremental assembly and persistence.

pub mod assembler;
pub mod error;
pub mod graph;
pub mod model;
pub mod store;

pub use assembler::GraphAssembler;
pub use error::{Result, StoreError};
pub use graph::{Graph, GraphDelta, GraphStats, MergeCandidate};
pub use model::{Entity, NameCandidate, Relation, entity_id, relation_id};
pub use store::{GraphStore, MemoryGraphStore, Neo4jGraphStore, Reached, Subgraph};
