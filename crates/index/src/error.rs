use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Graph store unavailable: {0}")]
    Unavailable(String),

    #[error("Relation {relation_id} references unknown entity {entity_id}")]
    DanglingRelation { relation_id: String, entity_id: String },

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Cannot merge entity {0} into itself")]
    SelfMerge(String),

    #[error("Invalid record from store: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
