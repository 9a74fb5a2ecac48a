use extract::ModelError;
use index::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    /// Nothing in the query names a known entity; callers may fall back to
    /// non-graph retrieval
    #[error("No known entity mentioned in query: {0:?}")]
    NoSeedEntity(String),

    #[error("Invalid retrieval config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, QueryError>;
