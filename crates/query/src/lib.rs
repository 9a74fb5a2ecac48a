//! Graph-backed retrieval and answer synthesis.

pub mod error;
pub mod retriever;
pub mod synthesizer;

pub use error::{QueryError, Result};
pub use retriever::{RetrievalContext, Retriever, RetrieverConfig};
pub use synthesizer::Synthesizer;
