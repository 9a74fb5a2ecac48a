use std::time::Duration;
use thiserror::Error;

/// Failures of the language-model collaborator. Both are transient.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Language model unavailable: {0}")]
    Unavailable(String),

    #[error("Language model call timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Malformed extraction output for chunk {chunk_id}: {reason}")]
    Parse { chunk_id: String, reason: String },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Extraction failed for chunk {chunk_id} after {attempts} attempts: {source}")]
    Failed {
        chunk_id: String,
        attempts: usize,
        source: Box<ExtractError>,
    },

    #[error("Extraction cancelled for chunk {0}")]
    Cancelled(String),
}

impl ExtractError {
    /// Whether another attempt may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractError::Parse { .. } | ExtractError::Model(_))
    }

    pub(crate) fn parse(chunk_id: &str, reason: impl Into<String>) -> Self {
        ExtractError::Parse {
            chunk_id: chunk_id.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
