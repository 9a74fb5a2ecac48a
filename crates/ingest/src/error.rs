use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid chunk configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
