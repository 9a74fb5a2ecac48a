//! Text ingestion: loading documents and splitting them into overlapping
//! chunks for extraction.

pub mod chunk;
pub mod chunker;
pub mod error;
pub mod reader;

pub use chunk::{Chunk, reconstruct};
pub use chunker::{Chunker, ChunkerConfig};
pub use error::{IngestError, Result};
pub use reader::FileReader;

use sha2::{Digest, Sha256};
use std::path::Path;

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Read and chunk a single file
pub async fn ingest_file(file_path: &Path, config: ChunkerConfig) -> Result<Vec<Chunk>> {
    let chunker = Chunker::new(config)?;
    let content = FileReader::read_file(file_path).await?;
    let doc_id = generate_doc_id(&file_path.to_string_lossy());

    Ok(chunker.chunk_text(&doc_id, &content))
}

/// Read and chunk every supported file below a directory
pub async fn ingest_directory(dir_path: &Path, config: ChunkerConfig) -> Result<Vec<Chunk>> {
    let chunker = Chunker::new(config)?;
    let files = FileReader::read_directory(dir_path).await?;

    let mut all_chunks = Vec::new();
    for (path, content) in files {
        let doc_id = generate_doc_id(&path);
        all_chunks.extend(chunker.chunk_text(&doc_id, &content));
    }

    Ok(all_chunks)
}
