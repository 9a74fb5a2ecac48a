use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    /// Position of this chunk within its document
    pub index: usize,
    pub text: String,
    pub offset_start: usize, // byte offsets into the source text
    pub offset_end: usize,
    /// Byte length of the prefix shared with the previous chunk
    pub overlap_with_prev: usize,
}

impl Chunk {
    pub fn new(
        doc_id: &str,
        index: usize,
        text: String,
        offset: (usize, usize),
        overlap_with_prev: usize,
    ) -> Self {
        // Generate stable chunk id from content and position
        let id = Self::generate_chunk_id(doc_id, index, &text, offset);

        Self {
            id,
            doc_id: doc_id.to_string(),
            index,
            text,
            offset_start: offset.0,
            offset_end: offset.1,
            overlap_with_prev,
        }
    }

    fn generate_chunk_id(doc_id: &str, index: usize, text: &str, offset: (usize, usize)) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(index.to_le_bytes());
        hasher.update(offset.0.to_le_bytes());
        hasher.update(offset.1.to_le_bytes());
        hasher.update(text.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }

    /// The part of this chunk not already covered by the previous one
    pub fn fresh_text(&self) -> &str {
        &self.text[self.overlap_with_prev..]
    }

    /// Estimate token count (rough: 1.3 tokens per word)
    pub fn estimated_tokens(&self) -> usize {
        let word_count = self.text.split_whitespace().count();
        (word_count as f64 * 1.3) as usize
    }
}

/// Rebuild the source text from an ordered chunk sequence
pub fn reconstruct(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::fresh_text).collect()
}
