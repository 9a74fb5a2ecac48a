use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Window length in characters
    pub size: usize,
    /// Characters shared between consecutive windows
    pub overlap: usize,
    /// Prefer ending a window just after whitespace
    #[serde(default = "default_break_on_whitespace")]
    pub break_on_whitespace: bool,
}

fn default_break_on_whitespace() -> bool {
    true
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            size: 2000,
            overlap: 200,
            break_on_whitespace: true,
        }
    }
}

impl ChunkerConfig {
    pub fn new(size: usize, overlap: usize) -> Self {
        Self {
            size,
            overlap,
            break_on_whitespace: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(IngestError::InvalidConfig("size must be positive".into()));
        }
        if self.overlap == 0 {
            return Err(IngestError::InvalidConfig("overlap must be positive".into()));
        }
        if self.overlap >= self.size {
            return Err(IngestError::InvalidConfig(format!(
                "overlap ({}) must be smaller than size ({})",
                self.overlap, self.size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into overlapping windows, in source order.
    ///
    /// Every character of the input lands in at least one chunk, and
    /// [`crate::reconstruct`] on the output yields the input again.
    pub fn chunk_text(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        // bounds[k] is the byte offset of char k; the final entry is text.len()
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = chars.len();
        let ChunkerConfig { size, overlap, .. } = self.config;

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut prev_end = 0;

        loop {
            let mut end = (start + size).min(total);
            if end < total && self.config.break_on_whitespace {
                end = self.snap_to_whitespace(&chars, start, end);
            }

            let overlap_bytes = if chunks.is_empty() {
                0
            } else {
                bounds[prev_end] - bounds[start]
            };

            chunks.push(Chunk::new(
                doc_id,
                chunks.len(),
                text[bounds[start]..bounds[end]].to_string(),
                (bounds[start], bounds[end]),
                overlap_bytes,
            ));

            if end == total {
                break;
            }

            // end - start > overlap always holds here, so start strictly advances
            prev_end = end;
            start = end - overlap;
        }

        chunks
    }

    /// Pull `end` back to just after a whitespace char found in the last
    /// quarter of the window. The window must stay longer than `overlap`.
    fn snap_to_whitespace(&self, chars: &[char], start: usize, end: usize) -> usize {
        let floor = (start + self.config.overlap + 1).max(start + self.config.size - self.config.size / 4);

        (floor..=end)
            .rev()
            .find(|&k| chars[k - 1].is_whitespace())
            .unwrap_or(end)
    }
}
