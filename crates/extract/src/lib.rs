//! Entity and relationship extraction through a language-model collaborator.

pub mod cache;
pub mod error;
pub mod llm;
pub mod normalizer;
pub mod parser;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use cache::CachedModel;
pub use error::{ExtractError, ModelError, Result};
pub use llm::{CompletionOptions, LanguageModel, OllamaClient};
pub use parser::parse_extraction;
pub use retry::{Exhausted, RetryPolicy};
pub use schema::{EntityMention, ExtractionResult, RelationMention};

use ingest::Chunk;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument};

pub struct Extractor {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl Extractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Extract mentions from one chunk.
    ///
    /// Timeouts, model outages and malformed output are retried within the
    /// retry policy's attempt budget; after that the chunk fails with
    /// [`ExtractError::Failed`]. A malformed answer is fed back to the model
    /// with a correction prompt on the next attempt.
    #[instrument(skip(self, chunk), fields(chunk_id = %chunk.id, chunk_index = chunk.index))]
    pub async fn extract(&self, chunk: &Chunk) -> Result<ExtractionResult> {
        let last_invalid: Mutex<Option<(String, String)>> = Mutex::new(None);
        let last_invalid = &last_invalid;

        let outcome = self
            .retry
            .retry("extract_chunk", ExtractError::is_transient, move || {
                let previous = last_invalid.lock().ok().and_then(|slot| slot.clone());
                let prompt = match previous {
                    Some((output, problem)) => prompt::build_retry_prompt(&output, &problem),
                    None => prompt::build_extraction_prompt(&chunk.text),
                };
                self.attempt(chunk, prompt, last_invalid)
            })
            .await;

        match outcome {
            Ok(result) => {
                debug!(
                    entities = result.entities.len(),
                    relations = result.relations.len(),
                    "Extracted chunk"
                );
                Ok(result)
            }
            Err(Exhausted { attempts, error }) => Err(ExtractError::Failed {
                chunk_id: chunk.id.clone(),
                attempts,
                source: Box::new(error),
            }),
        }
    }

    async fn attempt(
        &self,
        chunk: &Chunk,
        prompt: String,
        last_invalid: &Mutex<Option<(String, String)>>,
    ) -> Result<ExtractionResult> {
        let options = CompletionOptions::json();
        let response = timeout(self.call_timeout, self.model.complete(&prompt, &options))
            .await
            .map_err(|_| ModelError::Timeout(self.call_timeout))??;

        parse_extraction(chunk, &response).inspect_err(|e| {
            self.model.reject(&prompt, &options);
            if let (Ok(mut slot), ExtractError::Parse { reason, .. }) = (last_invalid.lock(), e) {
                *slot = Some((response.clone(), reason.clone()));
            }
        })
    }
}
