use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::error::ModelError;
use crate::llm::{CompletionOptions, LanguageModel};

/// Memoizes completions of an inner model.
///
/// Responses to JSON requests are only kept when they parse as JSON, and a
/// response the caller later `reject`s (for example one that fails schema
/// validation) is evicted, so neither is replayed to a retrying caller.
pub struct CachedModel {
    inner: Arc<dyn LanguageModel>,
    responses: DashMap<String, String>,
    max_entries: usize,
}

impl CachedModel {
    pub fn new(inner: Arc<dyn LanguageModel>, max_entries: usize) -> Self {
        Self {
            inner,
            responses: DashMap::new(),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn clear(&self) {
        self.responses.clear();
    }

    fn key(&self, prompt: &str, options: &CompletionOptions) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.model_name().as_bytes());
        hasher.update([options.json as u8]);
        hasher.update(options.temperature.unwrap_or(-1.0).to_le_bytes());
        hasher.update(prompt.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn store(&self, key: String, response: String) {
        if self.max_entries == 0 {
            return;
        }
        if self.responses.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self
                .responses
                .iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.responses.remove(&key);
            }
        }
        self.responses.insert(key, response);
    }
}

#[async_trait]
impl LanguageModel for CachedModel {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String, ModelError> {
        let key = self.key(prompt, options);
        if let Some(hit) = self.responses.get(&key) {
            debug!(model = self.inner.model_name(), "Completion cache hit");
            return Ok(hit.value().clone());
        }

        let response = self.inner.complete(prompt, options).await?;
        let cacheable = !options.json || serde_json::from_str::<serde_json::Value>(&response).is_ok();
        if cacheable {
            self.store(key, response.clone());
        }
        Ok(response)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn reject(&self, prompt: &str, options: &CompletionOptions) {
        if self.responses.remove(&self.key(prompt, options)).is_some() {
            debug!(model = self.inner.model_name(), "Evicted rejected completion");
        }
        self.inner.reject(prompt, options);
    }
}
