use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ModelError;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompletionOptions {
    /// Ask the model for a JSON-only response
    pub json: bool,
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    pub fn json() -> Self {
        Self {
            json: true,
            temperature: Some(0.0),
        }
    }
}

/// Text-completion capability. Implementations must be shareable across tasks.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String, ModelError>;

    /// Identifier used in logs and cache keys
    fn model_name(&self) -> &str;

    /// The caller could not use the response to this request. Models that
    /// remember responses must not hand it out again.
    fn reject(&self, _prompt: &str, _options: &CompletionOptions) {}
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>, // "json" for structured output
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// Check that the server answers at all
    pub async fn ping(&self) -> Result<(), ModelError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            return Err(ModelError::Unavailable(format!("Ollama returned {}", response.status())));
        }
        Ok(())
    }

    fn map_transport_error(&self, error: reqwest::Error) -> ModelError {
        if error.is_timeout() {
            ModelError::Timeout(self.timeout)
        } else {
            ModelError::Unavailable(error.to_string())
        }
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new("http://localhost:11434", "llama3", Duration::from_secs(60))
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String, ModelError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: options.json.then_some("json"),
            options: options.temperature.map(|temperature| OllamaOptions { temperature }),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            return Err(ModelError::Unavailable(format!(
                "Ollama request failed: {}",
                response.status()
            )));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        Ok(ollama_response.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = OllamaRequest {
            model: "llama3",
            prompt: "hi",
            stream: false,
            format: CompletionOptions::json().json.then_some("json"),
            options: None,
        };
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["format"], "json");
        assert_eq!(value["stream"], false);
        assert!(value.get("options").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let client = OllamaClient::new("http://127.0.0.1:9", "llama3", Duration::from_secs(2));
        let err = client.complete("hi", &CompletionOptions::default()).await.unwrap_err();

        assert!(matches!(err, ModelError::Unavailable(_) | ModelError::Timeout(_)));
    }
}
