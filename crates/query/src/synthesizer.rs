use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use extract::{CompletionOptions, LanguageModel, ModelError};

use crate::error::Result;
use crate::retriever::RetrievalContext;

/// Turns a retrieved subgraph into a natural-language answer
#[derive(Clone)]
pub struct Synthesizer {
    model: Arc<dyn LanguageModel>,
    call_timeout: Duration,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    #[instrument(skip(self, context), fields(model = self.model.model_name()))]
    pub async fn synthesize(&self, query: &str, context: &RetrievalContext) -> Result<String> {
        let prompt = build_answer_prompt(query, context);
        debug!(prompt_len = prompt.len(), "Requesting answer");

        let answer = tokio::time::timeout(
            self.call_timeout,
            self.model.complete(&prompt, &CompletionOptions::default()),
        )
        .await
        .map_err(|_| ModelError::Timeout(self.call_timeout))??;

        Ok(answer.trim().to_string())
    }
}

pub fn build_answer_prompt(query: &str, context: &RetrievalContext) -> String {
    let mut entities = String::new();
    for reached in &context.subgraph.entities {
        let entity = &reached.entity;
        entities.push_str(&format!("- {} ({})", entity.canonical_name, entity.entity_type));
        if !entity.aliases.is_empty() {
            let aliases: Vec<&str> = entity.aliases.iter().map(String::as_str).collect();
            entities.push_str(&format!(", also known as {}", aliases.join(", ")));
        }
        entities.push('\n');
    }

    format!(
        r#"You are a helpful assistant answering questions based on a knowledge graph.

ENTITIES:
{entities}
KEY RELATIONSHIPS:
{summary}

USER QUESTION: {query}

INSTRUCTIONS:
- Answer the question using only information from the knowledge graph above
- Be specific and name the entities and relationships you rely on
- If the graph doesn't contain enough information, say so
- Keep your answer concise and factual

ANSWER:"#,
        summary = context.textual_summary,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use async_trait::async_trait;
    use index::{Entity, NameCandidate, Reached, Subgraph};
    use std::sync::Mutex;

    struct EchoModel {
        prompts: Mutex<Vec<String>>,
        delay: Duration,
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> std::result::Result<String, ModelError> {
            tokio::time::sleep(self.delay).await;
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("  Sarah works at prismaticAI.\n".to_string())
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    fn context() -> RetrievalContext {
        let mut sarah = Entity::new(
            "sarah",
            "PERSON",
            NameCandidate {
                surface_form: "Sarah",
                confidence: 1.0,
                chunk_index: 0,
            },
        );
        sarah.aliases.insert("Sarah Jones".into());
        RetrievalContext {
            seed_entity_ids: vec![sarah.entity_id.clone()],
            subgraph: Subgraph {
                entities: vec![Reached { entity: sarah, hops: 0 }],
                relations: Vec::new(),
            },
            hop_depth: 2,
            textual_summary: "Sarah --works_at--> prismaticAI".to_string(),
            truncated: false,
        }
    }

    #[test]
    fn test_prompt_contains_graph_and_question() {
        let prompt = build_answer_prompt("Where does Sarah work?", &context());
        assert!(prompt.contains("Sarah --works_at--> prismaticAI"));
        assert!(prompt.contains("- Sarah (PERSON), also known as Sarah Jones"));
        assert!(prompt.contains("USER QUESTION: Where does Sarah work?"));
    }

    #[tokio::test]
    async fn test_synthesize_trims_answer() {
        let model = Arc::new(EchoModel {
            prompts: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        });
        let synthesizer = Synthesizer::new(model.clone());

        let answer = synthesizer.synthesize("Where does Sarah work?", &context()).await.unwrap();
        assert_eq!(answer, "Sarah works at prismaticAI.");
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_synthesize_times_out() {
        let model = Arc::new(EchoModel {
            prompts: Mutex::new(Vec::new()),
            delay: Duration::from_millis(200),
        });
        let synthesizer = Synthesizer::new(model).with_call_timeout(Duration::from_millis(10));

        let err = synthesizer.synthesize("Where does Sarah work?", &context()).await.unwrap_err();
        assert!(matches!(err, QueryError::Model(ModelError::Timeout(_))));
    }
}
