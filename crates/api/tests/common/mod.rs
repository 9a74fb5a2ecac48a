#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use api::PipelineSettings;
use extract::{CompletionOptions, LanguageModel, ModelError, RetryPolicy};
use index::{Entity, Graph, GraphDelta, GraphStats, GraphStore, MemoryGraphStore, Relation, StoreError, Subgraph};
use ingest::{Chunk, ChunkerConfig};
use query::RetrieverConfig;

pub const GARBAGE: &str = "I could not find anything useful here.";
pub const ANSWER: &str = "Sarah works at prismaticAI.";

#[derive(Debug, Clone)]
pub enum Reply {
    Json(String),
    Unavailable,
}

/// Answers extraction prompts by looking for a key in the prompt; prompts
/// matching no key get an unparseable reply. Non-JSON calls get `ANSWER`.
#[derive(Default)]
pub struct ScriptedModel {
    rules: Vec<(String, Reply)>,
    calls: AtomicUsize,
    delay: Duration,
    cancel_on_call: Mutex<Option<(usize, CancellationToken)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, key: &str, reply: Reply) -> Self {
        self.rules.push((key.to_string(), reply));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fire `token` when the `n`th call (1-based) arrives
    pub fn cancel_on_call(self, n: usize, token: CancellationToken) -> Self {
        *self.cancel_on_call.lock().unwrap() = Some((n, token));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, token)) = self.cancel_on_call.lock().unwrap().as_ref() {
            if *n == call {
                token.cancel();
            }
        }
        tokio::time::sleep(self.delay).await;

        if !options.json {
            return Ok(ANSWER.to_string());
        }
        match self.rules.iter().find(|(key, _)| prompt.contains(key.as_str())) {
            Some((_, Reply::Json(body))) => Ok(body.clone()),
            Some((_, Reply::Unavailable)) => Err(ModelError::Unavailable("scripted outage".into())),
            None => Ok(GARBAGE.to_string()),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Extraction JSON naming `entities` as `(name, type, confidence)` and
/// `relations` as `(subject, predicate, object)` by name
pub fn extraction_json(entities: &[(&str, &str, f32)], relations: &[(&str, &str, &str)]) -> String {
    let entities: Vec<serde_json::Value> = entities
        .iter()
        .enumerate()
        .map(|(i, (name, kind, confidence))| {
            serde_json::json!({"id": format!("E{}", i + 1), "name": name, "type": kind, "confidence": confidence})
        })
        .collect();
    let relations: Vec<serde_json::Value> = relations
        .iter()
        .map(|(s, p, o)| serde_json::json!({"source": s, "relation": p, "target": o}))
        .collect();
    serde_json::json!({"entities": entities, "relations": relations}).to_string()
}

pub fn sarah_json() -> String {
    extraction_json(
        &[("Sarah", "PERSON", 0.9), ("prismaticAI", "ORGANIZATION", 0.9)],
        &[("Sarah", "works_at", "prismaticAI")],
    )
}

pub const SARAH_TEXT: &str = "Sarah is an employee at prismaticAI, a leading technology company based in Westside Valley.";

pub fn settings(max_concurrent_extractions: usize) -> PipelineSettings {
    PipelineSettings {
        max_concurrent_extractions,
        retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
        call_timeout: Duration::from_millis(500),
        chunking: ChunkerConfig::default(),
        retrieval: RetrieverConfig::default(),
    }
}

pub fn chunk(index: usize, text: &str) -> Chunk {
    Chunk::new("doc", index, text.to_string(), (index * 100, index * 100 + text.len()), 0)
}

/// Every relation endpoint resolves to a stored entity
pub fn assert_no_dangling(graph: &Graph) {
    for relation in graph.relations.values() {
        assert!(graph.entities.contains_key(&relation.subject_entity_id));
        assert!(graph.entities.contains_key(&relation.object_entity_id));
    }
}

/// Memory store whose writes can be switched to fail like a lost connection
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryGraphStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for FlakyStore {
    async fn put_entities(&self, entities: &[Entity]) -> index::Result<()> {
        self.check()?;
        self.inner.put_entities(entities).await
    }

    async fn put_relations(&self, relations: &[Relation]) -> index::Result<()> {
        self.check()?;
        self.inner.put_relations(relations).await
    }

    async fn commit(&self, delta: &GraphDelta) -> index::Result<()> {
        self.check()?;
        self.inner.commit(delta).await
    }

    async fn get_entity_by_id(&self, entity_id: &str) -> index::Result<Option<Entity>> {
        self.inner.get_entity_by_id(entity_id).await
    }

    async fn get_relation_by_id(&self, relation_id: &str) -> index::Result<Option<Relation>> {
        self.inner.get_relation_by_id(relation_id).await
    }

    async fn find_entities_by_name(&self, normalized_name: &str) -> index::Result<Vec<Entity>> {
        self.inner.find_entities_by_name(normalized_name).await
    }

    async fn neighbors(&self, entity_id: &str, max_hops: usize) -> index::Result<Subgraph> {
        self.inner.neighbors(entity_id, max_hops).await
    }

    async fn snapshot(&self) -> index::Result<Graph> {
        self.inner.snapshot().await
    }

    async fn stats(&self) -> index::Result<GraphStats> {
        self.inner.stats().await
    }
}
