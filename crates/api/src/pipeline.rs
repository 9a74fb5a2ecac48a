use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use extract::{ExtractError, ExtractionResult, Extractor, LanguageModel, RetryPolicy};
use index::{Entity, Graph, GraphAssembler, GraphStats, GraphStore, StoreError};
use ingest::{Chunk, Chunker, ChunkerConfig, IngestError};
use query::{QueryError, RetrievalContext, Retriever, RetrieverConfig, Synthesizer};

use crate::metrics::{PipelineMetrics, TimedOperation};

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bad chunking parameters or unreadable input, rejected before any work
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Tuning knobs for a `Pipeline`
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_concurrent_extractions: usize,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub chunking: ChunkerConfig,
    pub retrieval: RetrieverConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: 5,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
            chunking: ChunkerConfig::default(),
            retrieval: RetrieverConfig::default(),
        }
    }
}

/// A chunk whose extraction did not make it into the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub reason: String,
}

/// Outcome of a build. Partial success is normal: `failures` lists every
/// chunk that was not merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub run_id: Uuid,
    pub graph: Graph,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    /// Ordered by chunk id
    pub failures: Vec<ChunkFailure>,
    pub cancelled: bool,
}

impl BuildReport {
    pub fn failed_chunk_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.chunk_id.as_str()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub context: RetrievalContext,
}

/// Text in, graph out; queries in, subgraphs out.
///
/// Extraction runs concurrently, bounded by `max_concurrent_extractions`.
/// Merges into the store are serialized by `writer`, and each one is
/// committed atomically, so concurrent readers only ever see whole merges.
pub struct Pipeline {
    extractor: Arc<Extractor>,
    store: Arc<dyn GraphStore>,
    assembler: GraphAssembler,
    retriever: Retriever,
    synthesizer: Synthesizer,
    settings: PipelineSettings,
    writer: Mutex<()>,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(model: Arc<dyn LanguageModel>, store: Arc<dyn GraphStore>, settings: PipelineSettings) -> Result<Self> {
        settings.chunking.validate()?;
        let retriever = Retriever::new(settings.retrieval)?;
        if settings.max_concurrent_extractions == 0 {
            return Err(IngestError::InvalidConfig("max_concurrent_extractions must be at least 1".into()).into());
        }

        let extractor = Extractor::new(model.clone())
            .with_retry_policy(settings.retry.clone())
            .with_call_timeout(settings.call_timeout);
        let synthesizer = Synthesizer::new(model).with_call_timeout(settings.call_timeout);

        Ok(Self {
            extractor: Arc::new(extractor),
            store,
            assembler: GraphAssembler::new(),
            retriever,
            synthesizer,
            settings,
            writer: Mutex::new(()),
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Chunk `text`, extract every chunk and merge the results into the store
    #[instrument(skip(self, text, cancel), fields(text_len = text.len()))]
    pub async fn build_graph(
        &self,
        doc_id: &str,
        text: &str,
        chunking: ChunkerConfig,
        cancel: CancellationToken,
    ) -> Result<BuildReport> {
        let chunker = Chunker::new(chunking)?;
        let chunks = chunker.chunk_text(doc_id, text);
        self.build_from_chunks(chunks, cancel).await
    }

    /// Same as `build_graph` for a `.txt`/`.md` file or a directory of them
    #[instrument(skip(self, cancel))]
    pub async fn ingest_path(&self, path: &Path, chunking: ChunkerConfig, cancel: CancellationToken) -> Result<BuildReport> {
        let chunks = if path.is_dir() {
            ingest::ingest_directory(path, chunking).await?
        } else {
            ingest::ingest_file(path, chunking).await?
        };
        self.build_from_chunks(chunks, cancel).await
    }

    /// Extract chunks concurrently and merge each result as it arrives.
    ///
    /// Failed chunks are reported, not fatal. A store failure aborts the
    /// build; the merge that hit it is not applied. Once `cancel` fires no
    /// further extraction or merge starts.
    pub async fn build_from_chunks(&self, chunks: Vec<Chunk>, cancel: CancellationToken) -> Result<BuildReport> {
        let run_id = Uuid::new_v4();
        let chunks_total = chunks.len();
        self.metrics.record_build();
        let estimated_tokens: usize = chunks.iter().map(Chunk::estimated_tokens).sum();
        info!(%run_id, chunks = chunks_total, estimated_tokens, "Starting graph build");

        let mut pending: BTreeMap<String, usize> = chunks.iter().map(|c| (c.id.clone(), c.index)).collect();
        let mut failures: BTreeMap<String, ChunkFailure> = BTreeMap::new();
        let mut chunks_succeeded = 0;

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_extractions));
        let mut tasks = JoinSet::new();
        for chunk in chunks {
            let extractor = self.extractor.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let timer = TimedOperation::start();
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ExtractError::Cancelled(chunk.id.clone())),
                    result = extract_with_permit(&extractor, &permits, &chunk) => result,
                };
                (chunk.id, chunk.index, result, timer.elapsed())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok((chunk_id, chunk_index, result, elapsed)) = joined else {
                // Panicked tasks are picked up from `pending` below
                continue;
            };
            pending.remove(&chunk_id);

            let extraction = match result {
                Ok(extraction) if !cancel.is_cancelled() => extraction,
                Ok(_) => {
                    let cancelled = ExtractError::Cancelled(chunk_id.clone());
                    self.record_failure(&mut failures, &chunk_id, chunk_index, cancelled, elapsed);
                    continue;
                }
                Err(e) => {
                    self.record_failure(&mut failures, &chunk_id, chunk_index, e, elapsed);
                    continue;
                }
            };

            self.metrics.record_extraction(elapsed, true);
            self.merge(&extraction).await?;
            chunks_succeeded += 1;
        }

        for (chunk_id, chunk_index) in pending {
            warn!(%chunk_id, "Extraction task aborted");
            failures.insert(
                chunk_id.clone(),
                ChunkFailure {
                    chunk_id,
                    chunk_index,
                    reason: "extraction task aborted".to_string(),
                },
            );
        }

        let graph = self.store.snapshot().await?;
        let report = BuildReport {
            run_id,
            graph,
            chunks_total,
            chunks_succeeded,
            failures: failures.into_values().collect(),
            cancelled: cancel.is_cancelled(),
        };

        info!(
            %run_id,
            succeeded = report.chunks_succeeded,
            failed = report.failures.len(),
            cancelled = report.cancelled,
            "Graph build finished"
        );
        Ok(report)
    }

    fn record_failure(
        &self,
        failures: &mut BTreeMap<String, ChunkFailure>,
        chunk_id: &str,
        chunk_index: usize,
        error: ExtractError,
        elapsed: Duration,
    ) {
        match &error {
            ExtractError::Cancelled(_) => debug!(%chunk_id, "Chunk skipped after cancellation"),
            _ => warn!(%chunk_id, error = %error, "Chunk extraction failed"),
        }
        self.metrics.record_extraction(elapsed, false);
        failures.insert(
            chunk_id.to_string(),
            ChunkFailure {
                chunk_id: chunk_id.to_string(),
                chunk_index,
                reason: error.to_string(),
            },
        );
    }

    /// Propose and commit one extraction while holding the writer lock
    async fn merge(&self, extraction: &ExtractionResult) -> Result<()> {
        let _writer = self.writer.lock().await;

        let delta = self.assembler.propose(self.store.as_ref(), extraction).await?;
        if delta.is_empty() {
            return Ok(());
        }
        self.store.commit(&delta).await?;

        self.metrics.record_commit(delta.entities.len(), delta.relations.len());
        debug!(
            chunk_id = %extraction.chunk_id,
            entities = delta.entities.len(),
            relations = delta.relations.len(),
            "Merged extraction"
        );
        Ok(())
    }

    /// Select the subgraph relevant to `query`
    #[instrument(skip(self))]
    pub async fn answer_query(&self, query: &str) -> Result<RetrievalContext> {
        let timer = TimedOperation::start();
        let result = self.retriever.retrieve(query, self.store.as_ref()).await;
        self.metrics.record_query(timer.elapsed(), result.is_ok());
        Ok(result?)
    }

    /// `answer_query` followed by answer synthesis
    #[instrument(skip(self))]
    pub async fn answer(&self, query: &str) -> Result<Answer> {
        let context = self.answer_query(query).await?;
        let answer = self.synthesizer.synthesize(query, &context).await?;
        Ok(Answer { answer, context })
    }

    pub async fn entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        Ok(self.store.get_entity_by_id(entity_id).await?)
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        Ok(self.store.stats().await?)
    }
}

async fn extract_with_permit(
    extractor: &Extractor,
    permits: &Semaphore,
    chunk: &Chunk,
) -> extract::Result<ExtractionResult> {
    let _permit = permits
        .acquire()
        .await
        .map_err(|_| ExtractError::Cancelled(chunk.id.clone()))?;
    extractor.extract(chunk).await
}
