mod common;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use api::{Pipeline, PipelineError};
use common::*;
use index::{GraphStore, MemoryGraphStore, entity_id};
use ingest::{ChunkerConfig, IngestError};
use query::QueryError;

fn pipeline(model: Arc<ScriptedModel>, store: Arc<dyn GraphStore>, concurrency: usize) -> Pipeline {
    Pipeline::new(model, store, settings(concurrency)).unwrap()
}

#[tokio::test]
async fn test_build_and_query_sarah_example() {
    let model = Arc::new(ScriptedModel::new().on("Sarah", Reply::Json(sarah_json())));
    let store = Arc::new(MemoryGraphStore::new());
    let pipeline = pipeline(model, store, 2);

    let report = pipeline
        .build_graph("doc", SARAH_TEXT, ChunkerConfig::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.chunks_total, 1);
    assert_eq!(report.chunks_succeeded, 1);
    assert!(report.failures.is_empty());
    assert!(!report.cancelled);
    assert_eq!(report.graph.entities.len(), 2);
    assert_eq!(report.graph.relations.len(), 1);

    let sarah_id = entity_id("sarah", "PERSON");
    let context = pipeline.answer_query("Where does Sarah work?").await.unwrap();
    assert!(context.seed_entity_ids.contains(&sarah_id));
    let relation = &context.subgraph.relations[0];
    assert_eq!(relation.subject_entity_id, sarah_id);
    assert_eq!(relation.predicate_label, "works_at");
    assert_eq!(relation.object_entity_id, entity_id("prismaticai", "ORGANIZATION"));

    let err = pipeline.answer_query("Who is the CEO of Mars Corp?").await.unwrap_err();
    assert!(matches!(err, PipelineError::Query(QueryError::NoSeedEntity(_))));

    let metrics = pipeline.metrics().snapshot();
    assert_eq!(metrics.chunks_processed, 1);
    assert_eq!(metrics.queries_served, 1);
    assert_eq!(metrics.queries_failed, 1);
}

#[tokio::test]
async fn test_failed_chunk_is_isolated() {
    let model = Arc::new(
        ScriptedModel::new()
            .on("alpha", Reply::Json(extraction_json(&[("Alpha Corp", "ORGANIZATION", 1.0)], &[])))
            .on("gamma", Reply::Json(extraction_json(&[("Gamma Labs", "ORGANIZATION", 1.0)], &[])))
            .on("outage", Reply::Unavailable),
    );
    let store = Arc::new(MemoryGraphStore::new());
    let pipeline = pipeline(model, store, 3);

    let chunks = vec![
        chunk(0, "Notes on alpha."),
        chunk(1, "Rambling text the model cannot parse."),
        chunk(2, "Notes on gamma."),
        chunk(3, "An outage hits here."),
    ];
    let unparseable = chunks[1].id.clone();
    let unavailable = chunks[3].id.clone();

    let report = pipeline.build_from_chunks(chunks, CancellationToken::new()).await.unwrap();

    assert_eq!(report.chunks_total, 4);
    assert_eq!(report.chunks_succeeded, 2);
    let mut failed = report.failed_chunk_ids();
    failed.sort();
    let mut expected = vec![unparseable.as_str(), unavailable.as_str()];
    expected.sort();
    assert_eq!(failed, expected);

    let names: Vec<&str> = report.graph.entities.values().map(|e| e.canonical_name.as_str()).collect();
    assert!(names.contains(&"Alpha Corp"));
    assert!(names.contains(&"Gamma Labs"));
    assert_eq!(pipeline.metrics().snapshot().chunks_failed, 2);
}

fn variant_chunks() -> (ScriptedModel, Vec<ingest::Chunk>) {
    let variants = ["Sarah", "sarah", "SARAH", "The Sarah"];
    let mut model = ScriptedModel::new();
    let mut chunks = Vec::new();
    for i in 0..8 {
        let key = format!("part-{i}");
        let confidence = 0.5 + (i % 3) as f32 * 0.2;
        let body = extraction_json(
            &[
                (variants[i % 4], "PERSON", confidence),
                ("prismaticAI", "ORGANIZATION", 0.8),
                ("Tom", "PERSON", 0.7),
            ],
            &[
                (variants[i % 4], "works_at", "prismaticAI"),
                ("Tom", if i % 2 == 0 { "knows" } else { "Knows" }, variants[i % 4]),
            ],
        );
        model = model.on(&key, Reply::Json(body));
        chunks.push(chunk(i, &format!("Section {key} of the staff notes.")));
    }
    (model, chunks)
}

#[tokio::test]
async fn test_parallel_build_matches_sequential_build() {
    let (model, chunks) = variant_chunks();
    let model = Arc::new(model);

    let sequential = pipeline(model.clone(), Arc::new(MemoryGraphStore::new()), 1)
        .build_from_chunks(chunks.clone(), CancellationToken::new())
        .await
        .unwrap();

    let mut reversed = chunks.clone();
    reversed.reverse();
    let parallel = pipeline(model, Arc::new(MemoryGraphStore::new()), 8)
        .build_from_chunks(reversed, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(sequential.chunks_succeeded, 8);
    assert_eq!(parallel.chunks_succeeded, 8);
    assert_eq!(sequential.graph, parallel.graph);

    let sarah = &sequential.graph.entities[&entity_id("sarah", "PERSON")];
    assert_eq!(sarah.mention_count, 8);
    assert_eq!(sequential.graph.entities.len(), 3);
    assert_eq!(sequential.graph.relations.len(), 2);
    for relation in sequential.graph.relations.values() {
        assert_eq!(relation.support_count, 8);
    }
}

#[tokio::test]
async fn test_cancelled_before_start_touches_nothing() {
    let model = Arc::new(ScriptedModel::new().on("Sarah", Reply::Json(sarah_json())));
    let store = Arc::new(MemoryGraphStore::new());
    let pipeline = pipeline(model.clone(), store.clone(), 2);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = pipeline
        .build_from_chunks(vec![chunk(0, SARAH_TEXT), chunk(1, SARAH_TEXT)], cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.chunks_succeeded, 0);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(model.calls(), 0);
    assert_eq!(store.stats().await.unwrap().entity_count, 0);
}

#[tokio::test]
async fn test_cancel_mid_build_leaves_consistent_graph() {
    let cancel = CancellationToken::new();
    let (model, chunks) = variant_chunks();
    let model = Arc::new(model.cancel_on_call(3, cancel.clone()));
    let store = Arc::new(MemoryGraphStore::new());
    let pipeline = pipeline(model, store.clone(), 1);

    let report = pipeline.build_from_chunks(chunks, cancel).await.unwrap();

    assert!(report.cancelled);
    assert!(report.chunks_succeeded < report.chunks_total);
    assert_eq!(report.chunks_succeeded + report.failures.len(), report.chunks_total);
    assert_no_dangling(&store.snapshot().await.unwrap());
}

#[tokio::test]
async fn test_store_failure_is_not_partially_applied() {
    let model = Arc::new(
        ScriptedModel::new()
            .on("Sarah", Reply::Json(sarah_json()))
            .on(
                "Tom",
                Reply::Json(extraction_json(
                    &[("Tom", "PERSON", 1.0), ("Sarah", "PERSON", 1.0)],
                    &[("Tom", "knows", "Sarah")],
                )),
            ),
    );
    let store = Arc::new(FlakyStore::new());
    let pipeline = pipeline(model, store.clone(), 1);

    pipeline
        .build_from_chunks(vec![chunk(0, SARAH_TEXT)], CancellationToken::new())
        .await
        .unwrap();
    let before = store.snapshot().await.unwrap();

    store.fail_writes(true);
    let err = pipeline
        .build_from_chunks(vec![chunk(1, "Tom has known her for years.")], CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Store(index::StoreError::Unavailable(_))));
    assert_eq!(store.snapshot().await.unwrap(), before);
}

#[tokio::test]
async fn test_invalid_chunk_config_rejected_before_extraction() {
    let model = Arc::new(ScriptedModel::new());
    let pipeline = pipeline(model.clone(), Arc::new(MemoryGraphStore::new()), 1);

    let err = pipeline
        .build_graph("doc", SARAH_TEXT, ChunkerConfig::new(100, 100), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Ingest(IngestError::InvalidConfig(_))));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_answer_runs_synthesizer() {
    let model = Arc::new(ScriptedModel::new().on("Sarah", Reply::Json(sarah_json())));
    let pipeline = pipeline(model, Arc::new(MemoryGraphStore::new()), 1);
    pipeline
        .build_graph("doc", SARAH_TEXT, ChunkerConfig::default(), CancellationToken::new())
        .await
        .unwrap();

    let answer = pipeline.answer("Where does Sarah work?").await.unwrap();
    assert_eq!(answer.answer, ANSWER);
    assert!(answer.context.textual_summary.contains("--works_at-->"));
}

#[tokio::test]
async fn test_ingest_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("sarah.md"), SARAH_TEXT).unwrap();
    std::fs::write(dir.path().join("tom.txt"), "Tom mentors new hires.").unwrap();
    std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

    let model = Arc::new(
        ScriptedModel::new()
            .on("Sarah", Reply::Json(sarah_json()))
            .on("Tom", Reply::Json(extraction_json(&[("Tom", "PERSON", 1.0)], &[]))),
    );
    let pipeline = pipeline(model, Arc::new(MemoryGraphStore::new()), 2);

    let report = pipeline
        .ingest_path(dir.path(), ChunkerConfig::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.chunks_total, 2);
    assert_eq!(report.chunks_succeeded, 2);
    assert_eq!(report.graph.entities.len(), 3);
}

#[tokio::test]
async fn test_slow_model_times_out_per_chunk() {
    let model = Arc::new(
        ScriptedModel::new()
            .on("Sarah", Reply::Json(sarah_json()))
            .with_delay(std::time::Duration::from_secs(2)),
    );
    let pipeline = pipeline(model.clone(), Arc::new(MemoryGraphStore::new()), 1);

    let report = pipeline
        .build_from_chunks(vec![chunk(0, SARAH_TEXT)], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.chunks_succeeded, 0);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].reason.contains("timed out"));
    assert_eq!(model.calls(), 2);
    assert!(report.graph.entities.is_empty());
}
