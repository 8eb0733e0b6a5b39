//! End-to-end pipeline tests over an in-memory store.
//!
//! These drive discovery → classification → parsing → chunking → dedup
//! against real files in a temp directory, then simulate committed imports
//! with fixed embeddings to verify the idempotence and immutability
//! contracts without needing a live embedding service.

use chrono::Utc;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use kgraph::chunker::{self, ChunkOptions};
use kgraph::classify;
use kgraph::dedup;
use kgraph::models::{ImportAction, ImportDecision, ImportOptions, PreBlock};
use kgraph::parser;
use kgraph::sources;
use kgraph::store::Store;

const SESSION_LOG: &str = r#"# Session Log: 2025-10-15 - Pipeline Walkthrough

**Project:** kgraph
**Started:** 2025-10-15T16:00:00Z

---

## 16:00 - Discovery Design

Settled on filename globs per source type.

## 16:15 - Classifier Rules

Precedence order: manual tags, URLs, paths, default.

## 16:30 - Chunk Sizing

Target four exchanges per block.

## Tag Index

#pipeline #ingest #chunking
"#;

const SPEC_V1: &str = "# Retrieval Spec\n\n## Ranking\n\nVector first, keyword boost second.\n";
const SPEC_V2: &str =
    "# Retrieval Spec\n\n## Ranking\n\nVector first, keyword boost second, then recency.\n";

fn write_tree(root: &Path) {
    fs::create_dir_all(root.join("conversation-logs")).unwrap();
    fs::write(
        root.join("conversation-logs/session-2025-10-15-1600.md"),
        SESSION_LOG,
    )
    .unwrap();
    fs::write(root.join("retrieval-spec.md"), SPEC_V1).unwrap();
}

fn import_opts(root: &Path) -> ImportOptions {
    ImportOptions {
        root_dir: root.to_string_lossy().to_string(),
        file_types: vec!["logs".to_string(), "specs".to_string()],
        ..ImportOptions::default()
    }
}

async fn test_store() -> Store {
    let pool = kgraph::db::connect_memory().await.unwrap();
    kgraph::migrate::run_migrations(&pool).await.unwrap();
    Store::new(pool)
}

/// Run the read-only half of the pipeline: discover, classify, parse,
/// chunk, dedup.
async fn decide(store: &Store, opts: &ImportOptions) -> Vec<ImportDecision> {
    let mut found = sources::discover(opts).unwrap();
    for source in &mut found {
        classify::classify_source(source, &opts.default_visibility, None).unwrap();
    }

    let mut pre_blocks: Vec<PreBlock> = Vec::new();
    for source in &found {
        let doc = parser::parse_source(source).unwrap();
        pre_blocks.extend(chunker::chunk_document(&doc, ChunkOptions::default()).unwrap());
    }

    dedup::deduplicate_blocks(store, pre_blocks).await.unwrap()
}

/// Simulate the importer's write phase with fixed embeddings: one batch
/// per source file, one insert per actionable decision.
async fn commit(store: &Store, decisions: &[ImportDecision]) {
    let embedding = vec![0.5f32, 0.5, 0.5];

    let mut batch_for_file: std::collections::HashMap<String, uuid::Uuid> =
        std::collections::HashMap::new();

    for decision in decisions {
        if decision.action == ImportAction::Skip {
            continue;
        }
        let pb = &decision.pre_block;

        let batch_id = match batch_for_file.get(&pb.source_file) {
            Some(id) => *id,
            None => {
                let id = store
                    .create_import_batch(
                        &pb.source_file,
                        &pb.source_hash,
                        &pb.source_type,
                        &pb.visibility,
                        None,
                        pb.organization_id,
                    )
                    .await
                    .unwrap();
                batch_for_file.insert(pb.source_file.clone(), id);
                id
            }
        };

        let project = store
            .get_or_create_project("test-project", &pb.project_path, None)
            .await
            .unwrap();
        let exchange_embeddings: Vec<Vec<f32>> =
            pb.exchanges.iter().map(|_| embedding.clone()).collect();

        store
            .insert_block_with_children(
                project.id,
                pb,
                &embedding,
                &exchange_embeddings,
                Some(batch_id),
                decision.existing_id,
            )
            .await
            .unwrap();
    }

    for (_, batch_id) in batch_for_file {
        store
            .update_import_history(batch_id, "completed", 1, None)
            .await
            .unwrap();
    }
}

fn counts(decisions: &[ImportDecision]) -> (usize, usize, usize) {
    dedup::summarize_decisions(decisions)
}

#[tokio::test]
async fn first_run_inserts_everything() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());
    let store = test_store().await;

    let decisions = decide(&store, &import_opts(tmp.path())).await;
    let (inserted, updated, skipped) = counts(&decisions);

    // One session (3 milestones → 1 block) and one spec section.
    assert_eq!(inserted, 2);
    assert_eq!(updated, 0);
    assert_eq!(skipped, 0);

    // The session block carries its tag-index tags and visibility.
    let session = decisions
        .iter()
        .find(|d| d.pre_block.source_type == "conversation-log")
        .unwrap();
    assert_eq!(session.pre_block.topic, "Pipeline Walkthrough");
    assert_eq!(session.pre_block.exchanges.len(), 3);
    assert_eq!(
        session.pre_block.tags,
        vec!["pipeline", "ingest", "chunking"]
    );
    assert_eq!(session.pre_block.visibility, "org-private");
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());
    let store = test_store().await;
    let opts = import_opts(tmp.path());

    let first = decide(&store, &opts).await;
    let (first_inserted, _, _) = counts(&first);
    commit(&store, &first).await;

    let second = decide(&store, &opts).await;
    let (inserted, updated, skipped) = counts(&second);
    assert_eq!(inserted, 0);
    assert_eq!(updated, 0);
    assert_eq!(skipped, first_inserted);
}

#[tokio::test]
async fn changed_conversation_log_is_immutable() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());
    let store = test_store().await;
    let opts = import_opts(tmp.path());

    let first = decide(&store, &opts).await;
    commit(&store, &first).await;

    // Mutate the session log on disk.
    fs::write(
        tmp.path().join("conversation-logs/session-2025-10-15-1600.md"),
        SESSION_LOG.replace("Pipeline Walkthrough", "Edited Walkthrough"),
    )
    .unwrap();

    let second = decide(&store, &opts).await;
    let log_decisions: Vec<&ImportDecision> = second
        .iter()
        .filter(|d| d.pre_block.source_type == "conversation-log")
        .collect();

    assert!(!log_decisions.is_empty());
    for d in log_decisions {
        assert_eq!(d.action, ImportAction::Skip);
        assert!(d.reason.contains("immutable"));
    }
}

#[tokio::test]
async fn changed_spec_updates_existing_block() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());
    let store = test_store().await;
    let opts = import_opts(tmp.path());

    let first = decide(&store, &opts).await;
    commit(&store, &first).await;

    let prior_ids: Vec<uuid::Uuid> = store
        .query_blocks_by_source(
            tmp.path().join("retrieval-spec.md").to_str().unwrap(),
        )
        .await
        .unwrap()
        .iter()
        .map(|b| b.block_id)
        .collect();
    assert!(!prior_ids.is_empty());

    fs::write(tmp.path().join("retrieval-spec.md"), SPEC_V2).unwrap();

    let second = decide(&store, &opts).await;
    let spec_updates: Vec<&ImportDecision> = second
        .iter()
        .filter(|d| d.pre_block.source_type == "spec")
        .collect();

    assert!(!spec_updates.is_empty());
    for d in spec_updates {
        assert_eq!(d.action, ImportAction::Update);
        assert!(prior_ids.contains(&d.existing_id.unwrap()));
    }
}

#[tokio::test]
async fn committed_blocks_preserve_classifier_visibility() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());
    let store = test_store().await;

    let decisions = decide(&store, &import_opts(tmp.path())).await;
    commit(&store, &decisions).await;

    for decision in &decisions {
        let written = store
            .query_blocks_by_source(&decision.pre_block.source_file)
            .await
            .unwrap();
        for record in written {
            let block = store.load_block_full(record.block_id).await.unwrap();
            assert_eq!(
                block.visibility.as_deref(),
                Some(decision.pre_block.visibility.as_str())
            );
            assert_eq!(block.organization_id, decision.pre_block.organization_id);
        }
    }
}

#[tokio::test]
async fn dry_run_never_writes() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());
    let store = test_store().await;

    // Deciding without committing is exactly what a dry run does.
    let _ = decide(&store, &import_opts(tmp.path())).await;

    let blocks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks")
        .fetch_one(store.pool())
        .await
        .unwrap();
    let history: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_history")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(blocks, 0);
    assert_eq!(history, 0);
}

#[tokio::test]
async fn embedding_dimensions_are_uniform() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());
    let store = test_store().await;

    let decisions = decide(&store, &import_opts(tmp.path())).await;
    commit(&store, &decisions).await;

    let block_blobs: Vec<Vec<u8>> = sqlx::query_scalar("SELECT embedding FROM blocks")
        .fetch_all(store.pool())
        .await
        .unwrap();
    let exchange_blobs: Vec<Vec<u8>> = sqlx::query_scalar("SELECT embedding FROM exchanges")
        .fetch_all(store.pool())
        .await
        .unwrap();

    assert!(!block_blobs.is_empty());
    assert!(!exchange_blobs.is_empty());
    for blob in block_blobs.iter().chain(exchange_blobs.iter()) {
        assert_eq!(kgraph::embedding::decode_embedding(blob).len(), 3);
    }
}

#[tokio::test]
async fn hybrid_search_end_to_end() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path());
    let store = test_store().await;

    let decisions = decide(&store, &import_opts(tmp.path())).await;
    commit(&store, &decisions).await;

    // All blocks share the same fixed embedding, so keyword rank decides.
    let results = store
        .hybrid_search(&[0.5, 0.5, 0.5], "pipeline walkthrough", None, 10)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].0.topic, "Pipeline Walkthrough");
    assert!(results[0].0.completed_at.is_some());
    assert_eq!(results[0].0.exchanges.len(), 3);

    // Milestone timestamps bind to today's date.
    assert_eq!(results[0].0.started_at.date_naive(), Utc::now().date_naive());
}
