//! Import pipeline orchestration.
//!
//! Coordinates the full ingest flow: discovery → classification → parsing →
//! chunking → deduplication → transactional import. Per-source errors are
//! recorded in the report and the pipeline continues; only discovery and
//! dedup failures abort the run.
//!
//! # Pipeline
//!
//! 1. **Discovery** — walk the root, match file patterns, hash contents.
//! 2. **Classification** — assign visibility and source class per file.
//!    Failures are soft: the source keeps the default classification.
//! 3. **Parsing** — per-file; failed sources drop out of the parsed set.
//! 4. **Chunking** — per-document; failed documents drop out of the block
//!    set.
//! 5. **Deduplication** — one batched pass across all pre-blocks. Fatal on
//!    store failure.
//! 6. **Import** — one import batch per distinct source file; each block
//!    (with its exchanges and tags) is written in its own transaction. A
//!    failed block marks its batch `failed` with the first error message;
//!    the pipeline moves on to the next block.
//!
//! Dry runs stop after deduplication and emit decision previews plus a
//! classification summary, performing no writes.
//!
//! # Embeddings
//!
//! Block embeddings come from `topic + first exchange question` for
//! conversation logs and from the single exchange's question for
//! documentation. Exchange embeddings come from `question + " " + answer`.
//! Embedding requests are sequential within a run.

use anyhow::{Context, Result};
use chrono::Utc;

use crate::chunker::{self, ChunkOptions};
use crate::classify;
use crate::dedup;
use crate::embedding::OllamaEmbedder;
use crate::models::{
    ImportAction, ImportDecision, ImportError, ImportOptions, ImportReport, ImportStage,
    ParsedDocument, PreBlock,
};
use crate::parser;
use crate::progress::{ImportProgressEvent, ProgressReporter};
use crate::sources;
use crate::store::Store;

/// Run the full import pipeline.
pub async fn run_import(
    store: &Store,
    embedder: &OllamaEmbedder,
    opts: &ImportOptions,
    progress: &dyn ProgressReporter,
) -> Result<ImportReport> {
    let mut report = ImportReport::new();

    // Stage 1: discovery. Fatal on failure.
    progress.report(ImportProgressEvent::Stage { name: "discovering" });
    let mut found = sources::discover(opts).with_context(|| "discovery failed")?;
    report.sources_found = found.len();

    if found.is_empty() {
        report.completed_at = Some(Utc::now());
        return Ok(report);
    }

    // Stage 2: classification. Soft failures keep the default class.
    progress.report(ImportProgressEvent::Stage { name: "classifying" });
    let default_org = store.default_organization_id().await?;

    for source in &mut found {
        if let Err(e) =
            classify::classify_source(source, &opts.default_visibility, Some(default_org))
        {
            report.errors.push(ImportError {
                source_file: source.file_path.clone(),
                stage: ImportStage::Classification,
                message: "Failed to classify source".to_string(),
                error: e.to_string(),
            });
            // Fall back to the safe default.
            source.visibility = "org-private".to_string();
            source.source_class = "private-repo".to_string();
            source.organization_id = Some(default_org);
        }
    }

    // Stage 3: parsing. Failed sources drop from the parsed set.
    progress.report(ImportProgressEvent::Stage { name: "parsing" });
    let mut parsed: Vec<ParsedDocument> = Vec::new();

    for (i, source) in found.iter().enumerate() {
        progress.report(ImportProgressEvent::Step {
            name: "parsing",
            n: i as u64 + 1,
            total: found.len() as u64,
        });

        match parser::parse_source(source) {
            Ok(doc) => {
                parsed.push(doc);
                report.sources_parsed += 1;
            }
            Err(e) => {
                report.errors.push(ImportError {
                    source_file: source.file_path.clone(),
                    stage: ImportStage::Parse,
                    message: "Failed to parse source".to_string(),
                    error: e.to_string(),
                });
                report.failed += 1;
            }
        }
    }

    // Stage 4: chunking. Failed documents drop from the block set.
    progress.report(ImportProgressEvent::Stage { name: "chunking" });
    let chunk_opts = ChunkOptions::default();
    let mut pre_blocks: Vec<PreBlock> = Vec::new();

    for doc in &parsed {
        match chunker::chunk_document(doc, chunk_opts) {
            Ok(blocks) => pre_blocks.extend(blocks),
            Err(e) => {
                report.errors.push(ImportError {
                    source_file: doc.source.file_path.clone(),
                    stage: ImportStage::Chunk,
                    message: "Failed to chunk document".to_string(),
                    error: e.to_string(),
                });
            }
        }
    }
    report.blocks_created = pre_blocks.len();

    // Stage 5: deduplication. Fatal on store failure.
    progress.report(ImportProgressEvent::Stage { name: "deduplicating" });
    let decisions = dedup::deduplicate_blocks(store, pre_blocks)
        .await
        .with_context(|| "deduplication failed")?;

    let (inserted, updated, skipped) = dedup::summarize_decisions(&decisions);
    report.inserted = inserted;
    report.updated = updated;
    report.skipped = skipped;
    report.decisions = decisions;

    if opts.dry_run {
        report.completed_at = Some(Utc::now());
        return Ok(report);
    }

    // Stage 6: import. One batch per distinct source file, one transaction
    // per block.
    progress.report(ImportProgressEvent::Stage { name: "importing" });
    import_decisions(store, embedder, &mut report, progress).await?;

    report.completed_at = Some(Utc::now());
    Ok(report)
}

/// Write all insert/update decisions, grouped by source file. Decisions for
/// one file are contiguous in pipeline order, so grouping preserves it.
async fn import_decisions(
    store: &Store,
    embedder: &OllamaEmbedder,
    report: &mut ImportReport,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let total_actionable = (report.inserted + report.updated) as u64;
    let mut written = 0u64;

    let groups = group_by_source_file(&report.decisions);
    let mut errors = Vec::new();

    for group in groups {
        let actionable: Vec<&ImportDecision> = group
            .into_iter()
            .filter(|d| d.action != ImportAction::Skip)
            .collect();
        if actionable.is_empty() {
            continue;
        }

        let first = actionable[0].pre_block.clone();
        let batch_id = store
            .create_import_batch(
                &first.source_file,
                &first.source_hash,
                &first.source_type,
                &first.visibility,
                None,
                first.organization_id,
            )
            .await?;

        let mut batch_blocks = 0i64;
        let mut first_error: Option<String> = None;

        for decision in actionable {
            written += 1;
            progress.report(ImportProgressEvent::Step {
                name: "importing",
                n: written,
                total: total_actionable,
            });

            match import_block(store, embedder, decision, batch_id).await {
                Ok(()) => batch_blocks += 1,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e.to_string());
                    }
                    errors.push(ImportError {
                        source_file: decision.pre_block.source_file.clone(),
                        stage: ImportStage::Import,
                        message: format!(
                            "Failed to import block: {}",
                            decision.pre_block.topic
                        ),
                        error: e.to_string(),
                    });
                }
            }
        }

        let status = if first_error.is_some() { "failed" } else { "completed" };
        store
            .update_import_history(batch_id, status, batch_blocks, first_error.as_deref())
            .await?;
    }

    report.failed += errors.len();
    report.errors.extend(errors);
    Ok(())
}

/// Embed and write one block with its exchanges and tags in a single
/// transaction.
async fn import_block(
    store: &Store,
    embedder: &OllamaEmbedder,
    decision: &ImportDecision,
    batch_id: uuid::Uuid,
) -> Result<()> {
    let pb = &decision.pre_block;

    let project_name = project_name_from_path(&pb.project_path);
    let project = store
        .get_or_create_project(&project_name, &pb.project_path, pb.organization_id)
        .await?;

    let block_text = block_embedding_text(pb);
    let block_embedding = embedder.embed(&block_text).await?;

    let mut exchange_embeddings = Vec::with_capacity(pb.exchanges.len());
    for ex in &pb.exchanges {
        let text = format!("{} {}", ex.question, ex.answer);
        exchange_embeddings.push(embedder.embed(&text).await?);
    }

    store
        .insert_block_with_children(
            project.id,
            pb,
            &block_embedding,
            &exchange_embeddings,
            Some(batch_id),
            decision.existing_id,
        )
        .await?;

    Ok(())
}

/// Text embedded for the block itself: conversation logs combine the topic
/// with the first exchange question; documentation blocks embed the single
/// exchange's question.
fn block_embedding_text(pb: &PreBlock) -> String {
    if pb.source_type == "conversation-log" {
        match pb.exchanges.first() {
            Some(first) => format!("{} {}", pb.topic, first.question),
            None => pb.topic.clone(),
        }
    } else {
        pb.exchanges
            .first()
            .map(|e| e.question.clone())
            .unwrap_or_else(|| pb.topic.clone())
    }
}

/// The last path component of a project path.
fn project_name_from_path(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown-project")
        .to_string()
}

/// Group decisions into runs per source file, preserving order.
fn group_by_source_file(decisions: &[ImportDecision]) -> Vec<Vec<&ImportDecision>> {
    let mut groups: Vec<Vec<&ImportDecision>> = Vec::new();

    for decision in decisions {
        match groups.last_mut() {
            Some(group)
                if group[0].pre_block.source_file == decision.pre_block.source_file =>
            {
                group.push(decision);
            }
            _ => groups.push(vec![decision]),
        }
    }

    groups
}

// ============ Report output ============

/// Print the human-readable report to stdout.
pub fn print_report(report: &ImportReport, opts: &ImportOptions) {
    if opts.dry_run {
        println!("=== DRY RUN - No changes made ===");
    }

    println!("sources found:  {}", report.sources_found);
    println!("sources parsed: {}", report.sources_parsed);
    println!("blocks created: {}", report.blocks_created);
    println!("  inserted: {}", report.inserted);
    println!("  updated:  {}", report.updated);
    println!("  skipped:  {}", report.skipped);
    println!("  failed:   {}", report.failed);

    if opts.dry_run {
        print_preview(report, opts.preview_count);
        print_classification_summary(report);
    }

    if !report.errors.is_empty() {
        println!();
        println!("errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [{}] {}: {}", err.stage, err.source_file, err.error);
        }
    }

    if let Some(completed) = report.completed_at {
        let elapsed = completed - report.started_at;
        println!();
        println!("time: {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
    }
    println!("ok");
}

/// Show the first `count` insert/update blocks of a dry run.
fn print_preview(report: &ImportReport, count: usize) {
    println!();
    println!("=== Sample Blocks ===");

    let mut shown = 0;
    for decision in &report.decisions {
        if shown >= count {
            break;
        }
        if decision.action == ImportAction::Skip {
            continue;
        }

        let pb = &decision.pre_block;
        println!("Action:     {} ({})", decision.action, decision.reason);
        println!("Topic:      {}", pb.topic);
        println!("Source:     {}", pb.source_file);
        println!("Exchanges:  {}", pb.exchanges.len());
        println!("Tags:       {:?}", pb.tags);
        println!("Visibility: {}", pb.visibility);
        if let Some(first) = pb.exchanges.first() {
            println!("Q: {}", truncate(&first.question, 80));
            println!("A: {}", truncate(&first.answer, 80));
        }
        println!("---");
        shown += 1;
    }
}

/// Visibility counts over the decided blocks.
fn print_classification_summary(report: &ImportReport) {
    println!();
    println!("=== Classification Summary ===");

    let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for decision in &report.decisions {
        *counts.entry(decision.pre_block.visibility.as_str()).or_default() += 1;
    }
    for (visibility, count) in counts {
        println!("{}: {} blocks", visibility, count);
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PreExchange;
    use serde_json::Map;

    fn decision(action: ImportAction, source_file: &str) -> ImportDecision {
        ImportDecision {
            action,
            pre_block: PreBlock {
                topic: "T".to_string(),
                exchanges: vec![PreExchange {
                    question: "Q".to_string(),
                    answer: "A".to_string(),
                    timestamp: Utc::now(),
                    model_used: None,
                }],
                metadata: Map::new(),
                tags: Vec::new(),
                project_path: "/p".to_string(),
                source_file: source_file.to_string(),
                source_type: "conversation-log".to_string(),
                source_hash: "h".to_string(),
                started_at: Utc::now(),
                completed_at: Some(Utc::now()),
                visibility: "org-private".to_string(),
                organization_id: None,
                source_url: None,
                source_attribution: None,
            },
            existing_id: None,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn grouping_preserves_contiguous_files() {
        let decisions = vec![
            decision(ImportAction::Insert, "/a.md"),
            decision(ImportAction::Insert, "/a.md"),
            decision(ImportAction::Skip, "/b.md"),
            decision(ImportAction::Insert, "/c.md"),
        ];

        let groups = group_by_source_file(&decisions);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0][0].pre_block.source_file, "/a.md");
        assert_eq!(groups[1][0].pre_block.source_file, "/b.md");
        assert_eq!(groups[2][0].pre_block.source_file, "/c.md");
    }

    #[test]
    fn block_embedding_text_by_source_type() {
        let d = decision(ImportAction::Insert, "/a.md");
        assert_eq!(block_embedding_text(&d.pre_block), "T Q");

        let mut doc_block = d.pre_block.clone();
        doc_block.source_type = "doc".to_string();
        assert_eq!(block_embedding_text(&doc_block), "Q");
    }

    #[test]
    fn project_name_extraction() {
        assert_eq!(project_name_from_path("/a/b/project"), "project");
        assert_eq!(project_name_from_path("/a/b/project/"), "project");
        assert_eq!(project_name_from_path(""), "unknown-project");
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("short", 80), "short");
        let long = "x".repeat(100);
        let t = truncate(&long, 80);
        assert_eq!(t.chars().count(), 80);
        assert!(t.ends_with("..."));
    }
}
