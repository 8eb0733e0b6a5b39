//! Hash-addressed deduplication.
//!
//! Each pre-block is checked against the import history for its source
//! file. The decision table:
//!
//! | history | source type | action |
//! |---|---|---|
//! | none | any | insert |
//! | hash matches | any | skip (unchanged) |
//! | hash differs | conversation-log | skip (immutable) |
//! | hash differs | spec/doc/working-file | update |
//! | hash differs | unknown | skip (default to immutable) |
//!
//! Conversation logs are immutable: once imported, a changed file never
//! overwrites or deletes the existing blocks. Dedup is driven entirely by
//! the `source_hash`, never by embedding equality.
//!
//! Store failures here are fatal for the whole run — without history the
//! pipeline cannot decide safely.

use anyhow::{Context, Result};

use crate::models::{ImportAction, ImportDecision, ImportHistoryRecord, PreBlock};
use crate::store::Store;

/// Decide the action for every pre-block, preserving input order.
pub async fn deduplicate_blocks(
    store: &Store,
    pre_blocks: Vec<PreBlock>,
) -> Result<Vec<ImportDecision>> {
    let mut decisions = Vec::with_capacity(pre_blocks.len());

    for pre_block in pre_blocks {
        let history = store
            .query_import_history(&pre_block.source_file, &pre_block.source_hash)
            .await
            .with_context(|| {
                format!("failed to query import history for {}", pre_block.source_file)
            })?;

        let (action, reason) = decide_action(history.as_ref(), &pre_block);

        let existing_id = if action == ImportAction::Update {
            let existing = store
                .query_blocks_by_source(&pre_block.source_file)
                .await
                .with_context(|| {
                    format!("failed to query existing blocks for {}", pre_block.source_file)
                })?;
            existing.first().map(|b| b.block_id)
        } else {
            None
        };

        decisions.push(ImportDecision {
            action,
            pre_block,
            existing_id,
            reason,
        });
    }

    Ok(decisions)
}

/// The pure decision table over one history record and one pre-block.
pub fn decide_action(
    history: Option<&ImportHistoryRecord>,
    pre_block: &PreBlock,
) -> (ImportAction, String) {
    let Some(record) = history else {
        return (
            ImportAction::Insert,
            "new file - never imported before".to_string(),
        );
    };

    if record.file_hash == pre_block.source_hash {
        let suffix = if is_immutable_source_type(&pre_block.source_type) {
            " (immutable)"
        } else {
            ""
        };
        return (
            ImportAction::Skip,
            format!(
                "unchanged {} file{} - hash match",
                pre_block.source_type, suffix
            ),
        );
    }

    if is_immutable_source_type(&pre_block.source_type) {
        return (
            ImportAction::Skip,
            format!(
                "{} files are immutable - cannot update existing content",
                pre_block.source_type
            ),
        );
    }

    (
        ImportAction::Update,
        format!(
            "{} file changed - hash mismatch (old: {}, new: {})",
            pre_block.source_type,
            short_hash(&record.file_hash),
            short_hash(&pre_block.source_hash)
        ),
    )
}

/// Conversation logs never update; unknown source types default to
/// immutable for safety.
pub fn is_immutable_source_type(source_type: &str) -> bool {
    match source_type {
        "conversation-log" => true,
        "spec" | "doc" | "working-file" => false,
        _ => true,
    }
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}

/// Counts per action, in pipeline report shape: (inserted, updated, skipped).
pub fn summarize_decisions(decisions: &[ImportDecision]) -> (usize, usize, usize) {
    let mut inserted = 0;
    let mut updated = 0;
    let mut skipped = 0;

    for d in decisions {
        match d.action {
            ImportAction::Insert => inserted += 1,
            ImportAction::Update => updated += 1,
            ImportAction::Skip => skipped += 1,
        }
    }

    (inserted, updated, skipped)
}
