//! Block retrieval with one-hop context.
//!
//! Fetches a block, its exchanges and tags, plus every block one tag-edge
//! hop away. Used by both the `kg get` CLI command and the `get_context`
//! tool.

use anyhow::Result;
use uuid::Uuid;

use crate::config::Config;
use crate::store::Store;

/// CLI entry point — loads the N+1 context bundle and prints it.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let block_id = Uuid::parse_str(id)
        .map_err(|e| anyhow::anyhow!("invalid block id '{}': {}", id, e))?;

    let pool = crate::db::connect(config).await?;
    let store = Store::new(pool.clone());

    let bundle = store
        .get_context_n_plus_one(block_id, config.retrieval.related_limit)
        .await?;

    let block = &bundle.primary_block;
    println!("--- Block ---");
    println!("id:         {}", block.id);
    println!("topic:      {}", block.topic);
    println!("project:    {}", block.project_id);
    println!("started:    {}", block.started_at.format("%Y-%m-%d %H:%M"));
    if let Some(completed) = block.completed_at {
        println!("completed:  {}", completed.format("%Y-%m-%d %H:%M"));
    }
    if let Some(ref visibility) = block.visibility {
        println!("visibility: {}", visibility);
    }
    if !block.source_file.is_empty() {
        println!("source:     {} ({})", block.source_file, block.source_type);
    }
    if let Some(ref attribution) = block.source_attribution {
        println!("attribution: {}", attribution);
    }

    println!();
    println!("--- Exchanges ({}) ---", block.exchanges.len());
    for exchange in &block.exchanges {
        println!("[{}] Q: {}", exchange.sequence, exchange.question);
        println!("    A: {}", exchange.answer);
        if let Some(ref model) = exchange.model_used {
            println!("    model: {}", model);
        }
        println!();
    }

    if !bundle.tags.is_empty() {
        let names: Vec<&str> = bundle.tags.iter().map(|t| t.name.as_str()).collect();
        println!("--- Tags ---");
        println!("{}", names.join(", "));
        println!();
    }

    println!("--- Related ({}) ---", bundle.related_blocks.len());
    for related in &bundle.related_blocks {
        println!("{}  {}", related.id, related.topic);
    }

    pool.close().await;
    Ok(())
}
