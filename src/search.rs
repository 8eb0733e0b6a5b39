//! Hybrid search over the knowledge store.
//!
//! The core [`search_blocks`] function embeds the query, runs the store's
//! hybrid vector + keyword query, applies the `min_relevance` post-filter,
//! and optionally attaches one-hop related blocks per result. It is shared
//! by the CLI (`kg search`), the HTTP façade, and the MCP tool surface.
//!
//! Retrieval is a snapshot read: results for a given input are
//! deterministic modulo index refresh state. Design target is p50 under
//! 200 ms on a warm index.

use anyhow::Result;
use std::time::Instant;

use crate::config::Config;
use crate::embedding::OllamaEmbedder;
use crate::models::{SearchOptions, SearchResult, SearchResults};
use crate::store::Store;

/// Core search function returning structured results.
pub async fn search_blocks(
    store: &Store,
    embedder: &OllamaEmbedder,
    query: &str,
    opts: &SearchOptions,
    related_limit: i64,
) -> Result<SearchResults> {
    let start = Instant::now();

    let query_vec = embedder.embed(query).await?;
    let limit = opts.limit.unwrap_or(10);

    let scored = store
        .hybrid_search(&query_vec, query, opts.project_id, limit)
        .await?;

    let mut results = Vec::with_capacity(scored.len());
    for (block, relevance) in scored {
        // min_relevance filters on the combined score, after ranking.
        if let Some(min) = opts.min_relevance {
            if relevance < min {
                continue;
            }
        }

        let related = if opts.include_n_plus {
            store.load_related_one_hop(block.id, related_limit).await?
        } else {
            Vec::new()
        };

        results.push(SearchResult {
            block,
            relevance,
            related,
        });
    }

    let total_found = results.len();
    Ok(SearchResults {
        results,
        total_found,
        search_time: start.elapsed(),
    })
}

/// CLI entry point — runs [`search_blocks`] and prints results to stdout.
pub async fn run_search(
    config: &Config,
    query: &str,
    project_id: Option<uuid::Uuid>,
    limit: Option<i64>,
    include_n_plus: bool,
    min_relevance: Option<f64>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = crate::db::connect(config).await?;
    let store = Store::new(pool.clone());
    let embedder = OllamaEmbedder::new(&config.embedding)?;

    let opts = SearchOptions {
        project_id,
        limit: limit.or(Some(config.retrieval.limit)),
        min_relevance,
        include_n_plus,
    };

    let results = search_blocks(
        &store,
        &embedder,
        query,
        &opts,
        config.retrieval.related_limit,
    )
    .await?;

    if results.results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.results.iter().enumerate() {
        let block = &result.block;
        println!("{}. [{:.3}] {}", i + 1, result.relevance, block.topic);
        println!("    created: {}", block.created_at.format("%Y-%m-%d %H:%M"));
        println!("    exchanges: {}", block.exchange_count);
        if !block.tags.is_empty() {
            let names: Vec<&str> = block.tags.iter().map(|t| t.name.as_str()).collect();
            println!("    tags: {}", names.join(", "));
        }
        if let Some(first) = block.exchanges.first() {
            println!("    q: \"{}\"", first.question.replace('\n', " "));
        }
        if !result.related.is_empty() {
            let topics: Vec<&str> =
                result.related.iter().map(|b| b.topic.as_str()).collect();
            println!("    related: {}", topics.join(" | "));
        }
        println!("    id: {}", block.id);
        println!();
    }

    println!(
        "{} results in {:.1}ms",
        results.total_found,
        results.search_time.as_secs_f64() * 1000.0
    );

    pool.close().await;
    Ok(())
}
