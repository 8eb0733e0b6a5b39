//! Typed persistence operations over the SQLite substrate.
//!
//! The [`Store`] wraps the connection pool and exposes the operations the
//! pipeline and tool surface need, instead of raw SQL. All block writes are
//! transactional: a block, its exchanges, and its tag edges become visible
//! all-or-none. The FTS5 index over topics is maintained inside the same
//! transaction.
//!
//! # Hybrid search
//!
//! `hybrid_search` evaluates two candidate sets, both restricted to
//! completed blocks and the optional project filter:
//!
//! - **vector**: top-`limit` blocks by cosine similarity between the query
//!   vector and the stored topic embedding.
//! - **keyword**: blocks whose topic matches the query terms in FTS5,
//!   scored by BM25 rank, limited to `limit`.
//!
//! The vector side is the recall spine; the keyword rank is added on top to
//! break semantic ties on topic-word matches:
//! `combined_score = similarity + keyword_rank`.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::embedding::{cosine_similarity, decode_embedding, encode_embedding};
use crate::models::{
    Block, BlockSourceRecord, ContextBundle, Exchange, ImportHistoryRecord, Organization, PreBlock,
    Project, Tag,
};

/// Name and tier of the organization materialized when none is supplied.
const DEFAULT_ORG_NAME: &str = "default";
const DEFAULT_ORG_TIER: &str = "standard";

pub struct Store {
    pool: SqlitePool,
    default_org: OnceCell<Uuid>,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            default_org: OnceCell::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Projects and organizations ============

    /// Get the project for a directory path, creating it on first reference.
    pub async fn get_or_create_project(
        &self,
        name: &str,
        directory_path: &str,
        organization_id: Option<Uuid>,
    ) -> Result<Project> {
        let row = sqlx::query(
            "SELECT id, name, directory_path, organization_id, created_at, updated_at
             FROM projects WHERE directory_path = ?",
        )
        .bind(directory_path)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return row_to_project(&row);
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO projects (id, name, directory_path, organization_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(directory_path)
        .bind(organization_id.map(|o| o.to_string()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Project {
            id,
            name: name.to_string(),
            directory_path: directory_path.to_string(),
            organization_id,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get an organization by unique name, creating it if missing.
    pub async fn get_or_create_organization(&self, name: &str, tier: &str) -> Result<Organization> {
        let row = sqlx::query(
            "SELECT id, name, tier, created_at, updated_at FROM organizations WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return row_to_organization(&row);
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let insert = sqlx::query(
            "INSERT INTO organizations (id, name, tier, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(tier)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => Ok(Organization {
                id,
                name: name.to_string(),
                tier: tier.to_string(),
                created_at: now,
                updated_at: now,
            }),
            // Lost a race on the unique name; fall back to a read.
            Err(_) => {
                let row = sqlx::query(
                    "SELECT id, name, tier, created_at, updated_at FROM organizations WHERE name = ?",
                )
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
                row_to_organization(&row)
            }
        }
    }

    /// Id of the default organization, materialized on first use and
    /// cached for the lifetime of the store. Safe to recompute.
    pub async fn default_organization_id(&self) -> Result<Uuid> {
        let id = self
            .default_org
            .get_or_try_init(|| async {
                let org = self
                    .get_or_create_organization(DEFAULT_ORG_NAME, DEFAULT_ORG_TIER)
                    .await?;
                Ok::<Uuid, anyhow::Error>(org.id)
            })
            .await?;
        Ok(*id)
    }

    // ============ Import history ============

    /// Open a new import batch for a source file version. Status starts
    /// as `in-progress`; the batch is closed once at the end of the import.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_import_batch(
        &self,
        source_file: &str,
        file_hash: &str,
        import_type: &str,
        visibility: &str,
        source_class: Option<&str>,
        organization_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO import_history
             (id, source_file, file_hash, imported_at, updated_at, block_count, import_type,
              status, visibility, source_classification, organization_id)
             VALUES (?, ?, ?, ?, ?, 0, ?, 'in-progress', ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(source_file)
        .bind(file_hash)
        .bind(now)
        .bind(now)
        .bind(import_type)
        .bind(visibility)
        .bind(source_class)
        .bind(organization_id.map(|o| o.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Close an import batch: set its final status, block count, and an
    /// error message when the batch failed.
    pub async fn update_import_history(
        &self,
        batch_id: Uuid,
        status: &str,
        block_count: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE import_history
             SET status = ?, block_count = ?, error_message = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(block_count)
        .bind(error_message)
        .bind(Utc::now())
        .bind(batch_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent import-history record for a source file. Prefers an
    /// exact `(source_file, file_hash)` match; otherwise falls back to the
    /// newest record for the file so callers can detect hash changes.
    pub async fn query_import_history(
        &self,
        source_file: &str,
        file_hash: &str,
    ) -> Result<Option<ImportHistoryRecord>> {
        let exact = sqlx::query(
            "SELECT id, source_file, file_hash, imported_at, updated_at, block_count,
                    import_type, status, visibility, source_classification, organization_id,
                    error_message
             FROM import_history
             WHERE source_file = ? AND file_hash = ?
             ORDER BY imported_at DESC LIMIT 1",
        )
        .bind(source_file)
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = exact {
            return Ok(Some(row_to_history(&row)?));
        }

        let latest = sqlx::query(
            "SELECT id, source_file, file_hash, imported_at, updated_at, block_count,
                    import_type, status, visibility, source_classification, organization_id,
                    error_message
             FROM import_history
             WHERE source_file = ?
             ORDER BY imported_at DESC LIMIT 1",
        )
        .bind(source_file)
        .fetch_optional(&self.pool)
        .await?;

        latest.map(|row| row_to_history(&row)).transpose()
    }

    /// Blocks previously written for a source file, used during update
    /// decisions.
    pub async fn query_blocks_by_source(&self, source_file: &str) -> Result<Vec<BlockSourceRecord>> {
        let rows = sqlx::query(
            "SELECT id, source_hash, source_type, topic FROM blocks
             WHERE source_file = ? ORDER BY created_at ASC",
        )
        .bind(source_file)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                Ok(BlockSourceRecord {
                    block_id: parse_uuid(&id)?,
                    source_hash: row.get("source_hash"),
                    source_type: row.get("source_type"),
                    topic: row.get("topic"),
                })
            })
            .collect()
    }

    // ============ Block writes ============

    /// Insert a block with its exchanges and tags in a single transaction.
    ///
    /// Tags are created by name (idempotent upsert on the unique `name`),
    /// tag edges carry `confidence = 1.0`, and exchanges are written in
    /// `sequence` order with their pre-computed embeddings. When
    /// `replace_id` is given the existing block is deleted first (its
    /// exchanges and tag edges cascade), which is the update path for
    /// mutated documentation sources.
    pub async fn insert_block_with_children(
        &self,
        project_id: Uuid,
        pre_block: &PreBlock,
        block_embedding: &[f32],
        exchange_embeddings: &[Vec<f32>],
        batch_id: Option<Uuid>,
        replace_id: Option<Uuid>,
    ) -> Result<Block> {
        if exchange_embeddings.len() != pre_block.exchanges.len() {
            anyhow::bail!(
                "exchange embedding count {} does not match exchange count {}",
                exchange_embeddings.len(),
                pre_block.exchanges.len()
            );
        }

        let mut tx = self.pool.begin().await?;

        if let Some(old_id) = replace_id {
            sqlx::query("DELETE FROM blocks_fts WHERE block_id = ?")
                .bind(old_id.to_string())
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM blocks WHERE id = ?")
                .bind(old_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        let block_id = Uuid::new_v4();
        let now = Utc::now();
        let metadata_json = serde_json::to_string(&pre_block.metadata)?;

        sqlx::query(
            "INSERT INTO blocks
             (id, project_id, topic, started_at, completed_at, exchange_count, embedding,
              metadata, created_at, updated_at, visibility, organization_id, source_url,
              source_attribution, source_file, source_type, source_hash, import_batch_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(block_id.to_string())
        .bind(project_id.to_string())
        .bind(&pre_block.topic)
        .bind(pre_block.started_at)
        .bind(pre_block.completed_at)
        .bind(pre_block.exchanges.len() as i64)
        .bind(encode_embedding(block_embedding))
        .bind(&metadata_json)
        .bind(now)
        .bind(now)
        .bind(&pre_block.visibility)
        .bind(pre_block.organization_id.map(|o| o.to_string()))
        .bind(&pre_block.source_url)
        .bind(&pre_block.source_attribution)
        .bind(&pre_block.source_file)
        .bind(&pre_block.source_type)
        .bind(&pre_block.source_hash)
        .bind(batch_id.map(|b| b.to_string()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO blocks_fts (block_id, topic) VALUES (?, ?)")
            .bind(block_id.to_string())
            .bind(&pre_block.topic)
            .execute(&mut *tx)
            .await?;

        let mut exchanges = Vec::with_capacity(pre_block.exchanges.len());
        for (i, (pre_ex, embedding)) in pre_block
            .exchanges
            .iter()
            .zip(exchange_embeddings.iter())
            .enumerate()
        {
            let exchange_id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO exchanges
                 (id, block_id, sequence, question, answer, timestamp, model_used, embedding)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(exchange_id.to_string())
            .bind(block_id.to_string())
            .bind(i as i64)
            .bind(&pre_ex.question)
            .bind(&pre_ex.answer)
            .bind(pre_ex.timestamp)
            .bind(&pre_ex.model_used)
            .bind(encode_embedding(embedding))
            .execute(&mut *tx)
            .await?;

            exchanges.push(Exchange {
                id: exchange_id,
                block_id,
                sequence: i as i64,
                question: pre_ex.question.clone(),
                answer: pre_ex.answer.clone(),
                timestamp: pre_ex.timestamp,
                model_used: pre_ex.model_used.clone(),
            });
        }

        let mut tags = Vec::with_capacity(pre_block.tags.len());
        for tag_name in &pre_block.tags {
            let tag_id = upsert_tag(&mut tx, tag_name).await?;
            sqlx::query(
                "INSERT INTO block_tags (block_id, tag_id, confidence, created_at)
                 VALUES (?, ?, 1.0, ?)
                 ON CONFLICT (block_id, tag_id) DO NOTHING",
            )
            .bind(block_id.to_string())
            .bind(tag_id.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            tags.push(Tag {
                id: tag_id,
                name: tag_name.clone(),
                created_at: now,
            });
        }

        tx.commit().await?;

        Ok(Block {
            id: block_id,
            project_id,
            topic: pre_block.topic.clone(),
            started_at: pre_block.started_at,
            completed_at: pre_block.completed_at,
            exchange_count: pre_block.exchanges.len() as i64,
            metadata: pre_block.metadata.clone(),
            visibility: Some(pre_block.visibility.clone()),
            organization_id: pre_block.organization_id,
            source_url: pre_block.source_url.clone(),
            source_attribution: pre_block.source_attribution.clone(),
            source_file: pre_block.source_file.clone(),
            source_type: pre_block.source_type.clone(),
            source_hash: pre_block.source_hash.clone(),
            import_batch_id: batch_id,
            created_at: now,
            updated_at: now,
            exchanges,
            tags,
        })
    }

    // ============ Reads ============

    /// Load a block with its exchanges (ordered by sequence) and tags.
    pub async fn load_block_full(&self, block_id: Uuid) -> Result<Block> {
        let row = sqlx::query(
            "SELECT id, project_id, topic, started_at, completed_at, exchange_count, metadata,
                    created_at, updated_at, visibility, organization_id, source_url,
                    source_attribution, source_file, source_type, source_hash, import_batch_id
             FROM blocks WHERE id = ?",
        )
        .bind(block_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| anyhow!("block not found: {}", block_id))?;

        let mut block = row_to_block(&row)?;
        block.exchanges = self.load_exchanges(block_id).await?;
        block.tags = self.load_tags(block_id).await?;
        Ok(block)
    }

    async fn load_exchanges(&self, block_id: Uuid) -> Result<Vec<Exchange>> {
        let rows = sqlx::query(
            "SELECT id, block_id, sequence, question, answer, timestamp, model_used
             FROM exchanges WHERE block_id = ? ORDER BY sequence ASC",
        )
        .bind(block_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                let bid: String = row.get("block_id");
                Ok(Exchange {
                    id: parse_uuid(&id)?,
                    block_id: parse_uuid(&bid)?,
                    sequence: row.get("sequence"),
                    question: row.get("question"),
                    answer: row.get("answer"),
                    timestamp: row.get("timestamp"),
                    model_used: row.get("model_used"),
                })
            })
            .collect()
    }

    async fn load_tags(&self, block_id: Uuid) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT t.id, t.name, t.created_at
             FROM tags t
             JOIN block_tags bt ON t.id = bt.tag_id
             WHERE bt.block_id = ?
             ORDER BY t.name ASC",
        )
        .bind(block_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                Ok(Tag {
                    id: parse_uuid(&id)?,
                    name: row.get("name"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    /// Blocks one tag-edge hop away from the given block. Excludes the
    /// block itself and in-progress blocks.
    pub async fn load_related_one_hop(&self, block_id: Uuid, limit: i64) -> Result<Vec<Block>> {
        let rows = sqlx::query(
            "SELECT DISTINCT b.id, b.project_id, b.topic, b.started_at, b.completed_at,
                    b.exchange_count, b.metadata, b.created_at, b.updated_at, b.visibility,
                    b.organization_id, b.source_url, b.source_attribution, b.source_file,
                    b.source_type, b.source_hash, b.import_batch_id
             FROM blocks b
             JOIN block_tags bt ON b.id = bt.block_id
             WHERE bt.tag_id IN (SELECT tag_id FROM block_tags WHERE block_id = ?)
               AND b.id != ?
               AND b.completed_at IS NOT NULL
             ORDER BY b.id ASC
             LIMIT ?",
        )
        .bind(block_id.to_string())
        .bind(block_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_block).collect()
    }

    /// A block plus the set of blocks reachable via one tag-edge hop.
    pub async fn get_context_n_plus_one(&self, block_id: Uuid, related_limit: i64) -> Result<ContextBundle> {
        let block = self.load_block_full(block_id).await?;
        let related = self.load_related_one_hop(block_id, related_limit).await?;
        let tags = block.tags.clone();

        Ok(ContextBundle {
            primary_block: block,
            related_blocks: related,
            tags,
        })
    }

    // ============ Hybrid search ============

    /// Hybrid vector + keyword search over completed blocks.
    ///
    /// Returns up to `limit` blocks with their combined relevance score,
    /// ordered by score descending. Results are always a subset of the
    /// vector candidates; the keyword rank only boosts.
    pub async fn hybrid_search(
        &self,
        query_vec: &[f32],
        query_text: &str,
        project_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<(Block, f64)>> {
        let project_param = project_id.map(|p| p.to_string());

        // Vector side: scan completed-block embeddings, top-limit by similarity.
        let rows = sqlx::query(
            "SELECT id, embedding FROM blocks
             WHERE completed_at IS NOT NULL
               AND (? IS NULL OR project_id = ?)",
        )
        .bind(&project_param)
        .bind(&project_param)
        .fetch_all(&self.pool)
        .await?;

        let mut vector_candidates: Vec<(String, f64)> = rows
            .iter()
            .map(|row| {
                let id: String = row.get("id");
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &decode_embedding(&blob)) as f64;
                (id, similarity)
            })
            .collect();

        vector_candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        vector_candidates.truncate(limit as usize);

        // Keyword side: FTS5 over topics. Terms are OR-joined so a block
        // whose topic matches any query word gets a rank contribution.
        let mut keyword_ranks: std::collections::HashMap<String, f64> =
            std::collections::HashMap::new();
        if let Some(match_query) = fts_match_query(query_text) {
            let rows = sqlx::query(
                "SELECT blocks_fts.block_id AS block_id, blocks_fts.rank AS rank
                 FROM blocks_fts
                 JOIN blocks b ON b.id = blocks_fts.block_id
                 WHERE blocks_fts MATCH ?
                   AND b.completed_at IS NOT NULL
                   AND (? IS NULL OR b.project_id = ?)
                 ORDER BY blocks_fts.rank
                 LIMIT ?",
            )
            .bind(&match_query)
            .bind(&project_param)
            .bind(&project_param)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            for row in &rows {
                let id: String = row.get("block_id");
                let rank: f64 = row.get("rank");
                // FTS5 rank is negative BM25; negate so higher is better.
                keyword_ranks.insert(id, -rank);
            }
        }

        // Combine: vector candidates LEFT JOIN keyword ranks.
        let mut scored: Vec<(String, f64)> = vector_candidates
            .into_iter()
            .map(|(id, similarity)| {
                let rank = keyword_ranks.get(&id).copied().unwrap_or(0.0);
                (id, similarity + rank)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit as usize);

        let mut results = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            let block = self.load_block_full(parse_uuid(&id)?).await?;
            results.push((block, score));
        }

        Ok(results)
    }

    /// LLM-based tag extraction is intentionally unimplemented: returns a
    /// possibly-empty list and never errors. Keyword tagging happens in the
    /// chunker instead.
    pub async fn extract_tags(&self, _content: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Insert-or-select a tag by its unique name inside a transaction.
async fn upsert_tag(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    name: &str,
) -> Result<Uuid> {
    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;

    if let Some(id) = existing {
        return parse_uuid(&id);
    }

    let id = Uuid::new_v4();
    let insert = sqlx::query("INSERT INTO tags (id, name, created_at) VALUES (?, ?, ?)")
        .bind(id.to_string())
        .bind(name)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await;

    match insert {
        Ok(_) => Ok(id),
        // Conflict on the unique name; fall back to a read.
        Err(_) => {
            let id: String = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
                .bind(name)
                .fetch_one(&mut **tx)
                .await?;
            parse_uuid(&id)
        }
    }
}

/// Build an FTS5 MATCH expression from free text: terms are quoted and
/// OR-joined so any topic-word overlap contributes rank. Returns `None`
/// when the query has no indexable terms.
fn fts_match_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("invalid uuid in database: {}", s))
}

fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> Result<Project> {
    let id: String = row.get("id");
    let org: Option<String> = row.get("organization_id");
    Ok(Project {
        id: parse_uuid(&id)?,
        name: row.get("name"),
        directory_path: row.get("directory_path"),
        organization_id: org.as_deref().map(parse_uuid).transpose()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_organization(row: &sqlx::sqlite::SqliteRow) -> Result<Organization> {
    let id: String = row.get("id");
    Ok(Organization {
        id: parse_uuid(&id)?,
        name: row.get("name"),
        tier: row.get("tier"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_history(row: &sqlx::sqlite::SqliteRow) -> Result<ImportHistoryRecord> {
    let id: String = row.get("id");
    let org: Option<String> = row.get("organization_id");
    Ok(ImportHistoryRecord {
        id: parse_uuid(&id)?,
        source_file: row.get("source_file"),
        file_hash: row.get("file_hash"),
        imported_at: row.get("imported_at"),
        updated_at: row.get("updated_at"),
        block_count: row.get("block_count"),
        import_type: row.get("import_type"),
        status: row.get("status"),
        visibility: row.get("visibility"),
        source_classification: row.get("source_classification"),
        organization_id: org.as_deref().map(parse_uuid).transpose()?,
        error_message: row.get("error_message"),
    })
}

fn row_to_block(row: &sqlx::sqlite::SqliteRow) -> Result<Block> {
    let id: String = row.get("id");
    let project_id: String = row.get("project_id");
    let org: Option<String> = row.get("organization_id");
    let batch: Option<String> = row.get("import_batch_id");
    let metadata_json: String = row.get("metadata");

    // Malformed metadata is recovered as an empty map rather than failing
    // the read.
    let metadata: Map<String, Value> = match serde_json::from_str(&metadata_json) {
        Ok(Value::Object(map)) => map,
        _ => {
            eprintln!("warning: malformed block metadata for {}, using empty map", id);
            Map::new()
        }
    };

    Ok(Block {
        id: parse_uuid(&id)?,
        project_id: parse_uuid(&project_id)?,
        topic: row.get("topic"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        exchange_count: row.get("exchange_count"),
        metadata,
        visibility: row.get("visibility"),
        organization_id: org.as_deref().map(parse_uuid).transpose()?,
        source_url: row.get("source_url"),
        source_attribution: row.get("source_attribution"),
        source_file: row.get("source_file"),
        source_type: row.get("source_type"),
        source_hash: row.get("source_hash"),
        import_batch_id: batch.as_deref().map(parse_uuid).transpose()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        exchanges: Vec::new(),
        tags: Vec::new(),
    })
}
