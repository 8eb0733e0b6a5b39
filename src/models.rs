//! Core data models used throughout the knowledge graph.
//!
//! These types represent the blocks, exchanges, and search results that flow
//! through the ingestion and retrieval pipeline. The data lifecycle is:
//!
//! ```text
//! Discover → ImportSource → classify() → parse() → ParsedDocument
//!                                                       ↓
//!                                               chunk() → PreBlock
//!                                                       ↓
//!                                        deduplicate() → ImportDecision
//!                                                       ↓
//!                                            import() → Block + Exchange
//!                                                       ↓
//!                                            search() → SearchResult
//! ```
//!
//! # Type Relationships
//!
//! - An **[`ImportSource`]** is produced by discovery before any parsing,
//!   then annotated with visibility by the classifier.
//! - A **[`ParsedDocument`]** is a hierarchical [`Section`] tree plus a
//!   metadata map extracted from the Markdown header or frontmatter.
//! - A **[`PreBlock`]** is an in-memory block-to-be, prior to embedding
//!   generation and storage.
//! - A **[`Block`]** is the durable unit of retrieval: a topic plus its
//!   ordered [`Exchange`]s, tags, and an embedding vector.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// A multi-project workspace. Created on first reference to a directory
/// path and never deleted by the pipeline.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub directory_path: String,
    pub organization_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An organization used to scope org-private content. A `default`
/// organization is materialized lazily when none is supplied.
#[derive(Debug, Clone)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub tier: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A conversation block: a topic and its 1–15 Q&A exchanges. This is the
/// indexing granularity for retrieval.
///
/// Blocks with `completed_at = None` are in-progress and excluded from all
/// search paths. Blocks originating from `conversation-log` sources are
/// immutable once inserted: re-imports never overwrite or delete them.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: Uuid,
    pub project_id: Uuid,
    pub topic: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exchange_count: i64,
    pub metadata: Map<String, Value>,
    pub visibility: Option<String>,
    pub organization_id: Option<Uuid>,
    pub source_url: Option<String>,
    pub source_attribution: Option<String>,
    pub source_file: String,
    pub source_type: String,
    pub source_hash: String,
    pub import_batch_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Relations, populated by queries rather than stored on the row.
    pub exchanges: Vec<Exchange>,
    pub tags: Vec<Tag>,
}

/// A single Q/A pair within a block. `sequence` is dense and unique within
/// the owning block; retrieval orders by `sequence` ascending.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub id: Uuid,
    pub block_id: Uuid,
    pub sequence: i64,
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
    pub model_used: Option<String>,
}

/// A semantic tag. Names are globally unique (case-sensitive).
#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Search options for hybrid retrieval.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Restrict results to a single project.
    pub project_id: Option<Uuid>,
    /// Maximum results (default 10).
    pub limit: Option<i64>,
    /// Post-filter on `combined_score`.
    pub min_relevance: Option<f64>,
    /// Also fetch one-hop related blocks per result.
    pub include_n_plus: bool,
}

/// A single search result: a fully hydrated block with its combined
/// relevance score and optional one-hop related blocks.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub block: Block,
    pub relevance: f64,
    pub related: Vec<Block>,
}

/// Complete search response including timing.
#[derive(Debug, Clone)]
pub struct SearchResults {
    pub results: Vec<SearchResult>,
    pub total_found: usize,
    pub search_time: std::time::Duration,
}

/// A block plus everything one tag-edge hop away.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub primary_block: Block,
    pub related_blocks: Vec<Block>,
    pub tags: Vec<Tag>,
}

// ============ Import pipeline types ============

/// A discovered file to import, annotated by the classifier.
#[derive(Debug, Clone)]
pub struct ImportSource {
    pub file_path: String,
    /// `"conversation-log"`, `"spec"`, `"doc"`, `"readme"`, `"mission"`, or `"working-file"`.
    pub file_type: String,
    pub last_modified: DateTime<Utc>,
    /// SHA-256 over the full file bytes.
    pub file_hash: String,
    pub file_size: u64,

    /// `"public"`, `"org-private"`, or `"individual"` once classified.
    pub visibility: String,
    /// Fine-grained label orthogonal to visibility (`"public-web"`,
    /// `"client-data"`, `"personal"`, `"private-repo"`, …).
    pub source_class: String,
    pub organization_id: Option<Uuid>,
    pub contains_pii: bool,

    /// Primary retained URL for attribution, when classified as public-web.
    pub source_url: Option<String>,
    pub source_attribution: Option<String>,
    /// Classification metadata (e.g. the full retained `source_urls` list).
    pub metadata: Map<String, Value>,
}

impl ImportSource {
    pub fn new(
        file_path: String,
        file_type: String,
        last_modified: DateTime<Utc>,
        file_hash: String,
        file_size: u64,
    ) -> Self {
        Self {
            file_path,
            file_type,
            last_modified,
            file_hash,
            file_size,
            visibility: String::new(),
            source_class: String::new(),
            organization_id: None,
            contains_pii: false,
            source_url: None,
            source_attribution: None,
            metadata: Map::new(),
        }
    }
}

/// A parsed source file: metadata map plus a hierarchical section tree.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub source: ImportSource,
    pub metadata: Map<String, Value>,
    pub sections: Vec<Section>,
}

/// A hierarchical section in a Markdown document. `level` is the ATX
/// header depth (H1 = 1). Children are the following sections with strictly
/// greater level, in original order.
#[derive(Debug, Clone, Default)]
pub struct Section {
    pub level: usize,
    pub title: String,
    pub content: String,
    pub children: Vec<Section>,
    /// 1-indexed source line of the header.
    pub line: usize,
}

/// An in-memory block prior to embedding generation and storage.
#[derive(Debug, Clone)]
pub struct PreBlock {
    pub topic: String,
    pub exchanges: Vec<PreExchange>,
    pub metadata: Map<String, Value>,
    pub tags: Vec<String>,
    pub project_path: String,
    pub source_file: String,
    pub source_type: String,
    pub source_hash: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub visibility: String,
    pub organization_id: Option<Uuid>,
    pub source_url: Option<String>,
    pub source_attribution: Option<String>,
}

/// An exchange prior to database insertion.
#[derive(Debug, Clone)]
pub struct PreExchange {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
    pub model_used: Option<String>,
}

/// What to do with a [`PreBlock`]: `insert`, `update`, or `skip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportAction {
    Insert,
    Update,
    Skip,
}

impl std::fmt::Display for ImportAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportAction::Insert => write!(f, "insert"),
            ImportAction::Update => write!(f, "update"),
            ImportAction::Skip => write!(f, "skip"),
        }
    }
}

/// The deduplicator's verdict for one pre-block, preserving input order.
#[derive(Debug, Clone)]
pub struct ImportDecision {
    pub action: ImportAction,
    pub pre_block: PreBlock,
    /// For updates, the block being replaced (present in prior inserts).
    pub existing_id: Option<Uuid>,
    pub reason: String,
}

/// Pipeline stage an error was recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    Discovery,
    Classification,
    Parse,
    Chunk,
    Deduplicate,
    Import,
}

impl std::fmt::Display for ImportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ImportStage::Discovery => "discovery",
            ImportStage::Classification => "classification",
            ImportStage::Parse => "parse",
            ImportStage::Chunk => "chunk",
            ImportStage::Deduplicate => "deduplicate",
            ImportStage::Import => "import",
        };
        write!(f, "{}", s)
    }
}

/// A per-source error accumulated by the pipeline. The pipeline continues
/// past these; only discovery and dedup failures abort the run.
#[derive(Debug, Clone)]
pub struct ImportError {
    pub source_file: String,
    pub stage: ImportStage,
    pub message: String,
    pub error: String,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub sources_found: usize,
    pub sources_parsed: usize,
    pub blocks_created: usize,
    pub decisions: Vec<ImportDecision>,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<ImportError>,
}

impl ImportReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            completed_at: None,
            sources_found: 0,
            sources_parsed: 0,
            blocks_created: 0,
            decisions: Vec::new(),
            inserted: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }
}

impl Default for ImportReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for one import run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub root_dir: String,
    /// `"logs"`, `"specs"`, `"docs"`, `"working"`, or `"all"`.
    pub file_types: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Default visibility; `"auto"` resolves to org-private/private-repo.
    pub default_visibility: String,
    pub dry_run: bool,
    /// Reserved for batched writes.
    pub batch_size: usize,
    /// Number of sample blocks shown in dry-run previews.
    pub preview_count: usize,
    pub show_progress: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            root_dir: String::new(),
            file_types: vec!["all".to_string()],
            exclude_patterns: vec![
                ".git/*".to_string(),
                "node_modules/*".to_string(),
                "*.test.md".to_string(),
            ],
            default_visibility: "auto".to_string(),
            dry_run: false,
            batch_size: 10,
            preview_count: 5,
            show_progress: true,
        }
    }
}

/// A row from `query_blocks_by_source`, used during update decisions.
#[derive(Debug, Clone)]
pub struct BlockSourceRecord {
    pub block_id: Uuid,
    pub source_hash: String,
    pub source_type: String,
    pub topic: String,
}

/// One row of `import_history`: the atomic record that a specific file
/// version was imported as a batch.
#[derive(Debug, Clone)]
pub struct ImportHistoryRecord {
    pub id: Uuid,
    pub source_file: String,
    pub file_hash: String,
    pub imported_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub block_count: i64,
    pub import_type: String,
    /// `"in-progress"`, `"completed"`, or `"failed"`.
    pub status: String,
    pub visibility: String,
    pub source_classification: Option<String>,
    pub organization_id: Option<Uuid>,
    pub error_message: Option<String>,
}
