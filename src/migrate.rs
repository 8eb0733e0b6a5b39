//! Database schema migrations.
//!
//! Creates all required tables and ensures idempotent execution.
//! Designed to be run via `kg init`.
//!
//! # Schema
//!
//! ```text
//! ┌───────────────┐     ┌──────────────┐     ┌──────────────┐
//! │    blocks     │──┐  │  exchanges   │     │  block_tags  │
//! │               │  │  │              │  ┌──│              │
//! │ id (PK)       │  └──│ block_id     │  │  │ block_id(PK) │
//! │ project_id    │     │ sequence     │  │  │ tag_id  (PK) │──┐
//! │ topic         │     │ question     │  │  │ confidence   │  │
//! │ started_at    │     │ answer       │  │  └──────────────┘  │
//! │ completed_at  │     │ embedding    │  │                    │
//! │ embedding     │     └──────────────┘  │  ┌──────────────┐  │
//! │ metadata      │                       │  │     tags     │──┘
//! │ visibility    │     ┌──────────────┐  │  │              │
//! │ source_file   │     │  blocks_fts  │  │  │ id (PK)      │
//! │ source_hash   │     │  (FTS5)      │──┘  │ name UNIQUE  │
//! │ import_batch  │     │ block_id     │     └──────────────┘
//! └───────────────┘     │ topic        │
//!                       └──────────────┘
//!
//! ┌──────────────┐     ┌──────────────┐     ┌────────────────┐
//! │   projects   │     │organizations │     │ import_history │
//! │              │     │              │     │                │
//! │ id (PK)      │     │ id (PK)      │     │ id (PK)        │
//! │ name         │     │ name UNIQUE  │     │ source_file    │
//! │ directory    │     │ tier         │     │ file_hash      │
//! │   UNIQUE     │     └──────────────┘     │ status         │
//! └──────────────┘                          └────────────────┘
//! ```
//!
//! # Tables
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `projects` | Multi-project workspaces, unique by directory path |
//! | `organizations` | Org scoping for org-private content |
//! | `blocks` | Conversation blocks with topic embeddings |
//! | `exchanges` | Q/A pairs within a block, ordered by sequence |
//! | `tags` / `block_tags` | Global tags and their block edges |
//! | `blocks_fts` | FTS5 full-text index over block topics (BM25) |
//! | `import_history` | One row per imported file version (batch) |
//!
//! # Idempotency
//!
//! All operations use `CREATE TABLE IF NOT EXISTS` or check for existing
//! objects before creation. Running `kg init` multiple times is safe.

use anyhow::Result;
use sqlx::SqlitePool;

/// Run all database migrations. Safe to call multiple times.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            tier TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            directory_path TEXT NOT NULL UNIQUE,
            organization_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (organization_id) REFERENCES organizations(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blocks (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            exchange_count INTEGER NOT NULL DEFAULT 0,
            embedding BLOB NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            visibility TEXT,
            organization_id TEXT,
            source_url TEXT,
            source_attribution TEXT,
            source_file TEXT NOT NULL DEFAULT '',
            source_type TEXT NOT NULL DEFAULT '',
            source_hash TEXT NOT NULL DEFAULT '',
            import_batch_id TEXT,
            FOREIGN KEY (project_id) REFERENCES projects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS exchanges (
            id TEXT PRIMARY KEY,
            block_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            model_used TEXT,
            embedding BLOB NOT NULL,
            UNIQUE(block_id, sequence),
            FOREIGN KEY (block_id) REFERENCES blocks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS block_tags (
            block_id TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (block_id, tag_id),
            FOREIGN KEY (block_id) REFERENCES blocks(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_history (
            id TEXT PRIMARY KEY,
            source_file TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            imported_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            block_count INTEGER NOT NULL DEFAULT 0,
            import_type TEXT NOT NULL,
            status TEXT NOT NULL,
            visibility TEXT NOT NULL,
            source_classification TEXT,
            organization_id TEXT,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table over block topics (not idempotent natively, check first)
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='blocks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE blocks_fts USING fts5(
                block_id UNINDEXED,
                topic
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Indexes for common query patterns
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_blocks_project_id ON blocks(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_blocks_source_file ON blocks(source_file)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_exchanges_block_id ON exchanges(block_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_import_history_source ON import_history(source_file, imported_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_block_tags_tag_id ON block_tags(tag_id)")
        .execute(pool)
        .await?;

    Ok(())
}
