//! # kgraph
//!
//! **A durable knowledge store for conversation logs with hybrid
//! semantic + keyword retrieval.**
//!
//! kgraph ingests heterogeneous Markdown sources (session logs, specs,
//! documentation, working notes) into a SQLite-backed knowledge store and
//! serves hybrid retrieval with one-hop context expansion. Developer tools
//! talk to it through a JSON-RPC tool surface over stdio.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────┐
//! │  Discovery  │──▶│     Pipeline      │──▶│  SQLite   │
//! │ walk+hash   │   │ classify → parse  │   │ FTS5+Vec  │
//! └─────────────┘   │ → chunk → dedup   │   └────┬──────┘
//!                   │ → import          │        │
//!                   └──────────────────┘        │
//!                      ┌────────────────────────┤
//!                      ▼                        ▼
//!                 ┌──────────┐           ┌──────────────┐
//!                 │   CLI    │           │ stdio JSON-  │
//!                 │   (kg)   │           │ RPC tools    │
//!                 └──────────┘           └──────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. **Discovery** ([`sources`]) walks a root directory, matches file
//!    patterns per source type, and hashes contents (SHA-256).
//! 2. The **classifier** ([`classify`]) assigns a visibility tier and
//!    source class from content and path signals.
//! 3. **Parsers** ([`parser`]) turn Markdown into a hierarchical section
//!    tree plus metadata.
//! 4. The **chunker** ([`chunker`]) segments conversation logs along
//!    milestone sections into blocks of Q&A exchanges; documentation
//!    becomes one block per section.
//! 5. The **deduplicator** ([`dedup`]) decides insert/update/skip per
//!    block from the import history (conversation logs are immutable).
//! 6. The **importer** ([`importer`]) writes each block, its exchanges,
//!    and its tags in one transaction, batched per source file.
//! 7. **Retrieval** ([`search`]) fuses cosine similarity over embeddings
//!    with FTS5 keyword rank and can expand one hop of tag-related blocks.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with env fallbacks |
//! | [`models`] | Core data types: `Block`, `Exchange`, `PreBlock`, reports |
//! | [`db`] | SQLite connection pool (WAL mode) |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`embedding`] | Ollama embedding client and vector utilities |
//! | [`store`] | Typed persistence operations and hybrid search |
//! | [`sources`] | Source discovery: walk, match, hash |
//! | [`classify`] | Visibility + source classification |
//! | [`parser`] | Conversation-log and generic Markdown parsers |
//! | [`chunker`] | Milestone-based chunking into pre-blocks |
//! | [`dedup`] | Hash-addressed import decisions |
//! | [`importer`] | Pipeline orchestration and reporting |
//! | [`progress`] | Stderr progress reporters (human/JSON) |
//! | [`search`] | Hybrid search core + CLI |
//! | [`get`] | Block retrieval with N+1 context |
//! | [`mcp`] | JSON-RPC 2.0 tool surface over stdio |
//! | [`server`] | HTTP façade (health + search) |

pub mod chunker;
pub mod classify;
pub mod config;
pub mod db;
pub mod dedup;
pub mod embedding;
pub mod get;
pub mod importer;
pub mod mcp;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod progress;
pub mod search;
pub mod server;
pub mod sources;
pub mod store;
