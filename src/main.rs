//! # kgraph CLI (`kg`)
//!
//! The `kg` binary is the primary interface to the knowledge store. It
//! provides commands for database initialization, Markdown ingestion,
//! hybrid search, block retrieval, and the tool/HTTP servers.
//!
//! ## Usage
//!
//! ```bash
//! kg --config ./config/kg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kg init` | Create the SQLite database and run schema migrations |
//! | `kg import <root>` | Ingest Markdown sources under a root directory |
//! | `kg search "<query>"` | Hybrid semantic + keyword search |
//! | `kg get <block-id>` | Retrieve a block with its one-hop context |
//! | `kg serve mcp` | Start the JSON-RPC tool server on stdio |
//! | `kg serve http` | Start the HTTP façade |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! kg init
//!
//! # Preview an import without writing
//! kg import ~/notes --file-types logs --dry-run
//!
//! # Ingest everything, excluding drafts
//! kg import ~/notes --exclude "*.draft.md"
//!
//! # Search with one-hop context
//! kg search "postgres index tuning" --include-n-plus
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kgraph::{config, db, get, importer, mcp, migrate, models, progress, search, server, store};

/// kgraph — a durable knowledge store for conversation logs with hybrid
/// semantic + keyword retrieval.
#[derive(Parser)]
#[command(
    name = "kg",
    about = "kgraph — a durable knowledge store for conversation logs with hybrid retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults are used when the file
    /// does not exist; KG_DB_PATH and KG_EMBEDDER_URL override it.
    #[arg(long, global = true, default_value = "./config/kg.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Ingest Markdown sources under a root directory.
    ///
    /// Discovers files matching the requested types, classifies their
    /// visibility, parses and chunks them into blocks, deduplicates
    /// against the import history, and writes new blocks with embeddings.
    Import {
        /// Root directory to walk.
        root_dir: String,

        /// Source types to import: logs, specs, docs, working, all.
        #[arg(long = "file-types", value_delimiter = ',', default_value = "all")]
        file_types: Vec<String>,

        /// Exclude patterns (path globs or directory prefixes). Repeatable.
        #[arg(long = "exclude")]
        exclude_patterns: Vec<String>,

        /// Default visibility when no stronger signal is found:
        /// auto, public, org-private, or individual.
        #[arg(long, default_value = "auto")]
        visibility: String,

        /// Analyze and report without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Reserved for batched writes.
        #[arg(long, default_value_t = 10)]
        batch_size: usize,

        /// Number of sample blocks shown in dry-run previews.
        #[arg(long, default_value_t = 5)]
        preview_count: usize,

        /// Progress output: auto, off, human, json.
        #[arg(long, default_value = "auto")]
        progress: String,
    },

    /// Search indexed blocks with hybrid semantic + keyword retrieval.
    Search {
        /// The search query string.
        query: String,

        /// Restrict results to a project id.
        #[arg(long)]
        project_id: Option<uuid::Uuid>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<i64>,

        /// Fetch one-hop related blocks per result.
        #[arg(long)]
        include_n_plus: bool,

        /// Drop results whose combined score is below this value.
        #[arg(long)]
        min_relevance: Option<f64>,
    },

    /// Retrieve a block by id with its one-hop context.
    Get {
        /// Block UUID.
        id: String,
    },

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// JSON-RPC 2.0 tool server on stdio (newline-delimited).
    Mcp,
    /// HTTP façade with health and search endpoints.
    Http,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Import {
            root_dir,
            file_types,
            exclude_patterns,
            visibility,
            dry_run,
            batch_size,
            preview_count,
            progress,
        } => {
            let mut excludes = cfg.import.exclude_patterns.clone();
            excludes.extend(exclude_patterns);

            let opts = models::ImportOptions {
                root_dir,
                file_types,
                exclude_patterns: excludes,
                default_visibility: if visibility == "auto" {
                    cfg.import.default_visibility.clone()
                } else {
                    visibility
                },
                dry_run,
                batch_size,
                preview_count,
                show_progress: progress != "off",
            };

            let mode = match progress.as_str() {
                "off" => progress::ProgressMode::Off,
                "human" => progress::ProgressMode::Human,
                "json" => progress::ProgressMode::Json,
                _ => progress::ProgressMode::default_for_tty(),
            };
            let reporter = mode.reporter();

            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            let store = store::Store::new(pool.clone());
            let embedder = kgraph::embedding::OllamaEmbedder::new(&cfg.embedding)?;

            let report =
                importer::run_import(&store, &embedder, &opts, reporter.as_ref()).await?;
            importer::print_report(&report, &opts);

            pool.close().await;
        }
        Commands::Search {
            query,
            project_id,
            limit,
            include_n_plus,
            min_relevance,
        } => {
            search::run_search(&cfg, &query, project_id, limit, include_n_plus, min_relevance)
                .await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                mcp::run_server(&cfg).await?;
            }
            ServeService::Http => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}
