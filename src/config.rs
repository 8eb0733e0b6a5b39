use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_conn_max_lifetime_secs")]
    pub conn_max_lifetime_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            conn_max_lifetime_secs: default_conn_max_lifetime_secs(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/kg.sqlite")
}
fn default_max_connections() -> u32 {
    25
}
fn default_min_connections() -> u32 {
    5
}
fn default_conn_max_lifetime_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the Ollama-compatible embedding service.
    #[serde(default = "default_embedder_url")]
    pub url: String,
    #[serde(default = "default_embedder_model")]
    pub model: String,
    /// Fixed embedding dimensionality. Every block and exchange vector
    /// must have exactly this length.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedder_url(),
            model: default_embedder_model(),
            dims: default_dims(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedder_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedder_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Default visibility when the classifier finds no stronger signal.
    /// `"auto"` resolves to org-private with the default organization.
    #[serde(default = "default_visibility")]
    pub default_visibility: String,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            default_visibility: default_visibility(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

fn default_visibility() -> String {
    "auto".to_string()
}
fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".git/*".to_string(),
        "node_modules/*".to_string(),
        "*.test.md".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_search_limit")]
    pub limit: i64,
    /// One-hop related blocks fetched per result.
    #[serde(default = "default_related_limit")]
    pub related_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_search_limit(),
            related_limit: default_related_limit(),
        }
    }
}

fn default_search_limit() -> i64 {
    10
}
fn default_related_limit() -> i64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7430".to_string()
}

/// Load configuration from a TOML file, falling back to defaults when the
/// file does not exist. Environment variables `KG_DB_PATH` and
/// `KG_EMBEDDER_URL` override the file in either case.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    if let Ok(db_path) = std::env::var("KG_DB_PATH") {
        config.db.path = PathBuf::from(db_path);
    }
    if let Ok(url) = std::env::var("KG_EMBEDDER_URL") {
        config.embedding.url = url;
    }

    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be > 0");
    }
    if config.db.min_connections > config.db.max_connections {
        anyhow::bail!("db.min_connections must not exceed db.max_connections");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.model.is_empty() {
        anyhow::bail!("embedding.model must not be empty");
    }
    if config.retrieval.limit < 1 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }
    if config.retrieval.related_limit < 0 {
        anyhow::bail!("retrieval.related_limit must be >= 0");
    }
    match config.import.default_visibility.as_str() {
        "auto" | "public" | "org-private" | "individual" => {}
        other => anyhow::bail!(
            "Unknown default visibility: '{}'. Must be auto, public, org-private, or individual.",
            other
        ),
    }

    Ok(config)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            embedding: EmbeddingConfig::default(),
            import: ImportConfig::default(),
            retrieval: RetrievalConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.db.max_connections, 25);
        assert_eq!(config.db.min_connections, 5);
        assert_eq!(config.db.conn_max_lifetime_secs, 300);
        assert_eq!(config.embedding.dims, 384);
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.retrieval.limit, 10);
        assert_eq!(config.retrieval.related_limit, 5);
        assert_eq!(config.import.default_visibility, "auto");
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[db]
path = "/tmp/kg-test.sqlite"

[embedding]
url = "http://embed.local:11434"
model = "nomic-embed-text"
dims = 384

[import]
default_visibility = "public"
exclude_patterns = ["*.draft.md"]

[retrieval]
limit = 20
related_limit = 3

[server]
bind = "0.0.0.0:8080"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.db.path, PathBuf::from("/tmp/kg-test.sqlite"));
        assert_eq!(config.embedding.url, "http://embed.local:11434");
        assert_eq!(config.import.default_visibility, "public");
        assert_eq!(config.import.exclude_patterns, vec!["*.draft.md"]);
        assert_eq!(config.retrieval.limit, 20);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
    }
}
