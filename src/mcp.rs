//! JSON-RPC tool surface over newline-delimited stdio.
//!
//! Speaks JSON-RPC 2.0, one message per line, on stdin/stdout. Exposes
//! three tools to MCP-compatible clients:
//!
//! | Tool | Purpose |
//! |------|---------|
//! | `save_block` | Save a conversation block; project auto-detected from the working directory |
//! | `search` | Hybrid semantic + keyword search with optional N+1 context |
//! | `get_context` | A block plus its one-hop related blocks and tags |
//!
//! # Error Contract
//!
//! | Code | Meaning |
//! |------|---------|
//! | -32601 | Unknown method |
//! | -32602 | Invalid tool arguments |
//! | -32603 | Tool handler failure |
//!
//! Malformed input lines are logged to stderr and skipped; the loop exits
//! cleanly on EOF. Unknown tool arguments are ignored.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::OllamaEmbedder;
use crate::models::{Block, PreBlock, PreExchange, SearchOptions, Tag};
use crate::search::search_blocks;
use crate::store::Store;

#[derive(Debug, Deserialize)]
struct Request {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

/// Run the stdio server until EOF. Dropping the future cancels cleanly
/// between requests.
pub async fn run_server(config: &Config) -> Result<()> {
    let pool = crate::db::connect(config).await?;
    let store = Store::new(pool.clone());
    let embedder = OllamaEmbedder::new(&config.embedding)?;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                eprintln!("[ERROR] failed to decode request: {}", e);
                continue;
            }
        };

        let response = handle_request(config, &store, &embedder, request).await;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
    }

    pool.close().await;
    Ok(())
}

async fn handle_request(
    config: &Config,
    store: &Store,
    embedder: &OllamaEmbedder,
    request: Request,
) -> Response {
    let id = request.id.unwrap_or(Value::Null);

    let result = match request.method.as_str() {
        "initialize" => Ok(handle_initialize()),
        "tools/list" => Ok(handle_tools_list()),
        "tools/call" => handle_tools_call(config, store, embedder, &request.params).await,
        other => Err(RpcError {
            code: METHOD_NOT_FOUND,
            message: format!("Method not found: {}", other),
        }),
    };

    match result {
        Ok(value) => Response {
            jsonrpc: "2.0",
            id,
            result: Some(value),
            error: None,
        },
        Err(error) => Response {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        },
    }
}

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "kgraph",
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

fn handle_tools_list() -> Value {
    json!({
        "tools": [
            {
                "name": "save_block",
                "description": "Save a conversation block to the knowledge store. Auto-detects project from the current directory.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "topic": {
                            "type": "string",
                            "description": "Topic or title of the conversation block"
                        },
                        "exchanges": {
                            "type": "array",
                            "description": "List of question-answer exchanges",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "question": { "type": "string" },
                                    "answer": { "type": "string" },
                                    "model": { "type": "string" }
                                },
                                "required": ["question", "answer"]
                            }
                        }
                    },
                    "required": ["topic", "exchanges"]
                }
            },
            {
                "name": "search",
                "description": "Search the knowledge store using semantic + keyword hybrid search. Returns relevant blocks ranked by combined score.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Search query (natural language)"
                        },
                        "limit": {
                            "type": "integer",
                            "description": "Maximum number of results (default 10)",
                            "default": 10
                        },
                        "include_n_plus": {
                            "type": "boolean",
                            "description": "Include one-hop related blocks",
                            "default": false
                        }
                    },
                    "required": ["query"]
                }
            },
            {
                "name": "get_context",
                "description": "Get a block with N+1 context: the block plus all blocks one tag-edge hop away.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "block_id": {
                            "type": "string",
                            "description": "UUID of the block to retrieve"
                        }
                    },
                    "required": ["block_id"]
                }
            }
        ]
    })
}

async fn handle_tools_call(
    config: &Config,
    store: &Store,
    embedder: &OllamaEmbedder,
    params: &Value,
) -> Result<Value, RpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_params("tool name is required"))?;
    let args = params
        .get("arguments")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    match name {
        "save_block" => tool_save_block(store, embedder, &args).await,
        "search" => tool_search(config, store, embedder, &args).await,
        "get_context" => tool_get_context(config, store, &args).await,
        other => Err(RpcError {
            code: METHOD_NOT_FOUND,
            message: format!("unknown tool: {}", other),
        }),
    }
}

async fn tool_save_block(
    store: &Store,
    embedder: &OllamaEmbedder,
    args: &Map<String, Value>,
) -> Result<Value, RpcError> {
    let topic = args
        .get("topic")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| invalid_params("topic is required"))?;

    let exchanges_raw = args
        .get("exchanges")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid_params("exchanges is required"))?;

    let now = Utc::now();
    let mut exchanges = Vec::with_capacity(exchanges_raw.len());
    for (i, raw) in exchanges_raw.iter().enumerate() {
        let obj = raw
            .as_object()
            .ok_or_else(|| invalid_params(&format!("invalid exchange format at index {}", i)))?;

        let question = obj.get("question").and_then(Value::as_str).unwrap_or("");
        let answer = obj.get("answer").and_then(Value::as_str).unwrap_or("");
        if question.is_empty() || answer.is_empty() {
            return Err(invalid_params(&format!(
                "question and answer are required in exchange {}",
                i
            )));
        }

        exchanges.push(PreExchange {
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp: now,
            model_used: obj
                .get("model")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
        });
    }

    // Project auto-detection from the working directory at call time.
    let cwd = std::env::current_dir().map_err(|e| internal(e.into()))?;
    let directory = cwd.to_string_lossy().to_string();
    let project_name = cwd
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown-project".to_string());

    let project = store
        .get_or_create_project(&project_name, &directory, None)
        .await
        .map_err(internal)?;

    // Ad-hoc saves are complete the moment they are written.
    let pre_block = PreBlock {
        topic: topic.to_string(),
        exchanges,
        metadata: Map::new(),
        tags: store.extract_tags("").await.map_err(internal)?,
        project_path: directory,
        source_file: String::new(),
        source_type: "conversation-log".to_string(),
        source_hash: String::new(),
        started_at: now,
        completed_at: Some(now),
        visibility: "org-private".to_string(),
        organization_id: None,
        source_url: None,
        source_attribution: None,
    };

    let block_text = match pre_block.exchanges.first() {
        Some(first) => format!("{} {}", pre_block.topic, first.question),
        None => pre_block.topic.clone(),
    };
    let block_embedding = embedder.embed(&block_text).await.map_err(internal)?;

    let mut exchange_embeddings = Vec::with_capacity(pre_block.exchanges.len());
    for ex in &pre_block.exchanges {
        let text = format!("{} {}", ex.question, ex.answer);
        exchange_embeddings.push(embedder.embed(&text).await.map_err(internal)?);
    }

    let block = store
        .insert_block_with_children(
            project.id,
            &pre_block,
            &block_embedding,
            &exchange_embeddings,
            None,
            None,
        )
        .await
        .map_err(internal)?;

    Ok(json!({
        "success": true,
        "block_id": block.id.to_string(),
        "project": project.name,
        "exchanges": block.exchanges.len(),
    }))
}

async fn tool_search(
    config: &Config,
    store: &Store,
    embedder: &OllamaEmbedder,
    args: &Map<String, Value>,
) -> Result<Value, RpcError> {
    let query = args
        .get("query")
        .and_then(Value::as_str)
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| invalid_params("query is required"))?;

    // Numeric arguments may arrive as floats from JSON clients.
    let limit = args
        .get("limit")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(10);

    let opts = SearchOptions {
        project_id: None,
        limit: Some(limit),
        min_relevance: None,
        include_n_plus: args
            .get("include_n_plus")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    };

    let results = search_blocks(
        store,
        embedder,
        query,
        &opts,
        config.retrieval.related_limit,
    )
    .await
    .map_err(internal)?;

    let formatted: Vec<Value> = results
        .results
        .iter()
        .map(|result| {
            json!({
                "block_id": result.block.id.to_string(),
                "topic": result.block.topic,
                "relevance": result.relevance,
                "created": result.block.created_at.to_rfc3339(),
                "exchanges": format_exchanges(&result.block),
            })
        })
        .collect();

    Ok(json!({
        "results": formatted,
        "total_found": results.total_found,
        "search_time": format!("{:.1}ms", results.search_time.as_secs_f64() * 1000.0),
    }))
}

async fn tool_get_context(
    config: &Config,
    store: &Store,
    args: &Map<String, Value>,
) -> Result<Value, RpcError> {
    let block_id_str = args
        .get("block_id")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_params("block_id is required"))?;

    let block_id = Uuid::parse_str(block_id_str)
        .map_err(|e| invalid_params(&format!("invalid block_id: {}", e)))?;

    let bundle = store
        .get_context_n_plus_one(block_id, config.retrieval.related_limit)
        .await
        .map_err(internal)?;

    Ok(json!({
        "primary_block": format_block(&bundle.primary_block),
        "related_blocks": bundle.related_blocks.iter().map(format_block).collect::<Vec<_>>(),
        "tags": format_tags(&bundle.tags),
    }))
}

fn format_block(block: &Block) -> Value {
    json!({
        "id": block.id.to_string(),
        "topic": block.topic,
        "created": block.created_at.to_rfc3339(),
        "exchanges": format_exchanges(block),
    })
}

fn format_exchanges(block: &Block) -> Vec<Value> {
    block
        .exchanges
        .iter()
        .map(|ex| {
            json!({
                "question": ex.question,
                "answer": ex.answer,
                "timestamp": ex.timestamp.to_rfc3339(),
                "model": ex.model_used.as_deref().unwrap_or(""),
            })
        })
        .collect()
}

fn format_tags(tags: &[Tag]) -> Vec<Value> {
    tags.iter()
        .map(|tag| json!({ "id": tag.id.to_string(), "name": tag.name }))
        .collect()
}

fn invalid_params(message: &str) -> RpcError {
    RpcError {
        code: INVALID_PARAMS,
        message: message.to_string(),
    }
}

fn internal(e: anyhow::Error) -> RpcError {
    RpcError {
        code: INTERNAL_ERROR,
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_list_exposes_three_tools() {
        let listing = handle_tools_list();
        let tools = listing["tools"].as_array().unwrap();
        let names: Vec<&str> = tools
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["save_block", "search", "get_context"]);

        for tool in tools {
            assert!(tool["inputSchema"]["type"].as_str() == Some("object"));
            assert!(tool["inputSchema"]["required"].is_array());
        }
    }

    #[test]
    fn initialize_reports_server_info() {
        let info = handle_initialize();
        assert_eq!(info["serverInfo"]["name"], "kgraph");
        assert!(info["protocolVersion"].is_string());
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let config = Config::default();
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let store = Store::new(pool);
        let embedder = OllamaEmbedder::new(&config.embedding).unwrap();

        let request = Request {
            jsonrpc: Some("2.0".to_string()),
            id: Some(json!(7)),
            method: "bogus/method".to_string(),
            params: Value::Null,
        };

        let response = handle_request(&config, &store, &embedder, request).await;
        assert_eq!(response.id, json!(7));
        let error = response.error.unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert!(response.result.is_none());
    }

    #[tokio::test]
    async fn missing_tool_arguments_map_to_invalid_params() {
        let config = Config::default();
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let store = Store::new(pool);
        let embedder = OllamaEmbedder::new(&config.embedding).unwrap();

        // save_block without a topic.
        let request = Request {
            jsonrpc: Some("2.0".to_string()),
            id: Some(json!(1)),
            method: "tools/call".to_string(),
            params: json!({ "name": "save_block", "arguments": { "exchanges": [] } }),
        };
        let response = handle_request(&config, &store, &embedder, request).await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);

        // get_context with a malformed id.
        let request = Request {
            jsonrpc: Some("2.0".to_string()),
            id: Some(json!(2)),
            method: "tools/call".to_string(),
            params: json!({ "name": "get_context", "arguments": { "block_id": "not-a-uuid" } }),
        };
        let response = handle_request(&config, &store, &embedder, request).await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }
}
