//! Embedding client and vector utilities.
//!
//! The [`OllamaEmbedder`] calls a local Ollama instance's `/api/embeddings`
//! endpoint to turn text into fixed-dimension vectors (default model
//! `nomic-embed-text`, 384 dimensions). Batch embedding is sequential —
//! the embedder is a remote service with its own concurrency envelope, so
//! callers bound parallelism to one request at a time within a pipeline run.
//!
//! Also provides vector utilities for BLOB-stored embeddings:
//! - [`cosine_similarity`] — compute similarity between two vectors
//! - [`encode_embedding`] — serialize a vector as little-endian bytes
//! - [`decode_embedding`] — read a stored BLOB back into a vector
//!
//! # Retry Strategy
//!
//! Transient failures use exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s (capped at 2^5)
//!
//! All failures surface as `embedding unavailable` errors; dedup never
//! relies on embedding equality, so a flaky embedder can only fail block
//! writes, not corrupt dedup decisions.

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// HTTP client for an Ollama-compatible embedding service.
pub struct OllamaEmbedder {
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            url: config.url.clone(),
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
            client,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed a single text into a fixed-dimension vector.
    ///
    /// Returns an error if the service is unreachable after retries, the
    /// response is malformed, or the vector length does not match the
    /// configured dimensionality.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/embeddings", self.url))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbedResponse = response
                            .json()
                            .await
                            .map_err(|e| anyhow!("embedding unavailable: bad response: {}", e))?;
                        if parsed.embedding.len() != self.dims {
                            bail!(
                                "embedding unavailable: expected {} dimensions, got {}",
                                self.dims,
                                parsed.embedding.len()
                            );
                        }
                        return Ok(parsed.embedding);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!(
                            "embedding unavailable: status {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("embedding unavailable: status {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow!(
                        "embedding unavailable (is Ollama running at {}?): {}",
                        self.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("embedding unavailable after retries")))
    }

    /// Embed a batch of texts. Semantically equivalent to iterated
    /// [`embed`](Self::embed); requests are issued sequentially.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

/// Serialize an embedding as raw little-endian f32 bytes for BLOB storage.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Read a BLOB written by [`encode_embedding`] back into a vector. Any
/// trailing bytes that do not form a whole f32 are dropped.
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|word| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(word);
            f32::from_le_bytes(buf)
        })
        .collect()
}

/// Cosine similarity between two embedding vectors, in `[-1.0, 1.0]`.
///
/// Mismatched lengths, empty input, and zero-magnitude vectors all score
/// `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|y| y * y).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_blob_roundtrip() {
        let original = vec![0.25f32, -7.5, 42.0, 1e-3];
        let decoded = decode_embedding(&encode_embedding(&original));
        assert_eq!(decoded, original);
    }

    #[test]
    fn blob_uses_four_bytes_per_dimension() {
        assert_eq!(encode_embedding(&[1.0, 2.0, 3.0]).len(), 12);
        assert!(encode_embedding(&[]).is_empty());
    }

    #[test]
    fn partial_trailing_word_is_dropped() {
        let mut blob = encode_embedding(&[9.0, -9.0]);
        blob.extend_from_slice(&[0xAB, 0xCD]);
        assert_eq!(decode_embedding(&blob), vec![9.0, -9.0]);
    }

    #[test]
    fn parallel_vectors_score_one() {
        let v = [0.6f32, 0.8, 0.0];
        let scaled: Vec<f32> = v.iter().map(|x| x * 3.0).collect();
        assert!((cosine_similarity(&v, &scaled) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn perpendicular_vectors_score_zero() {
        assert!(cosine_similarity(&[2.0, 0.0], &[0.0, 5.0]).abs() < 1e-6);
    }

    #[test]
    fn opposed_vectors_score_negative_one() {
        assert!((cosine_similarity(&[0.0, 3.0], &[0.0, -1.5]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
