//! Pluggable embedding providers for the vector index.
//!
//! Provides a trait-based abstraction over embedding models, with
//! implementations for a local hashed term-frequency embedder (always
//! available, no network) and the OpenAI embeddings API.

use crate::config::EmbeddingConfig;
use crate::error::IndexError;
use crate::providers::DEFAULT_OPENAI_BASE_URL;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embeddings for a batch of texts, one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;

    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| IndexError::Embedding {
                message: "provider returned no vector".to_string(),
            })
    }

    /// Return the dimensionality of embeddings.
    fn dimensions(&self) -> usize;

    /// Return a stable identifier (`provider:model`) stored alongside indexes.
    fn provider_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Local embedder
// ---------------------------------------------------------------------------

/// Default dimensionality of the local embedder.
pub const LOCAL_DEFAULT_DIMENSIONS: usize = 256;

/// Local hashed term-frequency embedder (no external dependencies).
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
    name: String,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = if dimensions == 0 {
            LOCAL_DEFAULT_DIMENSIONS
        } else {
            dimensions
        };
        Self {
            dimensions,
            name: format!("local:tf{}", dimensions),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }
        if tf.is_empty() {
            return vector;
        }

        for (term, count) in &tf {
            let idx = simple_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        // L2 normalize
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// djb2 string hash.
fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// OpenAI embedder
// ---------------------------------------------------------------------------

/// OpenAI API embedder (`text-embedding-3-large` by default).
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    base_url: String,
    batch_size: usize,
    name: String,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String, base_url: Option<String>, batch_size: usize) -> Self {
        let dims = match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            client: reqwest::Client::new(),
            api_key,
            name: format!("openai:{}", model),
            model,
            dims,
            base_url,
            batch_size: batch_size.max(1),
        }
    }

    /// Build from config, reading the key and base URL from the environment
    /// variables the config lists.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, IndexError> {
        let api_key = first_env(&config.api_key_envs).ok_or_else(|| IndexError::Embedding {
            message: format!(
                "no API key found in any of: {}",
                config.api_key_envs.join(", ")
            ),
        })?;
        let base_url = config
            .base_url
            .clone()
            .or_else(|| first_env(&config.base_url_envs));
        Ok(Self::new(
            api_key,
            config.model.clone(),
            base_url,
            config.batch_size,
        ))
    }

    async fn embed_api_call(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": batch,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Embedding {
                message: format!("request failed: {}", e),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(IndexError::Embedding {
                message: format!("HTTP {}: {}", status, text),
            });
        }

        let json: Value = resp.json().await.map_err(|e| IndexError::Embedding {
            message: format!("invalid response body: {}", e),
        })?;
        parse_embedding_response(&json, batch.len())
    }
}

/// Extract vectors from an `/embeddings` response, ordered by `index`.
fn parse_embedding_response(json: &Value, expected: usize) -> Result<Vec<Vec<f32>>, IndexError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| IndexError::Embedding {
            message: "response has no data array".to_string(),
        })?;

    let mut indexed: Vec<(usize, Vec<f32>)> = data
        .iter()
        .enumerate()
        .map(|(pos, item)| {
            let idx = item
                .get("index")
                .and_then(|i| i.as_u64())
                .map(|i| i as usize)
                .unwrap_or(pos);
            let vector = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect()
                })
                .unwrap_or_default();
            (idx, vector)
        })
        .collect();
    indexed.sort_by_key(|(idx, _)| *idx);

    if indexed.len() != expected {
        return Err(IndexError::Embedding {
            message: format!("expected {} vectors, got {}", expected, indexed.len()),
        });
    }
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn first_env(names: &[String]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.trim().is_empty())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            tracing::debug!(model = %self.model, batch = batch.len(), "Embedding batch");
            out.extend(self.embed_api_call(batch).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

/// Factory function to create an embedder based on configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, IndexError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::from_config(config)?)),
        "local" => Ok(Arc::new(LocalEmbedder::new(config.dimensions))),
        other => {
            tracing::warn!(
                "Unknown embedding provider '{}', falling back to local",
                other
            );
            Ok(Arc::new(LocalEmbedder::new(config.dimensions)))
        }
    }
}
