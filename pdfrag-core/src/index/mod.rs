//! Vector index over the parsed Markdown of an upload.
//!
//! `build` splits `output.md` into header-scoped chunks, embeds them and
//! persists a [`FlatIndex`] under `index/`. `search` embeds the query with the
//! same embedder and returns the nearest chunks by squared L2 distance.

pub mod splitter;
pub mod store;

use crate::config::IndexConfig;
use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::pdf::StorageLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use splitter::{Chunk, HEADER_1, HEADER_2, MarkdownHeaderSplitter, split_markdown};
pub use store::FlatIndex;

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    /// Squared L2 distance to the query; lower is closer.
    pub score: f32,
    pub metadata: BTreeMap<String, String>,
}

pub struct IndexService {
    layout: StorageLayout,
    embedder: Arc<dyn Embedder>,
    splitter: MarkdownHeaderSplitter,
}

impl std::fmt::Debug for IndexService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexService")
            .field("root", &self.layout.root())
            .field("embedder", &self.embedder.provider_name())
            .finish()
    }
}

impl IndexService {
    pub fn new(layout: StorageLayout, embedder: Arc<dyn Embedder>, config: &IndexConfig) -> Self {
        Self {
            layout,
            embedder,
            splitter: MarkdownHeaderSplitter::new(config.max_chunk_chars),
        }
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.provider_name()
    }

    /// Build and persist the index for `file_id`; returns the chunk count.
    pub async fn build(&self, file_id: &str) -> Result<usize, IndexError> {
        let md_path = self.layout.markdown_output(file_id);
        let markdown = match tokio::fs::read_to_string(&md_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::MarkdownNotFound {
                    file_id: file_id.to_string(),
                });
            }
            Err(e) => {
                return Err(IndexError::Storage {
                    message: format!("reading {}: {}", md_path.display(), e),
                });
            }
        };

        let chunks = self.splitter.split(&markdown);
        if chunks.is_empty() {
            return Err(IndexError::EmptyMarkdown {
                file_id: file_id.to_string(),
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(IndexError::Embedding {
                message: format!(
                    "expected {} vectors, got {}",
                    chunks.len(),
                    vectors.len()
                ),
            });
        }

        let dimensions = vectors
            .first()
            .map(Vec::len)
            .unwrap_or_else(|| self.embedder.dimensions());
        let mut index = FlatIndex::new(self.embedder.provider_name(), dimensions);
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            index.push(chunk, vector);
        }
        let count = index.len();

        let dir = self.layout.index_dir(file_id);
        tokio::task::spawn_blocking(move || index.save(&dir))
            .await
            .map_err(|e| IndexError::Storage {
                message: format!("save task failed: {}", e),
            })?
            .map_err(|e| IndexError::Storage {
                message: e.to_string(),
            })?;

        tracing::info!(
            file_id,
            chunks = count,
            embedder = self.embedder.provider_name(),
            "Index built"
        );
        Ok(count)
    }

    /// Return up to `k` chunks closest to `query`.
    pub async fn search(
        &self,
        file_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let dir = self.layout.index_dir(file_id);
        let index = tokio::task::spawn_blocking(move || FlatIndex::load(&dir))
            .await
            .map_err(|e| IndexError::Storage {
                message: format!("load task failed: {}", e),
            })?
            .map_err(|e| IndexError::Storage {
                message: e.to_string(),
            })?
            .ok_or_else(|| IndexError::IndexNotFound {
                file_id: file_id.to_string(),
            })?;

        if index.embedder != self.embedder.provider_name() {
            return Err(IndexError::Mismatch {
                built_with: index.embedder,
                queried_with: self.embedder.provider_name().to_string(),
            });
        }

        let query_vector = self.embedder.embed(query).await?;
        if query_vector.len() != index.dimensions {
            return Err(IndexError::Mismatch {
                built_with: format!("{} dimensions", index.dimensions),
                queried_with: format!("{} dimensions", query_vector.len()),
            });
        }

        let hits: Vec<SearchHit> = index
            .search(&query_vector, k)
            .into_iter()
            .map(|(entry, score)| SearchHit {
                text: entry.text.clone(),
                score,
                metadata: entry.metadata.clone(),
            })
            .collect();
        tracing::debug!(file_id, k, hits = hits.len(), "Index searched");
        Ok(hits)
    }
}
