//! Flat (brute force) vector index persisted as JSON.

use super::splitter::Chunk;
use crate::persistence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    pub version: u32,
    /// `Embedder::provider_name()` of the model that produced the vectors.
    pub embedder: String,
    pub dimensions: usize,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<IndexEntry>,
}

impl FlatIndex {
    pub fn new(embedder: impl Into<String>, dimensions: usize) -> Self {
        Self {
            version: FORMAT_VERSION,
            embedder: embedder.into(),
            dimensions,
            created_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: Chunk, vector: Vec<f32>) {
        self.entries.push(IndexEntry {
            text: chunk.text,
            metadata: chunk.metadata,
            vector,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `k` entries closest to `query`, as `(entry, squared L2 distance)`,
    /// closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(&IndexEntry, f32)> {
        let mut scored: Vec<(&IndexEntry, f32)> = self
            .entries
            .iter()
            .map(|entry| (entry, squared_l2(query, &entry.vector)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        scored
    }

    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(INDEX_FILE)
    }

    pub fn save(&self, dir: &Path) -> io::Result<()> {
        persistence::atomic_write_json(&Self::path_in(dir), self)
    }

    /// `Ok(None)` when no index has been saved in `dir`.
    pub fn load(dir: &Path) -> io::Result<Option<Self>> {
        persistence::load_json(&Self::path_in(dir))
    }
}

/// Squared Euclidean distance. Vectors of different lengths compare over
/// their common prefix; the index rejects such queries before getting here.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_squared_l2() {
        assert_eq!(squared_l2(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(squared_l2(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_search_orders_closest_first_and_limits() {
        let mut index = FlatIndex::new("local:tf2", 2);
        index.push(chunk("far"), vec![10.0, 10.0]);
        index.push(chunk("near"), vec![1.0, 0.0]);
        index.push(chunk("mid"), vec![3.0, 0.0]);

        let hits = index.search(&[0.0, 0.0], 2);
        let texts: Vec<&str> = hits.iter().map(|(e, _)| e.text.as_str()).collect();
        assert_eq!(texts, vec!["near", "mid"]);
        assert_eq!(hits[0].1, 1.0);
        assert_eq!(hits[1].1, 9.0);
    }

    #[test]
    fn test_search_k_larger_than_index() {
        let mut index = FlatIndex::new("local:tf1", 1);
        index.push(chunk("only"), vec![0.5]);
        assert_eq!(index.search(&[0.0], 10).len(), 1);
        assert!(FlatIndex::new("x", 1).search(&[0.0], 3).is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("index");
        assert!(FlatIndex::load(&index_dir).unwrap().is_none());

        let mut index = FlatIndex::new("local:tf3", 3);
        index.push(chunk("hello"), vec![1.0, 0.0, 0.0]);
        index.save(&index_dir).unwrap();

        let loaded = FlatIndex::load(&index_dir).unwrap().unwrap();
        assert_eq!(loaded.embedder, "local:tf3");
        assert_eq!(loaded.dimensions, 3);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries[0].text, "hello");
    }
}
