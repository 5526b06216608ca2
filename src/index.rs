use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use ndarray::Array2;
use ndarray_npy::ReadNpyExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub const EMBEDDINGS_FILE: &str = "chunk_embeddings.npy";
pub const CHUNKS_FILE: &str = "chunks.json";

/// Retrieval failures. `Unavailable` is fatal for the whole retrieval path
/// and must reach the user as such, never degrade into an empty result.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("knowledge base index unavailable at {path}: {reason}")]
    Unavailable { path: String, reason: String },
    #[error("knowledge base index is corrupt: {0}")]
    Corrupt(String),
    #[error("failed to embed query: {0}")]
    Embedding(String),
}

#[derive(Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
}

/// Pre-built embedding index over the knowledge base chunks. Queries are
/// embedded locally with the same ONNX model the index was built with and
/// ranked by cosine similarity. Read-only after load.
pub struct ChunkIndex {
    embeddings: Array2<f32>,
    chunks: Vec<String>,
    model: Option<TextEmbedding>,
}

impl ChunkIndex {
    /// Load the embedding matrix and chunk texts from an index directory.
    pub fn load(data_dir: &Path) -> Result<Self, IndexError> {
        let embeddings_path = data_dir.join(EMBEDDINGS_FILE);
        let chunks_path = data_dir.join(CHUNKS_FILE);
        let unavailable = |reason: String| IndexError::Unavailable {
            path: data_dir.display().to_string(),
            reason,
        };

        let embeddings_file = File::open(&embeddings_path)
            .map_err(|e| unavailable(format!("cannot open {}: {}", EMBEDDINGS_FILE, e)))?;
        let embeddings: Array2<f32> = Array2::read_npy(embeddings_file)
            .map_err(|e| IndexError::Corrupt(format!("bad .npy data: {}", e)))?;

        let chunks_file = File::open(&chunks_path)
            .map_err(|e| unavailable(format!("cannot open {}: {}", CHUNKS_FILE, e)))?;
        let records: Vec<ChunkRecord> = serde_json::from_reader(BufReader::new(chunks_file))
            .map_err(|e| IndexError::Corrupt(format!("bad chunk metadata: {}", e)))?;
        let chunks: Vec<String> = records.into_iter().map(|r| r.text).collect();

        if embeddings.nrows() != chunks.len() {
            return Err(IndexError::Corrupt(format!(
                "embedding count ({}) doesn't match chunk count ({})",
                embeddings.nrows(),
                chunks.len()
            )));
        }

        info!(
            "loaded knowledge base index: {} chunks from {}",
            chunks.len(),
            data_dir.display()
        );

        Ok(Self {
            embeddings,
            chunks,
            model: None,
        })
    }

    /// Build an index directly from chunk texts and their embeddings.
    pub fn from_parts(embeddings: Array2<f32>, chunks: Vec<String>) -> Self {
        Self {
            embeddings,
            chunks,
            model: None,
        }
    }

    /// Initialize the embedding model (lazy-loaded on first query). The model
    /// is cached under ~/.cache/fastembed/ on first use; download progress is
    /// suppressed so it can't corrupt the TUI display.
    fn ensure_model(&mut self) -> Result<(), IndexError> {
        if self.model.is_none() {
            let options = InitOptions::new(EmbeddingModel::BGESmallENV15)
                .with_show_download_progress(false);
            self.model = Some(
                TextEmbedding::try_new(options)
                    .map_err(|e| IndexError::Embedding(format!("model load failed: {}", e)))?,
            );
        }
        Ok(())
    }

    fn embed_query(&mut self, text: &str) -> Result<Vec<f32>, IndexError> {
        self.ensure_model()?;

        let model = self.model.as_mut().unwrap();
        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embedding("no embedding returned".to_string()))
    }

    /// Return the top-k chunks most similar to the query, best first. The
    /// result has at most k entries; the index itself is never mutated.
    pub fn retrieve(&mut self, query: &str, k: usize) -> Result<Vec<String>, IndexError> {
        let query_emb = self.embed_query(query)?;
        let ranked = rank_rows(&self.embeddings, &query_emb, k);

        Ok(ranked
            .into_iter()
            .map(|(i, _score)| self.chunks[i].clone())
            .collect())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Rank matrix rows by cosine similarity against the query embedding,
/// highest first, truncated to k. Ties keep the native row order.
fn rank_rows(embeddings: &Array2<f32>, query: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut scores: Vec<(usize, f32)> = embeddings
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let score = cosine_similarity(row.as_slice().unwrap(), query);
            (i, score)
        })
        .collect();

    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scores.truncate(k);
    scores
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &b);
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_rank_rows_orders_by_similarity_and_caps_at_k() {
        let embeddings = array![
            [1.0, 0.0],  // orthogonal to query
            [0.0, 1.0],  // identical direction
            [0.5, 0.5],  // in between
        ];
        let query = vec![0.0, 1.0];

        let ranked = rank_rows(&embeddings, &query, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, 1);
        assert_eq!(ranked[1].0, 2);
    }

    #[test]
    fn test_rank_rows_with_k_larger_than_index() {
        let embeddings = array![[1.0, 0.0], [0.0, 1.0]];
        let ranked = rank_rows(&embeddings, &[1.0, 0.0], 10);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_from_parts_exposes_chunk_count() {
        let index = ChunkIndex::from_parts(array![[1.0_f32, 0.0]], vec!["chunk".to_string()]);
        assert_eq!(index.len(), 1);
        assert!(!index.is_empty());
    }

    #[test]
    fn test_load_missing_dir_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no_such_index");
        match ChunkIndex::load(&missing) {
            Err(IndexError::Unavailable { .. }) => {}
            other => panic!("expected Unavailable, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_load_rejects_mismatched_counts() {
        use ndarray_npy::WriteNpyExt;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let embeddings: Array2<f32> = array![[1.0, 0.0], [0.0, 1.0]];
        let file = File::create(dir.path().join(EMBEDDINGS_FILE)).unwrap();
        embeddings.write_npy(file).unwrap();

        let mut chunks = File::create(dir.path().join(CHUNKS_FILE)).unwrap();
        chunks
            .write_all(br#"[{"text":"only one chunk"}]"#)
            .unwrap();

        match ChunkIndex::load(dir.path()) {
            Err(IndexError::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {:?}", other.err()),
        }
    }
}
