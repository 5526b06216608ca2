use anyhow::{bail, Context, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use ndarray::Array2;
use ndarray_npy::WriteNpyExt;
use std::fs::{self, File};
use std::path::Path;
use tracing::info;

use crate::index::{ChunkRecord, CHUNKS_FILE, EMBEDDINGS_FILE};

pub const DEFAULT_CHUNK_SIZE: usize = 2500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 300;

/// Split a document into chunks of at most `chunk_size` characters, preferring
/// paragraph breaks, then line breaks, then word boundaries. Consecutive
/// chunks share up to `overlap` trailing characters of context.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    assert!(overlap < chunk_size, "overlap must be smaller than chunk size");

    let pieces = decompose(text, chunk_size, &["\n\n", "\n", " "]);

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for piece in pieces {
        let piece_len = piece.chars().count();

        if current_len > 0 && current_len + piece_len > chunk_size {
            // Seed the next chunk with the tail of this one for continuity.
            let tail: String = current
                .chars()
                .skip(current_len.saturating_sub(overlap))
                .collect();
            chunks.push(std::mem::take(&mut current));
            current = tail;
            current_len = current.chars().count();

            if current_len + piece_len > chunk_size {
                current.clear();
                current_len = 0;
            }
        }

        current.push_str(&piece);
        current_len += piece_len;
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

/// Break text into pieces no longer than `chunk_size`, trying each separator
/// in turn and falling back to a hard character split.
fn decompose(text: &str, chunk_size: usize, separators: &[&str]) -> Vec<String> {
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }

    match separators.first() {
        Some(sep) => {
            let mut pieces = Vec::new();
            for part in text.split_inclusive(*sep) {
                if part.chars().count() <= chunk_size {
                    pieces.push(part.to_string());
                } else {
                    pieces.extend(decompose(part, chunk_size, &separators[1..]));
                }
            }
            pieces
        }
        None => text
            .chars()
            .collect::<Vec<_>>()
            .chunks(chunk_size)
            .map(|c| c.iter().collect())
            .collect(),
    }
}

/// Build the vector index: read the source document, split it, embed every
/// chunk and write the embedding matrix plus chunk texts to `out_dir`.
pub fn build_index(
    source: &Path,
    out_dir: &Path,
    chunk_size: usize,
    overlap: usize,
) -> Result<()> {
    info!("reading source document {}", source.display());
    let text = fs::read_to_string(source)
        .with_context(|| format!("failed to read source document {}", source.display()))?;
    if text.trim().is_empty() {
        bail!("source document {} is empty", source.display());
    }

    let chunks = split_text(&text, chunk_size, overlap);
    info!("split document into {} chunks", chunks.len());

    info!("initializing embedding model (downloads on first use)");
    let options =
        InitOptions::new(EmbeddingModel::BGESmallENV15).with_show_download_progress(true);
    let mut model =
        TextEmbedding::try_new(options).context("failed to initialize embedding model")?;

    let embeddings = model
        .embed(chunks.clone(), None)
        .context("failed to embed chunks")?;
    let dim = embeddings.first().map(|e| e.len()).unwrap_or(0);
    let flat: Vec<f32> = embeddings.into_iter().flatten().collect();
    let matrix = Array2::from_shape_vec((chunks.len(), dim), flat)
        .context("embedding rows have inconsistent dimensions")?;

    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create index directory {}", out_dir.display()))?;

    let embeddings_path = out_dir.join(EMBEDDINGS_FILE);
    matrix
        .write_npy(File::create(&embeddings_path)?)
        .with_context(|| format!("failed to write {}", embeddings_path.display()))?;

    let records: Vec<ChunkRecord> = chunks.into_iter().map(|text| ChunkRecord { text }).collect();
    let chunks_path = out_dir.join(CHUNKS_FILE);
    serde_json::to_writer(File::create(&chunks_path)?, &records)
        .with_context(|| format!("failed to write {}", chunks_path.display()))?;

    info!(
        "vector index built: {} chunks in {}",
        records.len(),
        out_dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_a_single_chunk() {
        let chunks = split_text("a short document", 100, 10);
        assert_eq!(chunks, vec!["a short document".to_string()]);
    }

    #[test]
    fn test_every_chunk_respects_the_size_limit() {
        let paragraphs: Vec<String> = (0..40)
            .map(|i| format!("Paragraph {} with several words of filler text.", i))
            .collect();
        let text = paragraphs.join("\n\n");

        let chunks = split_text(&text, 120, 20);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                chunk.chars().count() <= 120,
                "chunk of {} chars exceeds limit",
                chunk.chars().count()
            );
        }
    }

    #[test]
    fn test_consecutive_chunks_share_overlap() {
        let words: Vec<String> = (0..200).map(|i| format!("word{}", i)).collect();
        let text = words.join(" ");

        let chunks = split_text(&text, 100, 30);
        assert!(chunks.len() > 1);

        let tail: String = chunks[0]
            .chars()
            .skip(chunks[0].chars().count().saturating_sub(30))
            .collect();
        assert!(chunks[1].starts_with(&tail));
    }

    #[test]
    fn test_unbroken_text_falls_back_to_hard_split() {
        let text = "z".repeat(500);
        let chunks = split_text(&text, 100, 10);
        assert!(chunks.len() >= 5);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
        }
    }

    #[test]
    fn test_whitespace_only_text_yields_no_chunks() {
        assert!(split_text("   \n\n  ", 100, 10).is_empty());
    }
}
