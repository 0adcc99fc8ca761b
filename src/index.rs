//! In-memory vector index with brute-force top-K retrieval.
//!
//! The index mirrors the store's chunk collection in insertion order and
//! scans it linearly: corpora are personal-scale (at most a few thousand
//! chunks), so an approximate-nearest-neighbor structure would buy nothing.
//! Query and stored vectors are unit-norm, so the dot product is the cosine
//! similarity. Ties keep insertion order (the sort is stable over the
//! insertion-ordered list).

use crate::embedding::dot;
use crate::models::{Chunk, Retrieved};

#[derive(Default)]
pub struct VectorIndex {
    chunks: Vec<Chunk>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole index (store reload, import).
    pub fn replace(&mut self, chunks: Vec<Chunk>) {
        self.chunks = chunks;
    }

    pub fn extend(&mut self, chunks: impl IntoIterator<Item = Chunk>) {
        self.chunks.extend(chunks);
    }

    /// Drop every chunk from position `len` on (ingestion rollback).
    pub fn truncate(&mut self, len: usize) {
        self.chunks.truncate(len);
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of chunks currently carrying an embedding.
    pub fn embedded_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.embedding.is_some()).count()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Assign an embedding to the chunk at `position` (re-indexing).
    pub fn set_embedding(&mut self, position: usize, embedding: Vec<f32>) {
        if let Some(chunk) = self.chunks.get_mut(position) {
            chunk.embedding = Some(embedding);
        }
    }

    /// The `k` chunks most similar to the unit-norm query vector, sorted by
    /// score descending. Chunks without an embedding are skipped silently.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<Retrieved> {
        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(i, chunk)| {
                chunk
                    .embedding
                    .as_ref()
                    .map(|embedding| (i, dot(query, embedding)))
            })
            .collect();

        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| Retrieved {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with(id: &str, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            id: id.to_string(),
            doc_id: "d".to_string(),
            doc_name: "d.txt".to_string(),
            page: 1,
            ordinal: 0,
            text: "text".to_string(),
            embedding,
            extra: Default::default(),
        }
    }

    /// Axis-aligned unit vector `e_i` in `dims` dimensions.
    fn axis(i: usize, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[i] = 1.0;
        v
    }

    #[test]
    fn returns_at_most_k_sorted_descending() {
        let mut index = VectorIndex::new();
        for i in 0..10 {
            index.extend([chunk_with(&format!("c{}", i), Some(axis(i, 10)))]);
        }
        // dot(query, e_i) = query[i], so scores decrease with i
        let query: Vec<f32> = (0..10).map(|i| (10 - i) as f32 / 10.0).collect();
        let hits = index.top_k(&query, 4);
        assert_eq!(hits.len(), 4);
        for pair in hits.windows(2) {
            assert!(pair[0].score > pair[1].score);
        }
        assert_eq!(hits[0].chunk.id, "c0");
    }

    #[test]
    fn axis_query_ranks_matching_chunk_first() {
        let mut index = VectorIndex::new();
        for i in 0..10 {
            index.extend([chunk_with(&format!("c{}", i), Some(axis(i, 10)))]);
        }
        let hits = index.top_k(&axis(3, 10), 6);
        assert_eq!(hits.len(), 6);
        assert_eq!(hits[0].chunk.id, "c3");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[0].chunk.embedding, Some(axis(3, 10)));
    }

    #[test]
    fn retrieval_is_deterministic() {
        let mut index = VectorIndex::new();
        for i in 0..10 {
            index.extend([chunk_with(&format!("c{}", i), Some(axis(i, 10)))]);
        }
        let q = axis(2, 10);
        let a: Vec<String> = index.top_k(&q, 6).iter().map(|h| h.chunk.id.clone()).collect();
        let b: Vec<String> = index.top_k(&q, 6).iter().map(|h| h.chunk.id.clone()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn unembedded_chunks_are_skipped() {
        let mut index = VectorIndex::new();
        index.extend([
            chunk_with("embedded", Some(vec![1.0, 0.0])),
            chunk_with("bare", None),
        ]);
        let hits = index.top_k(&[1.0, 0.0], 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "embedded");
        assert_eq!(index.embedded_count(), 1);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut index = VectorIndex::new();
        index.extend([
            chunk_with("first", Some(vec![1.0, 0.0])),
            chunk_with("second", Some(vec![1.0, 0.0])),
            chunk_with("third", Some(vec![1.0, 0.0])),
        ]);
        let hits = index.top_k(&[1.0, 0.0], 3);
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = VectorIndex::new();
        assert!(index.top_k(&[1.0], 6).is_empty());
    }
}
